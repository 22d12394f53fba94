use chrono::{DateTime, NaiveDateTime};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid cursor")]
pub struct InvalidCursor;

/// Keyset position: the sort timestamp and id of the last row of a page.
/// Listings order by `(timestamp DESC, id DESC)` and resume strictly after it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub at: NaiveDateTime,
    pub id: Uuid,
}

impl Cursor {
    pub fn new(at: NaiveDateTime, id: Uuid) -> Self {
        Self { at, id }
    }

    pub fn encode(&self) -> String {
        format!("{}_{}", self.at.and_utc().timestamp_micros(), self.id)
    }

    pub fn decode(raw: &str) -> Result<Self, InvalidCursor> {
        let (micros, id) = raw.split_once('_').ok_or(InvalidCursor)?;
        let micros: i64 = micros.parse().map_err(|_| InvalidCursor)?;
        let at = DateTime::from_timestamp_micros(micros)
            .ok_or(InvalidCursor)?
            .naive_utc();
        let id = Uuid::parse_str(id).map_err(|_| InvalidCursor)?;
        Ok(Self { at, id })
    }

    pub fn parse_optional(raw: Option<&str>) -> Result<Option<Self>, InvalidCursor> {
        raw.filter(|value| !value.is_empty())
            .map(Self::decode)
            .transpose()
    }
}

/// One page of a listing. `next_cursor` is set only when the page came back
/// full, so a short page marks the end.
#[derive(Debug)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub count: usize,
    pub next_cursor: Option<String>,
}

impl<T> Page<T> {
    pub fn from_rows(items: Vec<T>, limit: i64, key: impl Fn(&T) -> Cursor) -> Self {
        let next_cursor = if items.len() as i64 == limit {
            items.last().map(|last| key(last).encode())
        } else {
            None
        };
        Self {
            count: items.len(),
            items,
            next_cursor,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            count: self.count,
            items: self.items.into_iter().map(f).collect(),
            next_cursor: self.next_cursor,
        }
    }
}
