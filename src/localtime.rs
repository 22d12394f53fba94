use chrono::{DateTime, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::{Europe::Madrid, Tz};
use serde::{Deserialize, Deserializer};

/// Zone drivers work in. Calendar dates in filters and naive pickup times
/// are read in this zone; everything is stored in UTC.
pub const LOCAL_TZ: Tz = Madrid;

/// `[start, end)` of a local calendar day, as UTC instants.
pub fn day_bounds_utc(date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start = local_midnight_utc(date);
    let end = date
        .succ_opt()
        .map(local_midnight_utc)
        .unwrap_or(NaiveDateTime::MAX);
    (start, end)
}

fn local_midnight_utc(date: NaiveDate) -> NaiveDateTime {
    let midnight = date.and_time(NaiveTime::MIN);
    match LOCAL_TZ.from_local_datetime(&midnight) {
        LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => at.naive_utc(),
        LocalResult::None => midnight,
    }
}

/// Accepts RFC 3339 with an offset, or a naive ISO datetime taken as local
/// time. A naive time inside a DST gap is rejected.
pub fn parse_pickup(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return Ok(at.with_timezone(&Utc));
    }

    let naive = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .ok_or_else(|| format!("invalid pickup datetime {raw:?}"))?;

    match LOCAL_TZ.from_local_datetime(&naive) {
        LocalResult::Single(at) | LocalResult::Ambiguous(at, _) => Ok(at.with_timezone(&Utc)),
        LocalResult::None => Err(format!("{raw} does not exist in local time")),
    }
}

pub fn deserialize_pickup<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_pickup(&raw).map_err(serde::de::Error::custom)
}

/// Local wall-clock rendering of a stored UTC instant.
pub fn format_local(at: NaiveDateTime, format: &str) -> String {
    Utc.from_utc_datetime(&at)
        .with_timezone(&LOCAL_TZ)
        .format(format)
        .to_string()
}
