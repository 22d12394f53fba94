//! Store-side expiry. PostgreSQL has no row TTL, so rows carrying an elapsed
//! `expires_at` (or `purge_at`) are deleted here on a timer. This backs up the
//! explicit retention pass; it never touches sequence counters.

use chrono::NaiveDateTime;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::auth::{reset, rotation, SessionError};
use crate::cache::{self, CacheError};
use crate::rate_limit::{self, RateLimitError};
use crate::schema::route_sheets;

#[derive(Debug, Error)]
pub enum SweepError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    RateLimit(#[from] RateLimitError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub cache_entries: usize,
    pub rate_events: usize,
    pub reset_tokens: usize,
    pub refresh_tokens: usize,
    pub route_sheets: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.cache_entries
            + self.rate_events
            + self.reset_tokens
            + self.refresh_tokens
            + self.route_sheets
    }
}

pub fn sweep_expired(conn: &mut PgConnection, now: NaiveDateTime) -> Result<SweepReport, SweepError> {
    let report = SweepReport {
        cache_entries: cache::sweep_expired(conn, now)?,
        rate_events: rate_limit::sweep_expired(conn, now)?,
        reset_tokens: reset::sweep_expired(conn, now)?,
        refresh_tokens: rotation::sweep_expired(conn, now)?,
        route_sheets: diesel::delete(route_sheets::table.filter(route_sheets::purge_at.le(now)))
            .execute(conn)?,
    };

    if report.route_sheets > 0 {
        tracing::warn!(
            count = report.route_sheets,
            "expiry sweep removed sheets the retention pass had not purged"
        );
    }
    Ok(report)
}
