use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use thiserror::Error;
use uuid::Uuid;

use crate::models::NewRateLimitEvent;
use crate::schema::rate_limit_events;

pub const ACTION_PDF_SINGLE: &str = "pdf_single";
pub const ACTION_PDF_RANGE: &str = "pdf_range";
pub const ACTION_ADMIN_LOGIN: &str = "admin_login";

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("rate limit exceeded: at most {limit} requests per {window_minutes} minutes")]
    Exceeded { limit: i64, window_minutes: i64 },
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// Fixed trailing-window counter over stored events. The count is the number
/// of events newer than `now - window`; nothing is decremented.
///
/// `check_and_would_allow` and `record` are separate statements, so callers
/// racing at the boundary may both pass. Fine for cost guards, not for
/// security-critical limits.
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    limit: i64,
    window: ChronoDuration,
}

impl RateWindow {
    pub fn new(limit: i64, window_minutes: i64) -> Self {
        Self {
            limit: limit.max(1),
            window: ChronoDuration::minutes(window_minutes.max(1)),
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub fn window_minutes(&self) -> i64 {
        self.window.num_minutes()
    }

    pub fn window_start(&self, now: NaiveDateTime) -> NaiveDateTime {
        now - self.window
    }

    pub fn count(&self, conn: &mut PgConnection, owner_key: &str, action: &str) -> Result<i64, RateLimitError> {
        let since = self.window_start(Utc::now().naive_utc());
        let count = rate_limit_events::table
            .filter(rate_limit_events::owner_key.eq(owner_key))
            .filter(rate_limit_events::action.eq(action))
            .filter(rate_limit_events::created_at.ge(since))
            .select(count_star())
            .first::<i64>(conn)?;
        Ok(count)
    }

    pub fn check_and_would_allow(
        &self,
        conn: &mut PgConnection,
        owner_key: &str,
        action: &str,
    ) -> Result<bool, RateLimitError> {
        Ok(self.count(conn, owner_key, action)? < self.limit)
    }

    pub fn record(&self, conn: &mut PgConnection, owner_key: &str, action: &str) -> Result<(), RateLimitError> {
        let now = Utc::now().naive_utc();
        let event = NewRateLimitEvent {
            id: Uuid::new_v4(),
            owner_key,
            action,
            created_at: now,
            expires_at: now + self.window,
        };
        diesel::insert_into(rate_limit_events::table)
            .values(&event)
            .execute(conn)?;
        Ok(())
    }

    /// Check, then record on success. Returns `Exceeded` without recording
    /// when the window is full.
    pub fn enforce(&self, conn: &mut PgConnection, owner_key: &str, action: &str) -> Result<(), RateLimitError> {
        if !self.check_and_would_allow(conn, owner_key, action)? {
            tracing::warn!(owner_key, action, limit = self.limit, "rate limit exceeded");
            return Err(self.exceeded());
        }
        self.record(conn, owner_key, action)
    }

    pub fn exceeded(&self) -> RateLimitError {
        RateLimitError::Exceeded {
            limit: self.limit,
            window_minutes: self.window_minutes(),
        }
    }
}

pub fn sweep_expired(conn: &mut PgConnection, now: NaiveDateTime) -> Result<usize, RateLimitError> {
    let removed = diesel::delete(rate_limit_events::table.filter(rate_limit_events::expires_at.le(now)))
        .execute(conn)?;
    Ok(removed)
}
