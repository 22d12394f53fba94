use chrono::{DateTime, Months, NaiveDateTime, Utc};

use crate::policy::RetentionPolicy;

/// Instants at which a sheet created at `created_at` stops being visible to
/// its owner and is erased. Months are calendar months, clamped to the last
/// day of the target month (Jan 31 + 1 month = Feb 28/29).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionDates {
    pub hide_at: NaiveDateTime,
    pub purge_at: NaiveDateTime,
}

pub fn retention_dates(created_at: DateTime<Utc>, policy: RetentionPolicy) -> RetentionDates {
    RetentionDates {
        hide_at: add_months(created_at, policy.hide_after_months()),
        purge_at: add_months(created_at, policy.purge_after_months()),
    }
}

fn add_months(start: DateTime<Utc>, months: u32) -> NaiveDateTime {
    start
        .checked_add_months(Months::new(months))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
        .naive_utc()
}
