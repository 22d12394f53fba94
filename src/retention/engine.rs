use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, Utc};
use diesel::dsl::count_star;
use diesel::pg::PgConnection;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::lock::{self, LockError, RETENTION_LOCK_NAME};
use crate::models::{
    format_sheet_number, LifecycleStatus, NewRetentionRun, RetentionRun, Visibility,
};
use crate::schema::{retention_runs, route_sheets};

pub const TRIGGER_INTERNAL: &str = "internal";
pub const TRIGGER_ADMIN: &str = "admin_manual";
pub const TRIGGER_SCHEDULER: &str = "scheduler";
pub const TRIGGER_CLI: &str = "cli";

#[derive(Debug, Error)]
pub enum RetentionError {
    #[error("retention job already running, try again later")]
    AlreadyRunning,
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("failed to encode run stats: {0}")]
    Stats(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SheetStats {
    pub total: i64,
    pub visible: i64,
    pub hidden: i64,
    pub annulled: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RetentionReport {
    pub run_id: Option<Uuid>,
    pub run_at: NaiveDateTime,
    pub dry_run: bool,
    pub trigger: String,
    pub hidden_count: i64,
    pub purged_count: i64,
    pub duration_ms: i64,
    pub stats_before: SheetStats,
    pub stats_after: SheetStats,
}

/// Applies the hide and purge transitions to every eligible sheet in one
/// pass. Overlapping runs are excluded by the retention lock; each transition
/// is an idempotent bulk statement so a sheet touched twice is harmless.
#[derive(Debug, Clone)]
pub struct RetentionEngine {
    lock_ttl: Duration,
}

impl RetentionEngine {
    pub fn new(lock_ttl: Duration) -> Self {
        Self { lock_ttl }
    }

    pub fn run(
        &self,
        conn: &mut PgConnection,
        dry_run: bool,
        trigger: &str,
    ) -> Result<RetentionReport, RetentionError> {
        if dry_run {
            return self.preview(conn, trigger);
        }

        let owner_token = Uuid::new_v4().to_string();
        if !lock::try_acquire(conn, RETENTION_LOCK_NAME, &owner_token, self.lock_ttl)? {
            warn!(trigger, "retention run skipped, lock held elsewhere");
            return Err(RetentionError::AlreadyRunning);
        }

        let outcome = self.execute(conn, trigger);

        match lock::release(conn, RETENTION_LOCK_NAME, &owner_token) {
            Ok(true) => {}
            Ok(false) => warn!(trigger, "retention lock expired before release"),
            Err(err) => error!(trigger, error = %err, "failed to release retention lock"),
        }

        outcome
    }

    fn preview(&self, conn: &mut PgConnection, trigger: &str) -> Result<RetentionReport, RetentionError> {
        let started = Instant::now();
        let now = Utc::now().naive_utc();

        let to_hide: i64 = route_sheets::table
            .filter(route_sheets::hide_at.le(now))
            .filter(route_sheets::purge_at.gt(now))
            .filter(route_sheets::visibility.eq(Visibility::Visible.as_str()))
            .select(count_star())
            .first(conn)?;
        let to_purge: i64 = route_sheets::table
            .filter(route_sheets::purge_at.le(now))
            .select(count_star())
            .first(conn)?;
        let stats = collect_stats(conn)?;

        info!(trigger, to_hide, to_purge, "retention dry run");

        Ok(RetentionReport {
            run_id: None,
            run_at: now,
            dry_run: true,
            trigger: trigger.to_string(),
            hidden_count: to_hide,
            purged_count: to_purge,
            duration_ms: started.elapsed().as_millis() as i64,
            stats_before: stats,
            stats_after: stats,
        })
    }

    fn execute(&self, conn: &mut PgConnection, trigger: &str) -> Result<RetentionReport, RetentionError> {
        let started = Instant::now();
        let now = Utc::now().naive_utc();
        info!(trigger, run_at = %now, "retention run started");

        let stats_before = collect_stats(conn)?;

        // Sheets already due for purge go straight to deletion below.
        let hidden = diesel::update(
            route_sheets::table
                .filter(route_sheets::hide_at.le(now))
                .filter(route_sheets::purge_at.gt(now))
                .filter(route_sheets::visibility.eq(Visibility::Visible.as_str())),
        )
        .set(route_sheets::visibility.eq(Visibility::Hidden.as_str()))
        .execute(conn)? as i64;

        let purged: Vec<(Uuid, Uuid, i32, i64)> =
            diesel::delete(route_sheets::table.filter(route_sheets::purge_at.le(now)))
                .returning((
                    route_sheets::id,
                    route_sheets::user_id,
                    route_sheets::year,
                    route_sheets::seq,
                ))
                .get_results(conn)?;
        for (sheet_id, user_id, year, seq) in &purged {
            debug!(%sheet_id, %user_id, sheet_number = %format_sheet_number(*seq, *year), "purged route sheet");
        }
        let purged_count = purged.len() as i64;

        let stats_after = collect_stats(conn)?;
        let duration_ms = started.elapsed().as_millis() as i64;

        let run = NewRetentionRun {
            id: Uuid::new_v4(),
            run_at: now,
            trigger_source: trigger.to_string(),
            hidden_count: hidden,
            purged_count,
            duration_ms,
            stats_before: serde_json::to_value(stats_before)?,
            stats_after: serde_json::to_value(stats_after)?,
        };
        diesel::insert_into(retention_runs::table)
            .values(&run)
            .execute(conn)?;

        info!(
            trigger,
            hidden_count = hidden,
            purged_count,
            duration_ms,
            total = stats_after.total,
            visible = stats_after.visible,
            "retention run completed"
        );

        Ok(RetentionReport {
            run_id: Some(run.id),
            run_at: now,
            dry_run: false,
            trigger: trigger.to_string(),
            hidden_count: hidden,
            purged_count,
            duration_ms,
            stats_before,
            stats_after,
        })
    }
}

pub fn collect_stats(conn: &mut PgConnection) -> Result<SheetStats, diesel::result::Error> {
    let total: i64 = route_sheets::table.select(count_star()).first(conn)?;
    let visible: i64 = route_sheets::table
        .filter(route_sheets::visibility.eq(Visibility::Visible.as_str()))
        .select(count_star())
        .first(conn)?;
    let annulled: i64 = route_sheets::table
        .filter(route_sheets::status.eq(LifecycleStatus::Annulled.as_str()))
        .select(count_star())
        .first(conn)?;

    Ok(SheetStats {
        total,
        visible,
        hidden: total - visible,
        annulled,
    })
}

pub fn list_runs(conn: &mut PgConnection, limit: i64) -> Result<Vec<RetentionRun>, diesel::result::Error> {
    retention_runs::table
        .order(retention_runs::run_at.desc())
        .limit(limit.clamp(1, 200))
        .load(conn)
}

pub fn last_run(conn: &mut PgConnection) -> Result<Option<RetentionRun>, diesel::result::Error> {
    retention_runs::table
        .order(retention_runs::run_at.desc())
        .first(conn)
        .optional()
}
