use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::Utc;

use super::{with_connection, PeriodicTask, TaskOutcome};
use crate::state::AppState;
use crate::sweep::sweep_expired;

pub struct ExpirySweepTask {
    every: Duration,
}

impl ExpirySweepTask {
    pub fn new(every: Duration) -> Self {
        Self { every }
    }
}

#[async_trait]
impl PeriodicTask for ExpirySweepTask {
    fn name(&self) -> &'static str {
        "expiry_sweep"
    }

    fn interval(&self) -> Duration {
        self.every
    }

    async fn run(&self, state: Arc<AppState>) -> TaskOutcome {
        let result = with_connection(&state, |conn| {
            sweep_expired(conn, Utc::now().naive_utc()).map_err(|err| err.to_string())
        })
        .await;

        match result {
            Ok(report) => TaskOutcome::Completed {
                detail: format!(
                    "removed={} cache={} rate_events={} reset_tokens={} refresh_tokens={} sheets={}",
                    report.total(),
                    report.cache_entries,
                    report.rate_events,
                    report.reset_tokens,
                    report.refresh_tokens,
                    report.route_sheets
                ),
            },
            Err(error) => TaskOutcome::Failed { error },
        }
    }
}
