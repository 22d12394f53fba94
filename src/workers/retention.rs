use std::{sync::Arc, time::Duration};

use async_trait::async_trait;

use super::{with_connection, PeriodicTask, TaskOutcome};
use crate::retention::{engine::TRIGGER_SCHEDULER, RetentionError};
use crate::state::AppState;

pub struct RetentionTask {
    every: Duration,
}

impl RetentionTask {
    pub fn new(every: Duration) -> Self {
        Self { every }
    }
}

enum Pass {
    Ran { hidden: i64, purged: i64 },
    Contended,
}

#[async_trait]
impl PeriodicTask for RetentionTask {
    fn name(&self) -> &'static str {
        "retention"
    }

    fn interval(&self) -> Duration {
        self.every
    }

    async fn run(&self, state: Arc<AppState>) -> TaskOutcome {
        let engine = state.retention.clone();
        let result = with_connection(&state, move |conn| {
            match engine.run(conn, false, TRIGGER_SCHEDULER) {
                Ok(report) => Ok(Pass::Ran {
                    hidden: report.hidden_count,
                    purged: report.purged_count,
                }),
                Err(RetentionError::AlreadyRunning) => Ok(Pass::Contended),
                Err(err) => Err(err.to_string()),
            }
        })
        .await;

        match result {
            Ok(Pass::Ran { hidden, purged }) => TaskOutcome::Completed {
                detail: format!("hidden={hidden} purged={purged}"),
            },
            Ok(Pass::Contended) => TaskOutcome::Skipped {
                reason: "retention lock held by another runner".to_string(),
            },
            Err(error) => TaskOutcome::Failed { error },
        }
    }
}
