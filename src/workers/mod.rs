use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::state::AppState;

pub mod retention;
pub mod sweep;

#[derive(Debug)]
pub enum TaskOutcome {
    Completed { detail: String },
    Skipped { reason: String },
    Failed { error: String },
}

/// Work executed on a fixed cadence. A failed tick is not retried; the next
/// tick is the retry.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;
    fn interval(&self) -> Duration;
    async fn run(&self, state: Arc<AppState>) -> TaskOutcome;
}

pub struct Worker {
    state: Arc<AppState>,
    tasks: Vec<Arc<dyn PeriodicTask>>,
}

impl Worker {
    pub fn new(state: Arc<AppState>, tasks: Vec<Arc<dyn PeriodicTask>>) -> Self {
        Self { state, tasks }
    }

    pub async fn run(&self) {
        info!(tasks = self.tasks.len(), "worker started");

        let handles: Vec<_> = self
            .tasks
            .iter()
            .cloned()
            .map(|task| {
                let state = self.state.clone();
                tokio::spawn(async move { drive(task, state).await })
            })
            .collect();

        for handle in handles {
            if let Err(err) = handle.await {
                error!(error = %err, "worker task loop terminated");
            }
        }
    }
}

async fn drive(task: Arc<dyn PeriodicTask>, state: Arc<AppState>) {
    let period = task.interval().max(Duration::from_secs(1));
    let mut timer = interval(period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        timer.tick().await;
        match task.run(state.clone()).await {
            TaskOutcome::Completed { detail } => info!(task = task.name(), %detail, "task completed"),
            TaskOutcome::Skipped { reason } => warn!(task = task.name(), %reason, "task skipped"),
            TaskOutcome::Failed { error } => error!(task = task.name(), %error, "task failed"),
        }
    }
}

/// Runs blocking database work for a task on the blocking pool.
pub(crate) async fn with_connection<F, T>(state: &AppState, f: F) -> Result<T, String>
where
    F: FnOnce(&mut diesel::PgConnection) -> Result<T, String> + Send + 'static,
    T: Send + 'static,
{
    let pool = state.pool.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = pool
            .get()
            .map_err(|err| format!("database pool error: {err}"))?;
        f(&mut conn)
    })
    .await
    .map_err(|err| format!("task panicked: {err}"))?
}

pub fn default_tasks(state: &AppState) -> Vec<Arc<dyn PeriodicTask>> {
    vec![
        Arc::new(retention::RetentionTask::new(Duration::from_secs(
            state.config.retention_interval_seconds,
        ))),
        Arc::new(sweep::ExpirySweepTask::new(Duration::from_secs(
            state.config.sweep_interval_seconds,
        ))),
    ]
}
