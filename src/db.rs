use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::state::HealthState;

pub type PgPool = Pool<ConnectionManager<PgConnection>>;

pub const DEFAULT_MAX_POOL_SIZE: u32 = 4;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn init_pool_with_size(database_url: &str, max_size: u32) -> anyhow::Result<PgPool> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool_size = max_size.max(1);
    let pool = Pool::builder()
        .max_size(pool_size)
        .min_idle(Some(0))
        .connection_timeout(Duration::from_secs(10))
        .build_unchecked(manager);
    Ok(pool)
}

pub fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    let mut conn = pool
        .get()
        .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
    Ok(())
}

/// Applies pending migrations, retrying with exponential backoff while the
/// database is unreachable. Returns the last error once `attempts` run out.
pub async fn prepare_with_retry(pool: &PgPool, attempts: u32) -> anyhow::Result<()> {
    let attempts = attempts.max(1);
    let mut delay = Duration::from_millis(500);

    for attempt in 1..=attempts {
        let pool = pool.clone();
        let result = tokio::task::spawn_blocking(move || run_migrations(&pool))
            .await
            .map_err(|err| anyhow!("migration task panicked: {err}"))?;

        match result {
            Ok(()) => {
                info!(attempt, "database schema ready");
                return Ok(());
            }
            Err(err) if attempt < attempts => {
                warn!(attempt, error = %err, retry_in_ms = delay.as_millis() as u64, "database not ready");
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_secs(10));
            }
            Err(err) => return Err(err),
        }
    }

    Err(anyhow!("database setup attempts exhausted"))
}

/// Keeps retrying schema preparation after startup gave up, flipping the
/// health flag once it succeeds.
pub fn prepare_in_background(
    pool: PgPool,
    health: Arc<HealthState>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let attempt_pool = pool.clone();
            let result = tokio::task::spawn_blocking(move || run_migrations(&attempt_pool)).await;
            match result {
                Ok(Ok(())) => {
                    health.mark_schema_ready();
                    info!("database schema ready, leaving degraded mode");
                    return;
                }
                Ok(Err(err)) => warn!(error = %err, "database still unavailable"),
                Err(err) => warn!(error = %err, "migration task panicked"),
            }
        }
    })
}
