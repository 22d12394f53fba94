use std::sync::Arc;

use tokio::signal;

use routesheets::{
    auth::jwt::JwtService, config::AppConfig, db, default_tasks, init_tracing,
    render::PdfiumRenderer, state::AppState, Worker,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "worker",
        database_url = %config.redacted_database_url(),
        pool_size = 2,
        retention_interval_seconds = config.retention_interval_seconds,
        sweep_interval_seconds = config.sweep_interval_seconds,
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 2)?;
    db::prepare_with_retry(&pool, config.startup_db_retries).await?;
    let jwt = JwtService::from_config(&config)?;

    let state = Arc::new(AppState::new(pool, config, Arc::new(PdfiumRenderer::new()), jwt));
    let worker = Worker::new(state.clone(), default_tasks(&state));

    tokio::select! {
        _ = worker.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("worker received shutdown signal");
        }
    }

    Ok(())
}
