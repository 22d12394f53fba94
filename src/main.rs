use std::{net::SocketAddr, sync::Arc, time::Duration};

use routesheets::{
    auth::jwt::JwtService, config::AppConfig, db, init_tracing, render::PdfiumRenderer, routes,
    state::AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "api",
        database_url = %config.redacted_database_url(),
        pool_size = config.database_max_pool_size,
        admin_configured = config.admin_password_hash.is_some(),
        internal_trigger_enabled = config.retention_job_token.is_some(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
    let jwt = JwtService::from_config(&config)?;
    let attempts = config.startup_db_retries;
    let retry_interval = Duration::from_secs(config.startup_db_retry_interval_seconds.max(1));
    let addr: SocketAddr = format!("{}:{}", config.server_host, config.server_port).parse()?;

    let state = AppState::new(pool.clone(), config, Arc::new(PdfiumRenderer::new()), jwt);

    match db::prepare_with_retry(&pool, attempts).await {
        Ok(()) => state.health.mark_schema_ready(),
        Err(err) => {
            tracing::error!(error = %err, "database unavailable, serving in degraded mode");
            db::prepare_in_background(pool.clone(), state.health.clone(), retry_interval);
        }
    }

    let app = routes::create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "api listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("api received shutdown signal");
        })
        .await?;

    Ok(())
}
