use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use diesel::{
    pg::PgConnection,
    r2d2::{ConnectionManager, PooledConnection},
};

use crate::{
    auth::jwt::JwtService,
    cache::ArtifactCache,
    config::AppConfig,
    db::PgPool,
    error::{AppError, AppResult},
    notify::{AccountNotifier, LogNotifier},
    rate_limit::RateWindow,
    render::SheetRenderer,
    retention::RetentionEngine,
};

pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Startup outcome shared with the health endpoint.
#[derive(Debug, Default)]
pub struct HealthState {
    schema_ready: AtomicBool,
}

impl HealthState {
    pub fn schema_ready(&self) -> bool {
        self.schema_ready.load(Ordering::Relaxed)
    }

    pub fn mark_schema_ready(&self) {
        self.schema_ready.store(true, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, Debug)]
pub struct RateLimits {
    pub pdf_single: RateWindow,
    pub pdf_range: RateWindow,
    pub admin_login: RateWindow,
}

impl RateLimits {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            pdf_single: RateWindow::new(config.pdf_rate_limit, config.pdf_rate_window_minutes),
            pdf_range: RateWindow::new(config.pdf_range_rate_limit, config.pdf_rate_window_minutes),
            admin_login: RateWindow::new(
                config.admin_login_rate_limit,
                config.admin_login_window_minutes,
            ),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<AppConfig>,
    pub renderer: Arc<dyn SheetRenderer>,
    pub notifier: Arc<dyn AccountNotifier>,
    pub jwt: JwtService,
    pub health: Arc<HealthState>,
    pub cache: ArtifactCache,
    pub retention: RetentionEngine,
    pub limits: RateLimits,
}

impl AppState {
    pub fn new(
        pool: PgPool,
        config: AppConfig,
        renderer: Arc<dyn SheetRenderer>,
        jwt: JwtService,
    ) -> Self {
        let cache = ArtifactCache::new(config.pdf_cache_ttl_days);
        let retention = RetentionEngine::new(Duration::from_secs(
            config.retention_lock_ttl_seconds.max(1) as u64,
        ));
        let limits = RateLimits::from_config(&config);
        Self {
            pool,
            config: Arc::new(config),
            renderer,
            notifier: Arc::new(LogNotifier),
            jwt,
            health: Arc::new(HealthState::default()),
            cache,
            retention,
            limits,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn AccountNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn db(&self) -> AppResult<PgPooledConnection> {
        self.pool.get().map_err(|err| {
            tracing::warn!(error = %err, "database pool error");
            AppError::service_unavailable("database unavailable")
        })
    }
}
