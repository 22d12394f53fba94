pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod drivers;
pub mod error;
pub mod localtime;
pub mod models;
pub mod notify;
pub mod pagination;
pub mod policy;
pub mod rate_limit;
pub mod render;
pub mod retention;
pub mod routes;
pub mod schema;
pub mod sequence;
pub mod sheets;
pub mod state;
pub mod sweep;
pub mod users;
pub mod workers;

#[cfg(test)]
pub(crate) mod testutil;

pub use workers::{default_tasks, PeriodicTask, Worker};

/// Installs the fmt subscriber shared by every binary.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
