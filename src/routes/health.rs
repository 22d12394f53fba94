use axum::{extract::State, http::StatusCode, response::Json};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::Serialize;

use crate::{retention::engine, state::AppState};

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub db_connected: bool,
    pub schema_ready: bool,
    pub admin_configured: bool,
    pub last_retention_run_at: Option<NaiveDateTime>,
}

/// Always answers 200 so a degraded instance stays reachable; `status` tells
/// whether the store is usable.
pub async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let schema_ready = state.health.schema_ready();
    let mut db_connected = false;
    let mut last_retention_run_at = None;

    if let Ok(mut conn) = state.pool.get() {
        db_connected = diesel::sql_query("SELECT 1").execute(&mut conn).is_ok();
        if db_connected && schema_ready {
            last_retention_run_at = engine::last_run(&mut conn)
                .ok()
                .flatten()
                .map(|run| run.run_at);
        }
    }

    let report = HealthReport {
        status: if db_connected && schema_ready {
            "ok"
        } else {
            "degraded"
        },
        db_connected,
        schema_ready,
        admin_configured: state.config.admin_password_hash.is_some(),
        last_retention_run_at,
    };
    (StatusCode::OK, Json(report))
}
