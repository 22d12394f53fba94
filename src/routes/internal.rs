use axum::{
    extract::{Query, State},
    Json,
};

use crate::{
    auth::JobCaller,
    error::AppResult,
    retention::{engine::TRIGGER_INTERNAL, RetentionReport},
    routes::admin::{run_retention_blocking, RunRetentionQuery},
    state::AppState,
};

/// Entry point for an external scheduler holding the pre-shared job token.
pub async fn run_retention(
    State(state): State<AppState>,
    _caller: JobCaller,
    Query(query): Query<RunRetentionQuery>,
) -> AppResult<Json<RetentionReport>> {
    run_retention_blocking(&state, query.dry_run, TRIGGER_INTERNAL)
        .await
        .map(Json)
}
