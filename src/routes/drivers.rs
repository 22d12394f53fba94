use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

use crate::{
    auth::AuthenticatedUser,
    drivers::{self, DriverInput},
    error::AppResult,
    models::Driver,
    state::AppState,
};

pub async fn list_drivers(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<Vec<Driver>>> {
    let mut conn = state.db()?;
    Ok(Json(drivers::list(&mut conn, user.user_id)?))
}

pub async fn create_driver(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<DriverInput>,
) -> AppResult<(StatusCode, Json<Driver>)> {
    let mut conn = state.db()?;
    let driver = drivers::create(&mut conn, user.user_id, &payload)?;
    Ok((StatusCode::CREATED, Json(driver)))
}

pub async fn update_driver(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverInput>,
) -> AppResult<Json<Driver>> {
    let mut conn = state.db()?;
    Ok(Json(drivers::update(&mut conn, user.user_id, id, &payload)?))
}

pub async fn delete_driver(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(id): Path<Uuid>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    drivers::delete(&mut conn, user.user_id, id)?;
    Ok(StatusCode::NO_CONTENT)
}
