use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{password, reset, AdminUser},
    error::{AppError, AppResult},
    models::{AppSettings, RetentionRun},
    policy::{self, PolicyUpdate},
    rate_limit::ACTION_ADMIN_LOGIN,
    retention::{
        engine::{self, TRIGGER_ADMIN},
        RetentionReport,
    },
    routes::sheets::SheetView,
    sheets::{self, AdminSheetFilter, OwnedSheet},
    state::AppState,
    users::{self, ProfileUpdate, UserDetail, UserListFilter, UserProfile},
};

#[derive(Deserialize)]
pub struct AdminLoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AdminLoginResponse {
    pub access_token: String,
    pub token_type: String,
}

/// Failed attempts are recorded per username in the shared rate window, so
/// the throttle holds across every replica.
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<AdminLoginRequest>,
) -> AppResult<Json<AdminLoginResponse>> {
    let Some(expected_hash) = state.config.admin_password_hash.as_deref() else {
        return Err(AppError::service_unavailable("admin login not configured"));
    };

    let window = state.limits.admin_login;
    let key = format!("admin:{}", payload.username.trim().to_ascii_lowercase());
    let mut conn = state.db()?;
    if !window.check_and_would_allow(&mut conn, &key, ACTION_ADMIN_LOGIN)? {
        tracing::warn!(username = %payload.username, "admin login throttled");
        return Err(window.exceeded().into());
    }

    let valid = payload.username == state.config.admin_username
        && password::verify_password(&payload.password, expected_hash).unwrap_or(false);
    if !valid {
        window.record(&mut conn, &key, ACTION_ADMIN_LOGIN)?;
        tracing::warn!(username = %payload.username, "failed admin login");
        return Err(AppError::unauthorized());
    }

    let access_token = state.jwt.generate_admin_token(&payload.username)?;
    tracing::info!(username = %payload.username, "admin logged in");
    Ok(Json(AdminLoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
    }))
}

#[derive(Serialize)]
pub struct UserList {
    pub users: Vec<UserProfile>,
    pub count: usize,
    pub next_cursor: Option<String>,
}

pub async fn list_users(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<UserListFilter>,
) -> AppResult<Json<UserList>> {
    let mut conn = state.db()?;
    let page = users::list(&mut conn, &filter)?;
    Ok(Json(UserList {
        count: page.count,
        users: page.items,
        next_cursor: page.next_cursor,
    }))
}

pub async fn get_user(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserDetail>> {
    let mut conn = state.db()?;
    Ok(Json(users::detail(&mut conn, id)?))
}

pub async fn update_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Json<UserProfile>> {
    let mut conn = state.db()?;
    let user = users::update_profile(&mut conn, id, &update)?;
    tracing::info!(admin = %admin.username, user_id = %user.id, "updated user profile");
    Ok(Json(UserProfile::from(&user)))
}

pub async fn approve_user(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<UserProfile>> {
    let mut conn = state.db()?;
    let user = users::approve(&mut conn, id)?;
    tracing::info!(admin = %admin.username, user_id = %user.id, "approved user");
    if let Err(err) = state.notifier.account_approved(&user) {
        tracing::error!(user_id = %user.id, error = %err, "failed to deliver approval notice");
    }
    Ok(Json(UserProfile::from(&user)))
}

#[derive(Serialize)]
pub struct ResetTokenResponse {
    pub user_id: Uuid,
    pub token: String,
    pub expires_in_minutes: i64,
}

pub async fn issue_reset_token(
    State(state): State<AppState>,
    _admin: AdminUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ResetTokenResponse>> {
    let mut conn = state.db()?;
    let user = users::find(&mut conn, id)?;
    let token = reset::issue(&mut conn, user.id)?;
    Ok(Json(ResetTokenResponse {
        user_id: user.id,
        token,
        expires_in_minutes: reset::RESET_TOKEN_TTL_MINUTES,
    }))
}

pub async fn get_config(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<Json<AppSettings>> {
    let mut conn = state.db()?;
    Ok(Json(policy::load_settings(&mut conn)?))
}

pub async fn update_config(
    State(state): State<AppState>,
    admin: AdminUser,
    Json(update): Json<PolicyUpdate>,
) -> AppResult<Json<AppSettings>> {
    let mut conn = state.db()?;
    let settings = policy::update_settings(&mut conn, &update)?;
    tracing::info!(
        admin = %admin.username,
        hide_after_months = settings.hide_after_months,
        purge_after_months = settings.purge_after_months,
        template_version = settings.template_version,
        "policy updated"
    );
    Ok(Json(settings))
}

#[derive(Debug, Default, Deserialize)]
pub struct RunRetentionQuery {
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn run_retention(
    State(state): State<AppState>,
    admin: AdminUser,
    Query(query): Query<RunRetentionQuery>,
) -> AppResult<Json<RetentionReport>> {
    tracing::info!(admin = %admin.username, dry_run = query.dry_run, "manual retention run requested");
    run_retention_blocking(&state, query.dry_run, TRIGGER_ADMIN)
        .await
        .map(Json)
}

/// The pass may touch many rows, so it runs on the blocking pool.
pub(crate) async fn run_retention_blocking(
    state: &AppState,
    dry_run: bool,
    trigger: &'static str,
) -> AppResult<RetentionReport> {
    let state = state.clone();
    tokio::task::spawn_blocking(move || -> AppResult<RetentionReport> {
        let mut conn = state.db()?;
        Ok(state.retention.run(&mut conn, dry_run, trigger)?)
    })
    .await
    .map_err(AppError::internal)?
}

#[derive(Debug, Default, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

pub async fn list_retention_runs(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(query): Query<LimitQuery>,
) -> AppResult<Json<Vec<RetentionRun>>> {
    let mut conn = state.db()?;
    Ok(Json(engine::list_runs(&mut conn, query.limit.unwrap_or(20))?))
}

pub async fn last_retention_run(
    State(state): State<AppState>,
    _admin: AdminUser,
) -> AppResult<Json<Option<RetentionRun>>> {
    let mut conn = state.db()?;
    Ok(Json(engine::last_run(&mut conn)?))
}

#[derive(Serialize)]
pub struct AdminSheetView {
    #[serde(flatten)]
    pub sheet: SheetView,
    pub user_email: String,
    pub user_name: String,
}

impl From<OwnedSheet> for AdminSheetView {
    fn from(row: OwnedSheet) -> Self {
        Self {
            sheet: row.sheet.into(),
            user_email: row.user_email,
            user_name: row.user_name,
        }
    }
}

#[derive(Serialize)]
pub struct AdminSheetList {
    pub sheets: Vec<AdminSheetView>,
    pub count: usize,
    pub next_cursor: Option<String>,
}

pub async fn list_all_sheets(
    State(state): State<AppState>,
    _admin: AdminUser,
    Query(filter): Query<AdminSheetFilter>,
) -> AppResult<Json<AdminSheetList>> {
    let mut conn = state.db()?;
    let page = sheets::list_all(&mut conn, &filter)?.map(AdminSheetView::from);
    Ok(Json(AdminSheetList {
        count: page.count,
        sheets: page.items,
        next_cursor: page.next_cursor,
    }))
}
