use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::{epoch, password, reset, rotation, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{User, USER_STATUS_PENDING},
    state::AppState,
    users::{self, ProfileUpdate, Registration, UserProfile},
};

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    /// Browser: epoch-bound refresh JWT in an HttpOnly cookie.
    #[default]
    Web,
    /// Native app: stored rotating credential returned in the body.
    App,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub client: ClientKind,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Serialize)]
pub struct RegisterResponse {
    pub user_id: Uuid,
    pub status: String,
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<Registration>,
) -> AppResult<(StatusCode, Json<RegisterResponse>)> {
    let mut conn = state.db()?;
    let user = users::register(&mut conn, &payload, USER_STATUS_PENDING)?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user_id: user.id,
            status: user.status,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;

    let user = users::find_by_email(&mut conn, &payload.email)?
        .ok_or_else(AppError::unauthorized)?;

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }
    if !user.is_approved() {
        return Err(AppError::forbidden("account pending administrator approval"));
    }

    let access_token = access_token_for(&state, &user)?;
    let mut headers = HeaderMap::new();

    let refresh_token = match payload.client {
        ClientKind::Web => {
            let cookie_token = state.jwt.generate_refresh_token(user.id, user.token_version)?;
            headers.insert(SET_COOKIE, build_refresh_cookie(&state, &cookie_token)?);
            None
        }
        ClientKind::App => {
            let issued = rotation::issue(
                &mut conn,
                user.id,
                user.token_version,
                state.jwt.refresh_expiry(),
            )?;
            Some(issued.token)
        }
    };

    tracing::info!(user_id = %user.id, client = ?payload.client, "user logged in");

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.jwt.access_expiry_seconds(),
            refresh_token,
        }),
    ))
}

/// A body credential goes through the rotation chain; otherwise the cookie
/// credential is checked against the session epoch and reissued.
pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<(HeaderMap, Json<LoginResponse>)> {
    let mut conn = state.db()?;
    let mut headers = HeaderMap::new();

    if let Some(Json(request)) = body {
        let rotated = rotation::rotate(&mut conn, &request.refresh_token, state.jwt.refresh_expiry())?;
        let access_token = access_token_for(&state, &rotated.user)?;
        return Ok((
            headers,
            Json(LoginResponse {
                access_token,
                token_type: "Bearer".to_string(),
                expires_in: state.jwt.access_expiry_seconds(),
                refresh_token: Some(rotated.credential.token),
            }),
        ));
    }

    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let cookie_token = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;
    let claims = state
        .jwt
        .verify_refresh_token(cookie_token)
        .map_err(|_| AppError::unauthorized())?;

    let user = epoch::require_current(&mut conn, claims.sub, claims.tv)?;
    let access_token = access_token_for(&state, &user)?;
    let next_cookie = state.jwt.generate_refresh_token(user.id, user.token_version)?;
    headers.insert(SET_COOKIE, build_refresh_cookie(&state, &next_cookie)?);

    Ok((
        headers,
        Json(LoginResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.jwt.access_expiry_seconds(),
            refresh_token: None,
        }),
    ))
}

/// Ends every session of the caller by moving the epoch forward.
pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    body: Option<Json<RefreshRequest>>,
) -> AppResult<(HeaderMap, StatusCode)> {
    let mut conn = state.db()?;

    if let Some(Json(request)) = body {
        rotation::revoke(&mut conn, &request.refresh_token)?;
    }
    epoch::bump(&mut conn, user.user_id)?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<StatusCode> {
    users::check_password_strength(&payload.new_password)?;
    let new_hash = password::hash_password(&payload.new_password)?;

    let mut conn = state.db()?;
    let user_id = reset::redeem(&mut conn, &payload.token, &new_hash)
        .map_err(|err| match err {
            crate::auth::SessionError::Invalid => AppError::bad_request("invalid or expired token"),
            other => other.into(),
        })?;

    tracing::info!(user_id = %user_id, "password reset");
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Serialize)]
pub struct ForgotPasswordResponse {
    pub message: &'static str,
}

/// Same answer whether or not the email belongs to an account.
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<(StatusCode, Json<ForgotPasswordResponse>)> {
    let mut conn = state.db()?;
    if let Some(user) = users::find_by_email(&mut conn, &payload.email)? {
        let token = reset::issue(&mut conn, user.id)?;
        if let Err(err) = state.notifier.password_reset(&user, &token) {
            tracing::error!(user_id = %user.id, error = %err, "failed to deliver password reset");
        }
    } else {
        tracing::debug!("password reset requested for unknown email");
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(ForgotPasswordResponse {
            message: "if the email is registered, a reset link has been sent",
        }),
    ))
}

pub async fn me(State(state): State<AppState>, user: AuthenticatedUser) -> AppResult<Json<UserProfile>> {
    let mut conn = state.db()?;
    let user = users::find(&mut conn, user.user_id)?;
    Ok(Json(UserProfile::from(&user)))
}

pub async fn update_me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(update): Json<ProfileUpdate>,
) -> AppResult<Json<UserProfile>> {
    let mut conn = state.db()?;
    let user = users::update_profile(&mut conn, user.user_id, &update)?;
    tracing::info!(user_id = %user.id, "profile updated");
    Ok(Json(UserProfile::from(&user)))
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Json(payload): Json<ChangePasswordRequest>,
) -> AppResult<(HeaderMap, StatusCode)> {
    users::check_password_strength(&payload.new_password)?;

    let mut conn = state.db()?;
    let current = users::find(&mut conn, user.user_id)?;
    let valid = password::verify_password(&payload.current_password, &current.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    let new_hash = password::hash_password(&payload.new_password)?;
    let epoch = users::replace_password(&mut conn, user.user_id, &new_hash)?;
    tracing::info!(user_id = %user.user_id, epoch, "password changed");

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    Ok((headers, StatusCode::NO_CONTENT))
}

fn access_token_for(state: &AppState, user: &User) -> AppResult<String> {
    Ok(state
        .jwt
        .generate_access_token(user.id, &user.email, user.token_version)?)
}

fn build_refresh_cookie(state: &AppState, token: &str) -> AppResult<HeaderValue> {
    let max_age: ChronoDuration = state.jwt.refresh_expiry();
    let expires_at = Utc::now() + max_age;

    let mut parts = vec![format!("{}={}", REFRESH_COOKIE_NAME, token)];
    parts.push("Path=/api/auth".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push(format!("Max-Age={}", max_age.num_seconds()));
    parts.push(format!("Expires={}", expires_at.to_rfc2822()));
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

fn build_clear_refresh_cookie(state: &AppState) -> AppResult<HeaderValue> {
    let mut parts = vec![format!("{}=", REFRESH_COOKIE_NAME)];
    parts.push("Path=/api/auth".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    parts.push("Max-Age=0".into());
    parts.push("Expires=Thu, 01 Jan 1970 00:00:00 GMT".into());
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={}", domain));
    }

    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}
