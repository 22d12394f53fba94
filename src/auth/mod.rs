pub mod epoch;
pub mod jwt;
pub mod password;
pub mod reset;
pub mod rotation;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::Serialize;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

pub use epoch::SessionError;

pub const JOB_TOKEN_HEADER: &str = "x-job-token";

/// An approved driver whose access token still matches their session epoch.
#[derive(Debug, Clone, Serialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: String,
    pub epoch: i64,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_access_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        let mut conn = state.db()?;
        let user = epoch::require_current(&mut conn, claims.sub, claims.tv)?;

        Ok(AuthenticatedUser {
            user_id: user.id,
            email: user.email,
            full_name: user.full_name,
            epoch: user.token_version,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AdminUser {
    pub username: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::unauthorized())?;

        let claims = state
            .jwt
            .verify_admin_token(bearer.token())
            .map_err(|_| AppError::unauthorized())?;

        Ok(AdminUser {
            username: claims.sub,
        })
    }
}

/// Caller presenting the pre-shared scheduler credential in `X-Job-Token`.
#[derive(Debug, Clone, Copy)]
pub struct JobCaller;

#[async_trait]
impl FromRequestParts<AppState> for JobCaller {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let presented = parts
            .headers
            .get(JOB_TOKEN_HEADER)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty())
            .ok_or_else(AppError::unauthorized)?;

        let expected = state
            .config
            .retention_job_token
            .as_deref()
            .ok_or_else(|| AppError::forbidden("internal trigger disabled"))?;

        if !job_token_matches(presented, expected) {
            tracing::warn!("rejected internal trigger with wrong job token");
            return Err(AppError::forbidden("invalid job token"));
        }
        Ok(JobCaller)
    }
}

/// Compares digests so the comparison length does not depend on the input.
fn job_token_matches(presented: &str, expected: &str) -> bool {
    let presented = Sha256::digest(presented.as_bytes());
    let expected = Sha256::digest(expected.as_bytes());
    presented
        .iter()
        .zip(expected.iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
