use anyhow::{bail, Result};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::AppConfig;

pub const TOKEN_TYPE_ACCESS: &str = "access";
pub const TOKEN_TYPE_REFRESH: &str = "refresh";
pub const TOKEN_TYPE_ADMIN: &str = "admin";

#[derive(Clone)]
pub struct JwtService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    audience: String,
    admin_audience: String,
    access_expiry: Duration,
    refresh_expiry: Duration,
    admin_expiry: Duration,
}

impl JwtService {
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        if config.jwt_secret.is_empty() {
            bail!("JWT secret must not be empty");
        }
        Ok(Self {
            encoding: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            issuer: config.jwt_issuer.clone(),
            audience: config.jwt_audience.clone(),
            admin_audience: config.admin_token_audience.clone(),
            access_expiry: Duration::minutes(config.access_token_expiry_minutes),
            refresh_expiry: Duration::days(config.refresh_token_expiry_days),
            admin_expiry: Duration::hours(config.admin_token_expiry_hours),
        })
    }

    pub fn access_expiry_seconds(&self) -> i64 {
        self.access_expiry.num_seconds()
    }

    pub fn refresh_expiry(&self) -> Duration {
        self.refresh_expiry
    }

    pub fn generate_access_token(&self, user_id: Uuid, email: &str, epoch: i64) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id,
            email: Some(email.to_owned()),
            typ: TOKEN_TYPE_ACCESS.to_string(),
            tv: epoch,
            jti: Uuid::new_v4().simple().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: (now + self.access_expiry).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    /// Cookie credential: carries the owner's epoch at issue and nothing is
    /// stored server side.
    pub fn generate_refresh_token(&self, user_id: Uuid, epoch: i64) -> Result<String> {
        let now = Utc::now();
        let claims = SessionClaims {
            sub: user_id,
            email: None,
            typ: TOKEN_TYPE_REFRESH.to_string(),
            tv: epoch,
            jti: Uuid::new_v4().simple().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp() as usize,
            exp: (now + self.refresh_expiry).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<SessionClaims> {
        self.verify_session(token, TOKEN_TYPE_ACCESS)
    }

    pub fn verify_refresh_token(&self, token: &str) -> Result<SessionClaims> {
        self.verify_session(token, TOKEN_TYPE_REFRESH)
    }

    fn verify_session(&self, token: &str, expected_type: &str) -> Result<SessionClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<SessionClaims>(token, &self.decoding, &validation)?;
        if data.claims.typ != expected_type {
            bail!("unexpected token type {}", data.claims.typ);
        }
        Ok(data.claims)
    }

    pub fn generate_admin_token(&self, username: &str) -> Result<String> {
        let now = Utc::now();
        let claims = AdminClaims {
            sub: username.to_owned(),
            typ: TOKEN_TYPE_ADMIN.to_string(),
            iss: self.issuer.clone(),
            aud: self.admin_audience.clone(),
            iat: now.timestamp() as usize,
            exp: (now + self.admin_expiry).timestamp() as usize,
        };

        Ok(encode(&Header::default(), &claims, &self.encoding)?)
    }

    pub fn verify_admin_token(&self, token: &str) -> Result<AdminClaims> {
        let mut validation = Validation::default();
        validation.set_audience(&[self.admin_audience.clone()]);
        validation.set_issuer(&[self.issuer.clone()]);
        let data = decode::<AdminClaims>(token, &self.decoding, &validation)?;
        if data.claims.typ != TOKEN_TYPE_ADMIN {
            bail!("unexpected token type {}", data.claims.typ);
        }
        Ok(data.claims)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub typ: String,
    /// Session epoch of the owner when the token was minted.
    pub tv: i64,
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminClaims {
    pub sub: String,
    pub typ: String,
    pub iss: String,
    pub aud: String,
    pub iat: usize,
    pub exp: usize,
}
