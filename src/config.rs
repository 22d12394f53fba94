use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use url::Url;

use crate::db::DEFAULT_MAX_POOL_SIZE;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_pool_size: u32,
    pub startup_db_retries: u32,
    pub startup_db_retry_interval_seconds: u64,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub jwt_issuer: String,
    pub jwt_audience: String,
    pub admin_token_audience: String,
    pub access_token_expiry_minutes: i64,
    pub admin_token_expiry_hours: i64,
    pub refresh_token_expiry_days: i64,
    pub refresh_cookie_secure: bool,
    pub refresh_cookie_domain: Option<String>,
    pub cors_allowed_origin: Option<String>,
    pub admin_username: String,
    pub admin_password_hash: Option<String>,
    pub retention_job_token: Option<String>,
    pub retention_lock_ttl_seconds: i64,
    pub retention_interval_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub pdf_cache_ttl_days: i64,
    pub pdf_rate_limit: i64,
    pub pdf_range_rate_limit: i64,
    pub pdf_rate_window_minutes: i64,
    pub admin_login_rate_limit: i64,
    pub admin_login_window_minutes: i64,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
        let database_max_pool_size = env::var("DATABASE_MAX_POOL_SIZE")
            .ok()
            .and_then(|value| value.parse().ok())
            .unwrap_or(DEFAULT_MAX_POOL_SIZE);
        let server_host = env::var("SERVER_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
        let jwt_issuer = env::var("JWT_ISSUER").unwrap_or_else(|_| "routesheets".to_string());
        let jwt_audience =
            env::var("JWT_AUDIENCE").unwrap_or_else(|_| "routesheets-clients".to_string());
        let admin_token_audience =
            env::var("ADMIN_TOKEN_AUDIENCE").unwrap_or_else(|_| "routesheets-admin".to_string());
        let refresh_cookie_secure = env::var("REFRESH_COOKIE_SECURE")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let admin_username = env::var("ADMIN_USERNAME").unwrap_or_else(|_| "admin".to_string());

        Ok(Self {
            database_url,
            database_max_pool_size,
            startup_db_retries: parse_var("STARTUP_DB_RETRIES", 5)?,
            startup_db_retry_interval_seconds: parse_var("STARTUP_DB_RETRY_INTERVAL_SECONDS", 30)?,
            server_host,
            server_port: parse_var("SERVER_PORT", 3000)?,
            jwt_secret,
            jwt_issuer,
            jwt_audience,
            admin_token_audience,
            access_token_expiry_minutes: parse_var("ACCESS_TOKEN_EXPIRY_MINUTES", 15)?,
            admin_token_expiry_hours: parse_var("ADMIN_TOKEN_EXPIRY_HOURS", 8)?,
            refresh_token_expiry_days: parse_var("REFRESH_TOKEN_EXPIRY_DAYS", 7)?,
            refresh_cookie_secure,
            refresh_cookie_domain: env::var("REFRESH_COOKIE_DOMAIN").ok(),
            cors_allowed_origin: env::var("CORS_ALLOWED_ORIGIN").ok(),
            admin_username,
            admin_password_hash: env::var("ADMIN_PASSWORD_HASH")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            retention_job_token: env::var("RETENTION_JOB_TOKEN")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            retention_lock_ttl_seconds: parse_var("RETENTION_LOCK_TTL_SECONDS", 600)?,
            retention_interval_seconds: parse_var("RETENTION_INTERVAL_SECONDS", 86_400)?,
            sweep_interval_seconds: parse_var("SWEEP_INTERVAL_SECONDS", 3_600)?,
            pdf_cache_ttl_days: parse_var("PDF_CACHE_TTL_DAYS", 7)?,
            pdf_rate_limit: parse_var("PDF_RATE_LIMIT", 30)?,
            pdf_range_rate_limit: parse_var("PDF_RANGE_RATE_LIMIT", 10)?,
            pdf_rate_window_minutes: parse_var("PDF_RATE_WINDOW_MINUTES", 10)?,
            admin_login_rate_limit: parse_var("ADMIN_LOGIN_RATE_LIMIT", 5)?,
            admin_login_window_minutes: parse_var("ADMIN_LOGIN_WINDOW_MINUTES", 15)?,
        })
    }

    pub fn redacted_database_url(&self) -> String {
        redact_database_url(&self.database_url)
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .ok()
            .with_context(|| format!("{name} must be a valid number")),
        Err(_) => Ok(default),
    }
}

fn redact_database_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("*****"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}
