use crate::config::AppConfig;

pub fn test_config() -> AppConfig {
    AppConfig {
        database_url: "postgres://localhost/routesheets_test".to_string(),
        database_max_pool_size: 1,
        startup_db_retries: 1,
        startup_db_retry_interval_seconds: 1,
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        jwt_secret: "test-secret".to_string(),
        jwt_issuer: "test-issuer".to_string(),
        jwt_audience: "test-audience".to_string(),
        admin_token_audience: "test-admin".to_string(),
        access_token_expiry_minutes: 15,
        admin_token_expiry_hours: 1,
        refresh_token_expiry_days: 7,
        refresh_cookie_secure: false,
        refresh_cookie_domain: None,
        cors_allowed_origin: None,
        admin_username: "admin".to_string(),
        admin_password_hash: None,
        retention_job_token: None,
        retention_lock_ttl_seconds: 600,
        retention_interval_seconds: 86_400,
        sweep_interval_seconds: 3_600,
        pdf_cache_ttl_days: 7,
        pdf_rate_limit: 30,
        pdf_range_rate_limit: 10,
        pdf_rate_window_minutes: 10,
        admin_login_rate_limit: 5,
        admin_login_window_minutes: 15,
    }
}
