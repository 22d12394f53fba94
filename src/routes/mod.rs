use axum::http::HeaderValue;
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub mod admin;
pub mod auth;
pub mod drivers;
pub mod health;
pub mod internal;
pub mod sheets;

const MAX_BODY_BYTES: usize = 64 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let cors = if let Some(origins) = state.config.cors_allowed_origin.as_ref() {
        let headers: Vec<HeaderValue> = origins
            .split(',')
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .filter_map(|value| match value.parse::<HeaderValue>() {
                Ok(header) => Some(header),
                Err(_) => {
                    tracing::warn!(origin = value, "ignoring invalid CORS allowed origin");
                    None
                }
            })
            .collect();

        CorsLayer::new()
            .allow_origin(AllowOrigin::list(headers))
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    } else {
        CorsLayer::new()
            .allow_origin(AllowOrigin::mirror_request())
            .allow_methods(AllowMethods::mirror_request())
            .allow_headers(AllowHeaders::mirror_request())
            .allow_credentials(true)
    };

    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/login", post(auth::login))
        .route("/refresh", post(auth::refresh))
        .route("/logout", post(auth::logout))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password));

    let me_routes = Router::new()
        .route("/", get(auth::me).put(auth::update_me))
        .route("/change-password", post(auth::change_password))
        .route(
            "/drivers",
            get(drivers::list_drivers).post(drivers::create_driver),
        )
        .route(
            "/drivers/:id",
            put(drivers::update_driver).delete(drivers::delete_driver),
        );

    let sheet_routes = Router::new()
        .route("/", get(sheets::list_sheets).post(sheets::create_sheet))
        .route("/pdf/range", get(sheets::range_pdf))
        .route("/:id", get(sheets::get_sheet))
        .route("/:id/annul", post(sheets::annul_sheet))
        .route("/:id/pdf", get(sheets::sheet_pdf));

    let admin_routes = Router::new()
        .route("/login", post(admin::login))
        .route("/users", get(admin::list_users))
        .route("/users/:id", get(admin::get_user).put(admin::update_user))
        .route("/users/:id/approve", post(admin::approve_user))
        .route("/users/:id/reset-token", post(admin::issue_reset_token))
        .route("/config", get(admin::get_config).put(admin::update_config))
        .route("/run-retention", post(admin::run_retention))
        .route("/retention-runs", get(admin::list_retention_runs))
        .route("/retention-runs/last", get(admin::last_retention_run))
        .route("/route-sheets", get(admin::list_all_sheets));

    let internal_routes = Router::new().route("/run-retention", post(internal::run_retention));

    Router::new()
        .nest("/api/auth", auth_routes)
        .nest("/api/me", me_routes)
        .nest("/api/route-sheets", sheet_routes)
        .nest("/api/admin", admin_routes)
        .nest("/api/internal", internal_routes)
        .route("/api/health", get(health::health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
}
