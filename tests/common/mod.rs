use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use anyhow::{anyhow, ensure, Context, Result};
use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use chrono::{Datelike, NaiveDateTime, Utc};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::MigrationHarness;
use http_body_util::BodyExt;
use once_cell::sync::Lazy;
use routesheets::auth::jwt::JwtService;
use routesheets::auth::password::hash_password;
use routesheets::config::AppConfig;
use routesheets::db::{self, PgPool, MIGRATIONS};
use routesheets::models::{
    Driver, LifecycleStatus, NewRouteSheet, NewUser, PickupType, RouteSheet, User, Visibility,
    USER_STATUS_APPROVED,
};
use routesheets::notify::AccountNotifier;
use routesheets::policy::TemplateConfig;
use routesheets::render::SheetRenderer;
use routesheets::routes;
use routesheets::sequence;
use routesheets::state::AppState;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

/// Deterministic stand-in for the PDF renderer that counts invocations.
#[derive(Default)]
pub struct FakeRenderer {
    renders: AtomicUsize,
}

impl FakeRenderer {
    #[allow(dead_code)]
    pub fn render_count(&self) -> usize {
        self.renders.load(Ordering::SeqCst)
    }
}

impl SheetRenderer for FakeRenderer {
    fn render(
        &self,
        sheet: &RouteSheet,
        _owner: &User,
        driver: Option<&Driver>,
        template: &TemplateConfig,
    ) -> Result<Vec<u8>> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let conductor = driver.map_or("titular", |driver| driver.full_name.as_str());
        Ok(format!(
            "%PDF-fake {} {} v{} conductor={}",
            sheet.sheet_number(),
            sheet.status,
            template.version,
            conductor
        )
        .into_bytes())
    }

    fn render_range(
        &self,
        sheets: &[RouteSheet],
        _owner: &User,
        _drivers: &[Driver],
        template: &TemplateConfig,
    ) -> Result<Vec<u8>> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        let numbers: Vec<String> = sheets.iter().map(RouteSheet::sheet_number).collect();
        Ok(format!("%PDF-fake-range {} v{}", numbers.join(","), template.version).into_bytes())
    }
}

/// Keeps every delivered reset token so tests can redeem them.
#[derive(Default)]
pub struct RecordingNotifier {
    resets: StdMutex<Vec<(String, String)>>,
}

impl RecordingNotifier {
    #[allow(dead_code)]
    pub fn reset_tokens_for(&self, email: &str) -> Vec<String> {
        self.resets
            .lock()
            .map(|resets| {
                resets
                    .iter()
                    .filter(|(to, _)| to == email)
                    .map(|(_, token)| token.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl AccountNotifier for RecordingNotifier {
    fn password_reset(&self, user: &User, token: &str) -> Result<()> {
        self.resets
            .lock()
            .map_err(|_| anyhow!("notifier poisoned"))?
            .push((user.email.clone(), token.to_string()));
        Ok(())
    }

    fn account_approved(&self, _user: &User) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[allow(dead_code)]
pub struct LoginBody {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

#[allow(dead_code)]
pub struct LoginResult {
    pub body: LoginBody,
    pub cookie: Option<String>,
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    renderer: Arc<FakeRenderer>,
    notifier: Arc<RecordingNotifier>,
}

impl TestApp {
    pub async fn new() -> Result<Self> {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(customize: impl FnOnce(&mut AppConfig)) -> Result<Self> {
        let database_url = env::var("TEST_DATABASE_URL")
            .context("TEST_DATABASE_URL must be set for integration tests")?;

        let mut config = AppConfig {
            database_url,
            database_max_pool_size: 8,
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
            admin_password_hash: Some(hash_password("admin-password")?),
            retention_job_token: Some("job-token".to_string()),
            retention_lock_ttl_seconds: 600,
            retention_interval_seconds: 86_400,
            sweep_interval_seconds: 3_600,
            pdf_cache_ttl_days: 7,
            pdf_rate_limit: 30,
            pdf_range_rate_limit: 10,
            pdf_rate_window_minutes: 10,
            admin_login_rate_limit: 5,
            admin_login_window_minutes: 15,
        };
        customize(&mut config);

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let renderer = Arc::new(FakeRenderer::default());
        let renderer_for_state: Arc<dyn SheetRenderer> = renderer.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let jwt = JwtService::from_config(&config)?;
        let state = AppState::new(pool, config, renderer_for_state, jwt)
            .with_notifier(notifier.clone());
        state.health.mark_schema_ready();
        let router = routes::create_router(state.clone());

        Ok(Self {
            state,
            router,
            renderer,
            notifier,
        })
    }

    #[allow(dead_code)]
    pub fn renderer(&self) -> Arc<FakeRenderer> {
        self.renderer.clone()
    }

    #[allow(dead_code)]
    pub fn notifier(&self) -> Arc<RecordingNotifier> {
        self.notifier.clone()
    }

    #[allow(dead_code)]
    pub async fn insert_user(&self, email: &str, password: &str) -> Result<Uuid> {
        self.insert_user_with_status(email, password, USER_STATUS_APPROVED)
            .await
    }

    async fn insert_user_with_status(&self, email: &str, password: &str, status: &str) -> Result<Uuid> {
        let email = email.to_string();
        let password = password.to_string();
        let status = status.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                email,
                password_hash: hash_password(&password)?,
                full_name: "Test Driver".to_string(),
                license_number: "L-001".to_string(),
                vehicle_plate: "0000TST".to_string(),
                status,
                dni_cif: "00000000T".to_string(),
                license_council: "Oviedo".to_string(),
                phone: "600000000".to_string(),
                vehicle_brand: "Skoda".to_string(),
                vehicle_model: "Octavia".to_string(),
                vehicle_license_number: None,
            };
            diesel::insert_into(routesheets::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    /// Inserts a sheet with explicit retention dates, numbered through the
    /// regular allocator.
    #[allow(dead_code)]
    pub async fn insert_sheet(
        &self,
        owner: Uuid,
        hide_at: NaiveDateTime,
        purge_at: NaiveDateTime,
    ) -> Result<RouteSheet> {
        self.with_conn(move |conn| {
            let now = Utc::now();
            let seq = sequence::allocate(conn, owner, now.year())?;
            let row = NewRouteSheet {
                id: Uuid::new_v4(),
                user_id: owner,
                year: now.year(),
                seq,
                contractor_phone: Some("600000000".to_string()),
                contractor_email: None,
                prebooked_date: "2026-01-01".to_string(),
                prebooked_locality: "Oviedo".to_string(),
                pickup_type: PickupType::Other.as_str().to_string(),
                flight_number: None,
                pickup_address: Some("Calle Uria 1".to_string()),
                pickup_datetime: now.naive_utc(),
                destination: "Gijon".to_string(),
                passenger_info: "1 adult".to_string(),
                status: LifecycleStatus::Active.as_str().to_string(),
                visibility: Visibility::Visible.as_str().to_string(),
                created_at: now.naive_utc(),
                hide_at,
                purge_at,
                conductor_driver_id: None,
            };
            let sheet = diesel::insert_into(routesheets::schema::route_sheets::table)
                .values(&row)
                .get_result::<RouteSheet>(conn)
                .context("failed to insert sheet")?;
            Ok(sheet)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn login(&self, email: &str, password: &str, client: &str) -> Result<LoginResult> {
        #[derive(Serialize)]
        struct LoginPayload<'a> {
            email: &'a str,
            password: &'a str,
            client: &'a str,
        }

        let response = self
            .post_json(
                "/api/auth/login",
                &LoginPayload {
                    email,
                    password,
                    client,
                },
                None,
            )
            .await?;

        ensure!(
            response.status() == StatusCode::OK,
            "login failed with status {}",
            response.status()
        );

        let cookie = response
            .headers()
            .get("set-cookie")
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.split(';').next())
            .map(str::to_string);
        let body = body_to_vec(response.into_body()).await?;
        let body: LoginBody = serde_json::from_slice(&body)?;
        Ok(LoginResult { body, cookie })
    }

    #[allow(dead_code)]
    pub async fn login_token(&self, email: &str, password: &str) -> Result<String> {
        Ok(self.login(email, password, "web").await?.body.access_token)
    }

    #[allow(dead_code)]
    pub async fn admin_token(&self) -> Result<String> {
        let response = self
            .post_json(
                "/api/admin/login",
                &serde_json::json!({"username": "admin", "password": "admin-password"}),
                None,
            )
            .await?;
        ensure!(
            response.status() == StatusCode::OK,
            "admin login failed with status {}",
            response.status()
        );
        let body: serde_json::Value = serde_json::from_slice(&body_to_vec(response.into_body()).await?)?;
        body["access_token"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("missing admin access token"))
    }

    #[allow(dead_code)]
    pub async fn put_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::PUT, path, payload, token, &[]).await
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::DELETE).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        token: Option<&str>,
    ) -> Result<hyper::Response<Body>> {
        self.send_json(Method::POST, path, payload, token, &[]).await
    }

    pub async fn send_json<T: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &T,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(method)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_empty(
        &self,
        path: &str,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::POST).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn get(&self, path: &str, token: Option<&str>) -> Result<hyper::Response<Body>> {
        let mut builder = Request::builder().method(Method::GET).uri(path);
        if let Some(token) = token {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let request = builder.body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }

    #[allow(dead_code)]
    pub fn pool(&self) -> PgPool {
        self.state.pool.clone()
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

#[allow(dead_code)]
pub async fn body_json(response: hyper::Response<Body>) -> Result<serde_json::Value> {
    let bytes = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        reset_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn reset_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE pdf_cache, route_sheets, drivers, refresh_tokens, password_reset_tokens, \
         rate_limit_events, retention_runs, retention_locks, sheet_counters, users CASCADE; \
         UPDATE app_settings SET header_title = 'HOJA DE RUTA', \
         header_line1 = 'CONSEJERIA DE MOVILIDAD, MEDIO AMBIENTE Y GESTION DE EMERGENCIAS', \
         header_line2 = 'Servicio de Inspeccion de Transportes', \
         legend_text = 'Es obligatorio conservar los registros durante 12 meses desde la fecha de recogida del servicio.', \
         hide_after_months = 14, purge_after_months = 24, template_version = 1 \
         WHERE id = 'global';",
    )
    .context("failed to reset tables")?;
    Ok(())
}
