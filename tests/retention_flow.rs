mod common;

use std::time::Duration as StdDuration;

use anyhow::Result;
use axum::http::StatusCode;
use chrono::{Duration, Utc};
use common::{acquire_db_lock, body_json, TestApp};
use diesel::prelude::*;
use routesheets::models::RouteSheet;
use routesheets::retention::engine::{self, TRIGGER_CLI};
use routesheets::retention::lock::{self, RETENTION_LOCK_NAME};
use routesheets::retention::RetentionError;
use routesheets::schema::{route_sheets, sheet_counters};
use routesheets::sweep::sweep_expired;
use uuid::Uuid;

struct Fixture {
    fresh: Uuid,
    due_hide: Uuid,
    due_purge: Uuid,
}

async fn seed(app: &TestApp) -> Result<Fixture> {
    let owner = app.insert_user("driver@example.com", "password-1").await?;
    let now = Utc::now().naive_utc();

    let fresh = app
        .insert_sheet(owner, now + Duration::days(400), now + Duration::days(700))
        .await?;
    let due_hide = app
        .insert_sheet(owner, now - Duration::days(1), now + Duration::days(300))
        .await?;
    let due_purge = app
        .insert_sheet(owner, now - Duration::days(300), now - Duration::days(1))
        .await?;

    Ok(Fixture {
        fresh: fresh.id,
        due_hide: due_hide.id,
        due_purge: due_purge.id,
    })
}

async fn load(app: &TestApp, id: Uuid) -> Result<Option<RouteSheet>> {
    app.with_conn(move |conn| {
        Ok(route_sheets::table
            .find(id)
            .first::<RouteSheet>(conn)
            .optional()?)
    })
    .await
}

#[tokio::test]
async fn run_hides_and_purges_due_sheets_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fixture = seed(&app).await?;

    let retention = app.state.retention.clone();
    let report = app
        .with_conn(move |conn| Ok(retention.run(conn, false, TRIGGER_CLI)?))
        .await?;
    assert_eq!(report.hidden_count, 1);
    assert_eq!(report.purged_count, 1);
    assert_eq!(report.stats_before.total, 3);
    assert_eq!(report.stats_after.total, 2);
    assert_eq!(report.stats_after.hidden, 1);

    let fresh = load(&app, fixture.fresh).await?.expect("fresh sheet kept");
    assert_eq!(fresh.visibility, "VISIBLE");
    let hidden = load(&app, fixture.due_hide).await?.expect("hidden sheet kept");
    assert_eq!(hidden.visibility, "HIDDEN");
    assert!(load(&app, fixture.due_purge).await?.is_none());

    let retention = app.state.retention.clone();
    let second = app
        .with_conn(move |conn| Ok(retention.run(conn, false, TRIGGER_CLI)?))
        .await?;
    assert_eq!(second.hidden_count, 0);
    assert_eq!(second.purged_count, 0);

    let runs = app
        .with_conn(|conn| Ok(engine::list_runs(conn, 10)?))
        .await?;
    assert_eq!(runs.len(), 2);
    assert!(runs.iter().all(|run| run.trigger_source == TRIGGER_CLI));
    Ok(())
}

#[tokio::test]
async fn hidden_sheets_leave_owner_views() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fixture = seed(&app).await?;
    let token = app.login_token("driver@example.com", "password-1").await?;

    let retention = app.state.retention.clone();
    app.with_conn(move |conn| Ok(retention.run(conn, false, TRIGGER_CLI)?))
        .await?;

    let listed = body_json(app.get("/api/route-sheets", Some(&token)).await?).await?;
    assert_eq!(listed["count"], 1);
    assert_eq!(listed["sheets"][0]["id"], fixture.fresh.to_string());

    let hidden = app
        .get(&format!("/api/route-sheets/{}", fixture.due_hide), Some(&token))
        .await?;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);
    let hidden_pdf = app
        .get(&format!("/api/route-sheets/{}/pdf", fixture.due_hide), Some(&token))
        .await?;
    assert_eq!(hidden_pdf.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn dry_run_changes_nothing() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fixture = seed(&app).await?;

    let admin = app.admin_token().await?;
    let response = app
        .post_empty("/api/admin/run-retention?dry_run=true", Some(&admin), &[])
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let report = body_json(response).await?;
    assert_eq!(report["dry_run"], true);
    assert_eq!(report["hidden_count"], 1);
    assert_eq!(report["purged_count"], 1);
    assert!(report["run_id"].is_null());

    let still_visible = load(&app, fixture.due_hide).await?.expect("sheet kept");
    assert_eq!(still_visible.visibility, "VISIBLE");
    assert!(load(&app, fixture.due_purge).await?.is_some());

    let runs = app
        .with_conn(|conn| Ok(engine::list_runs(conn, 10)?))
        .await?;
    assert!(runs.is_empty());
    Ok(())
}

#[tokio::test]
async fn held_lock_makes_runs_back_off() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fixture = seed(&app).await?;

    app.with_conn(|conn| {
        assert!(lock::try_acquire(
            conn,
            RETENTION_LOCK_NAME,
            "another-replica",
            StdDuration::from_secs(60),
        )?);
        Ok(())
    })
    .await?;

    let retention = app.state.retention.clone();
    let outcome = app
        .with_conn(move |conn| Ok(retention.run(conn, false, TRIGGER_CLI)))
        .await?;
    assert!(matches!(outcome, Err(RetentionError::AlreadyRunning)));

    let admin = app.admin_token().await?;
    let response = app
        .post_empty("/api/admin/run-retention", Some(&admin), &[])
        .await?;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    assert!(load(&app, fixture.due_purge).await?.is_some());
    let holder = app
        .with_conn(|conn| Ok(lock::inspect(conn, RETENTION_LOCK_NAME)?))
        .await?
        .and_then(|row| row.holder);
    assert_eq!(holder.as_deref(), Some("another-replica"));
    Ok(())
}

#[tokio::test]
async fn internal_trigger_requires_job_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    seed(&app).await?;

    let missing = app
        .post_empty("/api/internal/run-retention", None, &[])
        .await?;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let wrong = app
        .post_empty(
            "/api/internal/run-retention",
            None,
            &[("x-job-token", "not-the-token")],
        )
        .await?;
    assert_eq!(wrong.status(), StatusCode::FORBIDDEN);

    let accepted = app
        .post_empty(
            "/api/internal/run-retention",
            None,
            &[("x-job-token", "job-token")],
        )
        .await?;
    assert_eq!(accepted.status(), StatusCode::OK);
    let report = body_json(accepted).await?;
    assert_eq!(report["trigger"], "internal");
    assert_eq!(report["purged_count"], 1);

    let admin = app.admin_token().await?;
    let last = body_json(app.get("/api/admin/retention-runs/last", Some(&admin)).await?).await?;
    assert_eq!(last["trigger_source"], "internal");
    Ok(())
}

#[tokio::test]
async fn internal_trigger_is_disabled_without_token() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::with_config(|config| config.retention_job_token = None).await?;

    let response = app
        .post_empty(
            "/api/internal/run-retention",
            None,
            &[("x-job-token", "job-token")],
        )
        .await?;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn expiry_sweep_backs_up_purge_and_keeps_counters() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let fixture = seed(&app).await?;

    let report = app
        .with_conn(|conn| Ok(sweep_expired(conn, Utc::now().naive_utc())?))
        .await?;
    assert_eq!(report.route_sheets, 1);
    assert!(load(&app, fixture.due_purge).await?.is_none());
    assert!(load(&app, fixture.due_hide).await?.is_some());

    let counters: i64 = app
        .with_conn(|conn| {
            Ok(sheet_counters::table
                .select(diesel::dsl::count_star())
                .first(conn)?)
        })
        .await?;
    assert_eq!(counters, 1);
    Ok(())
}
