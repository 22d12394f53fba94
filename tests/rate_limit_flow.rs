mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_json, TestApp};
use routesheets::rate_limit::{RateWindow, ACTION_PDF_RANGE, ACTION_PDF_SINGLE};
use serde_json::json;

#[tokio::test]
async fn window_admits_limit_then_rejects() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;

    app.with_conn(|conn| {
        let window = RateWindow::new(3, 10);
        for _ in 0..3 {
            window.enforce(conn, "user:a", ACTION_PDF_SINGLE)?;
        }
        assert!(window.enforce(conn, "user:a", ACTION_PDF_SINGLE).is_err());
        assert_eq!(window.count(conn, "user:a", ACTION_PDF_SINGLE)?, 3);

        window.enforce(conn, "user:a", ACTION_PDF_RANGE)?;
        window.enforce(conn, "user:b", ACTION_PDF_SINGLE)?;
        Ok(())
    })
    .await
}

#[tokio::test]
async fn pdf_downloads_are_throttled_per_driver() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::with_config(|config| {
        config.pdf_rate_limit = 2;
        config.pdf_range_rate_limit = 1;
    })
    .await?;
    app.insert_user("driver@example.com", "password-1").await?;
    app.insert_user("other@example.com", "password-2").await?;
    let token = app.login_token("driver@example.com", "password-1").await?;
    let other = app.login_token("other@example.com", "password-2").await?;

    let trip = json!({
        "contractor_phone": "600123456",
        "prebooked_date": "2026-05-10",
        "prebooked_locality": "Aviles",
        "pickup_type": "OTHER",
        "pickup_address": "Plaza de Espana 1",
        "pickup_datetime": "2026-05-11T07:15:00Z",
        "destination": "Oviedo",
        "passenger_info": "1 adult",
    });
    let created = body_json(app.post_json("/api/route-sheets", &trip, Some(&token)).await?).await?;
    let pdf_path = format!("/api/route-sheets/{}/pdf", created["id"].as_str().unwrap_or_default());

    for _ in 0..2 {
        assert_eq!(app.get(&pdf_path, Some(&token)).await?.status(), StatusCode::OK);
    }
    let throttled = app.get(&pdf_path, Some(&token)).await?;
    assert_eq!(throttled.status(), StatusCode::TOO_MANY_REQUESTS);

    let range = "/api/route-sheets/pdf/range?from_date=2026-05-01&to_date=2026-05-31";
    assert_eq!(app.get(range, Some(&token)).await?.status(), StatusCode::OK);
    assert_eq!(
        app.get(range, Some(&token)).await?.status(),
        StatusCode::TOO_MANY_REQUESTS
    );

    assert_eq!(
        app.get(&pdf_path, Some(&other)).await?.status(),
        StatusCode::NOT_FOUND
    );
    Ok(())
}

#[tokio::test]
async fn admin_login_locks_out_after_failures() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::with_config(|config| config.admin_login_rate_limit = 2).await?;

    let wrong = json!({"username": "admin", "password": "guess"});
    for _ in 0..2 {
        let response = app.post_json("/api/admin/login", &wrong, None).await?;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let right = json!({"username": "admin", "password": "admin-password"});
    let locked = app.post_json("/api/admin/login", &right, None).await?;
    assert_eq!(locked.status(), StatusCode::TOO_MANY_REQUESTS);
    Ok(())
}
