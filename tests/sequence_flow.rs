mod common;

use std::collections::BTreeSet;

use anyhow::{anyhow, Result};
use axum::http::StatusCode;
use chrono::{Datelike, Utc};
use common::{acquire_db_lock, body_json, TestApp};
use routesheets::sequence;
use routesheets::sheets::{self, NewTrip};
use serde_json::json;

fn airport_trip() -> Result<NewTrip> {
    Ok(serde_json::from_value(json!({
        "prebooked_date": "2026-03-01",
        "prebooked_locality": "Oviedo",
        "pickup_type": "AIRPORT",
        "flight_number": "IB0420",
        "pickup_datetime": "2026-03-02T08:30:00Z",
        "destination": "Gijon",
        "passenger_info": "1 adult",
    }))?)
}

#[tokio::test]
async fn concurrent_allocations_are_gap_free_and_unique() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let owner = app.insert_user("driver@example.com", "password-1").await?;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let pool = app.pool();
        handles.push(tokio::task::spawn_blocking(move || -> Result<i64> {
            let mut conn = pool.get().map_err(|err| anyhow!("{err}"))?;
            Ok(sequence::allocate(&mut conn, owner, 2026)?)
        }));
    }

    let mut numbers = BTreeSet::new();
    for handle in handles {
        numbers.insert(handle.await??);
    }

    assert_eq!(numbers, (1..=25).collect::<BTreeSet<i64>>());
    let current = app
        .with_conn(move |conn| Ok(sequence::current(conn, owner, 2026)?))
        .await?;
    assert_eq!(current, 25);
    Ok(())
}

#[tokio::test]
async fn concurrent_sheet_creation_numbers_every_sheet_once() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let owner = app.insert_user("driver@example.com", "password-1").await?;

    let mut handles = Vec::new();
    for _ in 0..25 {
        let pool = app.pool();
        let trip = airport_trip()?;
        handles.push(tokio::task::spawn_blocking(move || -> Result<(i32, i64)> {
            let mut conn = pool.get().map_err(|err| anyhow!("{err}"))?;
            let sheet = sheets::create_sheet(&mut conn, owner, trip)?;
            Ok((sheet.year, sheet.seq))
        }));
    }

    let mut numbers = BTreeSet::new();
    let mut years = BTreeSet::new();
    for handle in handles {
        let (year, seq) = handle.await??;
        years.insert(year);
        numbers.insert(seq);
    }

    assert_eq!(years.len(), 1);
    assert_eq!(numbers, (1..=25).collect::<BTreeSet<i64>>());
    Ok(())
}

#[tokio::test]
async fn counters_are_per_owner_and_per_year() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let first = app.insert_user("first@example.com", "password-1").await?;
    let second = app.insert_user("second@example.com", "password-2").await?;

    let allocated = app
        .with_conn(move |conn| {
            Ok(vec![
                sequence::allocate(conn, first, 2025)?,
                sequence::allocate(conn, first, 2025)?,
                sequence::allocate(conn, first, 2026)?,
                sequence::allocate(conn, second, 2025)?,
            ])
        })
        .await?;

    assert_eq!(allocated, vec![1, 2, 1, 1]);
    Ok(())
}

#[tokio::test]
async fn created_sheets_carry_padded_numbers() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("driver@example.com", "password-1").await?;
    let token = app.login_token("driver@example.com", "password-1").await?;

    let trip = json!({
        "contractor_email": "client@example.com",
        "prebooked_date": "2026-03-01",
        "prebooked_locality": "Oviedo",
        "pickup_type": "AIRPORT",
        "flight_number": "vy1234",
        "pickup_datetime": "2026-03-02T08:30:00Z",
        "destination": "Gijon",
        "passenger_info": "2 adults",
    });

    let first = app.post_json("/api/route-sheets", &trip, Some(&token)).await?;
    assert_eq!(first.status(), StatusCode::CREATED);
    let first = body_json(first).await?;
    let second = body_json(app.post_json("/api/route-sheets", &trip, Some(&token)).await?).await?;

    let year = Utc::now().year();
    assert_eq!(first["sheet_number"], format!("001/{year}"));
    assert_eq!(second["sheet_number"], format!("002/{year}"));
    assert_eq!(first["flight_number"], "VY1234");
    assert_eq!(first["status"], "ACTIVE");
    assert_eq!(first["visibility"], "VISIBLE");

    let invalid = app
        .post_json(
            "/api/route-sheets",
            &json!({
                "prebooked_date": "2026-03-01",
                "prebooked_locality": "Oviedo",
                "pickup_type": "OTHER",
                "pickup_address": "Calle Uria 1",
                "pickup_datetime": "2026-03-02T08:30:00Z",
                "destination": "Gijon",
                "passenger_info": "2 adults",
            }),
            Some(&token),
        )
        .await?;
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

    let third = body_json(app.post_json("/api/route-sheets", &trip, Some(&token)).await?).await?;
    assert_eq!(third["sheet_number"], format!("003/{year}"));
    Ok(())
}

#[tokio::test]
async fn naive_pickup_is_local_and_day_filters_follow_local_days() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    app.insert_user("driver@example.com", "password-1").await?;
    let token = app.login_token("driver@example.com", "password-1").await?;

    let mut trip = json!({
        "prebooked_date": "2026-03-01",
        "prebooked_locality": "Oviedo",
        "pickup_type": "OTHER",
        "pickup_address": "Calle Uria 1",
        "pickup_datetime": "2026-03-03T00:30:00",
        "destination": "Gijon",
        "passenger_info": "2 adults",
    });
    let created = app.post_json("/api/route-sheets", &trip, Some(&token)).await?;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = body_json(created).await?;
    let stored = created["pickup_datetime"].as_str().unwrap_or_default().to_string();
    assert!(stored.starts_with("2026-03-02T23:30:00"), "stored {stored}");

    trip["pickup_datetime"] = json!("2026-03-03T23:30:00+01:00");
    let late = app.post_json("/api/route-sheets", &trip, Some(&token)).await?;
    assert_eq!(late.status(), StatusCode::CREATED);

    let same_day = body_json(
        app.get(
            "/api/route-sheets?from_date=2026-03-03&to_date=2026-03-03",
            Some(&token),
        )
        .await?,
    )
    .await?;
    assert_eq!(same_day["count"], 2);

    let day_before = body_json(
        app.get(
            "/api/route-sheets?from_date=2026-03-02&to_date=2026-03-02",
            Some(&token),
        )
        .await?,
    )
    .await?;
    assert_eq!(day_before["count"], 0);

    trip["pickup_datetime"] = json!("not a time");
    let garbage = app.post_json("/api/route-sheets", &trip, Some(&token)).await?;
    assert_eq!(garbage.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn owner_listing_pages_with_a_cursor() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let app = TestApp::new().await?;
    let owner = app.insert_user("driver@example.com", "password-1").await?;
    let token = app.login_token("driver@example.com", "password-1").await?;
    app.with_conn(move |conn| {
        for _ in 0..3 {
            sheets::create_sheet(conn, owner, airport_trip()?)?;
        }
        Ok(())
    })
    .await?;

    let first = body_json(app.get("/api/route-sheets?limit=2", Some(&token)).await?).await?;
    assert_eq!(first["count"], 2);
    let cursor = first["next_cursor"].as_str().unwrap_or_default().to_string();
    assert!(!cursor.is_empty());

    let rest = body_json(
        app.get(
            &format!("/api/route-sheets?limit=2&cursor={cursor}"),
            Some(&token),
        )
        .await?,
    )
    .await?;
    assert_eq!(rest["count"], 1);
    assert!(rest["next_cursor"].is_null());

    let mut seen: BTreeSet<String> = BTreeSet::new();
    for page in [&first, &rest] {
        for sheet in page["sheets"].as_array().into_iter().flatten() {
            seen.insert(sheet["id"].as_str().unwrap_or_default().to_string());
        }
    }
    assert_eq!(seen.len(), 3);

    let bad = app
        .get("/api/route-sheets?cursor=not-a-cursor", Some(&token))
        .await?;
    assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
