mod helpers;

use chrono::Utc;
use helpers::{setup_test_app, TestApp, TEST_ADMIN_PASSWORD};
use imgopt_core::{Batch, BatchId, BatchStatus, ProcessingMode};
use imgopt_db::LeaseOutcome;
use serde_json::Value;
use std::time::Duration;
use uuid::Uuid;

#[derive(serde::Deserialize)]
struct Workers {
    desired: usize,
    threads: usize,
    retention_days: u32,
    auto_purge: bool,
    live: usize,
    busy: usize,
}

async fn workers(app: &TestApp, cookie: &str) -> Workers {
    let response = app
        .client()
        .get("/api/admin/workers")
        .add_header("Cookie", cookie)
        .await;
    assert_eq!(response.status_code(), 200);
    response.json()
}

/// A failed batch created `age_days` ago, inserted straight into the store.
async fn failed_batch(app: &TestApp, age_days: i64) -> BatchId {
    let batches = &app.state.batches;
    let created = Utc::now() - chrono::Duration::days(age_days);
    let batch = Batch::new(Uuid::new_v4(), "old.xlsx", ProcessingMode::SingleColumn, created);
    let id = batch.id;
    batches.create(batch).await.unwrap();
    batches.enqueue(id).await.unwrap();
    let lease = batches.claim_next(1).await.unwrap();
    assert_eq!(lease.batch_id(), id);
    let status = lease
        .finish(LeaseOutcome::Failed("no images".to_string()))
        .await
        .unwrap();
    assert_eq!(status, BatchStatus::Failed);
    id
}

#[tokio::test]
async fn test_health_and_openapi_are_public() {
    let app = setup_test_app().await;

    let health = app.client().get("/health").await;
    assert_eq!(health.status_code(), 200);
    assert_eq!(health.json::<Value>()["status"], "ok");

    let doc = app.client().get("/api/openapi.json").await;
    assert_eq!(doc.status_code(), 200);
    let doc: Value = doc.json();
    assert!(doc["paths"]["/api/batches"].is_object());
    assert!(doc["paths"]["/api/admin/workers"].is_object());
}

#[tokio::test]
async fn test_admin_routes_require_session() {
    let app = setup_test_app().await;

    let response = app.client().get("/api/admin/workers").await;
    assert_eq!(response.status_code(), 401);

    let forged = app
        .client()
        .post("/api/admin/workers/set/4")
        .add_header("Cookie", "imgopt_session=not-a-real-session")
        .await;
    assert_eq!(forged.status_code(), 401);
    assert_eq!(app.state.settings.snapshot().desired_workers, 0);
}

#[tokio::test]
async fn test_wrong_password_is_rejected_without_cookie() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .post("/api/admin/login")
        .form(&[("password", "hunter2")])
        .await;
    assert_eq!(response.status_code(), 401);
    assert!(response.headers().get("set-cookie").is_none());

    let missing = app
        .client()
        .post("/api/admin/login")
        .form(&[("user", "admin")])
        .await;
    assert_eq!(missing.status_code(), 400);
}

#[tokio::test]
async fn test_login_accepts_multipart_form() {
    let app = setup_test_app().await;

    let response = app
        .client()
        .post("/api/admin/login")
        .multipart(axum_test::multipart::MultipartForm::new().add_text("password", TEST_ADMIN_PASSWORD))
        .await;
    assert_eq!(response.status_code(), 200);
    let cookie = response
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cookie.starts_with("imgopt_session="));
    assert!(cookie.contains("HttpOnly"));
    assert!(cookie.contains("SameSite=Lax"));
}

#[tokio::test]
async fn test_settings_round_trip_through_admin_api() {
    let app = setup_test_app().await;
    let cookie = app.login().await;

    let initial = workers(&app, &cookie).await;
    assert_eq!(initial.desired, 0);
    assert_eq!(initial.threads, 2);
    assert_eq!(initial.live, 0);
    assert_eq!(initial.busy, 0);

    for path in [
        "/api/admin/threads/set/6",
        "/api/admin/retention/set/45",
        "/api/admin/auto-purge/off",
    ] {
        let response = app.client().post(path).add_header("Cookie", &cookie).await;
        assert_eq!(response.status_code(), 200, "{}", path);
        assert_eq!(response.json::<Value>()["ok"], true);
    }

    let updated = workers(&app, &cookie).await;
    assert_eq!(updated.threads, 6);
    assert_eq!(updated.retention_days, 45);
    assert!(!updated.auto_purge);

    for path in [
        "/api/admin/threads/set/0",
        "/api/admin/workers/set/65",
        "/api/admin/auto-purge/maybe",
        "/api/admin/retention/set/forever",
    ] {
        let response = app.client().post(path).add_header("Cookie", &cookie).await;
        assert_eq!(response.status_code(), 400, "{}", path);
    }

    let unchanged = workers(&app, &cookie).await;
    assert_eq!(unchanged.threads, 6);
    assert_eq!(unchanged.desired, 0);
}

#[tokio::test]
async fn test_scaling_workers_changes_live_count() {
    let app = setup_test_app().await;
    let cookie = app.login().await;

    let response = app
        .client()
        .post("/api/admin/workers/set/2")
        .add_header("Cookie", &cookie)
        .await;
    assert_eq!(response.status_code(), 200);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while workers(&app, &cookie).await.live != 2 {
        assert!(tokio::time::Instant::now() < deadline, "pool never scaled up");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(workers(&app, &cookie).await.desired, 2);

    app.client()
        .post("/api/admin/workers/set/0")
        .add_header("Cookie", &cookie)
        .await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while workers(&app, &cookie).await.live != 0 {
        assert!(tokio::time::Instant::now() < deadline, "pool never scaled down");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    app.state.shutdown().await;
}

#[tokio::test]
async fn test_logout_invalidates_session() {
    let app = setup_test_app().await;
    let cookie = app.login().await;

    let logout = app
        .client()
        .post("/api/admin/logout")
        .add_header("Cookie", &cookie)
        .await;
    assert_eq!(logout.status_code(), 200);
    let cleared = logout
        .headers()
        .get("set-cookie")
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(cleared.contains("Max-Age=0"));

    let after = app
        .client()
        .get("/api/admin/workers")
        .add_header("Cookie", &cookie)
        .await;
    assert_eq!(after.status_code(), 401);
}

#[tokio::test]
async fn test_manual_purge_removes_expired_batches() {
    let app = setup_test_app().await;
    let cookie = app.login().await;

    let old = failed_batch(&app, 40).await;
    let recent = failed_batch(&app, 3).await;

    let response = app
        .client()
        .post("/api/admin/retention/set/30")
        .add_header("Cookie", &cookie)
        .await;
    assert_eq!(response.status_code(), 200);

    let response = app
        .client()
        .post("/api/admin/purge")
        .add_header("Cookie", &cookie)
        .await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["ok"], true);
    assert_eq!(body["purged"], 1);

    assert!(app.state.batches.get(old).is_err());
    assert!(app.state.batches.get(recent).is_ok());
}

#[tokio::test]
async fn test_repeated_failures_block_the_client() {
    let app = setup_test_app().await;

    for attempt in 1..=10 {
        let response = app
            .client()
            .post("/api/admin/login")
            .add_header("X-Forwarded-For", "203.0.113.9")
            .form(&[("password", "wrong")])
            .await;
        let expected = if attempt < 10 { 401 } else { 429 };
        assert_eq!(response.status_code(), expected, "attempt {}", attempt);
    }

    let blocked = app
        .client()
        .post("/api/admin/login")
        .add_header("X-Forwarded-For", "203.0.113.9")
        .form(&[("password", TEST_ADMIN_PASSWORD)])
        .await;
    assert_eq!(blocked.status_code(), 429);

    let other_client = app
        .client()
        .post("/api/admin/login")
        .add_header("X-Forwarded-For", "198.51.100.7")
        .form(&[("password", TEST_ADMIN_PASSWORD)])
        .await;
    assert_eq!(other_client.status_code(), 200);
}
