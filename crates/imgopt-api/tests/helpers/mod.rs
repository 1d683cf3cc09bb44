//! Test helpers: build the application on a temporary storage root.
//!
//! Run from workspace root: `cargo test -p imgopt-api`.

#![allow(dead_code)]

pub mod fixtures;

use axum_test::TestServer;
use imgopt_api::setup::build_app;
use imgopt_api::state::AppState;
use imgopt_core::{BatchStatus, Config, ProcessorConfig};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use uuid::Uuid;

pub const TEST_ADMIN_PASSWORD: &str = "correct horse battery staple";

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    pub _temp_dir: TempDir,
}

impl TestApp {
    pub fn client(&self) -> &TestServer {
        &self.server
    }

    /// Log in and return the `Cookie` header value carrying the session.
    pub async fn login(&self) -> String {
        let response = self
            .server
            .post("/api/admin/login")
            .form(&[("password", TEST_ADMIN_PASSWORD)])
            .await;
        assert_eq!(response.status_code(), 200);
        let set_cookie = response
            .headers()
            .get("set-cookie")
            .expect("login sets a cookie")
            .to_str()
            .unwrap()
            .to_string();
        set_cookie
            .split(';')
            .next()
            .expect("cookie has a name=value pair")
            .to_string()
    }

    /// Poll the batch until it reaches `status`.
    pub async fn wait_for_status(&self, id: Uuid, status: BatchStatus) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let current = self.state.batches.get(id).expect("batch exists").status;
            if current == status {
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "batch {} stuck in {} while waiting for {}",
                id,
                current,
                status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

/// App with no workers: uploaded batches stay queued.
pub async fn setup_test_app() -> TestApp {
    setup_test_app_with(&[]).await
}

/// App configured like `setup_test_app`, with `overrides` applied on top.
pub async fn setup_test_app_with(overrides: &[(&str, &str)]) -> TestApp {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");

    let mut vars: HashMap<String, String> = [
        ("ENVIRONMENT", "development"),
        ("ADMIN_PASSWORD", TEST_ADMIN_PASSWORD),
        ("PUBLIC_BASE_URL", "http://imgopt.test"),
        ("WORKER_PROCESSES", "0"),
        ("THREADS_PER_WORKER", "2"),
        ("WORKER_POLL_INTERVAL_MS", "20"),
        ("IMAGE_FETCH_TIMEOUT_SECS", "5"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect();
    vars.insert(
        "STORAGE_ROOT".to_string(),
        temp_dir.path().to_string_lossy().into_owned(),
    );
    for (key, value) in overrides {
        vars.insert(key.to_string(), value.to_string());
    }

    let config = Config(Box::new(
        ProcessorConfig::from_lookup(|key| vars.get(key).cloned())
            .expect("Failed to build test config"),
    ));
    config.validate().expect("Test config is valid");

    let (state, router) = build_app(config).await.expect("Failed to build app");
    let server = TestServer::new(router).expect("Failed to start test server");

    TestApp {
        server,
        state,
        _temp_dir: temp_dir,
    }
}
