use crate::constants::SESSION_COOKIE;
use crate::error::HttpAppError;
use crate::state::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use imgopt_core::AppError;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;

/// Counts failed logins per client and blocks a client for the rest of the window
/// once it reaches `max_failures`.
#[derive(Clone)]
pub struct AuthFailureLimiter {
    inner: Arc<Mutex<HashMap<String, (u32, Instant)>>>,
    max_failures: u32,
    window: Duration,
}

impl AuthFailureLimiter {
    pub fn new(max_failures: u32, window_seconds: u64) -> Self {
        Self {
            inner: Arc::new(Mutex::new(HashMap::new())),
            max_failures,
            window: Duration::from_secs(window_seconds),
        }
    }

    /// Record a failure; returns true when the client is now blocked.
    pub async fn record_failure(&self, client: &str) -> bool {
        let mut guard = self.inner.lock().await;
        let now = Instant::now();
        let (count, reset_at) = guard
            .entry(client.to_string())
            .or_insert((0, now + self.window));
        if now >= *reset_at {
            *count = 0;
            *reset_at = now + self.window;
        }
        *count += 1;
        *count >= self.max_failures
    }

    pub async fn is_blocked(&self, client: &str) -> bool {
        let mut guard = self.inner.lock().await;
        if let Some((count, reset_at)) = guard.get(client) {
            if Instant::now() >= *reset_at {
                guard.remove(client);
                return false;
            }
            return *count >= self.max_failures;
        }
        false
    }

    pub async fn clear(&self, client: &str) {
        self.inner.lock().await.remove(client);
    }
}

pub fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// The session token carried by the request's cookies, if any.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Rejects requests without a live admin session.
pub async fn session_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = match session_token(request.headers()) {
        Some(token) => state.auth.sessions.is_valid(&token).await,
        None => false,
    };

    if !authorized {
        tracing::debug!(path = %request.uri().path(), "Admin request without a valid session");
        return HttpAppError(AppError::Unauthorized(
            "Admin session required".to_string(),
        ))
        .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_secure_compare() {
        assert!(secure_compare("hunter2", "hunter2"));
        assert!(!secure_compare("hunter2", "hunter3"));
        assert!(!secure_compare("hunter2", "hunter22"));
    }

    #[test]
    fn test_session_token_is_found_among_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; imgopt_session=abc123 ; other=1"),
        );
        assert_eq!(session_token(&headers).as_deref(), Some("abc123"));
    }

    #[test]
    fn test_missing_or_empty_session_cookie() {
        let mut headers = HeaderMap::new();
        assert_eq!(session_token(&headers), None);
        headers.insert(header::COOKIE, HeaderValue::from_static("imgopt_session="));
        assert_eq!(session_token(&headers), None);
    }

    #[tokio::test]
    async fn test_limiter_blocks_after_max_failures() {
        let limiter = AuthFailureLimiter::new(3, 60);
        assert!(!limiter.record_failure("10.0.0.1").await);
        assert!(!limiter.record_failure("10.0.0.1").await);
        assert!(limiter.record_failure("10.0.0.1").await);
        assert!(limiter.is_blocked("10.0.0.1").await);
        assert!(!limiter.is_blocked("10.0.0.2").await);

        limiter.clear("10.0.0.1").await;
        assert!(!limiter.is_blocked("10.0.0.1").await);
    }
}
