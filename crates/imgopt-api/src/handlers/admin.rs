use crate::auth::{secure_compare, session_token};
use crate::constants::SESSION_COOKIE;
use crate::error::{ErrorResponse, HttpAppError};
use crate::handlers::OkResponse;
use crate::state::AppState;
use crate::utils::ip_extraction::ClientIp;
use crate::utils::upload::extract_text_field;
use axum::{
    extract::{Form, FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use imgopt_core::models::parse_flag;
use imgopt_core::AppError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

/// Pool settings and live counters.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WorkersResponse {
    pub desired: usize,
    pub threads: usize,
    pub retention_days: u32,
    pub auto_purge: bool,
    /// Worker tasks running right now, including ones finishing a batch after a scale-down
    pub live: usize,
    /// Workers holding a batch
    pub busy: usize,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct PurgeResponse {
    pub ok: bool,
    pub purged: usize,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginForm {
    pub password: String,
}

#[utoipa::path(
    get,
    path = "/api/admin/workers",
    tag = "admin",
    responses(
        (status = 200, description = "Current settings and pool status", body = WorkersResponse),
        (status = 401, description = "No admin session", body = ErrorResponse)
    )
)]
pub async fn get_workers(State(state): State<Arc<AppState>>) -> Json<WorkersResponse> {
    let settings = state.settings.snapshot();
    let pool = state.workers.pool.status();
    Json(WorkersResponse {
        desired: settings.desired_workers,
        threads: settings.threads_per_batch,
        retention_days: settings.retention_days,
        auto_purge: settings.auto_purge,
        live: pool.live(),
        busy: pool.busy(),
    })
}

#[utoipa::path(
    post,
    path = "/api/admin/workers/set/{n}",
    tag = "admin",
    params(("n" = usize, Path, description = "Desired worker count, 0 to 64")),
    responses(
        (status = 200, description = "Setting stored", body = OkResponse),
        (status = 400, description = "Out of range", body = ErrorResponse),
        (status = 401, description = "No admin session", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn set_workers(
    State(state): State<Arc<AppState>>,
    Path(n): Path<usize>,
) -> Result<Json<OkResponse>, HttpAppError> {
    state.settings.set_desired_workers(n).await?;
    tracing::info!(desired_workers = n, "Desired worker count changed");
    Ok(Json(OkResponse::ok()))
}

#[utoipa::path(
    post,
    path = "/api/admin/threads/set/{n}",
    tag = "admin",
    params(("n" = usize, Path, description = "Item parallelism for new batches, 1 to 64")),
    responses(
        (status = 200, description = "Setting stored", body = OkResponse),
        (status = 400, description = "Out of range", body = ErrorResponse),
        (status = 401, description = "No admin session", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn set_threads(
    State(state): State<Arc<AppState>>,
    Path(n): Path<usize>,
) -> Result<Json<OkResponse>, HttpAppError> {
    state.settings.set_threads_per_batch(n).await?;
    tracing::info!(threads_per_batch = n, "Threads per batch changed");
    Ok(Json(OkResponse::ok()))
}

#[utoipa::path(
    post,
    path = "/api/admin/retention/set/{days}",
    tag = "admin",
    params(("days" = u32, Path, description = "Retention window in days")),
    responses(
        (status = 200, description = "Setting stored", body = OkResponse),
        (status = 401, description = "No admin session", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn set_retention(
    State(state): State<Arc<AppState>>,
    Path(days): Path<u32>,
) -> Result<Json<OkResponse>, HttpAppError> {
    state.settings.set_retention_days(days).await?;
    tracing::info!(retention_days = days, "Retention window changed");
    Ok(Json(OkResponse::ok()))
}

#[utoipa::path(
    post,
    path = "/api/admin/auto-purge/{flag}",
    tag = "admin",
    params(("flag" = String, Path, description = "on/off, true/false, yes/no or 1/0")),
    responses(
        (status = 200, description = "Setting stored", body = OkResponse),
        (status = 400, description = "Unrecognized flag", body = ErrorResponse),
        (status = 401, description = "No admin session", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn set_auto_purge(
    State(state): State<Arc<AppState>>,
    Path(flag): Path<String>,
) -> Result<Json<OkResponse>, HttpAppError> {
    let enabled = parse_flag(&flag)?;
    state.settings.set_auto_purge(enabled).await?;
    tracing::info!(auto_purge = enabled, "Auto purge toggled");
    Ok(Json(OkResponse::ok()))
}

#[utoipa::path(
    post,
    path = "/api/admin/purge",
    tag = "admin",
    responses(
        (status = 200, description = "Expired batches removed", body = PurgeResponse),
        (status = 401, description = "No admin session", body = ErrorResponse)
    )
)]
#[tracing::instrument(skip(state))]
pub async fn purge(State(state): State<Arc<AppState>>) -> Result<Json<PurgeResponse>, HttpAppError> {
    let purged = state.workers.sweeper.purge_now().await;
    tracing::info!(purged, "Manual purge finished");
    Ok(Json(PurgeResponse { ok: true, purged }))
}

/// The password field of a urlencoded or multipart login form.
async fn login_password(request: Request) -> Result<String, AppError> {
    let is_multipart = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("multipart/form-data"));

    let password = if is_multipart {
        let multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| AppError::InvalidInput(e.body_text()))?;
        extract_text_field(multipart, "password").await?
    } else {
        Form::<LoginForm>::from_request(request, &())
            .await
            .ok()
            .map(|Form(form)| form.password)
    };

    password.ok_or_else(|| AppError::InvalidInput("Missing password".to_string()))
}

fn session_cookie(state: &AppState, token: &str, max_age_secs: u64) -> Result<HeaderValue, AppError> {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path={}; Max-Age={}",
        SESSION_COOKIE, token, state.auth.cookie_path, max_age_secs
    );
    if state.auth.secure_cookie {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
        .map_err(|e| AppError::Internal(format!("Invalid session cookie: {}", e)))
}

#[utoipa::path(
    post,
    path = "/api/admin/login",
    tag = "admin",
    request_body(content = LoginForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Session cookie set", body = OkResponse),
        (status = 401, description = "Wrong password", body = ErrorResponse),
        (status = 429, description = "Too many failed attempts", body = ErrorResponse)
    )
)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    ClientIp(client): ClientIp,
    request: Request,
) -> Result<Response, HttpAppError> {
    let limiter = &state.auth.failures;
    if limiter.is_blocked(&client).await {
        return Err(AppError::TooManyRequests("Too many failed login attempts".to_string()).into());
    }

    let password = login_password(request).await?;
    if !secure_compare(&password, state.config.admin_password()) {
        tracing::warn!(client = %client, "Admin login failed");
        if limiter.record_failure(&client).await {
            return Err(
                AppError::TooManyRequests("Too many failed login attempts".to_string()).into(),
            );
        }
        return Err(AppError::Unauthorized("Invalid password".to_string()).into());
    }

    limiter.clear(&client).await;
    let token = state.auth.sessions.create().await;
    let cookie = session_cookie(&state, &token, state.auth.sessions.ttl().as_secs())?;
    tracing::info!(client = %client, "Admin logged in");

    Ok(([(header::SET_COOKIE, cookie)], Json(OkResponse::ok())).into_response())
}

#[utoipa::path(
    post,
    path = "/api/admin/logout",
    tag = "admin",
    responses(
        (status = 200, description = "Session ended and cookie cleared", body = OkResponse),
        (status = 401, description = "No admin session", body = ErrorResponse)
    )
)]
pub async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Response, HttpAppError> {
    if let Some(token) = session_token(&headers) {
        state.auth.sessions.revoke(&token).await;
    }
    let cookie = session_cookie(&state, "", 0)?;
    tracing::info!("Admin logged out");
    Ok(([(header::SET_COOKIE, cookie)], Json(OkResponse::ok())).into_response())
}
