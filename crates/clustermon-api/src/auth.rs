//! Request middleware: session-token authentication and access logging.

use std::time::Instant;

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::Utc;
use tracing::debug;

use clustermon_core::token::verify_token;

use crate::ApiState;
use crate::handlers::error_response;

fn bearer_token(request: &Request) -> Option<String> {
    request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
}

/// Reject requests until the first user exists, then require a valid
/// `Authorization: Bearer` token for a user that still exists.
pub async fn require_token(
    State(state): State<ApiState>,
    request: Request,
    next: Next,
) -> Response {
    match state.store.is_initialized() {
        Ok(true) => {}
        Ok(false) => {
            return error_response("cluster monitor not initialized", StatusCode::SERVICE_UNAVAILABLE);
        }
        Err(e) => return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }

    let Some(token) = bearer_token(&request) else {
        return error_response("missing bearer token", StatusCode::UNAUTHORIZED);
    };
    let user = match verify_token(&state.keys, &token, Utc::now()) {
        Ok(user) => user,
        Err(e) => {
            debug!(error = %e, "rejected session token");
            return error_response("invalid or expired token", StatusCode::UNAUTHORIZED);
        }
    };

    match state.store.get_user(&user) {
        Ok(_) => next.run(request).await,
        Err(e) if e.is_not_found() => {
            error_response("invalid or expired token", StatusCode::UNAUTHORIZED)
        }
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR),
    }
}

pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let started = Instant::now();

    let response = next.run(request).await;
    debug!(
        %method,
        %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request"
    );
    response
}
