//! Response building and error mapping.
//!
//! # Responsibilities
//! - Render a resource with its content type
//! - Map session, pool and cache failures to status codes
//! - Attach or clear the session token on the way out
//!
//! # Design Decisions
//! - A busy session and an unreachable backend are both 503 but carry
//!   different messages so clients can tell them apart
//! - Error bodies are small JSON objects

use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::cache::Resource;
use crate::http::token::{clear_session_cookie, session_cookie, X_SESSION_TOKEN};
use crate::pool::PoolError;

/// Request-level failures.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Session is busy with another request")]
    SessionBusy,

    #[error("Backend unavailable: {0}")]
    BackendUnavailable(#[from] PoolError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

impl ServerError {
    pub fn status(&self) -> StatusCode {
        match self {
            ServerError::SessionBusy | ServerError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            ServerError::SessionBusy => "session_busy",
            ServerError::BackendUnavailable(_) => "backend_unavailable",
            ServerError::NotFound(_) => "not_found",
            ServerError::BadRequest(_) => "bad_request",
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.kind(),
            "message": self.to_string(),
        }));
        (status, body).into_response()
    }
}

/// Serve a resource body with its content type.
pub fn resource_response(status: StatusCode, resource: &Resource) -> Response {
    let mut response = Response::new(Body::from(resource.data.clone()));
    *response.status_mut() = status;
    let content_type = HeaderValue::from_str(&resource.meta.content_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    response.headers_mut().insert(header::CONTENT_TYPE, content_type);
    response
}

/// Tell the client which session it now belongs to.
pub fn attach_session(response: &mut Response, cookie_name: &str, token: &str) {
    if let Ok(value) = HeaderValue::from_str(token) {
        response.headers_mut().insert(X_SESSION_TOKEN, value);
    }
    if let Some(cookie) = session_cookie(cookie_name, token) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
}

/// Tell the client its session is gone.
pub fn detach_session(response: &mut Response, cookie_name: &str) {
    if let Some(cookie) = clear_session_cookie(cookie_name) {
        response.headers_mut().append(header::SET_COOKIE, cookie);
    }
}
