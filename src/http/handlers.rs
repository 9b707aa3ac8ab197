//! Request handlers.
//!
//! Every handler follows the same shape: check the session out under the
//! holder ID assigned to this request, do the work, finish the lease, then
//! report the session token if the session survived.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;

use crate::backend::Credentials;
use crate::http::response::{attach_session, detach_session, resource_response, ServerError};
use crate::http::server::AppState;
use crate::http::token::session_token;
use crate::session::{AuthOutcome, Checkout, HolderId, Session, SessionLease};

/// Resource code addressed by a request path.
fn resource_code(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

async fn checkout(
    state: &AppState,
    token: Option<&str>,
    holder: &HolderId,
) -> Result<SessionLease, ServerError> {
    match state.sessions.checkout(token, holder).await? {
        Checkout::Ready(session) => Ok(session),
        Checkout::Busy { token } => {
            tracing::warn!(session = %token, holder = %holder, "Session busy, giving up");
            Err(ServerError::SessionBusy)
        }
    }
}

/// Attach the token while the session lives, clear it once it is gone.
fn with_session(state: &AppState, mut response: Response, presented: Option<&str>, token: &str) -> Response {
    let cookie_name = &state.config.session.cookie_name;
    if state.sessions.get(token).is_some() {
        attach_session(&mut response, cookie_name, token);
    } else if presented.is_some() {
        detach_session(&mut response, cookie_name);
    }
    response
}

/// `ANY /` and `ANY /{*path}`.
pub async fn serve_resource(
    State(state): State<AppState>,
    Extension(holder): Extension<HolderId>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let presented = session_token(&headers, &state.config.session.cookie_name);
    let code = resource_code(uri.path());

    let session = match checkout(&state, presented.as_deref(), &holder).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    let response = render(&state, &session, &code).await;
    session.set_next_page(Some(code));
    let token = session.token().to_string();
    session.finish().await;

    with_session(&state, response, presented.as_deref(), &token)
}

async fn render(state: &AppState, session: &Session, code: &str) -> Response {
    let Some(resource) = state.cache.get(code, state.loader.as_ref()).await else {
        return ServerError::NotFound(code.to_string()).into_response();
    };

    if !resource.meta.is_public {
        tracing::debug!(code = %code, "Resource is not public");
        return ServerError::NotFound(code.to_string()).into_response();
    }

    if resource.meta.requires_authentication && !session.logged_in() {
        tracing::debug!(session = %session.token(), code = %code, "Login required");
        return login_required(state).await;
    }

    session.set_current_resource(resource.clone());
    resource_response(StatusCode::OK, &resource)
}

async fn login_required(state: &AppState) -> Response {
    let login_code = &state.config.cache.login_resource;
    match state.cache.get(login_code, state.loader.as_ref()).await {
        Some(login) => resource_response(StatusCode::UNAUTHORIZED, &login),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "login_required", "message": "Log in to view this resource" })),
        )
            .into_response(),
    }
}

/// `POST /login` with `{username, password}` or `{user_token}`.
pub async fn login(
    State(state): State<AppState>,
    Extension(holder): Extension<HolderId>,
    headers: HeaderMap,
    Json(credentials): Json<Credentials>,
) -> Response {
    let has_password = credentials.username.is_some() && credentials.password.is_some();
    if !has_password && credentials.user_token.is_none() {
        return ServerError::BadRequest("username and password, or user_token, required".to_string())
            .into_response();
    }

    let presented = session_token(&headers, &state.config.session.cookie_name);
    let session = match checkout(&state, presented.as_deref(), &holder).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    let response = match session.authenticate(&credentials).await {
        AuthOutcome::Success { username } => {
            (StatusCode::OK, Json(json!({ "status": "ok", "username": username }))).into_response()
        }
        AuthOutcome::Public => (StatusCode::OK, Json(json!({ "status": "public" }))).into_response(),
        AuthOutcome::Rejected { reason } => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "status": "rejected", "message": reason })),
        )
            .into_response(),
    };
    let token = session.token().to_string();
    session.finish().await;

    with_session(&state, response, presented.as_deref(), &token)
}

/// `GET /logout`.
///
/// Unknown or missing tokens are already logged out.
pub async fn logout(
    State(state): State<AppState>,
    Extension(holder): Extension<HolderId>,
    headers: HeaderMap,
) -> Response {
    let presented = session_token(&headers, &state.config.session.cookie_name);
    let session = presented.as_deref().and_then(|token| state.sessions.get(token));
    let Some(session) = session else {
        let response = Json(json!({ "status": "logged_out" })).into_response();
        return with_session(&state, response, presented.as_deref(), "");
    };

    let settings = state.sessions.settings();
    if !session
        .acquire_with_wait(&holder, settings.lock_poll_interval, settings.lock_timeout)
        .await
    {
        return ServerError::SessionBusy.into_response();
    }
    let lease = SessionLease::new(session, holder);

    lease.logout().await;
    let token = lease.token().to_string();
    lease.finish().await;

    let response = Json(json!({ "status": "logged_out" })).into_response();
    with_session(&state, response, presented.as_deref(), &token)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_code_from_path() {
        assert_eq!(resource_code("/"), "");
        assert_eq!(resource_code("/index.html"), "index.html");
        assert_eq!(resource_code("/js/app.js"), "js/app.js");
    }
}
