//! Session token transport.
//!
//! The token travels in the `x-session-token` header or a cookie. The header
//! wins when both are present.

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

pub const X_SESSION_TOKEN: HeaderName = HeaderName::from_static("x-session-token");

/// Token presented by the client, if any.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(token) = headers
        .get(&X_SESSION_TOKEN)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return Some(token.to_string());
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == cookie_name && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// `Set-Cookie` value that stores `token`.
pub fn session_cookie(cookie_name: &str, token: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("{cookie_name}={token}; Path=/; HttpOnly; SameSite=Lax")).ok()
}

/// `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie(cookie_name: &str) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!("{cookie_name}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")).ok()
}
