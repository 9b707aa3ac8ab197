//! Request identification.
//!
//! # Responsibilities
//! - Attach a UUID v4 request ID to every request (tower-http)
//! - Echo the ID on the response
//! - Give every request its own session lock holder
//!
//! # Design Decisions
//! - The request ID is client-controlled and only used for correlation;
//!   lock holders are always generated here

use axum::{
    extract::Request,
    http::{HeaderMap, HeaderName},
    middleware::Next,
    response::Response,
};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

use crate::session::HolderId;

pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// Layer that assigns missing request IDs.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuid> {
    SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuid)
}

/// Layer that copies the request ID onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(X_REQUEST_ID)
}

/// Access to the request ID carried in headers.
pub trait RequestIdExt {
    fn request_id(&self) -> Option<&str>;
}

impl RequestIdExt for HeaderMap {
    fn request_id(&self) -> Option<&str> {
        self.get(&X_REQUEST_ID)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    }
}

/// Middleware that stores a fresh [`HolderId`] in the request extensions.
///
/// Handlers take it with `Extension<HolderId>`.
pub async fn assign_lock_holder(mut request: Request, next: Next) -> Response {
    let holder = HolderId::new();
    tracing::trace!(
        request_id = request.headers().request_id().unwrap_or("-"),
        holder = %holder,
        "Assigned lock holder"
    );
    request.extensions_mut().insert(holder);
    next.run(request).await
}
