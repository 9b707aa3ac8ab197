//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware)
//!     → request.rs (request ID, fresh session lock holder)
//!     → token.rs (session token from header or cookie)
//!     → handlers.rs (checkout, serve / login / logout, finished)
//!     → response.rs (content type, error mapping, session token out)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;
pub mod token;

pub use request::{RequestIdExt, X_REQUEST_ID};
pub use response::ServerError;
pub use server::{AppState, HttpServer};
pub use token::X_SESSION_TOKEN;
