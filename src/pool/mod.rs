//! Backend connection pool.
//!
//! # Data Flow
//! ```text
//! acquire(name)
//!     → pop a connected handle from the free list (manager.rs)
//!     → or open + bootstrap + auto-authenticate a new one (connection.rs)
//!     → Connection, owned by exactly one borrower
//!
//! release(connection)
//!     → disconnected: closed and discarded
//!     → user-authenticated or not public-authenticated: reinitialized
//!     → appended to the free list
//! ```
//!
//! # Design Decisions
//! - A `Connection` is a plain owned value: it lives in the free list or
//!   with one borrower, never both
//! - The pool mutex guards membership only; handle traffic happens outside it
//! - The maximum is advisory: going over it logs a warning

pub mod connection;
pub mod manager;

use thiserror::Error;

use crate::backend::BackendError;

pub use connection::Connection;
pub use manager::{ConnectionPool, PoolSettings, PoolStats};

/// Errors that can occur while obtaining a connection.
#[derive(Debug, Error)]
pub enum PoolError {
    /// A new handle could not be opened or bootstrapped.
    #[error("Backend connection unavailable: {0}")]
    ConnectionUnavailable(#[source] BackendError),
}

/// Result type for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;
