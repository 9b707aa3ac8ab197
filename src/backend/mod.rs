//! Remote data-processing backend.
//!
//! # Data Flow
//! ```text
//! ConnectionPool needs a new handle
//!     → Connector::connect() (http.rs or memory.rs)
//!     → Box<dyn BackendHandle>
//!     → procedure.rs binds a typed ProcedureCall
//!     → BackendHandle::call() → ResultSets (types.rs)
//! ```
//!
//! # Design Decisions
//! - Handles are stateful: identity and session setup live on the backend
//!   side, so a handle is owned by one borrower at a time
//! - A handle reports dead via `is_connected()`; callers discard it
//! - Procedures are declared once with typed parameters and bound per call

pub mod http;
pub mod memory;
pub mod procedure;
pub mod types;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::schema::{BackendConfig, BackendKind};

pub use http::HttpBackend;
pub use memory::{MemoryBackend, MemoryResource};
pub use procedure::{ParamKind, ParamSpec, ParamValue, ProcedureCall, ProcedureSignature};
pub use types::{BackendError, BackendResult, Credentials, ResultSets, Row};

/// A live, stateful handle to the backend.
#[async_trait]
pub trait BackendHandle: Send + Sync {
    /// Execute a bound procedure on this handle.
    async fn call(&mut self, call: &ProcedureCall) -> BackendResult<ResultSets>;

    /// Whether the handle can still be used.
    fn is_connected(&self) -> bool;

    /// Close the handle. Never fails; errors are logged and swallowed.
    async fn close(&mut self);
}

/// Opens new backend handles.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self) -> BackendResult<Box<dyn BackendHandle>>;
}

/// Build the connector selected by configuration.
pub fn connector_from_config(config: &BackendConfig) -> BackendResult<Arc<dyn Connector>> {
    match config.kind {
        BackendKind::Http => {
            let url = config
                .url
                .parse()
                .map_err(|e| BackendError::Connect(format!("Invalid backend URL '{}': {}", config.url, e)))?;
            Ok(Arc::new(HttpBackend::new(url, config.app_name.clone())))
        }
        BackendKind::Memory => {
            tracing::warn!("Using in-memory backend; data is not persisted");
            Ok(Arc::new(MemoryBackend::new()))
        }
    }
}
