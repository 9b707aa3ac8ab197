//! Resource loading on cache misses.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::backend::procedure::GET_RESOURCE;
use crate::backend::types::first_row;
use crate::backend::{BackendError, ParamValue};
use crate::cache::{is_default_code, Resource};
use crate::pool::{ConnectionPool, PoolError};

/// Errors raised while loading a resource.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Malformed resource: {0}")]
    Malformed(String),
}

/// Produces a resource for a code the cache does not hold.
///
/// Implementations must leave no trace on failure.
#[async_trait]
pub trait ResourceLoader: Send + Sync {
    /// `Ok(None)` means the resource does not exist.
    async fn load(&self, code: &str) -> Result<Option<Resource>, LoadError>;
}

/// Loads resources through a pooled backend connection.
pub struct BackendResourceLoader {
    pool: Arc<ConnectionPool>,
}

impl BackendResourceLoader {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceLoader for BackendResourceLoader {
    async fn load(&self, code: &str) -> Result<Option<Resource>, LoadError> {
        let bound = if is_default_code(code) {
            GET_RESOURCE.bind([("get_default_resource", ParamValue::from(true))])
        } else {
            GET_RESOURCE.bind([
                ("resource_code", ParamValue::from(code.trim())),
                ("get_default_resource", ParamValue::from(false)),
            ])
        };
        let call = bound.map_err(BackendError::from)?;

        let mut conn = self.pool.acquire("get_resource").await?;
        let result = conn.call(&call).await;
        self.pool.release(conn).await;

        let sets = result?;
        match first_row(&sets) {
            Some(row) => Resource::from_row(row).map(Some),
            None => Ok(None),
        }
    }
}
