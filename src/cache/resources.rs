//! Size-bounded, add-only resource cache.
//!
//! # Responsibilities
//! - Serve cached resources by code
//! - Admit loaded resources under a per-item and an aggregate byte ceiling
//! - Purge one code or everything on request

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::cache::{is_default_code, Resource, ResourceLoader};
use crate::config::schema::CacheConfig;
use crate::observability::metrics;

/// Byte ceilings for admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheLimits {
    pub max_item_bytes: usize,
    pub max_total_bytes: usize,
}

impl CacheLimits {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            max_item_bytes: config.max_item_bytes,
            max_total_bytes: config.max_total_bytes,
        }
    }
}

/// Diagnostics snapshot.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes_used: usize,
    pub max_item_bytes: usize,
    pub max_total_bytes: usize,
    pub hits: u64,
    pub misses: u64,
    /// Loaded resources that were served but did not fit.
    pub refused: u64,
}

#[derive(Default)]
struct CacheInner {
    resources: HashMap<String, Arc<Resource>>,
    bytes_used: usize,
    hits: u64,
    misses: u64,
    refused: u64,
}

/// A thread-safe cache of immutable resources.
#[derive(Clone)]
pub struct ResourceCache {
    inner: Arc<Mutex<CacheInner>>,
    limits: CacheLimits,
}

impl ResourceCache {
    pub fn new(limits: CacheLimits) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CacheInner::default())),
            limits,
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().expect("resource cache mutex poisoned")
    }

    pub fn limits(&self) -> CacheLimits {
        self.limits
    }

    /// Cached entry for `code`, without loading.
    pub fn peek(&self, code: &str) -> Option<Arc<Resource>> {
        self.lock().resources.get(code.trim()).cloned()
    }

    /// Return the resource for `code`, loading it on a miss.
    ///
    /// Default codes always go to the loader and are never cached. A loaded
    /// resource that does not fit is still returned.
    pub async fn get(&self, code: &str, loader: &dyn ResourceLoader) -> Option<Arc<Resource>> {
        let code = code.trim();
        let cacheable = !is_default_code(code);

        if cacheable {
            let mut inner = self.lock();
            if let Some(resource) = inner.resources.get(code).cloned() {
                inner.hits += 1;
                drop(inner);
                metrics::record_cache_lookup("hit");
                tracing::trace!(code = %code, "Serving resource from cache");
                return Some(resource);
            }
            inner.misses += 1;
        }
        metrics::record_cache_lookup("miss");

        let resource = match loader.load(code).await {
            Ok(Some(resource)) => Arc::new(resource),
            Ok(None) => {
                tracing::debug!(code = %code, "Resource not found");
                return None;
            }
            Err(e) => {
                tracing::warn!(code = %code, error = %e, "Resource could not be loaded");
                return None;
            }
        };

        if !cacheable {
            return Some(resource);
        }
        Some(self.admit(code, resource))
    }

    /// Insert under the ceilings, or return the entry another loader won with.
    fn admit(&self, code: &str, resource: Arc<Resource>) -> Arc<Resource> {
        let len = resource.len();
        let mut inner = self.lock();

        if let Some(existing) = inner.resources.get(code) {
            return existing.clone();
        }

        let fits = len <= self.limits.max_item_bytes
            && inner.bytes_used.saturating_add(len) <= self.limits.max_total_bytes;
        if !fits {
            inner.refused += 1;
            let bytes_used = inner.bytes_used;
            drop(inner);
            metrics::record_cache_lookup("refused");
            tracing::info!(
                code = %code,
                size = len,
                bytes_used,
                max_item_bytes = self.limits.max_item_bytes,
                max_total_bytes = self.limits.max_total_bytes,
                "Resource too large to cache"
            );
            return resource;
        }

        inner.bytes_used += len;
        inner.resources.insert(code.to_string(), resource.clone());
        let bytes_used = inner.bytes_used;
        drop(inner);

        metrics::set_cache_bytes(bytes_used);
        tracing::debug!(code = %code, size = len, bytes_used, "Cached resource");
        resource
    }

    /// Drop one cached resource. Returns whether it was present.
    pub fn purge(&self, code: &str) -> bool {
        let mut inner = self.lock();
        let Some(removed) = inner.resources.remove(code.trim()) else {
            return false;
        };
        inner.bytes_used -= removed.len();
        let bytes_used = inner.bytes_used;
        drop(inner);

        metrics::set_cache_bytes(bytes_used);
        tracing::info!(code = %code, "Purged cached resource");
        true
    }

    /// Drop every cached resource. Returns whether anything was cached.
    pub fn purge_all(&self) -> bool {
        let mut inner = self.lock();
        let had_entries = !inner.resources.is_empty();
        inner.resources.clear();
        inner.bytes_used = 0;
        drop(inner);

        metrics::set_cache_bytes(0);
        tracing::info!(had_entries, "Purged all cached resources");
        had_entries
    }

    pub fn len(&self) -> usize {
        self.lock().resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes_used(&self) -> usize {
        self.lock().bytes_used
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        CacheStats {
            entries: inner.resources.len(),
            bytes_used: inner.bytes_used,
            max_item_bytes: self.limits.max_item_bytes,
            max_total_bytes: self.limits.max_total_bytes,
            hits: inner.hits,
            misses: inner.misses,
            refused: inner.refused,
        }
    }
}
