//! Shared resource cache.
//!
//! # Data Flow
//! ```text
//! get(code, loader)
//!     → hit: cached Arc<Resource> (resources.rs)
//!     → miss: ResourceLoader::load(code) (loader.rs)
//!         → fits item and total ceilings: admitted, then returned
//!         → too large: returned, not cached
//!         → absent or error: None
//! ```
//!
//! # Design Decisions
//! - Add-only: nothing is evicted to make room, entries leave only via purge
//! - Resources are immutable once built and shared as `Arc<Resource>`
//! - The loader runs outside the cache mutex; a concurrent double load of the
//!   same code is admitted once

pub mod loader;
pub mod resource;
pub mod resources;

pub use loader::{BackendResourceLoader, LoadError, ResourceLoader};
pub use resource::{is_default_code, Resource, ResourceMeta};
pub use resources::{CacheLimits, CacheStats, ResourceCache};
