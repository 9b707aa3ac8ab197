//! Stateful session application server.
//!
//! Browsers talk HTTP to this server; the server keeps a session per client
//! and talks to a procedure-oriented backend over pooled connections.
//!
//! # Architecture Overview
//!
//! ```text
//!     Client Request
//!     ──────────────▶ http (router, request id, session token)
//!                        │
//!                        ▼
//!                     session (store, per-session lock, sweeper)
//!                        │                     │
//!                        ▼                     ▼
//!                     pool (connections)    cache (resources, add-only)
//!                        │                     │
//!                        ▼                     │
//!                     backend  ◀──────────────┘ (loader)
//!
//!     Cross-cutting: config, observability, lifecycle, admin
//! ```

// Core subsystems
pub mod backend;
pub mod cache;
pub mod pool;
pub mod session;

// Surfaces
pub mod admin;
pub mod http;

// Cross-cutting concerns
pub mod config;
pub mod lifecycle;
pub mod observability;

pub use config::schema::AppConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
