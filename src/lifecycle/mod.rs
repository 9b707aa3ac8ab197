//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → connector → pool → store + cache → warm-up → listener
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger()
//!
//! Shutdown (shutdown.rs):
//!     Trigger → listener drains, sweeper exits
//!             → sessions hand back connections → pool closes them
//! ```

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
