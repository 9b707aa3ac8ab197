//! Session management subsystem.
//!
//! # Data Flow
//! ```text
//! Request with optional session token + server-assigned holder id
//!     → store.rs: checkout() → SessionLease
//!         → retrieve_or_create(token)
//!         → user_session.rs: acquire_with_wait(holder) → Busy on timeout
//!         → ensure_connection() (borrows from the pool)
//!         → touch() expiry
//!     → handler runs against the session
//!     → lease.rs: finish(), or on drop if the request is cancelled
//!     → finished(holder)
//!         → history entry
//!         → not logged in: connection back to the pool
//!         → no connection left: session removed from the store
//!         → lock released, waiters woken
//!
//! sweeper.rs, every interval:
//!     → sweep_expired(now) → detach(), retire() unless still locked
//! ```
//!
//! # Design Decisions
//! - Lock order is store map → session state; a session never holds its
//!   state mutex while touching the store
//! - Waiting is a Notify wakeup bounded by a poll interval, no queueing
//! - Expiry is enforced only by the sweep, never on lookup

pub mod lease;
pub mod store;
pub mod sweeper;
pub mod user_session;

pub use lease::SessionLease;
pub use store::{Checkout, SessionStore, StoreSettings};
pub use sweeper::SessionSweeper;
pub use user_session::{AuthOutcome, HistoryEntry, HolderId, Session, SessionSummary};
