//! A pooled backend connection.
//!
//! # Responsibilities
//! - Own one backend handle plus its identity context flags
//! - Run procedures with an optional per-call deadline
//! - Bootstrap itself (init_session + anonymous authentication)
//! - Drop out of the pool's in-use bookkeeping when dropped unreleased
//! - Close its backend handle when dropped without an explicit close

use std::fmt;
use std::sync::Weak;
use std::time::Duration;

use tokio::time::Instant;

use crate::backend::procedure::{AUTHENTICATE_USER, INIT_SESSION};
use crate::backend::types::{first_row, BackendError, BackendResult, ResultSets};
use crate::backend::{BackendHandle, ParamValue, ProcedureCall};
use crate::observability::metrics;
use crate::pool::manager::PoolShared;

/// An exclusively owned backend handle.
pub struct Connection {
    id: u64,
    name: String,
    /// `None` once closed.
    handle: Option<Box<dyn BackendHandle>>,
    public_authenticated: bool,
    user_authenticated: bool,
    deadline: Option<Instant>,
    call_timeout: Option<Duration>,
    checked_out: bool,
    owner: Weak<PoolShared>,
}

impl Connection {
    pub(crate) fn new(
        id: u64,
        name: &str,
        handle: Box<dyn BackendHandle>,
        call_timeout: Option<Duration>,
        owner: Weak<PoolShared>,
    ) -> Self {
        Self {
            id,
            name: name.to_string(),
            handle: Some(handle),
            public_authenticated: false,
            user_authenticated: false,
            deadline: None,
            call_timeout,
            checked_out: false,
            owner,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name.clear();
        self.name.push_str(name);
    }

    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| h.is_connected())
    }

    pub fn is_public_authenticated(&self) -> bool {
        self.public_authenticated
    }

    pub fn is_user_authenticated(&self) -> bool {
        self.user_authenticated
    }

    /// Deadline of the call currently in flight, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// The handle carries a real user's identity from now on.
    pub fn mark_user_authenticated(&mut self) {
        self.user_authenticated = true;
    }

    /// Whether the connection must be bootstrapped again before reuse.
    pub fn needs_reinit(&self) -> bool {
        self.user_authenticated || !self.public_authenticated
    }

    pub(crate) fn set_checked_out(&mut self, checked_out: bool) {
        self.checked_out = checked_out;
    }

    /// Run a procedure on this connection.
    ///
    /// The call is never aborted. If it completes after its deadline the
    /// result is discarded and `DeadlineExceeded` is returned instead.
    pub async fn call(&mut self, call: &ProcedureCall) -> BackendResult<ResultSets> {
        let started = Instant::now();
        self.deadline = self.call_timeout.map(|timeout| started + timeout);

        let Some(handle) = self.handle.as_mut() else {
            return Err(BackendError::Disconnected);
        };
        let result = handle.call(call).await;
        let deadline = self.deadline.take();
        let elapsed = started.elapsed();
        metrics::record_backend_call(&call.procedure, elapsed.as_secs_f64(), result.is_ok());

        let sets = result.map_err(|e| {
            tracing::debug!(conn = self.id, procedure = %call.procedure, error = %e, "Backend call failed");
            e
        })?;

        if let (Some(deadline), Some(timeout)) = (deadline, self.call_timeout) {
            if Instant::now() > deadline {
                tracing::warn!(
                    conn = self.id,
                    procedure = %call.procedure,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Backend call exceeded its deadline"
                );
                return Err(BackendError::DeadlineExceeded {
                    procedure: call.procedure.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }

        Ok(sets)
    }

    /// Bootstrap the handle and authenticate the anonymous identity.
    ///
    /// Without an auto token the bootstrap alone counts as public
    /// authentication. A rejected auto token leaves the connection
    /// unauthenticated so the next release tries again.
    pub(crate) async fn initialize(
        &mut self,
        server_prefix: Option<&str>,
        auto_user_token: Option<&str>,
    ) -> BackendResult<()> {
        self.user_authenticated = false;
        self.public_authenticated = false;

        let init = INIT_SESSION.bind([("server_prefix", ParamValue::from(server_prefix))])?;
        self.call(&init).await?;

        let Some(token) = auto_user_token else {
            self.public_authenticated = true;
            return Ok(());
        };

        let auth = AUTHENTICATE_USER.bind([("user_token", ParamValue::from(token))])?;
        let sets = self.call(&auth).await?;
        if first_row(&sets).is_some() {
            self.public_authenticated = true;
        } else {
            tracing::warn!(conn = self.id, "Backend rejected the auto user token");
        }
        Ok(())
    }

    pub(crate) async fn close(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("connected", &self.is_connected())
            .field("public_authenticated", &self.public_authenticated)
            .field("user_authenticated", &self.user_authenticated)
            .finish()
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        if self.checked_out {
            tracing::debug!(conn = self.id, name = %self.name, "Connection dropped without release");
            if let Some(shared) = self.owner.upgrade() {
                shared.forget(self.id);
            }
        }

        // Closing is async; hand the handle to the runtime.
        if let Some(mut handle) = self.handle.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(runtime) => {
                    runtime.spawn(async move { handle.close().await });
                }
                Err(_) => {
                    tracing::warn!(conn = self.id, "Connection dropped outside a runtime, backend handle left open");
                }
            }
        }
    }
}
