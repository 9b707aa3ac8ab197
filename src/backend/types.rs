//! Backend result shapes and error definitions.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::backend::procedure::BindError;

/// A single row returned by a procedure, keyed by column name.
pub type Row = Map<String, Value>;

/// One result set: an ordered list of rows.
pub type ResultSet = Vec<Row>;

/// Every result set produced by a single procedure call, in order.
pub type ResultSets = Vec<ResultSet>;

/// First row of the first result set, if any.
pub fn first_row(sets: &ResultSets) -> Option<&Row> {
    sets.first().and_then(|set| set.first())
}

/// Read a string column, treating `null` and non-strings as absent.
pub fn row_str<'a>(row: &'a Row, column: &str) -> Option<&'a str> {
    row.get(column).and_then(Value::as_str)
}

/// Read a boolean column. Accepts JSON booleans and the 0/1 integers some
/// backends use for bit columns.
pub fn row_bool(row: &Row, column: &str) -> bool {
    match row.get(column) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().is_some_and(|v| v != 0),
        Some(Value::String(s)) => s == "1" || s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Credentials presented for authentication.
///
/// Either a username/password pair or a user token. The password is never
/// printed by the `Debug` implementation.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    pub username: Option<String>,
    pub password: Option<String>,
    pub user_token: Option<String>,
}

impl Credentials {
    pub fn password(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
            user_token: None,
        }
    }

    pub fn token(user_token: impl Into<String>) -> Self {
        Self {
            username: None,
            password: None,
            user_token: Some(user_token.into()),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("user_token", &self.user_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Errors that can occur while talking to the backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Opening a new handle failed.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// The handle is no longer usable and must be discarded.
    #[error("Backend handle is disconnected")]
    Disconnected,

    /// The network round-trip to the backend failed.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The backend answered with something we could not interpret.
    #[error("Malformed backend response: {0}")]
    Protocol(String),

    /// The backend executed the procedure and reported an error.
    #[error("Procedure {procedure} failed: {message}")]
    Procedure { procedure: String, message: String },

    /// The call completed, but after its deadline had passed.
    #[error("Procedure {procedure} exceeded its {timeout_ms}ms deadline")]
    DeadlineExceeded { procedure: String, timeout_ms: u64 },

    /// Parameters did not match the procedure signature.
    #[error(transparent)]
    Bind(#[from] BindError),
}

impl BackendError {
    /// True when the error means the handle itself is dead.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, BackendError::Disconnected | BackendError::Transport(_))
    }
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
