//! Typed procedure signatures.
//!
//! Every backend operation is described once by a [`ProcedureSignature`]: its
//! name plus the declared kind and required flag of each parameter. Values
//! are checked against the signature when a call is bound, so a
//! [`ProcedureCall`] that exists is always well-formed.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Declared type of a procedure parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Text,
    Integer,
    Bool,
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Integer(i64),
    Text(String),
}

impl ParamValue {
    /// Kind of a non-null value.
    pub fn kind(&self) -> Option<ParamKind> {
        match self {
            ParamValue::Null => None,
            ParamValue::Bool(_) => Some(ParamKind::Bool),
            ParamValue::Integer(_) => Some(ParamKind::Integer),
            ParamValue::Text(_) => Some(ParamKind::Text),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            ParamValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParamValue::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Text(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Text(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Integer(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(value: Option<T>) -> Self {
        value.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Declaration of a single parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
}

impl ParamSpec {
    pub const fn required(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: true }
    }

    pub const fn optional(name: &'static str, kind: ParamKind) -> Self {
        Self { name, kind, required: false }
    }
}

/// Errors raised while binding values to a signature.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindError {
    #[error("{procedure} has no parameter named {name}")]
    UnknownParameter { procedure: String, name: String },

    #[error("{procedure}: parameter {name} expects {expected:?}, got {actual:?}")]
    TypeMismatch {
        procedure: String,
        name: String,
        expected: ParamKind,
        actual: ParamKind,
    },

    #[error("{procedure}: required parameter {name} was not bound")]
    MissingParameter { procedure: String, name: String },
}

/// Name and parameter schema of a backend procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcedureSignature {
    pub name: &'static str,
    pub params: &'static [ParamSpec],
}

impl ProcedureSignature {
    pub fn param(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// Validate `values` against this signature and produce a call.
    ///
    /// Unknown names and kind mismatches are rejected; a required parameter
    /// bound to `Null` counts as missing. Unbound optional parameters are
    /// simply left out of the call.
    pub fn bind<'a, I>(&self, values: I) -> Result<ProcedureCall, BindError>
    where
        I: IntoIterator<Item = (&'a str, ParamValue)>,
    {
        let mut params = BTreeMap::new();

        for (name, value) in values {
            let spec = self.param(name).ok_or_else(|| BindError::UnknownParameter {
                procedure: self.name.to_string(),
                name: name.to_string(),
            })?;

            if let Some(actual) = value.kind() {
                if actual != spec.kind {
                    return Err(BindError::TypeMismatch {
                        procedure: self.name.to_string(),
                        name: name.to_string(),
                        expected: spec.kind,
                        actual,
                    });
                }
            }

            params.insert(spec.name.to_string(), value);
        }

        for spec in self.params.iter().filter(|p| p.required) {
            let bound = params.get(spec.name).is_some_and(|v| !v.is_null());
            if !bound {
                return Err(BindError::MissingParameter {
                    procedure: self.name.to_string(),
                    name: spec.name.to_string(),
                });
            }
        }

        Ok(ProcedureCall {
            procedure: self.name.to_string(),
            params,
        })
    }
}

/// A validated procedure invocation, ready to send to a handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcedureCall {
    pub procedure: String,
    pub params: BTreeMap<String, ParamValue>,
}

impl ProcedureCall {
    pub fn param(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.param(name).and_then(ParamValue::as_text)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.param(name).and_then(ParamValue::as_bool).unwrap_or(false)
    }
}

/// Runs once per freshly opened or recycled handle. Returns session setup
/// rows that the backend has already applied.
pub const INIT_SESSION: ProcedureSignature = ProcedureSignature {
    name: "init_session",
    params: &[ParamSpec::optional("server_prefix", ParamKind::Text)],
};

/// Authenticates the identity carried by a handle. Returns one row with
/// `session_guid`, `user_token` and `username` on success, nothing otherwise.
pub const AUTHENTICATE_USER: ProcedureSignature = ProcedureSignature {
    name: "authenticate_user",
    params: &[
        ParamSpec::optional("username", ParamKind::Text),
        ParamSpec::optional("password", ParamKind::Text),
        ParamSpec::optional("user_token", ParamKind::Text),
        ParamSpec::optional("session_token", ParamKind::Text),
        ParamSpec::optional("retrieve_existing", ParamKind::Bool),
    ],
};

pub const LOGOUT: ProcedureSignature = ProcedureSignature {
    name: "logout",
    params: &[ParamSpec::optional("session_token", ParamKind::Text)],
};

/// Fetches one resource row by code, or the default resource.
pub const GET_RESOURCE: ProcedureSignature = ProcedureSignature {
    name: "get_resource",
    params: &[
        ParamSpec::optional("resource_code", ParamKind::Text),
        ParamSpec::optional("get_default_resource", ParamKind::Bool),
    ],
};
