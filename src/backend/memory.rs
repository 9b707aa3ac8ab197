//! In-process backend.
//!
//! Implements the procedure catalog against an in-memory table of users and
//! resources. Used for local development (`backend.kind = "memory"`) and by
//! the test suite, which can also make it refuse connections, drop every live
//! handle, or stall calls.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::backend::procedure::{AUTHENTICATE_USER, GET_RESOURCE, INIT_SESSION, LOGOUT};
use crate::backend::types::{BackendError, BackendResult, ResultSets, Row};
use crate::backend::{BackendHandle, Connector, ProcedureCall};

/// A resource row served by the memory backend.
#[derive(Debug, Clone)]
pub struct MemoryResource {
    pub code: String,
    pub data: Vec<u8>,
    pub content_type: Option<String>,
    pub is_public: bool,
    pub requires_authentication: bool,
    pub render_template: bool,
    pub revision: i64,
}

impl MemoryResource {
    pub fn text(code: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            data: text.into().into_bytes(),
            content_type: None,
            is_public: true,
            requires_authentication: false,
            render_template: false,
            revision: 1,
        }
    }

    pub fn binary(code: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::text(code, "")
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn requiring_auth(mut self) -> Self {
        self.requires_authentication = true;
        self
    }

    pub fn template(mut self) -> Self {
        self.render_template = true;
        self
    }

    fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("resource_code".into(), json!(self.code));
        match std::str::from_utf8(&self.data) {
            Ok(text) => row.insert("resource_text".into(), json!(text)),
            Err(_) => row.insert("resource_data".into(), json!(self.data)),
        };
        if let Some(ct) = &self.content_type {
            row.insert("content_type".into(), json!(ct));
        }
        row.insert("is_public".into(), json!(self.is_public));
        row.insert("requires_authentication".into(), json!(self.requires_authentication));
        row.insert("render_template".into(), json!(self.render_template));
        row.insert("revision".into(), json!(self.revision));
        row
    }
}

#[derive(Debug, Clone)]
struct MemoryUser {
    password: String,
    user_token: String,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<String, MemoryUser>,
    public_tokens: HashSet<String>,
    resources: HashMap<String, MemoryResource>,
    default_resource: Option<String>,
    refuse_connections: bool,
    call_delay: Option<Duration>,
    live_handles: HashSet<u64>,
    connects: u64,
    calls: HashMap<String, u64>,
}

/// In-memory backend; cheap to clone, all clones share state.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    next_handle: Arc<AtomicU64>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().expect("memory backend mutex poisoned")
    }

    /// Register a user that can log in with a password or its user token.
    pub fn with_user(self, username: &str, password: &str, user_token: &str) -> Self {
        self.lock().users.insert(
            username.to_string(),
            MemoryUser {
                password: password.to_string(),
                user_token: user_token.to_string(),
            },
        );
        self
    }

    /// Register a token that authenticates the public (anonymous) identity.
    pub fn with_public_token(self, token: &str) -> Self {
        self.lock().public_tokens.insert(token.to_string());
        self
    }

    pub fn with_resource(self, resource: MemoryResource) -> Self {
        self.put_resource(resource);
        self
    }

    pub fn put_resource(&self, resource: MemoryResource) {
        self.lock().resources.insert(resource.code.clone(), resource);
    }

    pub fn set_default_resource(&self, code: &str) {
        self.lock().default_resource = Some(code.to_string());
    }

    /// Make subsequent `connect()` calls fail.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Invalidate every handle opened so far, as a backend restart would.
    pub fn drop_all_handles(&self) {
        self.lock().live_handles.clear();
    }

    /// Stall every call by `delay` before answering.
    pub fn set_call_delay(&self, delay: Option<Duration>) {
        self.lock().call_delay = delay;
    }

    pub fn connect_count(&self) -> u64 {
        self.lock().connects
    }

    pub fn call_count(&self, procedure: &str) -> u64 {
        self.lock().calls.get(procedure).copied().unwrap_or(0)
    }

    pub fn live_handles(&self) -> usize {
        self.lock().live_handles.len()
    }

    fn execute(&self, handle_id: u64, call: &ProcedureCall) -> BackendResult<ResultSets> {
        let mut state = self.lock();
        if !state.live_handles.contains(&handle_id) {
            return Err(BackendError::Disconnected);
        }
        *state.calls.entry(call.procedure.clone()).or_default() += 1;

        match call.procedure.as_str() {
            name if name == INIT_SESSION.name => {
                let mut row = Row::new();
                row.insert("initialized".into(), Value::Bool(true));
                Ok(vec![vec![row]])
            }
            name if name == AUTHENTICATE_USER.name => Ok(vec![authenticate(&state, call)
                .into_iter()
                .collect()]),
            name if name == LOGOUT.name => Ok(vec![Vec::new()]),
            name if name == GET_RESOURCE.name => {
                let code = if call.flag("get_default_resource") {
                    state.default_resource.clone()
                } else {
                    call.text("resource_code").map(str::to_string)
                };
                let row = code
                    .and_then(|c| state.resources.get(&c))
                    .map(MemoryResource::to_row);
                Ok(vec![row.into_iter().collect()])
            }
            other => Err(BackendError::Procedure {
                procedure: other.to_string(),
                message: "unknown procedure".into(),
            }),
        }
    }
}

fn authenticate(state: &MemoryState, call: &ProcedureCall) -> Option<Row> {
    let (username, user_token) = if let Some(token) = call.text("user_token") {
        if state.public_tokens.contains(token) {
            ("public".to_string(), token.to_string())
        } else {
            state
                .users
                .iter()
                .find(|(_, u)| u.user_token == token)
                .map(|(name, u)| (name.clone(), u.user_token.clone()))?
        }
    } else {
        let username = call.text("username")?;
        let user = state.users.get(username)?;
        if call.text("password") != Some(user.password.as_str()) {
            return None;
        }
        (username.to_string(), user.user_token.clone())
    };

    let mut row = Row::new();
    row.insert("session_guid".into(), json!(uuid::Uuid::new_v4().to_string()));
    row.insert("user_token".into(), json!(user_token));
    row.insert("username".into(), json!(username));
    Some(row)
}

#[async_trait]
impl Connector for MemoryBackend {
    async fn connect(&self) -> BackendResult<Box<dyn BackendHandle>> {
        let id = self.next_handle.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut state = self.lock();
            if state.refuse_connections {
                return Err(BackendError::Connect("memory backend is refusing connections".into()));
            }
            state.connects += 1;
            state.live_handles.insert(id);
        }
        Ok(Box::new(MemoryHandle {
            backend: self.clone(),
            id,
        }))
    }
}

struct MemoryHandle {
    backend: MemoryBackend,
    id: u64,
}

#[async_trait]
impl BackendHandle for MemoryHandle {
    async fn call(&mut self, call: &ProcedureCall) -> BackendResult<ResultSets> {
        let delay = self.backend.lock().call_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.backend.execute(self.id, call)
    }

    fn is_connected(&self) -> bool {
        self.backend.lock().live_handles.contains(&self.id)
    }

    async fn close(&mut self) {
        self.backend.lock().live_handles.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::procedure::ParamValue;
    use crate::backend::types::{first_row, row_str};

    #[tokio::test]
    async fn test_password_and_token_authentication() {
        let backend = MemoryBackend::new()
            .with_user("alice", "secret", "tok-alice")
            .with_public_token("public");
        let mut handle = backend.connect().await.unwrap();

        let ok = AUTHENTICATE_USER
            .bind([
                ("username", ParamValue::from("alice")),
                ("password", ParamValue::from("secret")),
            ])
            .unwrap();
        let sets = handle.call(&ok).await.unwrap();
        assert_eq!(row_str(first_row(&sets).unwrap(), "user_token"), Some("tok-alice"));

        let bad = AUTHENTICATE_USER
            .bind([
                ("username", ParamValue::from("alice")),
                ("password", ParamValue::from("wrong")),
            ])
            .unwrap();
        assert!(first_row(&handle.call(&bad).await.unwrap()).is_none());

        let public = AUTHENTICATE_USER
            .bind([("user_token", ParamValue::from("public"))])
            .unwrap();
        let sets = handle.call(&public).await.unwrap();
        assert_eq!(row_str(first_row(&sets).unwrap(), "username"), Some("public"));
    }

    #[tokio::test]
    async fn test_dropped_handles_report_disconnected() {
        let backend = MemoryBackend::new();
        let mut handle = backend.connect().await.unwrap();
        assert!(handle.is_connected());

        backend.drop_all_handles();
        assert!(!handle.is_connected());

        let init = INIT_SESSION.bind(std::iter::empty()).unwrap();
        assert!(matches!(handle.call(&init).await, Err(BackendError::Disconnected)));
    }

    #[tokio::test]
    async fn test_refused_connections() {
        let backend = MemoryBackend::new();
        backend.refuse_connections(true);
        assert!(backend.connect().await.is_err());
        assert_eq!(backend.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_default_resource_lookup() {
        let backend = MemoryBackend::new().with_resource(MemoryResource::text("home", "<h1>home</h1>"));
        backend.set_default_resource("home");
        let mut handle = backend.connect().await.unwrap();

        let call = GET_RESOURCE
            .bind([("get_default_resource", ParamValue::from(true))])
            .unwrap();
        let sets = handle.call(&call).await.unwrap();
        assert_eq!(row_str(first_row(&sets).unwrap(), "resource_code"), Some("home"));
        assert_eq!(backend.call_count("get_resource"), 1);
    }
}
