//! HTTP/JSON backend transport.
//!
//! The backend exposes three endpoints under its base URL:
//!
//! | Request                                         | Response                          |
//! |-------------------------------------------------|-----------------------------------|
//! | `POST connect` `{"app_name"}`                   | `{"handle": "…"}`                 |
//! | `POST call` `{"handle", "procedure", "params"}` | `{"resultsets": [[row, …], …]}`   |
//! | `POST close` `{"handle"}`                       | any                               |
//!
//! `401` or `410` on `call` means the backend no longer knows the handle.
//! Other non-success statuses carry `{"error": "…"}`.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use hyper::{header, Method, Request, StatusCode};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::{json, Value};
use url::Url;

use crate::backend::types::{BackendError, BackendResult, ResultSets};
use crate::backend::{BackendHandle, Connector, ProcedureCall};

/// Largest backend response body we are willing to buffer.
const MAX_RESPONSE_BYTES: usize = 64 * 1024 * 1024;

struct HttpTransport {
    client: Client<HttpConnector, Body>,
    base_url: Url,
    app_name: String,
}

impl HttpTransport {
    async fn post(&self, path: &str, body: Value) -> BackendResult<(StatusCode, Value)> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| BackendError::Transport(format!("bad endpoint {}: {}", path, e)))?;

        let payload = serde_json::to_vec(&body).map_err(|e| BackendError::Protocol(e.to_string()))?;
        let request = Request::builder()
            .method(Method::POST)
            .uri(url.as_str())
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let response = self
            .client
            .request(request)
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        let bytes = axum::body::to_bytes(Body::new(response.into_body()), MAX_RESPONSE_BYTES)
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| BackendError::Protocol(e.to_string()))?
        };
        Ok((status, value))
    }
}

fn error_message(body: &Value, status: StatusCode) -> String {
    body.get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| status.to_string())
}

/// Opens handles against a remote HTTP backend.
#[derive(Clone)]
pub struct HttpBackend {
    transport: Arc<HttpTransport>,
}

impl HttpBackend {
    pub fn new(mut base_url: Url, app_name: String) -> Self {
        // Url::join replaces the last segment unless the base ends in '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            transport: Arc::new(HttpTransport {
                client,
                base_url,
                app_name,
            }),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.transport.base_url
    }
}

#[async_trait]
impl Connector for HttpBackend {
    async fn connect(&self) -> BackendResult<Box<dyn BackendHandle>> {
        let (status, body) = self
            .transport
            .post("connect", json!({ "app_name": self.transport.app_name }))
            .await
            .map_err(|e| BackendError::Connect(e.to_string()))?;

        if !status.is_success() {
            return Err(BackendError::Connect(error_message(&body, status)));
        }

        let handle_id = body
            .get("handle")
            .and_then(Value::as_str)
            .ok_or_else(|| BackendError::Connect("connect response has no handle".into()))?
            .to_string();

        tracing::debug!(handle = %handle_id, backend = %self.transport.base_url, "Opened backend handle");

        Ok(Box::new(HttpHandle {
            transport: self.transport.clone(),
            handle_id: Some(handle_id),
        }))
    }
}

struct HttpHandle {
    transport: Arc<HttpTransport>,
    handle_id: Option<String>,
}

#[async_trait]
impl BackendHandle for HttpHandle {
    async fn call(&mut self, call: &ProcedureCall) -> BackendResult<ResultSets> {
        let handle_id = self.handle_id.clone().ok_or(BackendError::Disconnected)?;

        let body = json!({
            "handle": handle_id,
            "procedure": call.procedure,
            "params": call.params,
        });

        let (status, body) = match self.transport.post("call", body).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_disconnect() {
                    self.handle_id = None;
                }
                return Err(e);
            }
        };

        match status {
            s if s.is_success() => {
                let sets = body.get("resultsets").cloned().unwrap_or(Value::Array(Vec::new()));
                serde_json::from_value(sets).map_err(|e| BackendError::Protocol(e.to_string()))
            }
            StatusCode::UNAUTHORIZED | StatusCode::GONE => {
                self.handle_id = None;
                Err(BackendError::Disconnected)
            }
            s => Err(BackendError::Procedure {
                procedure: call.procedure.clone(),
                message: error_message(&body, s),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.handle_id.is_some()
    }

    async fn close(&mut self) {
        let Some(handle_id) = self.handle_id.take() else {
            return;
        };
        if let Err(e) = self.transport.post("close", json!({ "handle": handle_id })).await {
            tracing::debug!(handle = %handle_id, error = %e, "Error closing backend handle");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::procedure::{ParamValue, GET_RESOURCE, INIT_SESSION};
    use crate::backend::types::{first_row, row_str};
    use axum::{routing::post, Json, Router};
    use tokio::net::TcpListener;

    async fn call_handler(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
        if body["handle"] == "stale" {
            return (StatusCode::GONE, Json(json!({ "error": "unknown handle" })));
        }
        match body["procedure"].as_str() {
            Some("get_resource") => (
                StatusCode::OK,
                Json(json!({ "resultsets": [[{ "resource_code": body["params"]["resource_code"] }]] })),
            ),
            _ => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "no such procedure" })),
            ),
        }
    }

    async fn spawn_backend(handle: &'static str) -> Url {
        let app = Router::new()
            .route(
                "/api/connect",
                post(move || async move { Json(json!({ "handle": handle })) }),
            )
            .route("/api/call", post(call_handler))
            .route("/api/close", post(|| async { StatusCode::NO_CONTENT }));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}/api", addr).parse().unwrap()
    }

    #[tokio::test]
    async fn test_call_returns_result_sets() {
        let url = spawn_backend("h-1").await;
        let backend = HttpBackend::new(url, "test".into());
        let mut handle = backend.connect().await.unwrap();

        let call = GET_RESOURCE
            .bind([("resource_code", ParamValue::from("index.html"))])
            .unwrap();
        let sets = handle.call(&call).await.unwrap();
        assert_eq!(row_str(first_row(&sets).unwrap(), "resource_code"), Some("index.html"));
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn test_procedure_error_keeps_handle() {
        let url = spawn_backend("h-2").await;
        let backend = HttpBackend::new(url, "test".into());
        let mut handle = backend.connect().await.unwrap();

        let call = INIT_SESSION.bind(std::iter::empty()).unwrap();
        let err = handle.call(&call).await.unwrap_err();
        assert!(matches!(err, BackendError::Procedure { ref message, .. } if message == "no such procedure"));
        assert!(handle.is_connected());
    }

    #[tokio::test]
    async fn test_gone_marks_handle_disconnected() {
        let url = spawn_backend("stale").await;
        let backend = HttpBackend::new(url, "test".into());
        let mut handle = backend.connect().await.unwrap();

        let call = GET_RESOURCE
            .bind([("resource_code", ParamValue::from("x"))])
            .unwrap();
        assert!(matches!(handle.call(&call).await, Err(BackendError::Disconnected)));
        assert!(!handle.is_connected());
    }

    #[tokio::test]
    async fn test_unreachable_backend_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let backend = HttpBackend::new(format!("http://{}/", addr).parse().unwrap(), "test".into());
        assert!(matches!(backend.connect().await, Err(BackendError::Connect(_))));
    }
}
