//! Cached resource representation.

use axum::body::Bytes;
use serde::Serialize;
use serde_json::Value;

use crate::backend::types::{row_bool, row_str, Row};
use crate::cache::LoadError;

/// Codes that all mean "the default resource". They are never cached.
const DEFAULT_CODES: &[&str] = &["", "~", "/", "__th"];

/// Whether `code` names the default resource rather than a specific one.
pub fn is_default_code(code: &str) -> bool {
    DEFAULT_CODES.contains(&code.trim())
}

/// Flags and descriptive fields attached to a resource.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ResourceMeta {
    pub content_type: String,
    pub filename: Option<String>,
    /// May be served directly to a browser.
    pub is_public: bool,
    /// A fragment meant for inclusion in other resources.
    pub is_static: bool,
    pub requires_authentication: bool,
    /// A page template; only these become a session's current resource.
    pub render_template: bool,
    pub skip_xsrf: bool,
    pub on_before: Option<String>,
    pub on_after: Option<String>,
    pub api_procedure: Option<String>,
    pub revision: i64,
    pub updated_at: Option<String>,
}

/// An immutable named payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub code: String,
    pub data: Bytes,
    pub meta: ResourceMeta,
}

impl Resource {
    pub fn new(code: impl Into<String>, data: impl Into<Bytes>, meta: ResourceMeta) -> Self {
        Self {
            code: code.into(),
            data: data.into(),
            meta,
        }
    }

    /// Size counted against the cache ceilings.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Script-like resources never replace a session's current page.
    pub fn is_script(&self) -> bool {
        let code = self.code.to_ascii_lowercase();
        code.ends_with(".js") || code.ends_with(".vue")
    }

    /// Build a resource from a `get_resource` row.
    ///
    /// Text wins over binary data unless it is blank.
    pub fn from_row(row: &Row) -> Result<Self, LoadError> {
        let code = row_str(row, "resource_code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| LoadError::Malformed("row has no resource_code".into()))?
            .to_string();

        let data = match row_str(row, "resource_text") {
            Some(text) if !text.trim().is_empty() => Bytes::from(text.to_string()),
            _ => binary_column(row, "resource_data")?,
        };

        let filename = row_str(row, "filename").map(str::to_string);
        let content_type = row_str(row, "content_type")
            .map(str::to_string)
            .unwrap_or_else(|| guess_content_type(filename.as_deref().unwrap_or(&code), &data).to_string());

        let meta = ResourceMeta {
            content_type,
            filename,
            is_public: row_bool(row, "is_public"),
            is_static: row_bool(row, "is_static"),
            requires_authentication: row_bool(row, "requires_authentication"),
            render_template: row_bool(row, "render_template"),
            skip_xsrf: row_bool(row, "skip_xsrf"),
            on_before: row_str(row, "on_before").map(str::to_string),
            on_after: row_str(row, "on_after").map(str::to_string),
            api_procedure: row_str(row, "api_procedure").map(str::to_string),
            revision: row.get("revision").and_then(Value::as_i64).unwrap_or(0),
            updated_at: row_str(row, "updated_at").map(str::to_string),
        };

        Ok(Self { code, data, meta })
    }
}

fn binary_column(row: &Row, column: &str) -> Result<Bytes, LoadError> {
    match row.get(column) {
        None | Some(Value::Null) => Ok(Bytes::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|b| u8::try_from(b).ok())
                    .ok_or_else(|| LoadError::Malformed(format!("{column} holds a non-byte value")))
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Bytes::from),
        Some(other) => Err(LoadError::Malformed(format!("{column} has unexpected type: {other}"))),
    }
}

/// Content type from the file extension; extensionless text is a page.
fn guess_content_type(name: &str, data: &[u8]) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase());
    match ext.as_deref() {
        Some("html" | "htm") => "text/html; charset=utf-8",
        Some("js" | "mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("json") => "application/json",
        Some("vue" | "txt") => "text/plain; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("ico") => "image/x-icon",
        Some("pdf") => "application/pdf",
        None if std::str::from_utf8(data).is_ok() => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}
