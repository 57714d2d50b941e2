//! Webhook sink.
//!
//! Holds the most recent asynchronous callback from the vendor in a single
//! slot. Delivery overwrites, GET polls, DELETE empties. Nothing survives a
//! restart.

use axum::{
    body::Bytes,
    extract::{FromRequest, Multipart, Query, Request, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::Json,
};
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::doc_schema::{DocumentType, DocumentView};
use crate::server::AppState;

/// One received callback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// RFC 3339 receipt time.
    pub timestamp: String,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub method: String,
    pub url: String,
}

/// Injectable single-slot store. Clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct WebhookSlot {
    inner: Arc<RwLock<Option<WebhookPayload>>>,
}

impl WebhookSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is stored.
    pub fn put(&self, payload: WebhookPayload) {
        *self.inner.write().unwrap() = Some(payload);
    }

    pub fn get(&self) -> Option<WebhookPayload> {
        self.inner.read().unwrap().clone()
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap() = None;
    }
}

// ============================================================================
// Body decoding
// ============================================================================

#[derive(Debug, Error)]
pub enum DecodeError {
    /// Body exceeded the router's body limit.
    #[error("Payload too large")]
    TooLarge,
    #[error(transparent)]
    Invalid(#[from] anyhow::Error),
}

impl DecodeError {
    fn rejected(status: StatusCode, text: String) -> Self {
        if status == StatusCode::PAYLOAD_TOO_LARGE {
            Self::TooLarge
        } else {
            Self::Invalid(anyhow::anyhow!(text))
        }
    }
}

/// Buffer the body through the `Bytes` extractor so `DefaultBodyLimit` applies.
async fn read_bytes(request: Request) -> Result<Bytes, DecodeError> {
    Bytes::from_request(request, &())
        .await
        .map_err(|e| DecodeError::rejected(e.status(), e.body_text()))
}

/// Decode a delivery body according to its declared content type.
///
/// JSON is parsed, multipart becomes a field map with file parts described
/// by name, type and size, anything else is kept as (lossy UTF-8) text.
pub async fn decode_body(request: Request) -> Result<Value, DecodeError> {
    let content_type = request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.contains("application/json") {
        let bytes = read_bytes(request).await?;
        Ok(serde_json::from_slice(&bytes).map_err(anyhow::Error::from)?)
    } else if content_type.contains("multipart/form-data") {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| DecodeError::rejected(e.status(), e.body_text()))?;
        let mut fields = Map::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| DecodeError::rejected(e.status(), e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let part_type = field.content_type().map(str::to_string);
            let bytes = field
                .bytes()
                .await
                .map_err(|e| DecodeError::rejected(e.status(), e.body_text()))?;
            let value = match file_name {
                Some(file_name) => json!({
                    "fileName": file_name,
                    "contentType": part_type,
                    "size": bytes.len(),
                }),
                None => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
            };
            fields.insert(name, value);
        }
        Ok(Value::Object(fields))
    } else {
        let bytes = read_bytes(request).await?;
        Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    }
}

/// Header map with repeated headers joined by `", "`.
pub fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
        out.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

fn absolute_url(headers: &HeaderMap, request: &Request) -> String {
    let uri = request.uri();
    if uri.scheme().is_some() {
        return uri.to_string();
    }
    let scheme = headers
        .get("x-forwarded-proto")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("http");
    let host = headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    let path = uri.path_and_query().map(|p| p.as_str()).unwrap_or("/");
    format!("{}://{}{}", scheme, host, path)
}

// ============================================================================
// Handlers
// ============================================================================

/// POST/PUT/PATCH /webhook
pub async fn deliver(
    State(state): State<AppState>,
    method: Method,
    request: Request,
) -> (StatusCode, Json<Value>) {
    let headers = collect_headers(request.headers());
    let url = absolute_url(request.headers(), &request);

    let body = match decode_body(request).await {
        Ok(body) => body,
        Err(DecodeError::TooLarge) => {
            warn!("Webhook rejected: body exceeds the configured limit");
            return (
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(json!({ "success": false, "error": "Payload too large" })),
            );
        }
        Err(e) => {
            error!("Webhook error: {}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": "Failed to process webhook" })),
            );
        }
    };

    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    info!("Webhook received: {} {}", method, url);

    state.webhooks.put(WebhookPayload {
        timestamp: timestamp.clone(),
        headers,
        body,
        method: method.to_string(),
        url,
    });

    (
        StatusCode::OK,
        Json(json!({
            "success": true,
            "message": "Webhook received",
            "timestamp": timestamp,
        })),
    )
}

/// GET /webhook
pub async fn latest(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "success": true,
        "payload": state.webhooks.get(),
    }))
}

/// DELETE /webhook
pub async fn clear(State(state): State<AppState>) -> Json<Value> {
    state.webhooks.clear();
    info!("Webhook data cleared");
    Json(json!({
        "success": true,
        "message": "Webhook data cleared",
    }))
}

#[derive(Debug, Deserialize)]
pub struct ViewQuery {
    #[serde(rename = "type")]
    doc_type: Option<String>,
}

/// GET /webhook/view?type=<document-type>
pub async fn view(
    State(state): State<AppState>,
    Query(query): Query<ViewQuery>,
) -> (StatusCode, Json<Value>) {
    let doc_type = match query.doc_type.as_deref() {
        None => DocumentType::Generic,
        Some(slug) => match DocumentType::from_slug(slug) {
            Some(t) => t,
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "success": false, "error": format!("Unknown document type: {}", slug) })),
                )
            }
        },
    };

    let view = state
        .webhooks
        .get()
        .map(|payload| DocumentView::from_body(doc_type, &payload.body));
    (StatusCode::OK, Json(json!({ "success": true, "view": view })))
}
