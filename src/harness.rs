//! Browser-facing endpoints of the harness.
//!
//! `/submit` takes the harness form, builds a [`SubmissionRequest`] and sends it
//! to the vendor, either directly or through this server's own relay.

use axum::{
    body::Bytes,
    extract::{Multipart, State},
    http::{HeaderMap, StatusCode},
    response::{Html, Json},
};
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::blob::{self, DocumentHost};
use crate::client::{format_elapsed, ParserClient, Route, SubmitError};
use crate::composer::{CorrelationFields, DocumentSource, EncodingMode, SubmissionRequest};
use crate::config::VendorEnvironment;
use crate::doc_schema::DocumentType;
use crate::server::AppState;

const INDEX_HTML: &str = include_str!("../static/index.html");

/// GET /
pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Raw harness form fields.
#[derive(Debug, Default)]
struct SubmitForm {
    mode: Option<String>,
    endpoint: Option<String>,
    use_proxy: Option<String>,
    business_id: Option<String>,
    request_id: Option<String>,
    webhook_url: Option<String>,
    document_part: Option<String>,
    manual_url: Option<String>,
    document: Option<DocumentSource>,
}

impl SubmitForm {
    async fn read(mut multipart: Multipart) -> Result<Self, String> {
        let mut form = Self::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| format!("Multipart error: {}", e))?
        {
            let name = field.name().unwrap_or_default().to_string();
            if name == "document" {
                let file_name = field.file_name().unwrap_or("document").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| format!("Failed to read file: {}", e))?;
                if !bytes.is_empty() {
                    form.document = Some(DocumentSource::File {
                        file_name,
                        content_type,
                        bytes: bytes.to_vec(),
                    });
                }
                continue;
            }

            let value = field
                .text()
                .await
                .map_err(|e| format!("Failed to read field {}: {}", name, e))?;
            let slot = match name.as_str() {
                "mode" => &mut form.mode,
                "endpoint" => &mut form.endpoint,
                "useProxy" => &mut form.use_proxy,
                "businessId" => &mut form.business_id,
                "requestId" => &mut form.request_id,
                "webhookUrl" => &mut form.webhook_url,
                "documentPart" => &mut form.document_part,
                "manualUrl" => &mut form.manual_url,
                _ => continue,
            };
            *slot = Some(value);
        }
        Ok(form)
    }

    fn use_proxy(&self) -> bool {
        match self.use_proxy.as_deref().map(str::trim) {
            None => true,
            Some(v) => matches!(v, "true" | "on" | "1" | "yes"),
        }
    }

    fn into_request(self, default_webhook_url: String) -> Result<SubmissionRequest, SubmitError> {
        let mode = match self.mode.as_deref() {
            None | Some("") => EncodingMode::InlineBase64,
            Some(raw) => EncodingMode::parse(raw)
                .ok_or_else(|| SubmitError::Validation(format!("Unknown send method: {}", raw)))?,
        };

        let manual_url = self.manual_url.filter(|u| !u.trim().is_empty());
        let source = match mode {
            EncodingMode::UrlReference => manual_url.map(DocumentSource::Url).or(self.document),
            _ => self.document,
        };

        let fields = CorrelationFields {
            business_id: self.business_id,
            request_id: self.request_id,
            // Absent means "use ours"; present but blank means "no webhook".
            webhook_url: Some(self.webhook_url.unwrap_or(default_webhook_url)),
            document_part: self.document_part,
        };

        let mut request = SubmissionRequest::new(mode, self.endpoint.unwrap_or_default()).with_fields(fields);
        request.source = source;
        Ok(request)
    }
}

fn error_body(message: impl Into<String>) -> Value {
    json!({ "success": false, "error": { "message": message.into() } })
}

/// POST /submit
pub async fn submit(State(state): State<AppState>, multipart: Multipart) -> (StatusCode, Json<Value>) {
    let form = match SubmitForm::read(multipart).await {
        Ok(form) => form,
        Err(message) => return (StatusCode::BAD_REQUEST, Json(error_body(message))),
    };

    let route = if form.use_proxy() {
        Route::Relay {
            relay_url: state.config.relay_url(),
        }
    } else {
        Route::Direct
    };

    let request = match form.into_request(state.config.default_webhook_url()) {
        Ok(request) => request,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(error_body(e.to_string()))),
    };
    let document_type = DocumentType::from_endpoint(&request.endpoint);

    let host = state
        .blob
        .clone()
        .map(|store| Arc::new(store) as Arc<dyn DocumentHost>);
    let client = ParserClient::new(state.http.clone(), route)
        .with_api_key(state.config.vendor_api_key.clone())
        .with_host(host);

    info!(
        "Submitting {} document via {} to {}",
        document_type.slug(),
        request.mode.as_str(),
        request.endpoint
    );

    match client.submit(&request).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "status": outcome.status,
                "response": outcome.response,
                "processedDocumentUrl": outcome.processed_document_url,
                "documentType": document_type,
                "elapsed": format_elapsed(outcome.elapsed),
            })),
        ),
        Err(e) => {
            let status = match &e {
                SubmitError::Validation(_) => StatusCode::BAD_REQUEST,
                SubmitError::Upstream { status, .. } => {
                    StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                SubmitError::Upload(_) | SubmitError::Transport(_) | SubmitError::Decode { .. } => {
                    StatusCode::BAD_GATEWAY
                }
            };
            warn!("Submission failed: {}", e);
            let mut body = error_body(e.to_string());
            if let SubmitError::Upstream { body: upstream, .. } = e {
                body["response"] = upstream;
            }
            (status, Json(body))
        }
    }
}

/// POST /upload: client upload token handshake and completion callback.
pub async fn upload(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<Value>) {
    let Some(store) = state.blob.as_ref() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "BLOB_READ_WRITE_TOKEN is not configured" })),
        );
    };

    let signature = headers
        .get(blob::SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match blob::handle_upload(store, &body, signature, Utc::now().timestamp_millis()) {
        Ok(resp) => (StatusCode::OK, Json(resp)),
        Err(e) => {
            error!("Upload error: {:#}", e);
            (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() })))
        }
    }
}

/// GET /endpoints: parse endpoints for both deployments, plus the default one.
pub async fn endpoints(State(state): State<AppState>) -> Json<Value> {
    let env = state.config.vendor_env;
    let listing = |env: VendorEnvironment| -> Map<String, Value> {
        [
            DocumentType::Passport,
            DocumentType::DrivingLicence,
            DocumentType::ProofOfAddress,
        ]
        .into_iter()
        .map(|t| (t.slug().to_string(), Value::String(env.endpoint_for(t))))
        .collect()
    };
    let environments: Map<String, Value> = VendorEnvironment::ALL
        .into_iter()
        .map(|e| (e.as_str().to_string(), Value::Object(listing(e))))
        .collect();

    Json(json!({
        "environment": env.as_str(),
        "endpoints": listing(env),
        "environments": environments,
        "relayDefaultTarget": state.config.relay_default_target,
        "defaultWebhookUrl": state.config.default_webhook_url(),
    }))
}

/// GET /test-urls/random
pub async fn random_test_url(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let text = match tokio::fs::read_to_string(&state.config.test_urls_file).await {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to read {}: {}", state.config.test_urls_file, e);
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Failed to load test URLs" })),
            );
        }
    };

    let urls: Vec<&str> = text.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if urls.is_empty() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "No URLs found in test file" })),
        );
    }
    let url = urls[fastrand::usize(..urls.len())];
    (StatusCode::OK, Json(json!({ "url": url })))
}

/// GET /test-env
pub async fn test_env(State(state): State<AppState>) -> Json<Value> {
    let token = state.config.blob_token.as_deref();
    Json(json!({
        "hasToken": token.is_some(),
        "tokenLength": token.map(|t| t.chars().count()).unwrap_or(0),
        "tokenPrefix": token
            .map(|t| format!("{}...", t.chars().take(8).collect::<String>()))
            .unwrap_or_else(|| "not set".to_string()),
    }))
}
