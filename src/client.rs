//! Vendor API client: sends a composed submission directly or through the relay.

use reqwest::{Client, Url};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::blob::DocumentHost;
use crate::composer::{self, DocumentSource, EncodingMode, SubmissionRequest, WireBody, WireRequest};

#[derive(Debug, Error)]
pub enum SubmitError {
    /// Bad input, detected before any network call.
    #[error("{0}")]
    Validation(String),
    /// Uploading a local file to the content store failed.
    #[error("Failed to upload file: {0}")]
    Upload(anyhow::Error),
    /// No response was received.
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The vendor (or relay) answered with a non-2xx status.
    #[error("HTTP {status}: {message}")]
    Upstream {
        status: u16,
        message: String,
        body: Value,
    },
    /// A 2xx response whose body was not JSON.
    #[error("Response was not valid JSON (HTTP {status})")]
    Decode { status: u16 },
}

/// Where a composed request is posted.
#[derive(Debug, Clone)]
pub enum Route {
    Direct,
    /// Through the same-origin relay, which forwards to `?url=<endpoint>`.
    Relay { relay_url: String },
}

#[derive(Debug, Clone)]
pub struct SubmissionOutcome {
    pub status: u16,
    /// Vendor acknowledgement exactly as received.
    pub response: Value,
    pub processed_document_url: Option<String>,
    pub elapsed: Duration,
}

#[derive(Clone)]
pub struct ParserClient {
    client: Client,
    api_key: Option<String>,
    route: Route,
    host: Option<Arc<dyn DocumentHost>>,
}

impl ParserClient {
    pub fn new(client: Client, route: Route) -> Self {
        Self {
            client,
            api_key: None,
            route,
            host: None,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    /// Content store used to publish local files for url-reference submissions.
    pub fn with_host(mut self, host: Option<Arc<dyn DocumentHost>>) -> Self {
        self.host = host;
        self
    }

    /// Validate, compose and send one submission.
    pub async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionOutcome, SubmitError> {
        request.validate()?;

        let resolved_url = self.publish_if_needed(request).await?;
        let wire = composer::compose(request, self.api_key.as_deref(), resolved_url.as_deref())?;
        self.send(wire).await
    }

    async fn publish_if_needed(&self, request: &SubmissionRequest) -> Result<Option<String>, SubmitError> {
        let (EncodingMode::UrlReference, Some(DocumentSource::File { file_name, content_type, bytes })) =
            (request.mode, &request.source)
        else {
            return Ok(None);
        };

        let host = self.host.as_ref().ok_or_else(|| {
            SubmitError::Upload(anyhow::anyhow!("no content store is configured"))
        })?;

        let url = host
            .upload(file_name, content_type, bytes.clone())
            .await
            .map_err(SubmitError::Upload)?;
        info!("Published {} for url-reference submission: {}", file_name, url);
        Ok(Some(url))
    }

    async fn send(&self, wire: WireRequest) -> Result<SubmissionOutcome, SubmitError> {
        let target = self.target_url(&wire.endpoint)?;
        debug!("Sending submission to {}", target);

        let mut builder = self.client.post(target);
        for (name, value) in &wire.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder = match wire.body {
            WireBody::Json(value) => builder.body(value.to_string()),
            WireBody::Multipart(fields) => builder.multipart(WireBody::into_form(fields)?),
        };

        let started = Instant::now();
        let response = builder.send().await?;
        let status = response.status().as_u16();
        let text = response.text().await?;
        let elapsed = started.elapsed();

        let body: Option<Value> = serde_json::from_str(&text).ok();

        if !(200..300).contains(&status) {
            let message = body
                .as_ref()
                .and_then(|b| b.pointer("/error/message").or_else(|| b.get("error")))
                .and_then(Value::as_str)
                .unwrap_or("Request failed")
                .to_string();
            warn!("Submission rejected with HTTP {}: {}", status, message);
            return Err(SubmitError::Upstream {
                status,
                message,
                body: body.unwrap_or(Value::String(text)),
            });
        }

        let response = body.ok_or(SubmitError::Decode { status })?;

        info!(
            "Submission accepted: HTTP {} in {}",
            status,
            format_elapsed(elapsed)
        );

        Ok(SubmissionOutcome {
            status,
            response,
            processed_document_url: wire.processed_document_url,
            elapsed,
        })
    }

    fn target_url(&self, endpoint: &str) -> Result<Url, SubmitError> {
        let parsed = match &self.route {
            Route::Direct => Url::parse(endpoint),
            Route::Relay { relay_url } => Url::parse_with_params(relay_url, &[("url", endpoint)]),
        };
        parsed.map_err(|e| SubmitError::Validation(format!("Invalid endpoint URL: {}", e)))
    }
}

/// `1.5s` below a minute, `2m 3.4s` above.
pub fn format_elapsed(elapsed: Duration) -> String {
    let ms = elapsed.as_millis();
    let total_secs = ms / 1000;
    let tenths = (ms % 1000) / 100;
    if total_secs < 60 {
        format!("{}.{}s", total_secs, tenths)
    } else {
        format!("{}m {}.{}s", total_secs / 60, total_secs % 60, tenths)
    }
}
