//! Submission composer.
//!
//! Turns a user's choice of document (local file or remote URL), encoding mode
//! and optional correlation fields into the wire form of one vendor request.
//! Nothing here touches the network; see [`crate::client`] for issuing it.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::multipart::{Form, Part};
use serde_json::{Map, Value};

use crate::client::SubmitError;

pub const HEADER_API_KEY: &str = "x-api-key";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// How the document is transmitted to the vendor API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingMode {
    /// File bytes base64-encoded under `document` in a JSON body.
    InlineBase64,
    /// Raw file under the `document` part of a multipart form.
    Multipart,
    /// JSON body referencing an externally reachable document URL.
    UrlReference,
}

impl EncodingMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "inline-base64" | "base64" => Some(Self::InlineBase64),
            "multipart" | "formdata" => Some(Self::Multipart),
            "url-reference" | "url" => Some(Self::UrlReference),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InlineBase64 => "inline-base64",
            Self::Multipart => "multipart",
            Self::UrlReference => "url-reference",
        }
    }
}

/// Vendor API generation, which decides the document-URL key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
    V2,
}

impl ApiVersion {
    pub fn from_endpoint(endpoint: &str) -> Self {
        if endpoint.contains("/api/v1/") || endpoint.ends_with("/api/v1") {
            Self::V1
        } else {
            Self::V2
        }
    }

    pub fn document_url_key(&self) -> &'static str {
        match self {
            Self::V1 => "document_url",
            Self::V2 => "documentUrl",
        }
    }
}

#[derive(Debug, Clone)]
pub enum DocumentSource {
    File {
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
    Url(String),
}

impl DocumentSource {
    /// Only PDFs and images are accepted by the vendor.
    pub fn is_supported_content_type(content_type: &str) -> bool {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        essence == "application/pdf" || essence.starts_with("image/")
    }
}

/// Optional identifying fields. Empty strings are treated as absent.
#[derive(Debug, Clone, Default)]
pub struct CorrelationFields {
    pub business_id: Option<String>,
    pub request_id: Option<String>,
    pub webhook_url: Option<String>,
    pub document_part: Option<String>,
}

impl CorrelationFields {
    /// Body fields in the order the vendor documents them.
    fn body_fields(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("businessId", self.business_id.as_deref()),
            ("webhookUrl", self.webhook_url.as_deref()),
            ("documentPart", self.document_part.as_deref()),
        ]
        .into_iter()
        .filter_map(|(k, v)| non_empty(v).map(|v| (k, v)))
    }

    fn request_id(&self) -> Option<&str> {
        non_empty(self.request_id.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

/// One user action's worth of submission input.
#[derive(Debug, Clone)]
pub struct SubmissionRequest {
    pub mode: EncodingMode,
    pub source: Option<DocumentSource>,
    pub fields: CorrelationFields,
    pub endpoint: String,
}

impl SubmissionRequest {
    pub fn new(mode: EncodingMode, endpoint: impl Into<String>) -> Self {
        Self {
            mode,
            source: None,
            fields: CorrelationFields::default(),
            endpoint: endpoint.into(),
        }
    }

    pub fn with_source(mut self, source: DocumentSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn with_fields(mut self, fields: CorrelationFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn api_version(&self) -> ApiVersion {
        ApiVersion::from_endpoint(&self.endpoint)
    }

    /// Checks run before any network call.
    pub fn validate(&self) -> Result<(), SubmitError> {
        match (&self.mode, &self.source) {
            (EncodingMode::UrlReference, None) => {
                return Err(SubmitError::Validation("Please enter a document URL".into()))
            }
            (EncodingMode::UrlReference, Some(DocumentSource::Url(url))) if url.trim().is_empty() => {
                return Err(SubmitError::Validation("Please enter a document URL".into()))
            }
            (EncodingMode::InlineBase64 | EncodingMode::Multipart, Some(DocumentSource::File { .. })) => {}
            (EncodingMode::InlineBase64 | EncodingMode::Multipart, _) => {
                return Err(SubmitError::Validation(format!(
                    "File is required for {} method",
                    self.mode.as_str()
                )))
            }
            _ => {}
        }

        if let Some(DocumentSource::File {
            content_type,
            bytes,
            ..
        }) = &self.source
        {
            if bytes.is_empty() {
                return Err(SubmitError::Validation("Please select a file".into()));
            }
            if !DocumentSource::is_supported_content_type(content_type) {
                return Err(SubmitError::Validation(
                    "Please upload a PDF or image file (JPG, PNG)".into(),
                ));
            }
        }

        if self.endpoint.trim().is_empty() {
            return Err(SubmitError::Validation("Please enter an endpoint URL".into()));
        }

        Ok(())
    }
}

/// A single field of a multipart body.
#[derive(Debug, Clone, PartialEq)]
pub enum FormValue {
    Text(String),
    File {
        file_name: String,
        content_type: String,
        bytes: Vec<u8>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WireBody {
    Json(Value),
    Multipart(Vec<(String, FormValue)>),
}

impl WireBody {
    /// Build the transport form. The multipart boundary is generated by reqwest.
    pub fn into_form(fields: Vec<(String, FormValue)>) -> Result<Form, SubmitError> {
        let mut form = Form::new();
        for (name, value) in fields {
            form = match value {
                FormValue::Text(text) => form.text(name, text),
                FormValue::File {
                    file_name,
                    content_type,
                    bytes,
                } => {
                    let part = Part::bytes(bytes)
                        .file_name(file_name)
                        .mime_str(&content_type)
                        .map_err(|_| {
                            SubmitError::Validation(format!("Invalid file content type: {}", content_type))
                        })?;
                    form.part(name, part)
                }
            };
        }
        Ok(form)
    }
}

/// Fully composed request, ready to be sent to a target URL.
#[derive(Debug, Clone)]
pub struct WireRequest {
    pub endpoint: String,
    pub headers: Vec<(String, String)>,
    pub body: WireBody,
    /// The URL a url-reference submission asked the vendor to process.
    pub processed_document_url: Option<String>,
}

/// Compose the wire form of a validated request.
///
/// `resolved_url` is the public URL to reference when a url-reference
/// submission started from a local file (obtained by uploading it first).
pub fn compose(
    request: &SubmissionRequest,
    api_key: Option<&str>,
    resolved_url: Option<&str>,
) -> Result<WireRequest, SubmitError> {
    request.validate()?;

    let mut headers = Vec::new();
    if let Some(key) = non_empty(api_key) {
        headers.push((HEADER_API_KEY.to_string(), key.to_string()));
    }
    if let Some(id) = request.fields.request_id() {
        headers.push((HEADER_REQUEST_ID.to_string(), id.to_string()));
    }

    let mut processed_document_url = None;

    let body = match (request.mode, &request.source) {
        (EncodingMode::InlineBase64, Some(DocumentSource::File { bytes, .. })) => {
            let mut payload = Map::new();
            payload.insert("document".into(), Value::String(BASE64.encode(bytes)));
            append_json_fields(&mut payload, &request.fields);
            WireBody::Json(Value::Object(payload))
        }
        (
            EncodingMode::Multipart,
            Some(DocumentSource::File {
                file_name,
                content_type,
                bytes,
            }),
        ) => {
            let mut fields = vec![(
                "document".to_string(),
                FormValue::File {
                    file_name: file_name.clone(),
                    content_type: content_type.clone(),
                    bytes: bytes.clone(),
                },
            )];
            fields.extend(
                request
                    .fields
                    .body_fields()
                    .map(|(k, v)| (k.to_string(), FormValue::Text(v.to_string()))),
            );
            WireBody::Multipart(fields)
        }
        (EncodingMode::UrlReference, source) => {
            let url = match (source, resolved_url) {
                (_, Some(resolved)) => resolved.to_string(),
                (Some(DocumentSource::Url(url)), None) => url.trim().to_string(),
                _ => {
                    return Err(SubmitError::Validation(
                        "Local files must be uploaded before sending by URL".into(),
                    ))
                }
            };
            let mut payload = Map::new();
            payload.insert(
                request.api_version().document_url_key().into(),
                Value::String(url.clone()),
            );
            append_json_fields(&mut payload, &request.fields);
            processed_document_url = Some(url);
            WireBody::Json(Value::Object(payload))
        }
        // validate() rules out the remaining combinations
        _ => return Err(SubmitError::Validation("Please select a file".into())),
    };

    if matches!(body, WireBody::Json(_)) {
        headers.push(("content-type".to_string(), "application/json".to_string()));
    }

    Ok(WireRequest {
        endpoint: request.endpoint.trim().to_string(),
        headers,
        body,
        processed_document_url,
    })
}

fn append_json_fields(payload: &mut Map<String, Value>, fields: &CorrelationFields) {
    for (key, value) in fields.body_fields() {
        payload.insert(key.to_string(), Value::String(value.to_string()));
    }
}
