//! Same-origin relay to the vendor API.
//!
//! Browsers cannot call the vendor directly because of cross-origin rules, so
//! the harness posts here and the relay re-issues the call server-side. Every
//! response, including failures, carries permissive CORS headers so the
//! browser can read it.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, info};

use crate::composer::HEADER_API_KEY;
use crate::server::AppState;

const CORS_HEADERS: [(HeaderName, &str); 3] = [
    (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
    (header::ACCESS_CONTROL_ALLOW_METHODS, "POST, OPTIONS"),
    (header::ACCESS_CONTROL_ALLOW_HEADERS, "Content-Type, x-api-key"),
];

#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    url: Option<String>,
}

/// How the inbound body is re-sent upstream.
#[derive(Debug, Clone, PartialEq, Eq)]
enum BodyKind {
    /// Raw multipart body with its original boundary.
    Multipart(String),
    Json,
    Text,
}

impl BodyKind {
    fn from_headers(headers: &HeaderMap) -> Self {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        let lowered = content_type.to_ascii_lowercase();
        if lowered.contains("multipart/form-data") {
            Self::Multipart(content_type.to_string())
        } else if lowered.contains("application/json") {
            Self::Json
        } else {
            Self::Text
        }
    }

    fn content_type(&self) -> &str {
        match self {
            Self::Multipart(ct) => ct,
            Self::Json => "application/json",
            Self::Text => "text/plain;charset=UTF-8",
        }
    }
}

/// OPTIONS /relay
pub async fn preflight() -> impl IntoResponse {
    (StatusCode::OK, CORS_HEADERS)
}

/// POST /relay?url=<target>
pub async fn forward(
    State(state): State<AppState>,
    Query(query): Query<RelayQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = query
        .url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| state.config.relay_default_target.clone());

    match relay_call(&state.http, &target, &headers, body).await {
        Ok((status, data)) => {
            info!("Relayed to {}: HTTP {}", target, status);
            (status, CORS_HEADERS, Json(data)).into_response()
        }
        Err(e) => {
            error!("Proxy error: {:#}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                CORS_HEADERS,
                Json(json!({
                    "success": false,
                    "error": {
                        "message": "Proxy request failed",
                        "details": e.to_string(),
                    }
                })),
            )
                .into_response()
        }
    }
}

async fn relay_call(
    client: &reqwest::Client,
    target: &str,
    inbound: &HeaderMap,
    body: Bytes,
) -> anyhow::Result<(StatusCode, Value)> {
    let kind = BodyKind::from_headers(inbound);

    let mut request = client
        .post(target)
        .header("content-type", kind.content_type())
        .body(body.to_vec());
    if let Some(api_key) = inbound.get(HEADER_API_KEY).and_then(|v| v.to_str().ok()) {
        request = request.header(HEADER_API_KEY, api_key);
    }

    let response = request.send().await?;
    let status = StatusCode::from_u16(response.status().as_u16())?;
    let data: Value = response.json().await?;
    Ok((status, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::test_support::{spawn_app, spawn_router};
    use axum::{routing::post, Router};
    use reqwest::Client;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[derive(Debug, Default, Clone)]
    struct Seen {
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    }

    async fn spawn_upstream() -> (String, Arc<Mutex<Seen>>) {
        let seen: Arc<Mutex<Seen>> = Arc::default();
        let record = seen.clone();
        let app = Router::new()
            .route(
                "/api/v2/passport",
                post(move |headers: HeaderMap, body: Bytes| {
                    let record = record.clone();
                    async move {
                        *record.lock().await = Seen {
                            headers: headers
                                .iter()
                                .map(|(k, v)| (k.to_string(), v.to_str().unwrap_or_default().to_string()))
                                .collect(),
                            body: body.to_vec(),
                        };
                        (
                            StatusCode::ACCEPTED,
                            Json(json!({ "success": true, "data": { "jobId": "j1" } })),
                        )
                    }
                }),
            )
            .route("/html", post(|| async { "<html>oops</html>" }));
        (spawn_router(app).await, seen)
    }

    fn header<'a>(seen: &'a Seen, name: &str) -> Option<&'a str> {
        seen.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn assert_cors(resp: &reqwest::Response) {
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .and_then(|v| v.to_str().ok()),
            Some("*")
        );
    }

    #[tokio::test]
    async fn test_preflight_is_empty_200_with_cors() {
        let app = spawn_app().await;
        let resp = Client::new()
            .request(reqwest::Method::OPTIONS, format!("{}/relay", app.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_cors(&resp);
        assert_eq!(
            resp.headers()
                .get("access-control-allow-methods")
                .and_then(|v| v.to_str().ok()),
            Some("POST, OPTIONS")
        );
        assert!(resp.bytes().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forwards_json_with_api_key_only() {
        let (upstream, seen) = spawn_upstream().await;
        let app = spawn_app().await;

        let resp = Client::new()
            .post(format!("{}/relay", app.base))
            .query(&[("url", format!("{}/api/v2/passport", upstream))])
            .header("x-api-key", "secret")
            .header("x-request-id", "req-1")
            .header("cookie", "session=1")
            .header("content-type", "application/json")
            .body(r#"{"documentUrl":"https://example.com/a.jpg"}"#)
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status().as_u16(), 202);
        assert_cors(&resp);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["data"]["jobId"], "j1");

        let seen = seen.lock().await.clone();
        assert_eq!(header(&seen, "x-api-key"), Some("secret"));
        assert_eq!(header(&seen, "content-type"), Some("application/json"));
        assert!(header(&seen, "x-request-id").is_none());
        assert!(header(&seen, "cookie").is_none());
        assert_eq!(seen.body, br#"{"documentUrl":"https://example.com/a.jpg"}"#.to_vec());
    }

    #[tokio::test]
    async fn test_forwards_multipart_unmodified() {
        let (upstream, seen) = spawn_upstream().await;
        let app = spawn_app().await;

        let form = reqwest::multipart::Form::new()
            .part(
                "document",
                reqwest::multipart::Part::bytes(vec![1u8, 2, 3])
                    .file_name("p.png")
                    .mime_str("image/png")
                    .unwrap(),
            )
            .text("businessId", "biz");
        let boundary = form.boundary().to_string();

        let resp = Client::new()
            .post(format!("{}/relay", app.base))
            .query(&[("url", format!("{}/api/v2/passport", upstream))])
            .multipart(form)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 202);

        let seen = seen.lock().await.clone();
        let content_type = header(&seen, "content-type").unwrap();
        assert!(content_type.starts_with("multipart/form-data"));
        assert!(content_type.contains(&boundary));
        let text = String::from_utf8_lossy(&seen.body);
        assert!(text.contains("name=\"businessId\""));
        assert!(text.contains("filename=\"p.png\""));
        assert!(header(&seen, "x-api-key").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_target_is_500_with_cors() {
        let app = spawn_app().await;
        let resp = Client::new()
            .post(format!("{}/relay", app.base))
            .query(&[("url", "http://127.0.0.1:1/api/v2/passport")])
            .body("hello")
            .send()
            .await
            .unwrap();

        assert_eq!(resp.status().as_u16(), 500);
        assert_cors(&resp);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["message"], "Proxy request failed");
    }

    #[tokio::test]
    async fn test_non_json_upstream_is_500_with_cors() {
        let (upstream, _) = spawn_upstream().await;
        let app = spawn_app().await;
        let resp = Client::new()
            .post(format!("{}/relay", app.base))
            .query(&[("url", format!("{}/html", upstream))])
            .body("hello")
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 500);
        assert_cors(&resp);
    }

    #[test]
    fn test_body_kind_from_content_type() {
        let mut headers = HeaderMap::new();
        assert_eq!(BodyKind::from_headers(&headers), BodyKind::Text);
        headers.insert(header::CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert_eq!(BodyKind::from_headers(&headers), BodyKind::Json);
        headers.insert(header::CONTENT_TYPE, "multipart/form-data; boundary=abc".parse().unwrap());
        assert_eq!(
            BodyKind::from_headers(&headers),
            BodyKind::Multipart("multipart/form-data; boundary=abc".into())
        );
    }
}
