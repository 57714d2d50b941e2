//! Content store for publishing documents at a public URL.
//!
//! Two ways in: the server uploads bytes itself ([`BlobStore::upload`]), or the
//! browser uploads directly after a token handshake with `POST /upload`
//! ([`handle_upload`]). The wire format follows the Vercel Blob API.

use anyhow::{anyhow, bail, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::Sha256;
use tracing::{debug, info};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "7";
const CLIENT_TOKEN_TTL_MS: i64 = 60 * 60 * 1000;
pub const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "application/pdf",
    "image/jpeg",
    "image/png",
    "image/webp",
    "image/heic",
];
pub const SIGNATURE_HEADER: &str = "x-vercel-signature";

/// Anything that can turn a local document into an externally reachable URL.
#[async_trait::async_trait]
pub trait DocumentHost: Send + Sync {
    async fn upload(&self, file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<String>;
}

#[derive(Clone)]
pub struct BlobStore {
    client: Client,
    api_url: String,
    token: String,
}

#[derive(Debug, Deserialize)]
struct PutBlobResponse {
    url: String,
}

impl BlobStore {
    pub fn new(client: Client, api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            token: token.into(),
        }
    }

    /// Store id embedded in a read/write token
    /// (`vercel_blob_rw_<storeId>_<secret>`).
    pub fn store_id(&self) -> Option<&str> {
        self.token.split('_').nth(3).filter(|s| !s.is_empty())
    }

    /// Sign a client upload token for `pathname`.
    pub fn generate_client_token(
        &self,
        pathname: &str,
        callback_url: Option<&str>,
        token_payload: Option<&str>,
        valid_until_ms: i64,
    ) -> Result<String> {
        let store_id = self
            .store_id()
            .ok_or_else(|| anyhow!("Invalid BLOB_READ_WRITE_TOKEN: no store id"))?;

        let mut claims = json!({
            "pathname": pathname,
            "allowedContentTypes": ALLOWED_CONTENT_TYPES,
            "validUntil": valid_until_ms,
        });
        if let Some(callback_url) = callback_url {
            claims["onUploadCompleted"] = json!({
                "callbackUrl": callback_url,
                "tokenPayload": token_payload,
            });
        }

        let payload = BASE64.encode(claims.to_string());
        let signature = self.sign(payload.as_bytes())?;
        let secured = BASE64.encode(format!("{}.{}", signature, payload));
        Ok(format!("vercel_blob_client_{}_{}", store_id, secured))
    }

    /// Check a completion callback's `x-vercel-signature` header.
    pub fn verify_signature(&self, body: &[u8], signature_header: &str) -> bool {
        match self.sign(body) {
            Ok(expected) => expected == signature_header.trim(),
            Err(_) => false,
        }
    }

    fn sign(&self, data: &[u8]) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(self.token.as_bytes())
            .map_err(|e| anyhow!("Invalid signing key: {}", e))?;
        mac.update(data);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait::async_trait]
impl DocumentHost for BlobStore {
    async fn upload(&self, file_name: &str, content_type: &str, bytes: Vec<u8>) -> Result<String> {
        let pathname = file_name.trim_start_matches('/');
        let url = format!("{}/{}", self.api_url, pathname);

        info!("BlobStore: uploading {} ({} bytes)", pathname, bytes.len());

        let resp = self
            .client
            .put(&url)
            .bearer_auth(&self.token)
            .header("x-api-version", API_VERSION)
            .header("x-content-type", content_type)
            .header("x-add-random-suffix", "1")
            .body(bytes)
            .send()
            .await
            .context("Failed to send upload request")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("Blob store error ({}): {}", status, text);
        }

        let blob: PutBlobResponse = resp
            .json()
            .await
            .context("Failed to parse blob store response")?;
        debug!("BlobStore: stored at {}", blob.url);
        Ok(blob.url)
    }
}

// ============================================================================
// Client upload handshake
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum UploadEvent {
    #[serde(rename = "blob.generate-client-token")]
    GenerateClientToken(GenerateClientTokenPayload),
    #[serde(rename = "blob.upload-completed")]
    UploadCompleted(UploadCompletedPayload),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateClientTokenPayload {
    pub pathname: String,
    #[serde(default)]
    pub callback_url: Option<String>,
    #[serde(default)]
    pub client_payload: Option<String>,
    #[serde(default)]
    pub multipart: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadCompletedPayload {
    pub blob: CompletedBlob,
    #[serde(default)]
    pub token_payload: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedBlob {
    pub url: String,
    #[serde(default)]
    pub pathname: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

/// Answer one handshake message. `signature` is the completion callback's
/// signature header, if any.
pub fn handle_upload(
    store: &BlobStore,
    raw_body: &[u8],
    signature: Option<&str>,
    now_ms: i64,
) -> Result<Value> {
    let event: UploadEvent =
        serde_json::from_slice(raw_body).context("Invalid upload request body")?;

    match event {
        UploadEvent::GenerateClientToken(payload) => {
            debug!(
                "Generating client token for {} (multipart: {})",
                payload.pathname, payload.multipart
            );
            let token = store.generate_client_token(
                &payload.pathname,
                payload.callback_url.as_deref(),
                Some(payload.client_payload.as_deref().unwrap_or("{}")),
                now_ms + CLIENT_TOKEN_TTL_MS,
            )?;
            Ok(json!({
                "type": "blob.generate-client-token",
                "clientToken": token,
            }))
        }
        UploadEvent::UploadCompleted(payload) => {
            let signature = signature.ok_or_else(|| anyhow!("Missing callback signature"))?;
            if !store.verify_signature(raw_body, signature) {
                bail!("Invalid callback signature");
            }
            info!("Upload completed: {}", payload.blob.url);
            debug!(
                "Completed blob {:?} ({:?}), token payload {:?}",
                payload.blob.pathname, payload.blob.content_type, payload.token_payload
            );
            Ok(json!({
                "type": "blob.upload-completed",
                "response": "ok",
                "url": payload.blob.url,
            }))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Bytes,
        extract::Path,
        http::HeaderMap,
        response::Json,
        routing::put,
        Router,
    };

    const TOKEN: &str = "vercel_blob_rw_store123_secretpart";

    fn store(api_url: &str) -> BlobStore {
        BlobStore::new(Client::new(), api_url, TOKEN)
    }

    #[test]
    fn test_store_id_from_token() {
        assert_eq!(store("http://x").store_id(), Some("store123"));
        assert_eq!(BlobStore::new(Client::new(), "http://x", "garbage").store_id(), None);
    }

    #[test]
    fn test_client_token_is_signed_payload() {
        let store = store("http://x");
        let token = store
            .generate_client_token("passport.jpg", None, Some("{}"), 1_700_000_000_000)
            .unwrap();

        let encoded = token.strip_prefix("vercel_blob_client_store123_").unwrap();
        let decoded = String::from_utf8(BASE64.decode(encoded).unwrap()).unwrap();
        let (signature, payload) = decoded.split_once('.').unwrap();
        assert_eq!(signature, store.sign(payload.as_bytes()).unwrap());

        let claims: Value = serde_json::from_slice(&BASE64.decode(payload).unwrap()).unwrap();
        assert_eq!(claims["pathname"], "passport.jpg");
        assert_eq!(claims["validUntil"], 1_700_000_000_000i64);
        assert_eq!(claims["allowedContentTypes"][0], "application/pdf");
        assert!(claims.get("onUploadCompleted").is_none());
    }

    #[test]
    fn test_handshake_generate_token() {
        let body = br#"{"type":"blob.generate-client-token","payload":{"pathname":"a.pdf","callbackUrl":"https://t/upload","clientPayload":null,"multipart":false}}"#;
        let resp = handle_upload(&store("http://x"), body, None, 0).unwrap();
        assert_eq!(resp["type"], "blob.generate-client-token");
        assert!(resp["clientToken"]
            .as_str()
            .unwrap()
            .starts_with("vercel_blob_client_store123_"));
    }

    #[test]
    fn test_handshake_completion_requires_valid_signature() {
        let store = store("http://x");
        let body = br#"{"type":"blob.upload-completed","payload":{"blob":{"url":"https://blob/a.pdf"},"tokenPayload":"{}"}}"#;

        assert!(handle_upload(&store, body, None, 0).is_err());
        assert!(handle_upload(&store, body, Some("deadbeef"), 0).is_err());

        let signature = store.sign(body).unwrap();
        let resp = handle_upload(&store, body, Some(&signature), 0).unwrap();
        assert_eq!(resp["response"], "ok");
        assert_eq!(resp["url"], "https://blob/a.pdf");
    }

    #[test]
    fn test_handshake_rejects_unknown_type() {
        let body = br#"{"type":"blob.delete","payload":{}}"#;
        assert!(handle_upload(&store("http://x"), body, None, 0).is_err());
    }

    async fn stub_put(Path(pathname): Path<String>, headers: HeaderMap, body: Bytes) -> Json<Value> {
        assert_eq!(
            headers.get("authorization").unwrap().to_str().unwrap(),
            format!("Bearer {}", TOKEN)
        );
        assert_eq!(headers.get("x-content-type").unwrap(), "image/png");
        assert_eq!(body.as_ref(), b"png-bytes");
        Json(json!({ "url": format!("https://public.blob.test/{}", pathname) }))
    }

    #[tokio::test]
    async fn test_upload_returns_public_url() {
        let app = Router::new().route("/:pathname", put(stub_put));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let url = store(&format!("http://{}", addr))
            .upload("scan.png", "image/png", b"png-bytes".to_vec())
            .await
            .unwrap();
        assert_eq!(url, "https://public.blob.test/scan.png");
    }

    #[tokio::test]
    async fn test_upload_surfaces_store_errors() {
        let err = store("http://127.0.0.1:1")
            .upload("scan.png", "image/png", vec![1, 2, 3])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Failed to send upload request"));
    }
}
