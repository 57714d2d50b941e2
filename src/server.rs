//! Shared state and router assembly.

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::blob::BlobStore;
use crate::config::AppConfig;
use crate::harness;
use crate::relay;
use crate::webhook::{self, WebhookSlot};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub webhooks: WebhookSlot,
    pub blob: Option<BlobStore>,
}

impl AppState {
    pub fn new(config: AppConfig) -> Self {
        let http = reqwest::Client::new();
        let blob = config
            .blob_token
            .as_ref()
            .map(|token| BlobStore::new(http.clone(), config.blob_api_url.clone(), token.clone()));
        Self {
            config: Arc::new(config),
            http,
            webhooks: WebhookSlot::new(),
            blob,
        }
    }
}

pub fn router(state: AppState) -> Router {
    // The relay sets its own CORS headers on every exit path, so it stays
    // outside the CORS layer.
    let relay = Router::new().route("/relay", post(relay::forward).options(relay::preflight));

    Router::new()
        .route("/", get(harness::index))
        .route("/health", get(health))
        .route(
            "/webhook",
            get(webhook::latest)
                .post(webhook::deliver)
                .put(webhook::deliver)
                .patch(webhook::deliver)
                .delete(webhook::clear),
        )
        .route("/webhook/view", get(webhook::view))
        .route("/submit", post(harness::submit))
        .route("/upload", post(harness::upload))
        .route("/endpoints", get(harness::endpoints))
        .route("/test-urls/random", get(harness::random_test_url))
        .route("/test-env", get(harness::test_env))
        .layer(CorsLayer::permissive())
        .merge(relay)
        .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health() -> &'static str {
    "ok"
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    pub struct TestApp {
        pub base: String,
        pub state: AppState,
    }

    /// Serve `app` on an ephemeral local port and return its base URL.
    pub async fn spawn_router(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub async fn spawn_app() -> TestApp {
        spawn_app_with(AppConfig::default()).await
    }

    /// Run the full router with `config`; the public base URL is pointed at
    /// the bound address so relay-routed submissions loop back to it.
    pub async fn spawn_app_with(mut config: AppConfig) -> TestApp {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        config.public_base_url = base.clone();

        let state = AppState::new(config);
        let app = router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        TestApp { base, state }
    }

    #[tokio::test]
    async fn test_health() {
        let app = spawn_app().await;
        let text = reqwest::get(format!("{}/health", app.base))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert_eq!(text, "ok");
    }
}
