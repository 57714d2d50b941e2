//! Document Parser Tester - manual test harness for a document-parsing API.
//!
//! Serves the harness page, a CORS relay to the vendor, the webhook sink the
//! vendor calls back into, and the upload handshake for publishing files.

mod blob;
mod client;
mod composer;
mod config;
mod doc_schema;
mod harness;
mod relay;
mod server;
mod webhook;

use config::AppConfig;
use server::AppState;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "doc_parser_tester=debug,tower_http=debug".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    info!(
        "Vendor environment: {}, relay default target: {}",
        config.vendor_env.as_str(),
        config.relay_default_target
    );
    if config.blob_token.is_none() {
        info!("BLOB_READ_WRITE_TOKEN not set, uploads are disabled");
    }
    if config.vendor_api_key.is_none() {
        info!("VENDOR_API_KEY not set, requests go out without x-api-key");
    }

    let bind_addr = config.bind_addr.clone();
    let public_base_url = config.public_base_url.clone();
    let app = server::router(AppState::new(config));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("Server listening on http://{} (public: {})", bind_addr, public_base_url);
    axum::serve(listener, app).await?;

    Ok(())
}
