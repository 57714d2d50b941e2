//! Runtime configuration.
//!
//! Everything is read from the environment (after `.env` has been loaded) and
//! falls back to defaults suitable for running the harness locally.

use anyhow::{Context, Result};
use std::env;

use crate::doc_schema::DocumentType;

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:3000";
pub const DEFAULT_RELAY_TARGET: &str = "https://document-parser.easyrecruit.ai/api/v1/passport";
const DEFAULT_BLOB_API_URL: &str = "https://blob.vercel-storage.com";
const DEFAULT_TEST_URLS_FILE: &str = "test-urls.txt";
const DEFAULT_MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

const PRODUCTION_HOST: &str = "https://document-parser.easyrecruit.ai";
const DEVELOPMENT_HOST: &str = "https://document-parser-dev.vercel.app";

/// Which deployment of the vendor API the harness targets by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VendorEnvironment {
    Development,
    Production,
}

impl VendorEnvironment {
    pub const ALL: [Self; 2] = [Self::Development, Self::Production];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dev" | "development" => Some(Self::Development),
            "prod" | "production" => Some(Self::Production),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Production => "production",
        }
    }

    /// v2 parse endpoint for a document type on this deployment.
    pub fn endpoint_for(&self, doc_type: DocumentType) -> String {
        let host = match self {
            Self::Development => DEVELOPMENT_HOST,
            Self::Production => PRODUCTION_HOST,
        };
        format!("{}/api/v2/{}", host, doc_type.slug())
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: String,
    /// Externally reachable base URL of this server, used for the relay route
    /// and the default webhook URL.
    pub public_base_url: String,
    pub vendor_api_key: Option<String>,
    pub vendor_env: VendorEnvironment,
    pub relay_default_target: String,
    pub blob_token: Option<String>,
    pub blob_api_url: String,
    pub test_urls_file: String,
    pub max_body_bytes: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
            vendor_api_key: None,
            vendor_env: VendorEnvironment::Development,
            relay_default_target: DEFAULT_RELAY_TARGET.to_string(),
            blob_token: None,
            blob_api_url: DEFAULT_BLOB_API_URL.to_string(),
            test_urls_file: DEFAULT_TEST_URLS_FILE.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let vendor_env = match get("VENDOR_ENV") {
            Some(raw) => VendorEnvironment::parse(&raw)
                .with_context(|| format!("VENDOR_ENV must be development or production, got {:?}", raw))?,
            None => defaults.vendor_env,
        };

        let max_body_bytes = match get("MAX_BODY_BYTES") {
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .with_context(|| format!("MAX_BODY_BYTES is not a number: {:?}", raw))?,
            None => defaults.max_body_bytes,
        };

        Ok(Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            public_base_url: get("PUBLIC_BASE_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.public_base_url),
            vendor_api_key: get("VENDOR_API_KEY"),
            vendor_env,
            relay_default_target: get("RELAY_DEFAULT_TARGET").unwrap_or(defaults.relay_default_target),
            blob_token: get("BLOB_READ_WRITE_TOKEN"),
            blob_api_url: get("BLOB_API_URL")
                .map(|u| u.trim_end_matches('/').to_string())
                .unwrap_or(defaults.blob_api_url),
            test_urls_file: get("TEST_URLS_FILE").unwrap_or(defaults.test_urls_file),
            max_body_bytes,
        })
    }

    pub fn relay_url(&self) -> String {
        format!("{}/relay", self.public_base_url)
    }

    pub fn default_webhook_url(&self) -> String {
        format!("{}/webhook", self.public_base_url)
    }
}
