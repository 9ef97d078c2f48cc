use std::time::Duration;

use reqwest::{Client, header::ACCEPT};
use serde_json::Value;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_UPSTREAM_URL: &str = "https://free-goat-api.onrender.com";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 20;

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Upstream timeout")]
    Timeout,
    #[error("Failed to reach upstream: {0}")]
    Unreachable(#[source] reqwest::Error),
    #[error("API error ({0})")]
    Status(u16),
    #[error("Invalid upstream base URL: {0}")]
    InvalidBase(String),
    #[error("Could not build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Client for the AllDL resolver (`GET <base>/alldl?url=...`).
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base: String,
    timeout: Duration,
}

impl UpstreamClient {
    pub fn new(base: &str, request_timeout: Duration) -> Result<Self, UpstreamError> {
        let parsed =
            Url::parse(base.trim()).map_err(|_| UpstreamError::InvalidBase(base.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(UpstreamError::InvalidBase(base.to_string()));
        }

        let http = Client::builder()
            .user_agent(concat!("alldl-proxy/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(UpstreamError::Client)?;

        Ok(Self {
            http,
            base: parsed.as_str().trim_end_matches('/').to_string(),
            timeout: request_timeout,
        })
    }

    pub fn endpoint(&self, target: &str) -> String {
        format!("{}/alldl?url={}", self.base, urlencoding::encode(target))
    }

    /// Resolves `target` through the upstream. The send and the body read
    /// share a single deadline; hitting it yields [`UpstreamError::Timeout`].
    pub async fn fetch(&self, target: &str) -> Result<Value, UpstreamError> {
        let endpoint = self.endpoint(target);
        debug!("Requesting upstream {endpoint}");

        let exchange = async {
            let response = self
                .http
                .get(&endpoint)
                .header(ACCEPT, "application/json")
                .send()
                .await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let (status, body) = timeout(self.timeout, exchange)
            .await
            .map_err(|_| {
                warn!("Upstream did not answer within {:?}", self.timeout);
                UpstreamError::Timeout
            })?
            .map_err(|error| {
                if error.is_timeout() {
                    UpstreamError::Timeout
                } else {
                    warn!("Error contacting upstream: {error}");
                    UpstreamError::Unreachable(error)
                }
            })?;

        if !status.is_success() {
            warn!("Upstream responded with non-success status: {status}");
            return Err(UpstreamError::Status(status.as_u16()));
        }

        Ok(parse_body(body))
    }
}

/// Empty bodies become `null`; bodies that are not JSON are kept as text.
fn parse_body(body: String) -> Value {
    if body.is_empty() {
        return Value::Null;
    }

    serde_json::from_str(&body).unwrap_or(Value::String(body))
}
