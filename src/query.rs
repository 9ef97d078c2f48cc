use std::time::Duration;

use reqwest::{Client, header::ACCEPT};
use serde_json::{Value, json};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    history::RecentHistoryEntry,
    normalize::{DownloadResult, normalize_response},
    platform::detect_platform,
    upstream::{UpstreamClient, UpstreamError},
    validator::{UrlError, validate_url},
};

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(transparent)]
    InvalidUrl(#[from] UrlError),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("{message}")]
    Proxy { status: u16, message: String },
    #[error("Failed to reach proxy: {0}")]
    ProxyUnreachable(#[source] reqwest::Error),
}

/// Client for a running `/alldl-proxy` endpoint.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: Client,
    endpoint: String,
}

impl ProxyClient {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self, UpstreamError> {
        let endpoint = url::Url::parse(endpoint.trim())
            .map_err(|_| UpstreamError::InvalidBase(endpoint.to_string()))?;

        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(UpstreamError::Client)?;

        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
        })
    }

    pub async fn resolve(&self, url: &str) -> Result<Value, QueryError> {
        debug!("Asking proxy {} for {url}", self.endpoint);

        let response = self
            .http
            .post(&self.endpoint)
            .header(ACCEPT, "application/json")
            .json(&json!({ "url": url }))
            .send()
            .await
            .map_err(QueryError::ProxyUnreachable)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(QueryError::ProxyUnreachable)?;
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        if status.is_success() {
            return parsed.ok_or_else(|| QueryError::Proxy {
                status: status.as_u16(),
                message: "Invalid proxy response".to_string(),
            });
        }

        let message = parsed
            .as_ref()
            .and_then(|value| value.get("error"))
            .and_then(Value::as_str)
            .map(|error| match status.as_u16() {
                400 | 429 => error.to_string(),
                code => format!("{error} ({code})"),
            })
            .unwrap_or_else(|| format!("Proxy error ({})", status.as_u16()));

        Err(QueryError::Proxy {
            status: status.as_u16(),
            message,
        })
    }
}

/// Where lookups are resolved.
#[derive(Debug, Clone)]
pub enum QuerySource {
    Direct(UpstreamClient),
    Proxy(ProxyClient),
}

#[derive(Debug, Clone)]
pub struct Lookup {
    /// Canonical form of the URL the user asked about.
    pub url: String,
    pub result: DownloadResult,
}

impl Lookup {
    pub fn history_entry(&self) -> RecentHistoryEntry {
        let platform = self
            .result
            .platform
            .clone()
            .or_else(|| detect_platform(&self.url).map(ToString::to_string));

        RecentHistoryEntry::now(self.url.clone(), platform, self.result.title.clone())
    }
}

/// Validates `input`, resolves it through `source` and normalizes the answer.
pub async fn run_query(source: &QuerySource, input: &str) -> Result<Lookup, QueryError> {
    let url = validate_url(input)?;

    let raw = match source {
        QuerySource::Direct(upstream) => upstream.fetch(&url).await?,
        QuerySource::Proxy(proxy) => proxy.resolve(&url).await?,
    };

    let result = normalize_response(raw, Some(&url));
    if result.options.is_empty() {
        warn!("No download links found for {url}");
    } else {
        info!("Found {} download option(s) for {url}", result.options.len());
    }

    Ok(Lookup { url, result })
}
