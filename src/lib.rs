//! Resolve social-media post URLs into normalized download options through
//! the AllDL aggregation API, either directly or via a rate-limited proxy.

pub mod config;
pub mod history;
pub mod normalize;
pub mod platform;
pub mod query;
pub mod rate_limit;
pub mod server;
pub mod upstream;
pub mod validator;

#[cfg(test)]
mod test_support;

pub use normalize::{DownloadOption, DownloadResult, MediaKind, normalize_response};
pub use validator::{UrlError, validate_url};
