use thiserror::Error;
use url::Url;

pub const MIN_URL_LENGTH: usize = 8;
pub const MAX_URL_LENGTH: usize = 2048;

/// Reasons a user-supplied URL is rejected, in the order they are checked.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum UrlError {
    #[error("Missing url")]
    Missing,
    #[error("Invalid url")]
    TooShort,
    #[error("URL is too long")]
    TooLong,
    #[error("Invalid url")]
    Malformed,
    #[error("Only http/https URLs are supported")]
    UnsupportedScheme,
}

/// Validates a URL typed or pasted by a user and returns its canonical form.
pub fn validate_url(input: &str) -> Result<String, UrlError> {
    let trimmed = input.trim();
    let length = trimmed.chars().count();

    if length < MIN_URL_LENGTH {
        return Err(UrlError::TooShort);
    }
    if length > MAX_URL_LENGTH {
        return Err(UrlError::TooLong);
    }

    let parsed = Url::parse(trimmed).map_err(|_| UrlError::Malformed)?;
    if !is_http_scheme(&parsed) {
        return Err(UrlError::UnsupportedScheme);
    }

    Ok(parsed.to_string())
}

/// Same as [`validate_url`] but for a loosely typed JSON field.
pub fn validate_json_url(value: Option<&serde_json::Value>) -> Result<String, UrlError> {
    match value.and_then(serde_json::Value::as_str) {
        Some(input) => validate_url(input),
        None => Err(UrlError::Missing),
    }
}

/// Relaxed check for URLs found inside upstream payloads: no length policy,
/// just an absolute http/https URL.
pub fn ensure_http_url(input: &str) -> Option<String> {
    let trimmed = non_empty(input)?;
    let parsed = Url::parse(trimmed).ok()?;
    is_http_scheme(&parsed).then(|| parsed.to_string())
}

fn is_http_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https")
}

pub(crate) fn non_empty(value: &str) -> Option<&str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_http_and_https() {
        assert_eq!(
            validate_url("https://www.youtube.com/watch?v=abc").unwrap(),
            "https://www.youtube.com/watch?v=abc"
        );
        assert_eq!(
            validate_url("  http://example.com  ").unwrap(),
            "http://example.com/"
        );
    }

    #[test]
    fn rejects_short_input_before_parsing() {
        assert_eq!(validate_url(""), Err(UrlError::TooShort));
        assert_eq!(validate_url("http://"), Err(UrlError::TooShort));
        assert_eq!(validate_url("ftp://x"), Err(UrlError::TooShort));
        assert_eq!(validate_url("      a      "), Err(UrlError::TooShort));
    }

    #[test]
    fn enforces_length_bounds() {
        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert_eq!(validate_url(&long), Err(UrlError::TooLong));

        assert_eq!(validate_url("http://a").as_deref(), Ok("http://a/"));

        let exact = format!("https://e.com/{}", "a".repeat(MAX_URL_LENGTH - 14));
        assert_eq!(exact.len(), MAX_URL_LENGTH);
        assert!(validate_url(&exact).is_ok());
    }

    #[test]
    fn rejects_malformed_input() {
        assert_eq!(validate_url("not-a-url"), Err(UrlError::Malformed));
        assert_eq!(validate_url("www.tiktok.com/@user"), Err(UrlError::Malformed));
    }

    #[test]
    fn rejects_other_schemes_with_scheme_message() {
        assert_eq!(
            validate_url("ftp://example.com/file"),
            Err(UrlError::UnsupportedScheme)
        );
        assert_eq!(
            validate_url("javascript:alert(1)"),
            Err(UrlError::UnsupportedScheme)
        );
        assert_eq!(
            UrlError::UnsupportedScheme.to_string(),
            "Only http/https URLs are supported"
        );
    }

    #[test]
    fn json_field_must_be_a_string() {
        assert_eq!(validate_json_url(None), Err(UrlError::Missing));
        assert_eq!(
            validate_json_url(Some(&serde_json::json!(42))),
            Err(UrlError::Missing)
        );
        assert!(validate_json_url(Some(&serde_json::json!("https://x.com/a/status/1"))).is_ok());
    }

    #[test]
    fn ensure_http_url_has_no_length_policy() {
        assert_eq!(ensure_http_url("http://a").as_deref(), Some("http://a/"));
        assert_eq!(ensure_http_url("   "), None);
        assert_eq!(ensure_http_url("data:image/png;base64,AAAA"), None);
        assert_eq!(ensure_http_url("/relative/path.mp4"), None);
    }
}
