//! Turns whatever the AllDL upstream returns into a [`DownloadResult`].
//!
//! The upstream has no stable schema: the same logical field shows up under
//! different keys depending on the extractor that served the request. Every
//! field is therefore read from an ordered list of candidate keys and the
//! first non-null one wins. Nothing in here fails; unexpected shapes simply
//! produce absent fields or fewer options.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::platform::detect_platform;
use crate::validator::{ensure_http_url, non_empty};

const ROOT_KEYS: [&str; 2] = ["data", "result"];
const PLATFORM_KEYS: [&str; 4] = ["platform", "source", "site", "website"];
const TITLE_KEYS: [&str; 4] = ["title", "caption", "desc", "description"];
const THUMBNAIL_KEYS: [&str; 4] = ["thumbnail", "thumb", "image", "cover"];
const MEDIA_KEYS: [&str; 6] = ["medias", "media", "links", "urls", "download", "downloads"];

const OPTION_URL_KEYS: [&str; 4] = ["url", "link", "download_url", "downloadUrl"];
const OPTION_LABEL_KEYS: [&str; 5] = ["quality", "resolution", "label", "name", "format"];
const OPTION_SIZE_KEYS: [&str; 3] = ["size", "filesize", "formattedSize"];
const OPTION_KIND_KEYS: [&str; 2] = ["type", "kind"];

const DEFAULT_LABEL: &str = "Download";
const AUDIO_MARKERS: [&str; 3] = ["audio", "mp3", "m4a"];

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Video => "video",
            Self::Audio => "audio",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DownloadOption {
    pub kind: MediaKind,
    pub label: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
}

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct DownloadResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    pub options: Vec<DownloadOption>,
    /// Untouched upstream payload, kept for diagnostics.
    pub raw: Value,
}

/// Normalizes an upstream payload. `query_url` is the URL the user asked
/// about and is only used to guess the platform when upstream omits it.
pub fn normalize_response(raw: Value, query_url: Option<&str>) -> DownloadResult {
    let candidate = first_present(&raw, &ROOT_KEYS).unwrap_or(&raw);

    let platform = string_field(candidate, &PLATFORM_KEYS).or_else(|| {
        query_url
            .and_then(detect_platform)
            .map(ToString::to_string)
    });
    let title = string_field(candidate, &TITLE_KEYS);
    let thumbnail = first_present(candidate, &THUMBNAIL_KEYS)
        .and_then(Value::as_str)
        .and_then(ensure_http_url);
    let options = collect_options(first_present(candidate, &MEDIA_KEYS));

    debug!(
        "Normalized upstream payload platform={:?} options={}",
        platform,
        options.len()
    );

    DownloadResult {
        platform,
        title,
        thumbnail,
        options,
        raw,
    }
}

fn first_present<'a>(value: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| value.get(*key))
        .find(|field| !field.is_null())
}

fn string_field(value: &Value, keys: &[&str]) -> Option<String> {
    first_present(value, keys)
        .and_then(Value::as_str)
        .and_then(non_empty)
        .map(ToString::to_string)
}

fn collect_options(media: Option<&Value>) -> Vec<DownloadOption> {
    let candidates: Vec<&Value> = match media {
        Some(Value::Array(items)) => items.iter().collect(),
        // Grouped payloads such as `{ "video": [...], "audio": {...} }`.
        Some(Value::Object(groups)) => groups
            .values()
            .flat_map(|group| match group {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                single => vec![single],
            })
            .collect(),
        _ => Vec::new(),
    };

    let mut seen_urls = HashSet::new();
    candidates
        .into_iter()
        .filter_map(extract_option)
        .filter(|option| seen_urls.insert(option.url.clone()))
        .collect()
}

fn extract_option(candidate: &Value) -> Option<DownloadOption> {
    let url = first_present(candidate, &OPTION_URL_KEYS)
        .and_then(Value::as_str)
        .and_then(ensure_http_url)?;

    let label = string_field(candidate, &OPTION_LABEL_KEYS)
        .unwrap_or_else(|| DEFAULT_LABEL.to_string());
    let size = size_field(candidate);

    let kind = match first_present(candidate, &OPTION_KIND_KEYS) {
        Some(hint) => classify_kind(hint.as_str().unwrap_or_default()),
        None => classify_kind(&label),
    };

    Some(DownloadOption {
        kind,
        label,
        url,
        size,
    })
}

fn size_field(candidate: &Value) -> Option<String> {
    match first_present(candidate, &OPTION_SIZE_KEYS)? {
        Value::String(text) => non_empty(text).map(ToString::to_string),
        Value::Number(bytes) => bytes
            .as_f64()
            .filter(|bytes| *bytes > 0.0)
            .map(format_filesize_mb),
        _ => None,
    }
}

/// Substring heuristic; a video whose label mentions e.g. an audio codec
/// will be reported as audio.
fn classify_kind(hint: &str) -> MediaKind {
    let lower = hint.to_lowercase();
    if AUDIO_MARKERS.iter().any(|marker| lower.contains(marker)) {
        MediaKind::Audio
    } else {
        MediaKind::Video
    }
}

fn format_filesize_mb(bytes: f64) -> String {
    let mb = bytes / 1_048_576.0;
    if mb > 1024.0 {
        format!("{:.2} GB", mb / 1024.0)
    } else {
        format!("{mb:.1} MB")
    }
}
