//! Landing-page resolution: turns a shared link into download metadata.

use crate::error::BundleError;
use crate::types::{ContentKind, Descriptor, PipelineConfig, Reference, PLACEHOLDER_NAME};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, info};

/// File suffixes that mark a reference as video content.
const VIDEO_SUFFIXES: &[&str] = &[".mp4", ".mkv", ".mov", ".avi", ".webm", ".m4v"];

/// Resolves a reference into a [`Descriptor`].
///
/// Implementations perform at most one upstream round trip per call and never
/// retry on their own.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, BundleError>;
}

struct PagePatterns {
    download_url: Regex,
    filename: Regex,
    file_size: Regex,
}

fn page_patterns() -> &'static PagePatterns {
    static PATTERNS: OnceLock<PagePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| PagePatterns {
        download_url: Regex::new(r#""download_url":"(https?:[^"]+)""#).expect("valid pattern"),
        filename: Regex::new(r#""filename":"([^"]+)""#).expect("valid pattern"),
        file_size: Regex::new(r#""file_size":(\d+)"#).expect("valid pattern"),
    })
}

/// Classifies content as video when the link carries a known video suffix.
pub fn classify_kind(reference: &str) -> ContentKind {
    let lowered = reference.to_ascii_lowercase();
    if VIDEO_SUFFIXES.iter().any(|suffix| lowered.contains(suffix)) {
        ContentKind::Video
    } else {
        ContentKind::Generic
    }
}

/// Undoes the JSON escaping of `/` found in embedded page data.
fn unescape_location(raw: &str) -> String {
    raw.replace("\\u002F", "/")
        .replace("\\u002f", "/")
        .replace("\\/", "/")
}

/// Extracts a descriptor from a landing-page body.
///
/// The direct download location is mandatory; filename and size fall back to
/// [`PLACEHOLDER_NAME`] and `0`.
pub fn parse_landing_page(reference: &Reference, body: &str) -> Result<Descriptor, BundleError> {
    let patterns = page_patterns();

    let location = patterns
        .download_url
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| unescape_location(m.as_str()))
        .ok_or_else(|| BundleError::Resolution {
            reference: reference.to_string(),
            reason: "no download_url on page".to_string(),
        })?;

    let name = patterns
        .filename
        .captures(body)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| PLACEHOLDER_NAME.to_string());

    let size = patterns
        .file_size
        .captures(body)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<u64>().ok())
        .unwrap_or(0);

    Ok(Descriptor {
        name,
        size,
        location,
        kind: classify_kind(reference.as_str()),
    })
}

/// Live resolver: fetches the landing page over HTTP and scrapes it.
#[derive(Debug, Clone)]
pub struct HttpResolver {
    client: reqwest::Client,
}

impl HttpResolver {
    pub fn new(config: &PipelineConfig) -> Result<Self, BundleError> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.resolve_timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Resolver for HttpResolver {
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, BundleError> {
        let failure = |reason: String| BundleError::Resolution {
            reference: reference.to_string(),
            reason,
        };

        debug!("Resolving {}", reference);
        let response = self
            .client
            .get(reference.as_str())
            .send()
            .await
            .map_err(|e| failure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(failure(format!("landing page returned HTTP {}", status)));
        }

        let body = response.text().await.map_err(|e| failure(e.to_string()))?;
        let descriptor = parse_landing_page(reference, &body)?;
        info!(
            "Resolved {} -> {} ({} bytes declared)",
            reference, descriptor.name, descriptor.size
        );
        Ok(descriptor)
    }
}

/// Offline resolver: the link itself is the location, and every file gets
/// the same declared size.
#[derive(Debug, Clone)]
pub struct FakeResolver {
    file_size: u64,
}

impl FakeResolver {
    pub fn new(file_size: u64) -> Self {
        Self { file_size }
    }
}

#[async_trait]
impl Resolver for FakeResolver {
    async fn resolve(&self, reference: &Reference) -> Result<Descriptor, BundleError> {
        let name = reference
            .as_str()
            .split(['?', '#'])
            .next()
            .and_then(|path| path.rsplit('/').next())
            .filter(|segment| !segment.is_empty() && !segment.contains(':'))
            .unwrap_or(PLACEHOLDER_NAME)
            .to_string();

        Ok(Descriptor {
            name,
            size: self.file_size,
            location: reference.to_string(),
            kind: classify_kind(reference.as_str()),
        })
    }
}
