//! Data structures shared by the pipeline stages.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::BundleError;

/// Default maximum cumulative size of one batch, in bytes.
pub const DEFAULT_CAPACITY: u64 = 500_000_000;

/// Default number of simultaneous resolve/fetch operations.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 4;

/// Default timeout for a single landing-page request.
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(30);

/// Default size of the files produced in fake mode (1 MiB).
pub const DEFAULT_FAKE_FILE_SIZE: u64 = 1024 * 1024;

/// Browser-like agent sent with landing-page requests.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";

/// Name used when the landing page does not carry a filename.
pub const PLACEHOLDER_NAME: &str = "file_from_link";

/// A link to a remote resource, as found in user input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct Reference(pub(crate) String);

impl Reference {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content classification derived from the reference.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Video,
    Generic,
}

/// Resolved download metadata for one reference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    /// Display name, never empty.
    pub name: String,
    /// Declared size in bytes, `0` when the page does not say.
    pub size: u64,
    /// Direct download URL.
    pub location: String,
    pub kind: ContentKind,
}

impl Descriptor {
    /// Caption for a single delivered download, e.g. `clip.mp4 (12.5MB)`.
    ///
    /// Megabytes are rounded to two decimals and always keep at least one
    /// (`0.0MB`, `1.0MB`).
    pub fn caption(&self) -> String {
        let megabytes = self.size as f64 / 1024.0 / 1024.0;
        let rounded = (megabytes * 100.0).round() / 100.0;
        format!("{} ({:?}MB)", self.name, rounded)
    }
}

/// A file that was fully written to local storage.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct MaterializedFile {
    pub path: PathBuf,
    /// Bytes actually written to `path`.
    pub size: u64,
}

/// An ordered group of files whose combined size respects the capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    /// 1-based position in closing order.
    pub index: usize,
    pub files: Vec<MaterializedFile>,
}

impl Batch {
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size).sum()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// A compressed archive produced from one batch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Bundle {
    pub index: usize,
    pub archive_path: PathBuf,
    pub member_count: usize,
    pub caption: String,
}

impl Bundle {
    /// What the delivery layer needs: the archive to send and its caption.
    pub fn delivery(&self) -> (&Path, &str) {
        (&self.archive_path, &self.caption)
    }
}

/// What happened to a single reference.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ItemOutcome {
    /// Downloaded and included in bundle `bundle`.
    Delivered {
        name: String,
        size: u64,
        bundle: usize,
        caption: String,
    },
    ResolutionFailed { reason: String },
    DownloadFailed { reason: String },
    /// Downloaded, but the batch holding it could not be archived.
    ArchiveFailed { name: String, bundle: usize },
}

/// Outcome for the reference at position `index` of the input.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ItemReport {
    pub index: usize,
    pub reference: Reference,
    pub outcome: ItemOutcome,
}

/// Final result of one pipeline run.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub total_references: usize,
    pub total_failed: usize,
    pub bundles: Vec<Bundle>,
    pub items: Vec<ItemReport>,
}

impl JobReport {
    /// True when the input held no links at all.
    pub fn is_empty(&self) -> bool {
        self.total_references == 0
    }

    /// Human-readable closing message for the caller.
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Total Files Processed: {}\nTotal Folders Created: {}",
            self.total_references,
            self.bundles.len()
        );
        if self.total_failed > 0 {
            summary.push_str(&format!("\nTotal Failed: {}", self.total_failed));
        }
        summary
    }
}

/// Pipeline stages, in the only order they are ever visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobStage {
    Idle,
    Extracting,
    Resolving,
    Fetching,
    Packing,
    Archiving,
    Done,
}

/// Which resolver/fetcher pair a pipeline is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Scrape landing pages and download over HTTP.
    Live,
    /// No network; every link becomes a local file of `file_size` bytes.
    Fake { file_size: u64 },
}

/// Raw user input for one job.
#[derive(Debug, Clone, Default)]
pub struct JobInput {
    /// Free text of a message.
    pub text: Option<String>,
    /// Content of an uploaded text file.
    pub uploaded: Option<String>,
}

impl JobInput {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            uploaded: None,
        }
    }

    /// Accepts an uploaded file; only `.txt` uploads are supported.
    pub fn from_upload(file_name: &str, content: impl Into<String>) -> Result<Self, BundleError> {
        if !file_name.to_ascii_lowercase().ends_with(".txt") {
            return Err(BundleError::Config(format!(
                "Only .txt files are supported, got '{}'",
                file_name
            )));
        }
        Ok(Self {
            text: None,
            uploaded: Some(content.into()),
        })
    }

    /// All text to scan for links, message text first.
    pub fn raw_text(&self) -> String {
        [self.text.as_deref(), self.uploaded.as_deref()]
            .into_iter()
            .flatten()
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Configuration for a pipeline run.
///
/// # Example
///
/// ```
/// use linkbundle::{Mode, PipelineConfig};
///
/// let config = PipelineConfig {
///     capacity: 100_000_000,
///     max_concurrent_operations: 8,
///     mode: Mode::Fake { file_size: 1024 },
///     ..PipelineConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Maximum cumulative bytes per batch (default: 500,000,000).
    pub capacity: u64,
    /// Maximum number of simultaneous network operations (default: 4).
    pub max_concurrent_operations: usize,
    /// Timeout for one landing-page request (default: 30s).
    pub resolve_timeout: Duration,
    /// `User-Agent` header for landing-page requests.
    pub user_agent: String,
    /// Extra attempts for a download that fails with a transient network error (default: 0).
    pub fetch_retries: usize,
    /// Pause between download attempts.
    pub fetch_retry_interval: Duration,
    pub mode: Mode,
    /// Draw a progress bar on stderr while downloading.
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            max_concurrent_operations: DEFAULT_MAX_CONCURRENT_OPERATIONS,
            resolve_timeout: DEFAULT_RESOLVE_TIMEOUT,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            fetch_retries: 0,
            fetch_retry_interval: Duration::from_secs(10),
            mode: Mode::Live,
            show_progress: false,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), BundleError> {
        if self.capacity == 0 {
            return Err(BundleError::Config("capacity must be greater than zero".into()));
        }
        if self.max_concurrent_operations == 0 {
            return Err(BundleError::Config(
                "max_concurrent_operations must be at least 1".into(),
            ));
        }
        if self.resolve_timeout.is_zero() {
            return Err(BundleError::Config("resolve_timeout must be non-zero".into()));
        }
        Ok(())
    }
}
