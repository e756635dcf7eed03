//! Error types for bundle pipeline operations.

use std::io;
use thiserror::Error;

/// Errors that can occur while resolving, fetching and archiving links.
///
/// `Resolution`, `Fetch` and `Archive` are per-item failures: the orchestrator
/// records them in the job report and keeps going. The remaining variants
/// abort whatever operation produced them.
#[derive(Error, Debug)]
pub enum BundleError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// The landing page did not yield a direct download location.
    #[error("Failed to extract info from {reference}: {reason}")]
    Resolution { reference: String, reason: String },

    /// Streaming the content to disk failed part way through.
    #[error("Download of {location} failed after {partial_bytes} bytes: {reason}")]
    Fetch {
        location: String,
        partial_bytes: u64,
        reason: String,
    },

    /// Staging, copying or compressing a batch failed.
    #[error("Archiving folder {index} failed: {reason}")]
    Archive { index: usize, reason: String },

    /// An administrative operation was invoked by someone other than the admin.
    #[error("Access denied for caller {caller}")]
    AccessDenied { caller: u64 },

    /// The job was stopped through its cancellation token.
    #[error("Job cancelled")]
    Cancelled,

    /// Invalid configuration or input.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl BundleError {
    /// Whether a failed fetch attempt is worth repeating.
    pub(crate) fn is_transient(&self) -> bool {
        match self {
            BundleError::ReqwestError(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
