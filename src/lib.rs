//! Linkbundle - turn a pile of shared-file links into a few deliverable archives
//!
//! This library resolves links to shared files, downloads them, and groups the
//! downloads into size-bounded folders that are compressed into individual
//! bundles ready to be sent on.
//!
//! # Features
//!
//! - **Link Extraction**: Pull every link out of a message or an uploaded `.txt` file
//! - **Page Resolution**: Scrape the direct download location, name and size from landing pages
//! - **Streaming Downloads**: Bounded-memory downloads with a configurable worker limit
//! - **Size-Bounded Folders**: Greedy, order-preserving packing (500 MB per folder by default)
//! - **Bundles**: One `Folder_{n}.tar.gz` per folder, with a caption for delivery
//! - **Fake Mode**: Run the whole pipeline offline with synthetic files
//!
//! # Example
//!
//! ```no_run
//! use linkbundle::{process_links, CancellationToken, JobInput, PipelineConfig, WorkDir};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::default();
//! let work_dir = WorkDir::open("temp").await?;
//! let input = JobInput::from_upload("links.txt", std::fs::read_to_string("links.txt")?)?;
//!
//! let report = process_links(&config, &input, &work_dir, CancellationToken::new()).await?;
//! println!("{}", report.summary());
//! # Ok(())
//! # }
//! ```

mod archive;
mod error;
mod fetch;
mod links;
mod orchestrator;
mod pack;
mod resolve;
mod types;
mod workdir;

pub use archive::{archive_batch, bundle_caption, staging_dir_name, BUNDLE_EXTENSION};
pub use error::BundleError;
pub use fetch::{
    reserve_destination, sanitize_file_name, FakeFetcher, Fetcher, HttpFetcher, WRITE_CHUNK_SIZE,
};
pub use links::extract_links;
pub use orchestrator::{process_links, Pipeline};
pub use pack::pack;
pub use resolve::{classify_kind, parse_landing_page, FakeResolver, HttpResolver, Resolver};
pub use types::{
    Batch, Bundle, ContentKind, Descriptor, ItemOutcome, ItemReport, JobInput, JobReport,
    JobStage, MaterializedFile, Mode, PipelineConfig, Reference, DEFAULT_CAPACITY,
    DEFAULT_FAKE_FILE_SIZE, DEFAULT_MAX_CONCURRENT_OPERATIONS, DEFAULT_RESOLVE_TIMEOUT,
    DEFAULT_USER_AGENT, PLACEHOLDER_NAME,
};
pub use workdir::WorkDir;

/// Re-exported so callers can cancel jobs without a direct `tokio-util` dependency.
pub use tokio_util::sync::CancellationToken;
