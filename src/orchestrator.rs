//! Main orchestration logic for a link bundling job.

use crate::archive::archive_batch;
use crate::error::BundleError;
use crate::fetch::{FakeFetcher, Fetcher, HttpFetcher};
use crate::links::extract_links;
use crate::pack::pack;
use crate::resolve::{FakeResolver, HttpResolver, Resolver};
use crate::types::{
    Descriptor, ItemOutcome, ItemReport, JobInput, JobReport, JobStage, MaterializedFile, Mode,
    PipelineConfig, Reference,
};
use crate::workdir::WorkDir;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Runs one bundling job with the resolver/fetcher pair selected by
/// `config.mode`.
///
/// This is the main entry point. It performs the following steps:
///
/// 1. Extracts links from the message text and uploaded file
/// 2. Resolves every link's landing page (concurrently, bounded)
/// 3. Downloads every resolved file (concurrently, bounded)
/// 4. Packs downloaded files into size-bounded batches
/// 5. Archives each batch into a `Folder_{n}.tar.gz` bundle
///
/// Per-link and per-batch failures are recorded in the report; only
/// cancellation or a broken work directory fail the whole job.
///
/// # Example
///
/// ```no_run
/// use linkbundle::{process_links, CancellationToken, JobInput, PipelineConfig, WorkDir};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::default();
/// let work_dir = WorkDir::open("temp").await?;
/// let input = JobInput::from_text("https://share.example/s/1abc https://share.example/s/2def");
///
/// let report = process_links(&config, &input, &work_dir, CancellationToken::new()).await?;
/// for bundle in &report.bundles {
///     let (path, caption) = bundle.delivery();
///     println!("{}: {}", caption, path.display());
/// }
/// # Ok(())
/// # }
/// ```
pub async fn process_links(
    config: &PipelineConfig,
    input: &JobInput,
    work_dir: &WorkDir,
    cancel: CancellationToken,
) -> Result<JobReport, BundleError> {
    Pipeline::new(config.clone())?
        .run(input, work_dir, &cancel)
        .await
}

/// A configured resolve → fetch → pack → archive pipeline.
#[derive(Clone)]
pub struct Pipeline {
    config: PipelineConfig,
    resolver: Arc<dyn Resolver>,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Builds a pipeline whose resolver and fetcher match `config.mode`.
    pub fn new(config: PipelineConfig) -> Result<Self, BundleError> {
        let (resolver, fetcher): (Arc<dyn Resolver>, Arc<dyn Fetcher>) = match config.mode {
            Mode::Live => (
                Arc::new(HttpResolver::new(&config)?),
                Arc::new(HttpFetcher::new(&config)?),
            ),
            Mode::Fake { file_size } => (
                Arc::new(FakeResolver::new(file_size)),
                Arc::new(FakeFetcher),
            ),
        };
        Self::with_components(config, resolver, fetcher)
    }

    /// Builds a pipeline around caller-supplied stages.
    pub fn with_components(
        config: PipelineConfig,
        resolver: Arc<dyn Resolver>,
        fetcher: Arc<dyn Fetcher>,
    ) -> Result<Self, BundleError> {
        config.validate()?;
        Ok(Self {
            config,
            resolver,
            fetcher,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs a job over `input`, writing everything under `work_dir`.
    ///
    /// Holds the work directory lock for the whole job. Cancelling `cancel`
    /// stops new network calls, drops in-flight ones and returns
    /// [`BundleError::Cancelled`]; files already written stay on disk.
    pub async fn run(
        &self,
        input: &JobInput,
        work_dir: &WorkDir,
        cancel: &CancellationToken,
    ) -> Result<JobReport, BundleError> {
        let _guard = tokio::select! {
            guard = work_dir.lock() => guard,
            _ = cancel.cancelled() => return Err(BundleError::Cancelled),
        };
        let mut stage = JobStage::Idle;

        enter(&mut stage, JobStage::Extracting);
        let references = extract_links(Some(&input.raw_text()));
        if references.is_empty() {
            info!("No valid links found");
            enter(&mut stage, JobStage::Done);
            return Ok(JobReport::default());
        }
        let total_references = references.len();
        info!("🔗 Found {} link(s)", total_references);

        // Everything below writes here; a missing or read-only directory is fatal.
        tokio::fs::create_dir_all(work_dir.path()).await?;

        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; total_references];
        let mut total_failed = 0usize;

        enter(&mut stage, JobStage::Resolving);
        let resolutions = {
            let pb = self.progress_bar(total_references, "🔍 Resolving");
            let results = self
                .fan_out(references.clone(), cancel, &pb, |reference: Reference| {
                    let resolver = Arc::clone(&self.resolver);
                    async move { resolver.resolve(&reference).await }
                })
                .await;
            pb.finish_and_clear();
            results?
        };

        let mut resolved: Vec<(usize, Descriptor)> = Vec::with_capacity(total_references);
        for (index, result) in resolutions.into_iter().enumerate() {
            match result {
                Ok(descriptor) => resolved.push((index, descriptor)),
                Err(e) => {
                    warn!("❌ {}", e);
                    total_failed += 1;
                    outcomes[index] = Some(ItemOutcome::ResolutionFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }

        enter(&mut stage, JobStage::Fetching);
        let fetches = {
            let pb = self.progress_bar(resolved.len(), "⬇️  Downloading");
            let descriptors: Vec<Descriptor> = resolved.iter().map(|(_, d)| d.clone()).collect();
            let results = self
                .fan_out(descriptors, cancel, &pb, |descriptor: Descriptor| {
                    let fetcher = Arc::clone(&self.fetcher);
                    let destination = work_dir.path().to_path_buf();
                    async move { fetcher.fetch(&descriptor, &destination).await }
                })
                .await;
            pb.finish_and_clear();
            results?
        };

        let mut materialized: Vec<(usize, Descriptor, MaterializedFile)> = Vec::new();
        for ((index, descriptor), result) in resolved.into_iter().zip(fetches) {
            match result {
                Ok(file) => materialized.push((index, descriptor, file)),
                Err(e) => {
                    warn!("❌ {}", e);
                    total_failed += 1;
                    outcomes[index] = Some(ItemOutcome::DownloadFailed {
                        reason: e.to_string(),
                    });
                }
            }
        }

        enter(&mut stage, JobStage::Packing);
        let files: Vec<MaterializedFile> = materialized.iter().map(|(_, _, f)| f.clone()).collect();
        let batches = pack(files, self.config.capacity);
        info!(
            "🗂️  Packed {} file(s) into {} folder(s) of at most {} bytes",
            materialized.len(),
            batches.len(),
            self.config.capacity
        );

        enter(&mut stage, JobStage::Archiving);
        let mut bundles = Vec::with_capacity(batches.len());
        // Batches are the materialized sequence cut into consecutive runs.
        let mut members = materialized.iter();
        for batch in &batches {
            if cancel.is_cancelled() {
                warn!("Job cancelled before archiving folder {}", batch.index);
                return Err(BundleError::Cancelled);
            }

            let archived = archive_batch(batch, work_dir.path()).await;
            if let Err(e) = &archived {
                error!("❌ {}", e);
            }
            for (index, descriptor, file) in members.by_ref().take(batch.len()) {
                outcomes[*index] = Some(match &archived {
                    Ok(bundle) => ItemOutcome::Delivered {
                        name: descriptor.name.clone(),
                        size: file.size,
                        bundle: bundle.index,
                        caption: descriptor.caption(),
                    },
                    Err(_) => ItemOutcome::ArchiveFailed {
                        name: descriptor.name.clone(),
                        bundle: batch.index,
                    },
                });
            }
            if let Ok(bundle) = archived {
                bundles.push(bundle);
            }
        }

        enter(&mut stage, JobStage::Done);
        let items = references
            .into_iter()
            .zip(outcomes)
            .enumerate()
            .filter_map(|(index, (reference, outcome))| {
                outcome.map(|outcome| ItemReport {
                    index,
                    reference,
                    outcome,
                })
            })
            .collect();

        let report = JobReport {
            total_references,
            total_failed,
            bundles,
            items,
        };
        info!(
            "✅ Processed {} link(s): {} failed, {} folder(s) created",
            report.total_references,
            report.total_failed,
            report.bundles.len()
        );
        Ok(report)
    }

    /// Runs `op` over `items` with at most `max_concurrent_operations` in
    /// flight, returning results in input order.
    async fn fan_out<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        pb: &indicatif::ProgressBar,
        op: F,
    ) -> Result<Vec<Result<R, BundleError>>, BundleError>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R, BundleError>> + Send + 'static,
        R: Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_operations));
        let mut tasks = Vec::with_capacity(items.len());

        for item in items {
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let pb = pb.clone();
            let operation = op(item);

            tasks.push(tokio::spawn(async move {
                let _permit = tokio::select! {
                    permit = semaphore.acquire_owned() => permit.ok()?,
                    _ = cancel.cancelled() => return None,
                };
                let result = tokio::select! {
                    result = operation => result,
                    _ = cancel.cancelled() => return None,
                };
                pb.inc(1);
                Some(result)
            }));
        }

        // Awaited in spawn order, so results line up with `items`.
        let mut results = Vec::with_capacity(tasks.len());
        for task in tasks {
            match task.await {
                Ok(Some(result)) => results.push(result),
                Ok(None) => {}
                Err(e) => {
                    error!("Task join error: {}", e);
                    results.push(Err(BundleError::IoError(std::io::Error::other(format!(
                        "Task join error: {}",
                        e
                    )))));
                }
            }
        }

        if cancel.is_cancelled() {
            warn!("Job cancelled with {} operation(s) finished", results.len());
            return Err(BundleError::Cancelled);
        }
        Ok(results)
    }

    fn progress_bar(&self, len: usize, message: &'static str) -> indicatif::ProgressBar {
        if !self.config.show_progress {
            return indicatif::ProgressBar::hidden();
        }
        let pb = indicatif::ProgressBar::new(len as u64);
        if let Ok(style) = indicatif::ProgressStyle::default_bar().template(
            "{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg} | {elapsed_precise} elapsed",
        ) {
            pb.set_style(style.progress_chars("█▓▒░ "));
        }
        pb.set_message(message);
        pb
    }
}

fn enter(stage: &mut JobStage, next: JobStage) {
    debug_assert!(next > *stage, "stage {:?} cannot follow {:?}", next, stage);
    debug!("Stage {:?} -> {:?}", stage, next);
    *stage = next;
}
