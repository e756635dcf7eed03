use anyhow::Context;
use clap::{Parser, Subcommand};
use linkbundle::{
    BundleError, CancellationToken, ItemOutcome, JobInput, Mode, Pipeline, PipelineConfig,
    WorkDir, DEFAULT_CAPACITY, DEFAULT_FAKE_FILE_SIZE, DEFAULT_MAX_CONCURRENT_OPERATIONS,
};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "linkbundle")]
#[command(about = "Download shared-file links and pack them into size-bounded archives", long_about = None)]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,

    /// Work directory for downloads, staging folders and bundles
    #[arg(long, global = true, env = "LINKBUNDLE_WORK_DIR", default_value = "temp")]
    work_dir: PathBuf,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Resolve, download and bundle every link in the input
    Run {
        /// Message text containing links
        #[arg(long)]
        text: Option<String>,

        /// Uploaded `.txt` file with links (stdin is read when neither is given)
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Maximum bytes per folder
        #[arg(long, default_value_t = DEFAULT_CAPACITY)]
        capacity: u64,

        /// Maximum simultaneous network operations
        #[arg(short = 'j', long, default_value_t = DEFAULT_MAX_CONCURRENT_OPERATIONS)]
        concurrency: usize,

        /// Timeout for each landing-page request (e.g. "30s", "1m")
        #[arg(long, default_value = "30s", value_parser = humantime::parse_duration)]
        resolve_timeout: Duration,

        /// Extra attempts for downloads that hit connection errors
        #[arg(long, default_value_t = 0)]
        retries: usize,

        /// Skip the network and create synthetic files instead
        #[arg(long)]
        fake: bool,

        /// Size of each synthetic file in fake mode
        #[arg(long, default_value_t = DEFAULT_FAKE_FILE_SIZE)]
        fake_size: u64,

        /// Print the job report as JSON
        #[arg(long)]
        json: bool,

        /// Disable the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Remove everything in the work directory (admin only)
    Clear {
        /// Identity of the caller requesting the reset
        #[arg(long)]
        caller_id: u64,

        /// Identity allowed to clear; 0 disables clearing
        #[arg(long, env = "ADMIN_ID", default_value_t = 0)]
        admin_id: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize tracing
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("linkbundle={}", log_level))
        .with_writer(std::io::stderr)
        .init();

    info!("🚀 Linkbundle");
    info!("Work directory: {:?}", args.work_dir);

    match args.command {
        Command::Run {
            text,
            file,
            capacity,
            concurrency,
            resolve_timeout,
            retries,
            fake,
            fake_size,
            json,
            no_progress,
        } => {
            let input = read_input(text, file)?;
            let config = PipelineConfig {
                capacity,
                max_concurrent_operations: concurrency,
                resolve_timeout,
                fetch_retries: retries,
                mode: if fake {
                    Mode::Fake {
                        file_size: fake_size,
                    }
                } else {
                    Mode::Live
                },
                show_progress: !no_progress && !json,
                ..PipelineConfig::default()
            };
            run(config, input, args.work_dir, json).await
        }
        Command::Clear {
            caller_id,
            admin_id,
        } => clear(args.work_dir, caller_id, admin_id).await,
    }
}

/// Builds the job input from `--text`, `--file`, or stdin.
fn read_input(text: Option<String>, file: Option<PathBuf>) -> anyhow::Result<JobInput> {
    let mut input = match file {
        Some(path) => {
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            JobInput::from_upload(&name, content)?
        }
        None => JobInput::default(),
    };
    input.text = text;

    if input.text.is_none() && input.uploaded.is_none() {
        let mut stdin = String::new();
        std::io::stdin()
            .read_to_string(&mut stdin)
            .context("reading links from stdin")?;
        input.text = Some(stdin);
    }
    Ok(input)
}

async fn run(
    config: PipelineConfig,
    input: JobInput,
    work_dir: PathBuf,
    json: bool,
) -> anyhow::Result<()> {
    let work_dir = WorkDir::open(&work_dir)
        .await
        .with_context(|| format!("opening work directory {}", work_dir.display()))?;
    let pipeline = Pipeline::new(config)?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, stopping job");
                cancel.cancel();
            }
        });
    }

    let report = match pipeline.run(&input, &work_dir, &cancel).await {
        Ok(report) => report,
        Err(BundleError::Cancelled) => {
            eprintln!("❌ Job cancelled; downloaded files were kept in the work directory.");
            std::process::exit(130);
        }
        Err(e) => return Err(e).context("job failed"),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_empty() {
        println!("No valid links found.");
        return Ok(());
    }

    for item in &report.items {
        match &item.outcome {
            ItemOutcome::Delivered {
                caption, bundle, ..
            } => println!("✅ {} -> Folder {}", caption, bundle),
            ItemOutcome::ResolutionFailed { .. } => {
                println!("Failed to extract info from: {}", item.reference)
            }
            ItemOutcome::DownloadFailed { reason } => {
                println!("Download failed for {}: {}", item.reference, reason)
            }
            ItemOutcome::ArchiveFailed { name, bundle } => {
                println!("Folder {} could not be archived, {} not delivered", bundle, name)
            }
        }
    }
    for bundle in &report.bundles {
        let (path, caption) = bundle.delivery();
        println!("📁 {} -> {}", caption, path.display());
    }
    println!("{}", report.summary());
    Ok(())
}

async fn clear(work_dir: PathBuf, caller_id: u64, admin_id: u64) -> anyhow::Result<()> {
    let mut handle = WorkDir::open(&work_dir)
        .await
        .with_context(|| format!("opening work directory {}", work_dir.display()))?;
    if admin_id != 0 {
        handle = handle.with_admin(admin_id);
    }

    match handle.clear(caller_id).await {
        Ok(()) => {
            println!("System cleaned. Work directory is fresh again.");
            Ok(())
        }
        Err(BundleError::AccessDenied { .. }) => {
            eprintln!("Access denied.");
            std::process::exit(1);
        }
        Err(e) => Err(e).context("clearing work directory"),
    }
}
