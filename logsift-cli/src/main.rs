use clap::{Parser, Subcommand};
use colored::Colorize;
use logsift::{
    config::{PatternMode, ScanConfig, Settings, DEFAULT_CHUNK_SIZE, DEFAULT_MAX_ARTIFACT_SIZE},
    errors::ResponseStatus,
    lifecycle::{HealthReport, ResultInfo, ResultListing, SweepReport},
    report::format_size,
    ScanService, SearchError, SubmitResponse,
};
use serde::Serialize;
use std::{
    fs,
    io::{self, Write},
    num::NonZeroUsize,
    path::PathBuf,
    process::ExitCode,
    sync::mpsc,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

type Result<T> = std::result::Result<T, SearchError>;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// YAML configuration file layered over the default locations
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding persisted result sets
    #[arg(long, global = true)]
    results_dir: Option<PathBuf>,

    /// Log filter (overridden by RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Parser)]
struct CliScanConfig {
    /// Literal text or regular expression to look for
    pattern: String,

    /// Treat the pattern as a regular expression
    #[arg(short = 'r', long)]
    regex: bool,

    /// Directory to scan recursively
    #[arg(short = 'd', long, conflicts_with = "files")]
    root: Option<PathBuf>,

    /// Scan exactly these files instead of walking a directory
    #[arg(short = 'f', long, num_args = 1..)]
    files: Vec<PathBuf>,

    /// Lines of context around each match
    #[arg(short = 'C', long, default_value = "0")]
    context: usize,

    /// Bytes mapped per window
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: u64,

    /// Size at which a new artifact part is started
    #[arg(long, default_value_t = DEFAULT_MAX_ARTIFACT_SIZE)]
    max_artifact_size: u64,

    /// Number of worker threads
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// File extensions to include (e.g. log,txt,1)
    #[arg(short = 'e', long)]
    extensions: Option<String>,

    /// Maximum directory depth below the root
    #[arg(long)]
    max_depth: Option<usize>,

    /// Skip files smaller than this many bytes
    #[arg(long)]
    min_size: Option<u64>,

    /// Skip files larger than this many bytes
    #[arg(long)]
    max_size: Option<u64>,

    /// Follow symbolic links while walking
    #[arg(long)]
    follow_symlinks: bool,

    /// Leave unreadable files out of the artifacts
    #[arg(long)]
    no_error_blocks: bool,

    /// Show a progress bar
    #[arg(long)]
    progress: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan log files and store the matches as a new result set
    Scan(Box<CliScanConfig>),

    /// List stored result sets
    List,

    /// Show metadata and retrieval URLs for a result set
    Info {
        /// Result set identifier
        id: String,
    },

    /// Copy the packaged result set to a file, then queue it for deletion
    Download {
        /// Result set identifier
        id: String,

        /// Destination file (defaults to <id>.tar.gz in the working directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print the path of one artifact, or copy it with --output
    Artifact {
        /// Result set identifier
        id: String,

        /// Artifact file name, e.g. scan_results_part001.log
        name: String,

        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Report the state of the result store
    Health,

    /// Run one retention sweep, or keep sweeping with --watch
    Sweep {
        /// Keep running the background sweeper until interrupted
        #[arg(long)]
        watch: bool,
    },
}

/// Printed by `download`
#[derive(Serialize)]
struct SavedDownload {
    result_id: String,
    path: PathBuf,
    size_bytes: u64,
}

/// Printed by `artifact`
#[derive(Serialize)]
struct LocatedArtifact {
    result_id: String,
    name: String,
    path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    copied_to: Option<PathBuf>,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            match e.status() {
                ResponseStatus::NotFound => ExitCode::from(1),
                ResponseStatus::InvalidInput => ExitCode::from(2),
                _ => ExitCode::from(3),
            }
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(cli.config.as_deref())
        .map_err(|e| SearchError::config_error(e.to_string()))?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| settings.scan.log_level.clone());
    init_tracing(&level);

    let mut lifecycle = settings.lifecycle;
    if let Some(dir) = cli.results_dir {
        lifecycle.results_dir = dir;
    }
    let mut service = ScanService::new(lifecycle)?;

    match cli.command {
        Commands::Scan(args) => {
            let config = settings.scan.merge_with_cli(scan_config_from_args(*args));
            let response = service.submit(&config)?;
            output(cli.json, &response, print_submit_response)
        }
        Commands::List => {
            let listings = service.list()?;
            output(cli.json, &listings, |l| print_listings(l))
        }
        Commands::Info { id } => {
            let info = service.info(&id)?;
            output(cli.json, &info, print_info)
        }
        Commands::Download { id, output: dest } => {
            let dest = dest.unwrap_or_else(|| PathBuf::from(format!("{}.tar.gz", id)));
            let mut download = service.download(&id)?;
            let mut file = fs::File::create(&dest)?;
            let copied = io::copy(&mut download, &mut file)?;
            file.flush()?;
            download.finish()?;
            let saved = SavedDownload {
                result_id: id,
                path: dest,
                size_bytes: copied,
            };
            output(cli.json, &saved, print_download)
        }
        Commands::Artifact { id, name, output: dest } => {
            let mut located = LocatedArtifact {
                path: service.artifact(&id, &name)?,
                result_id: id,
                name,
                copied_to: None,
            };
            if let Some(dest) = dest {
                fs::copy(&located.path, &dest)?;
                located.copied_to = Some(dest);
            }
            output(cli.json, &located, print_artifact)
        }
        Commands::Health => {
            let report = service.health()?;
            output(cli.json, &report, print_health)
        }
        Commands::Sweep { watch: false } => {
            let report = service.sweep()?;
            output(cli.json, &report, print_sweep)
        }
        Commands::Sweep { watch: true } => {
            let report = service.sweep()?;
            print_sweep(&report);
            service.start_sweeper()?;
            info!(
                "Sweeping {} every {:?}",
                service.store().results_dir().display(),
                service.store().config().sweep_interval
            );
            wait_for_stdin_close();
            service.shutdown();
            Ok(())
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn scan_config_from_args(args: CliScanConfig) -> ScanConfig {
    let defaults = ScanConfig::default();
    let file_extensions = match args.extensions {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|ext| !ext.is_empty())
            .map(|ext| format!(".{}", ext.trim_start_matches('.')))
            .collect(),
        None => defaults.file_extensions.clone(),
    };

    ScanConfig {
        pattern: args.pattern,
        pattern_mode: if args.regex {
            PatternMode::Regex
        } else {
            PatternMode::Literal
        },
        uploaded_files: (!args.files.is_empty()).then_some(args.files),
        root_path: args.root,
        context_lines: args.context,
        chunk_size: args.chunk_size,
        max_artifact_size: args.max_artifact_size,
        thread_count: args.threads,
        file_extensions,
        max_depth: args.max_depth,
        min_file_size: args.min_size,
        max_file_size: args.max_size,
        follow_symlinks: args.follow_symlinks,
        write_error_blocks: !args.no_error_blocks,
        show_progress: args.progress,
        ..defaults
    }
}

/// Blocks until stdin reaches end of file or the process is interrupted
fn wait_for_stdin_close() {
    let (tx, rx) = mpsc::channel::<()>();
    std::thread::spawn(move || {
        let _ = io::copy(&mut io::stdin().lock(), &mut io::sink());
        let _ = tx.send(());
    });
    let _ = rx.recv();
}

fn output<T: Serialize>(json: bool, value: &T, print: impl FnOnce(&T)) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        print(value);
    }
    Ok(())
}

fn print_submit_response(response: &SubmitResponse) {
    println!("Result set {}", response.result_id.blue());
    for artifact in &response.artifacts {
        println!("  {}", artifact);
    }
    println!(
        "\n{} matches in {} of {} files ({} scanned, {} errors)",
        response.totals.total_matches.to_string().green(),
        response.totals.files_with_matches,
        response.totals.files_processed,
        format_size(response.totals.bytes_processed as f64),
        response.totals.file_errors
    );
    println!("Download: {}", response.download_url);
    println!("Info:     {}", response.info_url);
}

fn print_listings(listings: &[ResultListing]) {
    if listings.is_empty() {
        println!("No result sets stored");
        return;
    }
    for listing in listings {
        let created = listing
            .created_at
            .map(humantime_secs)
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {} file(s), {}  {}",
            listing.id.blue(),
            created,
            listing.file_count,
            format_size(listing.total_size_bytes as f64),
            listing.search_parameter.as_deref().unwrap_or("-")
        );
    }
}

fn print_info(info: &ResultInfo) {
    let meta = &info.metadata;
    println!("Result set {}", meta.id.blue());
    println!("Search parameter: {} ({})", meta.search_parameter, meta.pattern_mode);
    if let Some(dir) = &meta.directory_path {
        println!("Directory:        {}", dir.display());
    }
    if let Some(files) = &meta.uploaded_files {
        println!("Uploaded files:   {}", files.len());
    }
    println!("Created:          {}", humantime_secs(meta.created_at));
    println!(
        "Artifacts:        {} file(s), {}",
        info.file_count,
        format_size(info.total_size_bytes as f64)
    );
    for url in &info.artifact_urls {
        println!("  {}", url);
    }
    println!("Download:         {}", info.download_url);
}

fn print_health(report: &HealthReport) {
    let status = if report.status == "healthy" {
        report.status.green()
    } else {
        report.status.red()
    };
    println!("Status:            {}", status);
    println!("Results directory: {}", report.results_dir.display());
    println!("Result sets:       {}", report.result_sets);
    println!("Pending deletions: {}", report.pending_deletions);
    println!("Active downloads:  {}", report.active_downloads);
}

fn print_sweep(report: &SweepReport) {
    println!(
        "Sweep: {} expired, {} deleted, {} retried, {} abandoned, {} skipped (download open), {} stale removed",
        report.expired,
        report.deleted,
        report.retried,
        report.abandoned,
        report.skipped_active,
        report.stale_removed
    );
}

fn print_download(saved: &SavedDownload) {
    println!(
        "Saved {} ({}) to {}",
        saved.result_id.blue(),
        format_size(saved.size_bytes as f64),
        saved.path.display()
    );
}

fn print_artifact(located: &LocatedArtifact) {
    match &located.copied_to {
        Some(dest) => println!("Copied {} to {}", located.name.blue(), dest.display()),
        None => println!("{}", located.path.display()),
    }
}

fn humantime_secs(secs: u64) -> String {
    let time = std::time::UNIX_EPOCH + std::time::Duration::from_secs(secs);
    humantime::format_rfc3339_seconds(time).to_string()
}
