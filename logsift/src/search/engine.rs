use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use std::io;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::{Instant, SystemTime};
use tracing::{debug, info, trace, warn};

use super::enumerator::collect_candidates;
use super::processor::FileProcessor;
use crate::config::ScanConfig;
use crate::errors::{SearchError, SearchResult};
use crate::metrics::ScanCounters;
use crate::report::{error_block, file_block, footer, ArtifactWriter, ReportHeader};
use crate::results::{FileScan, ScanStatus, ScanSummary};

/// The artifact writer plus the first write failure, guarded together so a
/// worker checks and writes under one lock acquisition
struct OutputSink {
    writer: ArtifactWriter,
    failure: Option<io::Error>,
}

/// Worker count for `file_count` candidates when the request does not set one
pub fn default_worker_count(file_count: usize) -> usize {
    num_cpus::get().min((file_count / 2).max(1))
}

/// Scans every candidate of `config`, writing artifacts into `output_dir`
pub fn scan(config: &ScanConfig, output_dir: &Path) -> SearchResult<ScanSummary> {
    scan_with_cancel(config, output_dir, &AtomicBool::new(false))
}

/// Like [`scan`], checking `cancel` before each file.
///
/// Files are dispatched over a dedicated rayon pool. A worker scans its file
/// without holding any lock, then takes the output lock only to append the
/// file's block. Block order in the artifacts is the order in which workers
/// finish, not enumeration order.
///
/// A file that cannot be read is logged, counted, and optionally written as an
/// error block; it never aborts the job. When no candidate could be read at all
/// the status is [`ScanStatus::Failed`]. A failed artifact write aborts the job:
/// later workers stop writing and the job returns [`SearchError::Aggregation`]
/// once every worker has returned.
pub fn scan_with_cancel(
    config: &ScanConfig,
    output_dir: &Path,
    cancel: &AtomicBool,
) -> SearchResult<ScanSummary> {
    config.validate()?;
    let processor = FileProcessor::from_config(config)?;
    let source = config.source()?.to_string();

    info!(
        "Starting scan for pattern {:?} ({}) in {}",
        config.pattern, config.pattern_mode, source
    );

    let candidates = collect_candidates(config)?;
    let workers = config
        .thread_count
        .map_or_else(|| default_worker_count(candidates.len()), |n| n.get());
    debug!(
        "Dispatching {} files over {} workers",
        candidates.len(),
        workers
    );

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .map_err(|e| SearchError::IoError(io::Error::new(io::ErrorKind::Other, e)))?;

    let started_at = SystemTime::now();
    let start = Instant::now();
    let counters = ScanCounters::new();
    let header = ReportHeader {
        pattern: config.pattern.clone(),
        mode: config.pattern_mode,
        source,
        started_at,
    };
    let sink = Mutex::new(OutputSink {
        writer: ArtifactWriter::new(output_dir, header, config.max_artifact_size),
        failure: None,
    });
    let progress = progress_bar(config.show_progress, candidates.len());

    pool.install(|| {
        candidates.par_iter().for_each(|path| {
            if cancel.load(Ordering::Relaxed) {
                return;
            }

            let scan = processor.process_file(path);
            record(&counters, &scan);
            progress.inc(1);

            let block = match scan.error() {
                Some(error) if config.write_error_blocks => error_block(path, error),
                Some(_) => return,
                None if scan.match_count() == 0 => return,
                None => file_block(path, scan.matches(), config.context_lines > 0),
            };

            let mut sink = sink.lock().unwrap_or_else(PoisonError::into_inner);
            if sink.failure.is_some() {
                return;
            }
            match sink.writer.write_block(path, &block, scan.match_count()) {
                Ok(artifact) => trace!("Wrote {} to {}", path.display(), artifact),
                Err(e) => {
                    warn!("Failed to write block for {}: {}", path.display(), e);
                    sink.failure = Some(e);
                }
            }
        });
    });

    progress.finish_and_clear();
    let elapsed = start.elapsed();
    let stats = counters.snapshot();
    counters.log_stats();

    let OutputSink { writer, failure } = sink.into_inner().unwrap_or_else(PoisonError::into_inner);
    if let Some(e) = failure {
        return Err(SearchError::aggregation(output_dir, e));
    }

    let status = if cancel.load(Ordering::Relaxed) {
        ScanStatus::Cancelled
    } else if stats.files_processed == 0 && stats.file_errors > 0 {
        ScanStatus::Failed
    } else if stats.matches_found == 0 {
        ScanStatus::NoMatches
    } else {
        ScanStatus::Succeeded
    };

    let output = if status == ScanStatus::Cancelled {
        Default::default()
    } else {
        writer
            .finish(&footer(&stats, elapsed, SystemTime::now()))
            .map_err(|e| SearchError::aggregation(output_dir, e))?
    };

    info!(
        "Scan finished with status {:?}: {} matches in {} of {} files ({:.2}s)",
        status,
        stats.matches_found,
        stats.files_with_matches,
        stats.files_processed,
        elapsed.as_secs_f64()
    );

    Ok(ScanSummary {
        status,
        started_at,
        elapsed,
        files_processed: stats.files_processed,
        bytes_processed: stats.bytes_processed,
        total_matches: stats.matches_found,
        files_with_matches: stats.files_with_matches,
        file_errors: stats.file_errors,
        artifacts: output.artifacts,
        files: output.files,
    })
}

fn record(counters: &ScanCounters, scan: &FileScan) {
    if scan.error().is_some() {
        counters.record_file_error();
        return;
    }
    counters.record_file(scan.bytes_scanned, scan.match_count() as u64);
    counters.record_lossy(scan.matches().iter().filter(|m| m.lossy).count() as u64);
}

fn progress_bar(visible: bool, total: usize) -> ProgressBar {
    if !visible {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new(total as u64);
    if let Ok(style) =
        ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} files")
    {
        bar.set_style(style.progress_chars("=>-"));
    }
    bar
}
