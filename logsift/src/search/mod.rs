/// The scan engine: candidate enumeration, the chunked per-file scanner, and the
/// parallel coordinator that writes results into artifacts.
///
/// # Data flow
///
/// ```text
/// collect_candidates ──> [PathBuf] ──par_iter──> FileProcessor::process_file ──> FileScan
///                                                                                   │
///                                              Mutex<ArtifactWriter> <── block ─────┘
/// ```
///
/// Each file is scanned exactly once, by one worker of a rayon pool sized for
/// the job. Scanning happens outside the output lock; the lock covers one
/// block append and, when the current artifact is full, opening the next one.
///
/// # Windows
///
/// Files are never read whole. [`FileProcessor`] maps `chunk_size` bytes at a
/// time with memmap2 and hands each window to the [`PatternMatcher`]:
///
/// ```rust,ignore
/// let matcher = PatternMatcher::new("ERROR", PatternMode::Literal)?;
/// let processor = FileProcessor::new(matcher, 64 * 1024 * 1024, 0);
/// let scan = processor.process_file(Path::new("/var/log/app.log"));
/// for record in scan.matches() {
///     println!("{}:{}: {}", record.path.display(), record.line_number + 1, record.line);
/// }
/// ```
///
/// Literal patterns are located with `memchr::memmem` and expanded to their
/// line; regular expressions run over each line of the window as bytes, so
/// invalid UTF-8 never stops a scan. Lines are decoded lossily only once they
/// are known to match.
///
/// # Cancellation
///
/// [`scan_with_cancel`] takes an `AtomicBool` that workers check before each
/// file. Files already being scanned finish; the job then reports
/// [`crate::results::ScanStatus::Cancelled`].
pub mod context;
pub mod engine;
pub mod enumerator;
pub mod matcher;
pub mod processor;

pub use context::LineIndex;
pub use engine::{default_worker_count, scan, scan_with_cancel};
pub use enumerator::collect_candidates;
pub use matcher::PatternMatcher;
pub use processor::FileProcessor;
