use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

/// Job-scoped counters shared by every worker of one scan.
///
/// Workers update these without any ordering between them, so every field is an
/// atomic and every update is a single `fetch_add`. Clones share the same counters.
#[derive(Debug, Clone, Default)]
pub struct ScanCounters {
    files_processed: Arc<AtomicU64>,
    bytes_processed: Arc<AtomicU64>,
    matches_found: Arc<AtomicU64>,
    files_with_matches: Arc<AtomicU64>,
    file_errors: Arc<AtomicU64>,
    lossy_lines: Arc<AtomicU64>,
}

impl ScanCounters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a file that was scanned to completion
    pub fn record_file(&self, bytes: u64, matches: u64) {
        self.files_processed.fetch_add(1, Ordering::Relaxed);
        self.bytes_processed.fetch_add(bytes, Ordering::Relaxed);
        if matches > 0 {
            self.matches_found.fetch_add(matches, Ordering::Relaxed);
            self.files_with_matches.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records a file that could not be scanned
    pub fn record_file_error(&self) {
        self.file_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Records lines that needed UTF-8 replacement
    pub fn record_lossy(&self, lines: u64) {
        if lines > 0 {
            self.lossy_lines.fetch_add(lines, Ordering::Relaxed);
        }
    }

    /// Reads a consistent-enough snapshot; exact once all workers have returned
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            files_processed: self.files_processed.load(Ordering::Relaxed),
            bytes_processed: self.bytes_processed.load(Ordering::Relaxed),
            matches_found: self.matches_found.load(Ordering::Relaxed),
            files_with_matches: self.files_with_matches.load(Ordering::Relaxed),
            file_errors: self.file_errors.load(Ordering::Relaxed),
            lossy_lines: self.lossy_lines.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.snapshot();
        info!(
            files_processed = stats.files_processed,
            bytes_processed = stats.bytes_processed,
            matches_found = stats.matches_found,
            files_with_matches = stats.files_with_matches,
            file_errors = stats.file_errors,
            lossy_lines = stats.lossy_lines,
            "Scan counters"
        );
    }
}

/// Point-in-time copy of [`ScanCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub files_processed: u64,
    pub bytes_processed: u64,
    pub matches_found: u64,
    pub files_with_matches: u64,
    pub file_errors: u64,
    pub lossy_lines: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;

    #[test]
    fn test_record_file() {
        let counters = ScanCounters::new();
        counters.record_file(100, 2);
        counters.record_file(50, 0);
        counters.record_file_error();

        let stats = counters.snapshot();
        assert_eq!(stats.files_processed, 2);
        assert_eq!(stats.bytes_processed, 150);
        assert_eq!(stats.matches_found, 2);
        assert_eq!(stats.files_with_matches, 1);
        assert_eq!(stats.file_errors, 1);
    }

    #[test]
    fn test_concurrent_updates() {
        let counters = ScanCounters::new();
        (0..1000u64).into_par_iter().for_each(|i| {
            counters.record_file(10, i % 2);
        });

        let stats = counters.snapshot();
        assert_eq!(stats.files_processed, 1000);
        assert_eq!(stats.bytes_processed, 10_000);
        assert_eq!(stats.matches_found, 500);
        assert_eq!(stats.files_with_matches, 500);
    }

    #[test]
    fn test_clones_share_counters() {
        let counters = ScanCounters::new();
        let clone = counters.clone();
        clone.record_lossy(3);
        assert_eq!(counters.snapshot().lossy_lines, 3);
    }
}
