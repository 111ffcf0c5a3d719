/// Types produced by a scan: per-line match records, per-file outcomes, and the
/// job-level summary.
///
/// Match records are owned by the file outcome that produced them and are moved,
/// not shared, into the writer. A worker builds a [`FileScan`], hands it to the
/// writer under the output lock, and drops it; nothing keeps a reference to a
/// record after its block is written.
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, SystemTime};

use crate::errors::FileError;

/// A single matching line in a file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchRecord {
    /// The file the line was found in
    pub path: PathBuf,
    /// Zero-based line number
    pub line_number: usize,
    /// Line text, with invalid UTF-8 replaced
    pub line: String,
    /// Set when invalid UTF-8 had to be replaced while decoding
    #[serde(default)]
    pub lossy: bool,
    /// Lines before the match, oldest first
    #[serde(default)]
    pub context_before: Vec<String>,
    /// Lines after the match
    #[serde(default)]
    pub context_after: Vec<String>,
}

impl MatchRecord {
    pub fn new(path: impl Into<PathBuf>, line_number: usize, line: String, lossy: bool) -> Self {
        Self {
            path: path.into(),
            line_number,
            line,
            lossy,
            context_before: Vec::new(),
            context_after: Vec::new(),
        }
    }

    pub fn has_context(&self) -> bool {
        !self.context_before.is_empty() || !self.context_after.is_empty()
    }
}

/// What happened when one file was scanned
#[derive(Debug, Clone)]
pub enum FileOutcome {
    Scanned(Vec<MatchRecord>),
    Failed(FileError),
}

/// The outcome of scanning one file
#[derive(Debug, Clone)]
pub struct FileScan {
    pub path: PathBuf,
    /// Bytes covered by the scan windows
    pub bytes_scanned: u64,
    pub outcome: FileOutcome,
}

impl FileScan {
    pub fn scanned(path: impl Into<PathBuf>, bytes_scanned: u64, matches: Vec<MatchRecord>) -> Self {
        Self {
            path: path.into(),
            bytes_scanned,
            outcome: FileOutcome::Scanned(matches),
        }
    }

    pub fn failed(path: impl Into<PathBuf>, error: FileError) -> Self {
        Self {
            path: path.into(),
            bytes_scanned: 0,
            outcome: FileOutcome::Failed(error),
        }
    }

    pub fn matches(&self) -> &[MatchRecord] {
        match &self.outcome {
            FileOutcome::Scanned(matches) => matches,
            FileOutcome::Failed(_) => &[],
        }
    }

    pub fn match_count(&self) -> usize {
        self.matches().len()
    }

    pub fn error(&self) -> Option<&FileError> {
        match &self.outcome {
            FileOutcome::Failed(e) => Some(e),
            FileOutcome::Scanned(_) => None,
        }
    }
}

/// Terminal status of a scan job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanStatus {
    Succeeded,
    NoMatches,
    Failed,
    Cancelled,
}

/// Per-file line in a result set's metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub path: PathBuf,
    pub matches: usize,
    /// Artifact the file's block was written to
    pub artifact: String,
}

/// Aggregate outcome of one scan job
#[derive(Debug, Clone)]
pub struct ScanSummary {
    pub status: ScanStatus,
    pub started_at: SystemTime,
    pub elapsed: Duration,
    pub files_processed: u64,
    pub bytes_processed: u64,
    pub total_matches: u64,
    pub files_with_matches: u64,
    pub file_errors: u64,
    /// Artifact file names in the order they were opened
    pub artifacts: Vec<String>,
    /// One entry per file that contributed a block
    pub files: Vec<FileSummary>,
}

impl ScanSummary {
    pub fn has_matches(&self) -> bool {
        self.total_matches > 0
    }
}
