/// Error types for logsift.
///
/// Errors fall into four groups, and the group decides how far an error travels:
///
/// 1. **Input errors** (missing pattern, bad regex, missing source, empty upload)
///    are raised before any worker starts. No result set is created.
/// 2. **Per-file errors** ([`FileError`]) never escape a job. They are recorded
///    against the file that produced them and the job keeps going.
/// 3. **Aggregation errors** abort the job and roll back its staging directory.
/// 4. **Lifecycle errors** belong to one retrieval request. Deletion failures
///    inside a sweep are logged and retried and never show up here.
///
/// ```rust,ignore
/// match service.submit(&config) {
///     Ok(response) => println!("{}", response.result_id),
///     Err(e) if e.status() == ResponseStatus::InvalidInput => eprintln!("bad request: {e}"),
///     Err(e) => eprintln!("scan failed: {e}"),
/// }
/// ```
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for scan and lifecycle operations
pub type SearchResult<T> = Result<T, SearchError>;

/// Errors that can occur while submitting, running, or retrieving a scan
#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Search pattern is required")]
    MissingPattern,
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
    #[error("Source path does not exist: {0}")]
    SourceNotFound(PathBuf),
    #[error("No files uploaded")]
    EmptyUpload,
    #[error("Either a root path or uploaded files must be provided")]
    MissingSource,
    #[error("Provide a root path or uploaded files, not both")]
    AmbiguousSource,
    #[error("No candidate files found under {0}")]
    NoCandidates(String),
    #[error("Failed to enumerate {path}: {source}")]
    Enumeration {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("No matches found")]
    NoMatches,
    #[error("Scan cancelled")]
    Cancelled,
    #[error("None of the {0} candidate files could be read")]
    AllFilesFailed(u64),
    #[error("Failed to write scan results to {path}: {source}")]
    Aggregation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Results not found or already deleted: {0}")]
    NotFound(String),
    #[error("Failed to build package for {id}: {reason}")]
    Package { id: String, reason: String },
    #[error("Configuration error: {0}")]
    ConfigError(String),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Abstract response codes handed to whatever routing layer sits in front of the service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseStatus {
    InvalidInput,
    NotFound,
    Internal,
}

impl SearchError {
    pub fn invalid_pattern(pattern: impl Into<String>) -> Self {
        Self::InvalidPattern(pattern.into())
    }

    pub fn source_not_found(path: impl Into<PathBuf>) -> Self {
        Self::SourceNotFound(path.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn package(id: impl Into<String>, reason: impl ToString) -> Self {
        Self::Package {
            id: id.into(),
            reason: reason.to_string(),
        }
    }

    pub fn aggregation(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Aggregation {
            path: path.into(),
            source,
        }
    }

    /// True for errors that are raised before any worker starts
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::MissingPattern
                | Self::InvalidPattern(_)
                | Self::SourceNotFound(_)
                | Self::EmptyUpload
                | Self::MissingSource
                | Self::AmbiguousSource
                | Self::NoCandidates(_)
                | Self::ConfigError(_)
        )
    }

    /// Maps the error onto the response code a caller should see
    pub fn status(&self) -> ResponseStatus {
        if self.is_input_error() {
            ResponseStatus::InvalidInput
        } else if matches!(self, Self::NotFound(_) | Self::NoMatches) {
            ResponseStatus::NotFound
        } else {
            ResponseStatus::Internal
        }
    }
}

/// Why a single file could not be scanned. Recorded against the file, never fatal to a job.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FileError {
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Is a directory: {0}")]
    IsADirectory(PathBuf),
    #[error("File not found: {0}")]
    NotFound(PathBuf),
    #[error("{path}: {message}")]
    Io { path: PathBuf, message: String },
}

impl FileError {
    /// Classifies an I/O error raised while opening or mapping `path`
    pub fn from_io(path: &Path, err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(path.to_path_buf()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(path.to_path_buf()),
            _ if path.is_dir() => Self::IsADirectory(path.to_path_buf()),
            _ => Self::Io {
                path: path.to_path_buf(),
                message: err.to_string(),
            },
        }
    }
}
