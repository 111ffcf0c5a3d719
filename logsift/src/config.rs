use config::{Config as ConfigBuilder, ConfigError, File};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::errors::{SearchError, SearchResult};

/// Configuration for logsift, split into the per-job scan request and the
/// process-wide result lifecycle policy.
///
/// # Configuration Locations
///
/// Settings are layered, later sources overriding earlier ones:
/// 1. Global `$HOME/.config/logsift/config.yaml`
/// 2. Local `.logsift.yaml` in the current directory
/// 3. Custom config file specified via `--config`
///
/// # Configuration Format
///
/// ```yaml
/// scan:
///   pattern: "ERROR"
///   pattern_mode: literal        # literal | regex
///   root_path: "/var/log/app"
///   context_lines: 2
///   chunk_size: 104857600        # bytes per mapped window
///   max_artifact_size: 1048576   # bytes per output artifact
///   file_extensions: [".log", ".1", ".txt"]
///   max_depth: 3
///   follow_symlinks: false
///
/// lifecycle:
///   results_dir: "scan_results"
///   retention: "24h"
///   grace_delay: "10m"
///   sweep_interval: "10m"
///   max_retries: 24
///   url_prefix: "/results"
/// ```
///
/// Command-line arguments take precedence over file values, see
/// [`ScanConfig::merge_with_cli`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl Settings {
    /// Loads settings from the default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Loads settings from the default locations plus an optional explicit file
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = ConfigBuilder::builder();

        let config_files = [
            dirs::config_dir().map(|p| p.join("logsift/config.yaml")),
            Some(PathBuf::from(".logsift.yaml")),
        ];

        for path in config_files.iter().flatten() {
            if path.exists() {
                builder = builder.add_source(File::from(path.as_path()));
            }
        }

        // An explicit file must exist
        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder.build()?.try_deserialize()
    }
}

/// How the search pattern is interpreted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatternMode {
    #[default]
    Literal,
    Regex,
}

impl std::fmt::Display for PatternMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PatternMode::Literal => write!(f, "literal"),
            PatternMode::Regex => write!(f, "regex"),
        }
    }
}

/// Where the files to scan come from
#[derive(Debug, Clone, Copy)]
pub enum ScanSource<'a> {
    /// A server-accessible directory that is walked recursively
    Root(&'a Path),
    /// An already staged set of uploaded files
    Uploaded(&'a [PathBuf]),
}

impl std::fmt::Display for ScanSource<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanSource::Root(path) => write!(f, "{}", path.display()),
            ScanSource::Uploaded(files) => write!(f, "{} uploaded file(s)", files.len()),
        }
    }
}

/// A single scan request. Immutable once a job starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Literal text or regular expression to search for
    #[serde(default)]
    pub pattern: String,

    #[serde(default)]
    pub pattern_mode: PatternMode,

    /// Directory to walk. Mutually exclusive with `uploaded_files`.
    #[serde(default)]
    pub root_path: Option<PathBuf>,

    /// Staged uploaded files. `Some(vec![])` is an empty upload and is rejected.
    #[serde(default)]
    pub uploaded_files: Option<Vec<PathBuf>>,

    /// Lines of context to attach before and after each match
    #[serde(default)]
    pub context_lines: usize,

    /// Size in bytes of each mapped window
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    /// Size cap in bytes for each output artifact
    #[serde(default = "default_max_artifact_size")]
    pub max_artifact_size: u64,

    /// Number of workers. Derived from the candidate count when unset.
    #[serde(default)]
    pub thread_count: Option<NonZeroUsize>,

    /// Extensions to include. Empty means every file is a candidate.
    #[serde(default = "default_file_extensions")]
    pub file_extensions: Vec<String>,

    /// Maximum directory depth below the root. Files directly in the root are depth 0.
    #[serde(default)]
    pub max_depth: Option<usize>,

    #[serde(default)]
    pub min_file_size: Option<u64>,

    #[serde(default)]
    pub max_file_size: Option<u64>,

    #[serde(default)]
    pub follow_symlinks: bool,

    /// Write a visible error block for files that could not be scanned
    #[serde(default = "default_true")]
    pub write_error_blocks: bool,

    /// Draw a progress bar on stderr while scanning
    #[serde(default)]
    pub show_progress: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;
pub const DEFAULT_MAX_ARTIFACT_SIZE: u64 = 1024 * 1024;

fn default_chunk_size() -> u64 {
    DEFAULT_CHUNK_SIZE
}

fn default_max_artifact_size() -> u64 {
    DEFAULT_MAX_ARTIFACT_SIZE
}

fn default_file_extensions() -> Vec<String> {
    vec![".log".to_string(), ".1".to_string(), ".txt".to_string()]
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            pattern: String::new(),
            pattern_mode: PatternMode::default(),
            root_path: None,
            uploaded_files: None,
            context_lines: 0,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_artifact_size: DEFAULT_MAX_ARTIFACT_SIZE,
            thread_count: None,
            file_extensions: default_file_extensions(),
            max_depth: None,
            min_file_size: None,
            max_file_size: None,
            follow_symlinks: false,
            write_error_blocks: true,
            show_progress: false,
            log_level: default_log_level(),
        }
    }
}

impl ScanConfig {
    /// Convenience constructor for a literal search under `root`
    pub fn literal(pattern: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            pattern: pattern.into(),
            root_path: Some(root.into()),
            ..Self::default()
        }
    }

    /// Convenience constructor for a regular-expression search under `root`
    pub fn regex(pattern: impl Into<String>, root: impl Into<PathBuf>) -> Self {
        Self {
            pattern_mode: PatternMode::Regex,
            ..Self::literal(pattern, root)
        }
    }

    /// Returns the single source this request scans
    pub fn source(&self) -> SearchResult<ScanSource<'_>> {
        match (&self.root_path, &self.uploaded_files) {
            (Some(_), Some(_)) => Err(SearchError::AmbiguousSource),
            (Some(root), None) => Ok(ScanSource::Root(root)),
            (None, Some(files)) => Ok(ScanSource::Uploaded(files)),
            (None, None) => Err(SearchError::MissingSource),
        }
    }

    /// Checks everything that can be rejected before a worker starts,
    /// except pattern compilation which is done by [`crate::search::PatternMatcher`].
    pub fn validate(&self) -> SearchResult<()> {
        if self.pattern.is_empty() {
            return Err(SearchError::MissingPattern);
        }
        if self.chunk_size == 0 {
            return Err(SearchError::config_error(
                "chunk_size must be greater than zero",
            ));
        }
        if self.max_artifact_size == 0 {
            return Err(SearchError::config_error(
                "max_artifact_size must be greater than zero",
            ));
        }
        if let (Some(min), Some(max)) = (self.min_file_size, self.max_file_size) {
            if min > max {
                return Err(SearchError::config_error(format!(
                    "min_file_size ({}) exceeds max_file_size ({})",
                    min, max
                )));
            }
        }

        match self.source()? {
            ScanSource::Root(root) if !root.exists() => Err(SearchError::source_not_found(root)),
            ScanSource::Uploaded([]) => Err(SearchError::EmptyUpload),
            _ => Ok(()),
        }
    }

    /// Merges CLI arguments with configuration file values
    pub fn merge_with_cli(mut self, cli_config: ScanConfig) -> Self {
        // CLI values take precedence over config file values
        if !cli_config.pattern.is_empty() {
            self.pattern = cli_config.pattern;
        }
        if cli_config.pattern_mode != PatternMode::Literal {
            self.pattern_mode = cli_config.pattern_mode;
        }
        if cli_config.root_path.is_some() || cli_config.uploaded_files.is_some() {
            self.root_path = cli_config.root_path;
            self.uploaded_files = cli_config.uploaded_files;
        }
        if cli_config.context_lines > 0 {
            self.context_lines = cli_config.context_lines;
        }
        if cli_config.chunk_size != DEFAULT_CHUNK_SIZE {
            self.chunk_size = cli_config.chunk_size;
        }
        if cli_config.max_artifact_size != DEFAULT_MAX_ARTIFACT_SIZE {
            self.max_artifact_size = cli_config.max_artifact_size;
        }
        if cli_config.thread_count.is_some() {
            self.thread_count = cli_config.thread_count;
        }
        if cli_config.file_extensions != default_file_extensions() {
            self.file_extensions = cli_config.file_extensions;
        }
        if cli_config.max_depth.is_some() {
            self.max_depth = cli_config.max_depth;
        }
        if cli_config.min_file_size.is_some() {
            self.min_file_size = cli_config.min_file_size;
        }
        if cli_config.max_file_size.is_some() {
            self.max_file_size = cli_config.max_file_size;
        }
        if cli_config.follow_symlinks {
            self.follow_symlinks = true;
        }
        if !cli_config.write_error_blocks {
            self.write_error_blocks = false;
        }
        if cli_config.show_progress {
            self.show_progress = true;
        }
        if cli_config.log_level != default_log_level() {
            self.log_level = cli_config.log_level;
        }
        self
    }
}

/// Retention and deferred-deletion policy for persisted result sets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Directory holding one subdirectory per result set plus the deletion ledger
    #[serde(default = "default_results_dir")]
    pub results_dir: PathBuf,

    /// Age after which a result set is queued for deletion
    #[serde(default = "default_retention", with = "duration_str")]
    pub retention: Duration,

    /// Delay between a completed download and deletion, for slow readers
    #[serde(default = "default_grace_delay", with = "duration_str")]
    pub grace_delay: Duration,

    /// How often the background sweep runs
    #[serde(default = "default_sweep_interval", with = "duration_str")]
    pub sweep_interval: Duration,

    /// Failed deletion attempts tolerated before an entry is abandoned
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Prefix prepended to retrieval URLs
    #[serde(default)]
    pub url_prefix: String,
}

fn default_results_dir() -> PathBuf {
    PathBuf::from("scan_results")
}

fn default_retention() -> Duration {
    Duration::from_secs(24 * 60 * 60)
}

fn default_grace_delay() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(10 * 60)
}

fn default_max_retries() -> u32 {
    24
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            results_dir: default_results_dir(),
            retention: default_retention(),
            grace_delay: default_grace_delay(),
            sweep_interval: default_sweep_interval(),
            max_retries: default_max_retries(),
            url_prefix: String::new(),
        }
    }
}

impl LifecycleConfig {
    /// Default policy rooted at `results_dir`
    pub fn with_results_dir(results_dir: impl Into<PathBuf>) -> Self {
        Self {
            results_dir: results_dir.into(),
            ..Self::default()
        }
    }
}

/// Durations are written as humantime strings such as "10m" or "24h"
mod duration_str {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
