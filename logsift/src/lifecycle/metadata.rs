use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::{PatternMode, ScanConfig};
use crate::errors::SearchResult;
use crate::results::{FileSummary, ScanSummary};

pub const METADATA_FILE: &str = "metadata.json";

/// Seconds since the Unix epoch, clamped to zero for earlier times
pub fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Writes `data` next to `path` and renames it into place
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> SearchResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// One artifact of a result set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactEntry {
    pub name: String,
    pub size_bytes: u64,
}

/// Counters of the scan that produced a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTotals {
    pub files_processed: u64,
    pub bytes_processed: u64,
    pub total_matches: u64,
    pub files_with_matches: u64,
    pub file_errors: u64,
    pub elapsed_secs: f64,
}

/// Contents of a result set's `metadata.json`.
///
/// `created_at` is recorded when the result set is committed and is the only
/// clock retention looks at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultMetadata {
    pub id: String,
    pub search_parameter: String,
    pub pattern_mode: PatternMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploaded_files: Option<Vec<PathBuf>>,
    /// Unix seconds
    pub created_at: u64,
    pub artifacts: Vec<ArtifactEntry>,
    #[serde(default)]
    pub files: Vec<FileSummary>,
    pub totals: ScanTotals,
}

impl ResultMetadata {
    /// Describes a finished scan whose artifacts sit in `dir`
    pub fn from_scan(
        id: &str,
        config: &ScanConfig,
        summary: &ScanSummary,
        dir: &Path,
        created_at: SystemTime,
    ) -> SearchResult<Self> {
        let artifacts = summary
            .artifacts
            .iter()
            .map(|name| {
                Ok(ArtifactEntry {
                    name: name.clone(),
                    size_bytes: fs::metadata(dir.join(name))?.len(),
                })
            })
            .collect::<SearchResult<Vec<_>>>()?;

        Ok(Self {
            id: id.to_string(),
            search_parameter: config.pattern.clone(),
            pattern_mode: config.pattern_mode,
            directory_path: config.root_path.clone(),
            uploaded_files: config.uploaded_files.clone(),
            created_at: unix_secs(created_at),
            artifacts,
            files: summary.files.clone(),
            totals: ScanTotals {
                files_processed: summary.files_processed,
                bytes_processed: summary.bytes_processed,
                total_matches: summary.total_matches,
                files_with_matches: summary.files_with_matches,
                file_errors: summary.file_errors,
                elapsed_secs: summary.elapsed.as_secs_f64(),
            },
        })
    }

    pub fn file_count(&self) -> usize {
        self.artifacts.len()
    }

    pub fn total_size_bytes(&self) -> u64 {
        self.artifacts.iter().map(|a| a.size_bytes).sum()
    }

    pub fn has_artifact(&self, name: &str) -> bool {
        self.artifacts.iter().any(|a| a.name == name)
    }

    pub fn load(dir: &Path) -> SearchResult<Self> {
        let data = fs::read(dir.join(METADATA_FILE))?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, dir: &Path) -> SearchResult<()> {
        let data = serde_json::to_vec_pretty(self)?;
        write_atomic(&dir.join(METADATA_FILE), &data)
    }
}
