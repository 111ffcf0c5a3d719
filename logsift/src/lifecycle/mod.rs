/// Persistence and retention of scan results.
///
/// Every successful scan becomes a result set: a directory named by a fresh
/// UUIDv4 under `results_dir`, holding the artifacts and a `metadata.json`.
///
/// # Lifecycle
///
/// ```text
/// staged ──commit──> created ──package──> packaged ──finish/retention──> pending deletion
///                                                                          │
///                                                       sweep ──> deleted | abandoned
/// ```
///
/// - A job writes into `.staging/<id>` and the directory is renamed into place
///   only once complete, so listings and sweeps never see a partial result set.
/// - The downloadable package is built on first request and reused afterwards.
/// - A finished download queues the set for deletion after `grace_delay`.
///   Sets older than `retention` are queued by the sweep itself.
/// - The sweep deletes due entries; failures are retried on later sweeps and
///   given up after `max_retries`.
///
/// The pending-deletion ledger is written to `pending_deletions.json` after
/// every change, so a restarted process picks up where the last one stopped.
pub mod ledger;
pub mod metadata;
pub mod package;
pub mod sweeper;

pub use ledger::{DeletionLedger, PendingDeletion, LEDGER_FILE};
pub use metadata::{unix_secs, ArtifactEntry, ResultMetadata, ScanTotals, METADATA_FILE};
pub use package::{PackageDownload, Packager, TarGzPackager};
pub use sweeper::Sweeper;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::LifecycleConfig;
use crate::errors::{SearchError, SearchResult};

const STAGING_DIR: &str = ".staging";
const PARTIAL_EXTENSION: &str = "partial";

/// A result directory being written by a running job.
///
/// Removed on drop unless committed, so a failed or cancelled job leaves nothing behind.
#[derive(Debug)]
pub struct StagedResult {
    id: String,
    dir: PathBuf,
    committed: bool,
}

impl StagedResult {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for StagedResult {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        debug!("Rolling back staged result {}", self.id);
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove staging directory {}: {}", self.dir.display(), e);
            }
        }
    }
}

/// Metadata plus retrieval URLs for one result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultInfo {
    #[serde(flatten)]
    pub metadata: ResultMetadata,
    pub file_count: usize,
    pub total_size_bytes: u64,
    pub download_url: String,
    pub artifact_urls: Vec<String>,
}

/// One entry of [`ResultStore::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultListing {
    pub id: String,
    /// Absent when the directory has no readable metadata
    pub created_at: Option<u64>,
    pub search_parameter: Option<String>,
    pub file_count: usize,
    pub total_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub results_dir: PathBuf,
    pub result_sets: usize,
    pub pending_deletions: usize,
    pub active_downloads: usize,
}

/// What one sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Result sets queued because they outlived the retention period
    pub expired: usize,
    pub deleted: usize,
    /// Failed deletions that stay queued for another attempt
    pub retried: usize,
    /// Entries dropped after too many failed attempts
    pub abandoned: usize,
    /// Due entries left alone because a download is open
    pub skipped_active: usize,
    /// Staging directories and partial packages of jobs that never finished
    pub stale_removed: usize,
}

/// Owns `results_dir`: allocation, packaging, lookup, and deletion of result sets
pub struct ResultStore {
    config: LifecycleConfig,
    packager: Box<dyn Packager>,
    ledger: Mutex<DeletionLedger>,
    active: DashMap<String, usize>,
    packaging: Mutex<()>,
}

impl ResultStore {
    /// Opens (creating if needed) the results directory with the tar.gz packager
    pub fn open(config: LifecycleConfig) -> SearchResult<Self> {
        Self::with_packager(config, Box::new(TarGzPackager))
    }

    pub fn with_packager(config: LifecycleConfig, packager: Box<dyn Packager>) -> SearchResult<Self> {
        fs::create_dir_all(config.results_dir.join(STAGING_DIR))?;
        let ledger = DeletionLedger::load_from(&config.results_dir.join(LEDGER_FILE));
        debug!(
            "Opened result store at {} with {} pending deletions",
            config.results_dir.display(),
            ledger.len()
        );

        let store = Self {
            config,
            packager,
            ledger: Mutex::new(ledger),
            active: DashMap::new(),
            packaging: Mutex::new(()),
        };
        store.clear_stale_work(SystemTime::now());
        Ok(store)
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    pub fn results_dir(&self) -> &Path {
        &self.config.results_dir
    }

    fn ledger_path(&self) -> PathBuf {
        self.config.results_dir.join(LEDGER_FILE)
    }

    fn lock_ledger(&self) -> MutexGuard<'_, DeletionLedger> {
        self.ledger.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_packaging(&self) -> MutexGuard<'_, ()> {
        self.packaging.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes staging directories and `.partial` packages older than
    /// `retention`. A killed process never runs [`StagedResult`]'s rollback,
    /// so its leftovers are only reclaimed here.
    fn clear_stale_work(&self, now: SystemTime) -> usize {
        let mut leftovers: Vec<PathBuf> = Vec::new();
        if let Ok(entries) = fs::read_dir(self.config.results_dir.join(STAGING_DIR)) {
            leftovers.extend(entries.flatten().map(|entry| entry.path()));
        }
        if let Ok(entries) = fs::read_dir(&self.config.results_dir) {
            leftovers.extend(
                entries
                    .flatten()
                    .map(|entry| entry.path())
                    .filter(|path| path.extension() == Some(OsStr::new(PARTIAL_EXTENSION))),
            );
        }

        let mut removed = 0;
        for path in leftovers {
            let Ok(modified) = fs::symlink_metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };
            if now.duration_since(modified).unwrap_or_default() < self.config.retention {
                continue;
            }

            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => {
                    debug!("Removed unfinished job output {}", path.display());
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        removed
    }

    /// Reserves a new id and its staging directory
    pub fn allocate(&self) -> SearchResult<StagedResult> {
        let id = Uuid::new_v4().to_string();
        if self.config.results_dir.join(&id).exists() {
            return Err(SearchError::IoError(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("result id {} already in use", id),
            )));
        }

        let dir = self.config.results_dir.join(STAGING_DIR).join(&id);
        fs::create_dir(&dir)?;
        Ok(StagedResult {
            id,
            dir,
            committed: false,
        })
    }

    /// Writes `metadata` into the staged directory and moves it into place
    pub fn commit(&self, mut staged: StagedResult, metadata: &ResultMetadata) -> SearchResult<PathBuf> {
        metadata.save(&staged.dir)?;

        let target = self.config.results_dir.join(&staged.id);
        if target.exists() {
            return Err(SearchError::IoError(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("result directory {} already exists", target.display()),
            )));
        }
        fs::rename(&staged.dir, &target)?;
        staged.committed = true;

        info!("Stored result set {} ({} artifacts)", staged.id, metadata.file_count());
        Ok(target)
    }

    /// Directory of a live result set
    pub fn result_dir(&self, id: &str) -> SearchResult<PathBuf> {
        Uuid::parse_str(id).map_err(|_| SearchError::not_found(id))?;
        let dir = self.config.results_dir.join(id);
        if dir.is_dir() {
            Ok(dir)
        } else {
            Err(SearchError::not_found(id))
        }
    }

    pub fn metadata(&self, id: &str) -> SearchResult<ResultMetadata> {
        let dir = self.result_dir(id)?;
        ResultMetadata::load(&dir).map_err(|e| match e {
            SearchError::IoError(ref err) if err.kind() == io::ErrorKind::NotFound => {
                SearchError::not_found(id)
            }
            other => other,
        })
    }

    fn package_path(&self, id: &str) -> PathBuf {
        self.config
            .results_dir
            .join(format!("{}.{}", id, self.packager.extension()))
    }

    /// Returns the package for `id`, building it on the first call
    pub fn package(&self, id: &str) -> SearchResult<PathBuf> {
        // Checked under the lock so a sweep cannot delete the set mid-build
        let _building = self.lock_packaging();
        let dir = self.result_dir(id)?;
        let path = self.package_path(id);

        if path.is_file() {
            debug!("Reusing package {}", path.display());
            return Ok(path);
        }

        let tmp_path = self.config.results_dir.join(format!("{}.{}", id, PARTIAL_EXTENSION));
        if let Err(e) = self.packager.package(&dir, id, &tmp_path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(SearchError::package(id, e));
        }
        fs::rename(&tmp_path, &path).map_err(|e| SearchError::package(id, e))?;

        info!("Built package {}", path.display());
        Ok(path)
    }

    /// Opens the package for streaming; see [`PackageDownload`]
    pub fn open_package(&self, id: &str) -> SearchResult<PackageDownload<'_>> {
        let path = self.package(id)?;

        // Holding the ledger lock keeps a sweep from deleting between the check and the open
        let _ledger = self.lock_ledger();
        if !self.config.results_dir.join(id).is_dir() || !path.is_file() {
            return Err(SearchError::not_found(id));
        }
        let file = File::open(&path)?;
        *self.active.entry(id.to_string()).or_insert(0) += 1;

        Ok(PackageDownload::new(self, id.to_string(), path, file))
    }

    pub(crate) fn release_stream(&self, id: &str) {
        if let Some(mut count) = self.active.get_mut(id) {
            *count = count.saturating_sub(1);
        }
        self.active.remove_if(id, |_, count| *count == 0);
    }

    /// Number of open downloads for `id`
    pub fn active_streams(&self, id: &str) -> usize {
        self.active.get(id).map_or(0, |count| *count)
    }

    /// Resolves one file of a result set by name.
    ///
    /// Names are plain file names; anything that could leave the result
    /// directory is reported as not found.
    pub fn artifact_path(&self, id: &str, name: &str) -> SearchResult<PathBuf> {
        let not_found = || SearchError::not_found(format!("{}/{}", id, name));
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(not_found());
        }

        let path = self.result_dir(id)?.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(not_found())
        }
    }

    /// Metadata plus retrieval URLs. Repeated calls return the same value.
    pub fn info(&self, id: &str) -> SearchResult<ResultInfo> {
        let metadata = self.metadata(id)?;
        let prefix = self.config.url_prefix.trim_end_matches('/');

        Ok(ResultInfo {
            file_count: metadata.file_count(),
            total_size_bytes: metadata.total_size_bytes(),
            download_url: format!("{}/download/{}", prefix, id),
            artifact_urls: metadata
                .artifacts
                .iter()
                .map(|a| format!("{}/download/{}/{}", prefix, id, a.name))
                .collect(),
            metadata,
        })
    }

    /// Every live result set, oldest first
    pub fn list(&self) -> SearchResult<Vec<ResultListing>> {
        let mut listings = Vec::new();

        for entry in fs::read_dir(&self.config.results_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(id) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if Uuid::parse_str(&id).is_err() {
                continue;
            }

            let listing = match ResultMetadata::load(&entry.path()) {
                Ok(metadata) => ResultListing {
                    created_at: Some(metadata.created_at),
                    search_parameter: Some(metadata.search_parameter.clone()),
                    file_count: metadata.file_count(),
                    total_size_bytes: metadata.total_size_bytes(),
                    id,
                },
                Err(e) => {
                    debug!("No readable metadata for {}: {}", id, e);
                    ResultListing {
                        id,
                        created_at: None,
                        search_parameter: None,
                        file_count: 0,
                        total_size_bytes: 0,
                    }
                }
            };
            listings.push(listing);
        }

        listings.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(listings)
    }

    pub fn health(&self) -> SearchResult<HealthReport> {
        let available = self.config.results_dir.is_dir();
        let result_sets = if available { self.list()?.len() } else { 0 };

        Ok(HealthReport {
            status: if available { "healthy" } else { "unavailable" }.to_string(),
            results_dir: self.config.results_dir.clone(),
            result_sets,
            pending_deletions: self.lock_ledger().len(),
            active_downloads: self.active.iter().map(|entry| *entry.value()).sum(),
        })
    }

    fn pending_entry(&self, id: &str, eligible_at: u64) -> PendingDeletion {
        PendingDeletion {
            result_dir: self.config.results_dir.join(id),
            package_path: Some(self.package_path(id)),
            eligible_at,
            retry_count: 0,
        }
    }

    /// Queues `id` for deletion at `eligible_at` (Unix seconds)
    pub fn schedule_deletion(&self, id: &str, eligible_at: u64) -> SearchResult<()> {
        let mut ledger = self.lock_ledger();
        if ledger.schedule(id, self.pending_entry(id, eligible_at)) {
            ledger.save_to(&self.ledger_path())?;
        }
        Ok(())
    }

    pub fn sweep(&self) -> SearchResult<SweepReport> {
        self.sweep_at(SystemTime::now())
    }

    /// Runs one retention and deletion pass as of `now`.
    ///
    /// Holds the packaging lock throughout, so no package is built for a set
    /// while it is being deleted.
    pub fn sweep_at(&self, now: SystemTime) -> SearchResult<SweepReport> {
        let _packaging = self.lock_packaging();
        let mut report = SweepReport {
            stale_removed: self.clear_stale_work(now),
            ..SweepReport::default()
        };

        let now = unix_secs(now);
        let retention = self.config.retention.as_secs();
        let mut ledger = self.lock_ledger();

        for listing in self.list()? {
            let Some(created_at) = listing.created_at else {
                continue;
            };
            if now.saturating_sub(created_at) >= retention
                && ledger.schedule(&listing.id, self.pending_entry(&listing.id, now))
            {
                debug!("Result set {} passed retention", listing.id);
                report.expired += 1;
            }
        }

        for id in ledger.due(now) {
            if self.active_streams(&id) > 0 {
                debug!("Result set {} has an open download, deferring deletion", id);
                report.skipped_active += 1;
                continue;
            }
            let Some(entry) = ledger.get(&id).cloned() else {
                continue;
            };

            match delete_entry(&entry) {
                Ok(()) => {
                    ledger.remove(&id);
                    info!("Deleted result set {}", id);
                    report.deleted += 1;
                }
                Err(e) => {
                    let retries = ledger.get_mut(&id).map_or(0, |entry| {
                        entry.retry_count += 1;
                        entry.retry_count
                    });
                    if retries > self.config.max_retries {
                        ledger.remove(&id);
                        error!(
                            "Giving up on deleting result set {} after {} attempts: {}",
                            id, retries, e
                        );
                        report.abandoned += 1;
                    } else {
                        warn!("Failed to delete result set {} (attempt {}): {}", id, retries, e);
                        report.retried += 1;
                    }
                }
            }
        }

        ledger.save_to(&self.ledger_path())?;
        Ok(report)
    }
}

fn delete_entry(entry: &PendingDeletion) -> io::Result<()> {
    let ignore_missing = |result: io::Result<()>| match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    };

    ignore_missing(fs::remove_dir_all(&entry.result_dir))?;
    if let Some(package) = &entry.package_path {
        ignore_missing(fs::remove_file(package))?;
    }
    Ok(())
}
