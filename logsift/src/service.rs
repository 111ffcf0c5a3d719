use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::SystemTime;
use tracing::info;

use crate::config::{LifecycleConfig, ScanConfig};
use crate::errors::{SearchError, SearchResult};
use crate::lifecycle::{
    HealthReport, PackageDownload, ResultInfo, ResultListing, ResultMetadata, ResultStore,
    ScanTotals, SweepReport, Sweeper,
};
use crate::results::ScanStatus;
use crate::search::{scan_with_cancel, PatternMatcher};

/// Returned for an accepted scan that produced a result set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub result_id: String,
    pub status: ScanStatus,
    pub artifacts: Vec<String>,
    pub download_url: String,
    pub info_url: String,
    pub totals: ScanTotals,
}

/// Job submission and retrieval over one result store.
///
/// This is the surface a transport layer calls into. Every failure comes back
/// as a [`SearchError`]; [`SearchError::status`] tells the caller which
/// response code to use.
///
/// ```rust,ignore
/// let service = ScanService::new(LifecycleConfig::with_results_dir("scan_results"))?;
/// let response = service.submit(&ScanConfig::literal("ERROR", "/var/log/app"))?;
/// let mut download = service.download(&response.result_id)?;
/// std::io::copy(&mut download, &mut out)?;
/// download.finish()?;
/// ```
pub struct ScanService {
    store: Arc<ResultStore>,
    sweeper: Option<Sweeper>,
}

impl ScanService {
    /// Opens the result store described by `config`. No sweeper runs until
    /// [`ScanService::start_sweeper`] is called.
    pub fn new(config: LifecycleConfig) -> SearchResult<Self> {
        Ok(Self::with_store(Arc::new(ResultStore::open(config)?)))
    }

    pub fn with_store(store: Arc<ResultStore>) -> Self {
        Self {
            store,
            sweeper: None,
        }
    }

    /// Starts the background retention sweep. Calling it again is a no-op.
    pub fn start_sweeper(&mut self) -> SearchResult<()> {
        if self.sweeper.is_none() {
            self.sweeper = Some(Sweeper::spawn(self.store.clone())?);
        }
        Ok(())
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn submit(&self, config: &ScanConfig) -> SearchResult<SubmitResponse> {
        self.submit_with_cancel(config, &AtomicBool::new(false))
    }

    /// Validates and runs a scan, storing its artifacts as a new result set.
    ///
    /// Input errors are returned before anything is written. A job that ends
    /// without matches, is cancelled, could read none of its files, or fails
    /// while writing leaves no result set behind.
    pub fn submit_with_cancel(
        &self,
        config: &ScanConfig,
        cancel: &AtomicBool,
    ) -> SearchResult<SubmitResponse> {
        config.validate()?;
        PatternMatcher::from_config(config)?;

        let staged = self.store.allocate()?;
        let id = staged.id().to_string();
        let outcome = scan_with_cancel(config, staged.dir(), cancel);

        let status = outcome.as_ref().map_or(ScanStatus::Failed, |s| s.status);
        info!("Scan job {} finished with status {:?}", id, status);

        let summary = outcome?;
        match summary.status {
            ScanStatus::Succeeded => {}
            ScanStatus::NoMatches => return Err(SearchError::NoMatches),
            ScanStatus::Cancelled => return Err(SearchError::Cancelled),
            ScanStatus::Failed => return Err(SearchError::AllFilesFailed(summary.file_errors)),
        }

        let metadata =
            ResultMetadata::from_scan(&id, config, &summary, staged.dir(), SystemTime::now())?;
        self.store.commit(staged, &metadata)?;

        let info = self.store.info(&id)?;
        let prefix = self.store.config().url_prefix.trim_end_matches('/');
        Ok(SubmitResponse {
            info_url: format!("{}/info/{}", prefix, id),
            result_id: id,
            status: summary.status,
            artifacts: summary.artifacts,
            download_url: info.download_url,
            totals: metadata.totals,
        })
    }

    /// Opens the packaged result set; call `finish` on the guard once fully sent
    pub fn download(&self, id: &str) -> SearchResult<PackageDownload<'_>> {
        self.store.open_package(id)
    }

    pub fn artifact(&self, id: &str, name: &str) -> SearchResult<PathBuf> {
        self.store.artifact_path(id, name)
    }

    pub fn info(&self, id: &str) -> SearchResult<ResultInfo> {
        self.store.info(id)
    }

    pub fn list(&self) -> SearchResult<Vec<ResultListing>> {
        self.store.list()
    }

    pub fn health(&self) -> SearchResult<HealthReport> {
        self.store.health()
    }

    pub fn sweep(&self) -> SearchResult<SweepReport> {
        self.store.sweep()
    }

    /// Stops the sweeper, waiting for a running sweep to finish
    pub fn shutdown(mut self) {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ResponseStatus;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_submit_creates_result_set() {
        let logs = tempdir().unwrap();
        let results = tempdir().unwrap();
        fs::write(logs.path().join("app.log"), "ok\nERROR boom\n").unwrap();

        let service = ScanService::new(LifecycleConfig::with_results_dir(results.path())).unwrap();
        let response = service
            .submit(&ScanConfig::literal("ERROR", logs.path()))
            .unwrap();

        assert_eq!(response.status, ScanStatus::Succeeded);
        assert_eq!(response.totals.total_matches, 1);
        assert_eq!(response.download_url, format!("/download/{}", response.result_id));
        assert_eq!(response.info_url, format!("/info/{}", response.result_id));
        assert!(results.path().join(&response.result_id).join("metadata.json").is_file());
        assert_eq!(service.list().unwrap().len(), 1);
    }

    #[test]
    fn test_no_matches_leaves_nothing() {
        let logs = tempdir().unwrap();
        let results = tempdir().unwrap();
        fs::write(logs.path().join("app.log"), "all fine\n").unwrap();

        let service = ScanService::new(LifecycleConfig::with_results_dir(results.path())).unwrap();
        let err = service
            .submit(&ScanConfig::literal("ERROR", logs.path()))
            .unwrap_err();
        assert!(matches!(err, SearchError::NoMatches));
        assert_eq!(err.status(), ResponseStatus::NotFound);

        assert!(service.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(results.path().join(".staging")).unwrap().count(), 0);
    }

    #[test]
    fn test_input_errors_allocate_nothing() {
        let results = tempdir().unwrap();
        let service = ScanService::new(LifecycleConfig::with_results_dir(results.path())).unwrap();

        let err = service
            .submit(&ScanConfig::regex("(", results.path()))
            .unwrap_err();
        assert_eq!(err.status(), ResponseStatus::InvalidInput);
        assert_eq!(fs::read_dir(results.path().join(".staging")).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_unreadable_upload_fails_and_rolls_back() {
        use std::os::unix::fs::PermissionsExt;

        let logs = tempdir().unwrap();
        let results = tempdir().unwrap();
        let locked = logs.path().join("app.log");
        fs::write(&locked, "ERROR\n").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
        if fs::File::open(&locked).is_ok() {
            return;
        }

        let service = ScanService::new(LifecycleConfig::with_results_dir(results.path())).unwrap();
        let config = ScanConfig {
            pattern: "ERROR".to_string(),
            uploaded_files: Some(vec![locked]),
            ..ScanConfig::default()
        };
        let err = service.submit(&config).unwrap_err();
        assert!(matches!(err, SearchError::AllFilesFailed(1)));
        assert_eq!(err.status(), ResponseStatus::Internal);
        assert!(service.list().unwrap().is_empty());
        assert_eq!(fs::read_dir(results.path().join(".staging")).unwrap().count(), 0);
    }

    #[test]
    fn test_cancelled_submit_rolls_back() {
        let logs = tempdir().unwrap();
        let results = tempdir().unwrap();
        fs::write(logs.path().join("app.log"), "ERROR\n").unwrap();

        let service = ScanService::new(LifecycleConfig::with_results_dir(results.path())).unwrap();
        let cancel = AtomicBool::new(true);
        let err = service
            .submit_with_cancel(&ScanConfig::literal("ERROR", logs.path()), &cancel)
            .unwrap_err();
        assert!(matches!(err, SearchError::Cancelled));
        assert!(service.list().unwrap().is_empty());
    }
}
