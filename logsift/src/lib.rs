pub mod config;
pub mod errors;
pub mod filters;
pub mod lifecycle;
pub mod metrics;
pub mod report;
pub mod results;
pub mod search;
pub mod service;

pub use config::{LifecycleConfig, PatternMode, ScanConfig, Settings};
pub use errors::{FileError, ResponseStatus, SearchError, SearchResult};
pub use lifecycle::{PackageDownload, ResultStore, Sweeper};
pub use results::{FileScan, MatchRecord, ScanStatus, ScanSummary};
pub use search::{scan, scan_with_cancel, FileProcessor, PatternMatcher};
pub use service::{ScanService, SubmitResponse};
