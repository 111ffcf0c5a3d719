use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use super::metadata::unix_secs;
use super::ResultStore;
use crate::errors::SearchResult;

/// Turns a result directory into one downloadable file
pub trait Packager: Send + Sync {
    /// File extension of the produced package, without a leading dot
    fn extension(&self) -> &str;

    /// Writes the contents of `source_dir` to `dest`, under the top-level name `root_name`
    fn package(&self, source_dir: &Path, root_name: &str, dest: &Path) -> io::Result<()>;
}

/// Gzip-compressed tar archive
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzPackager;

impl Packager for TarGzPackager {
    fn extension(&self) -> &str {
        "tar.gz"
    }

    fn package(&self, source_dir: &Path, root_name: &str, dest: &Path) -> io::Result<()> {
        let file = File::create(dest)?;
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        builder.append_dir_all(root_name, source_dir)?;
        let file = builder.into_inner()?.finish()?;
        file.sync_all()
    }
}

/// An open package stream.
///
/// While any download of a result set is open, sweeps leave that set alone.
/// Call [`PackageDownload::finish`] once the whole package has been handed
/// off; that queues the set for deletion after the grace delay. Dropping the
/// guard without finishing only releases the stream.
pub struct PackageDownload<'a> {
    store: &'a ResultStore,
    id: String,
    path: PathBuf,
    file: File,
}

impl<'a> PackageDownload<'a> {
    pub(super) fn new(store: &'a ResultStore, id: String, path: PathBuf, file: File) -> Self {
        Self {
            store,
            id,
            path,
            file,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> io::Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Marks the hand-off complete and schedules deferred deletion
    pub fn finish(self) -> SearchResult<()> {
        let eligible_at = unix_secs(SystemTime::now()) + self.store.config().grace_delay.as_secs();
        debug!("Download of {} finished, deletable at {}", self.id, eligible_at);
        self.store.schedule_deletion(&self.id, eligible_at)
    }
}

impl Read for PackageDownload<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Drop for PackageDownload<'_> {
    fn drop(&mut self) {
        self.store.release_stream(&self.id);
    }
}
