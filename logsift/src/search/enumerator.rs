use ignore::WalkBuilder;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

use crate::config::{ScanConfig, ScanSource};
use crate::errors::{SearchError, SearchResult};
use crate::filters::should_include_file;

/// Collects the files a request should scan, sorted by path.
///
/// Fails with [`SearchError::NoCandidates`] when nothing passes the filters, so
/// a job never starts without work.
pub fn collect_candidates(config: &ScanConfig) -> SearchResult<Vec<PathBuf>> {
    let source = config.source()?;
    let mut files = match source {
        ScanSource::Root(root) => walk_root(root, config)?,
        ScanSource::Uploaded(uploaded) => filter_uploaded(uploaded, config),
    };

    if files.is_empty() {
        return Err(SearchError::NoCandidates(source.to_string()));
    }

    files.sort();
    files.dedup();
    debug!("Found {} candidate files in {}", files.len(), source);
    Ok(files)
}

/// Walks `root` recursively.
///
/// Hidden files and ignore files are not consulted: rotated and archived logs
/// are often dot-prefixed or git-ignored and must still be scanned. Errors below
/// the root are logged and skipped; only an unreadable root is fatal.
fn walk_root(root: &Path, config: &ScanConfig) -> SearchResult<Vec<PathBuf>> {
    let metadata = fs::metadata(root).map_err(|e| enumeration_error(root, e))?;
    if metadata.is_file() {
        return Ok(filter_uploaded(&[root.to_path_buf()], config));
    }
    fs::read_dir(root).map_err(|e| enumeration_error(root, e))?;

    let mut walker = WalkBuilder::new(root);
    walker
        .standard_filters(false)
        .follow_links(config.follow_symlinks)
        // Files directly in the root sit at walker depth 1
        .max_depth(config.max_depth.map(|depth| depth + 1));

    let mut files = Vec::new();
    for entry in walker.build() {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };

        if !entry.file_type().is_some_and(|ft| ft.is_file()) {
            continue;
        }

        let path = entry.path();
        let metadata = entry.metadata().ok();
        if should_include_file(
            path,
            metadata.as_ref(),
            &config.file_extensions,
            config.min_file_size,
            config.max_file_size,
        ) {
            files.push(entry.into_path());
        } else {
            trace!("Filtered out: {}", path.display());
        }
    }

    Ok(files)
}

/// Applies the extension, type, and size rules to an already staged file list
fn filter_uploaded(uploaded: &[PathBuf], config: &ScanConfig) -> Vec<PathBuf> {
    uploaded
        .iter()
        .filter(|path| {
            let metadata = fs::metadata(path).ok();
            let keep = should_include_file(
                path,
                metadata.as_ref(),
                &config.file_extensions,
                config.min_file_size,
                config.max_file_size,
            );
            if !keep {
                trace!("Filtered out: {}", path.display());
            }
            keep
        })
        .cloned()
        .collect()
}

fn enumeration_error(path: &Path, source: std::io::Error) -> SearchError {
    SearchError::Enumeration {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn names(files: &[PathBuf], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/"))
            .collect()
    }

    fn setup() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b/c")).unwrap();
        fs::write(root.join("top.log"), "x").unwrap();
        fs::write(root.join("top.json"), "x").unwrap();
        fs::write(root.join("app.log.1"), "x").unwrap();
        fs::write(root.join(".hidden.log"), "x").unwrap();
        fs::write(root.join("a/one.txt"), "x").unwrap();
        fs::write(root.join("a/b/two.log"), "xx").unwrap();
        fs::write(root.join("a/b/c/three.log"), "xxx").unwrap();
        dir
    }

    #[test]
    fn test_walk_with_default_extensions() {
        let dir = setup();
        let config = ScanConfig::literal("x", dir.path());
        let files = collect_candidates(&config).unwrap();
        assert_eq!(
            names(&files, dir.path()),
            vec![
                ".hidden.log",
                "a/b/c/three.log",
                "a/b/two.log",
                "a/one.txt",
                "app.log.1",
                "top.log"
            ]
        );
    }

    #[test]
    fn test_max_depth() {
        let dir = setup();
        let config = ScanConfig {
            max_depth: Some(0),
            ..ScanConfig::literal("x", dir.path())
        };
        let files = collect_candidates(&config).unwrap();
        assert_eq!(
            names(&files, dir.path()),
            vec![".hidden.log", "app.log.1", "top.log"]
        );

        let config = ScanConfig {
            max_depth: Some(1),
            ..ScanConfig::literal("x", dir.path())
        };
        let files = collect_candidates(&config).unwrap();
        assert!(names(&files, dir.path()).contains(&"a/one.txt".to_string()));
        assert!(!names(&files, dir.path()).contains(&"a/b/two.log".to_string()));
    }

    #[test]
    fn test_size_bounds_and_empty_extension_list() {
        let dir = setup();
        let config = ScanConfig {
            file_extensions: vec![],
            min_file_size: Some(2),
            ..ScanConfig::literal("x", dir.path())
        };
        let files = collect_candidates(&config).unwrap();
        assert_eq!(
            names(&files, dir.path()),
            vec!["a/b/c/three.log", "a/b/two.log"]
        );
    }

    #[test]
    fn test_uploaded_files_filtered() {
        let dir = setup();
        let config = ScanConfig {
            pattern: "x".to_string(),
            uploaded_files: Some(vec![
                dir.path().join("top.json"),
                dir.path().join("top.log"),
                dir.path().join("missing.log"),
                dir.path().join("a"),
            ]),
            ..ScanConfig::default()
        };
        let files = collect_candidates(&config).unwrap();
        assert_eq!(names(&files, dir.path()), vec!["top.log"]);
    }

    #[test]
    fn test_no_candidates_and_missing_root() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("data.csv"), "x").unwrap();

        let config = ScanConfig::literal("x", dir.path());
        assert!(matches!(
            collect_candidates(&config),
            Err(SearchError::NoCandidates(_))
        ));

        let config = ScanConfig::literal("x", dir.path().join("missing"));
        assert!(matches!(
            collect_candidates(&config),
            Err(SearchError::Enumeration { .. })
        ));
    }
}
