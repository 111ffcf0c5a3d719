/// Candidate-file filtering for the enumerator.
///
/// These are free functions rather than a trait: every rule is a pure check on a
/// path or its metadata, and the enumerator applies them in a fixed order
/// (extension first because it needs no syscall, then file type, then size).
use std::fs::Metadata;
use std::path::Path;

/// Normalizes an allow-list entry to a lowercase extension without the leading dot
fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

/// Checks if a file name matches the extension allow-list.
///
/// An empty list allows everything. Rotated logs carry a numeric suffix after
/// their real extension, so `app.log.1` matches `.log` as well as `.1`.
pub fn has_valid_extension(path: &Path, extensions: &[String]) -> bool {
    if extensions.is_empty() {
        return true;
    }

    let allowed: Vec<String> = extensions.iter().map(|e| normalize_extension(e)).collect();
    let matches = |ext: &std::ffi::OsStr| {
        ext.to_str()
            .map(|s| allowed.iter().any(|a| a.eq_ignore_ascii_case(s)))
            .unwrap_or(false)
    };

    let Some(ext) = path.extension() else {
        return false;
    };
    if matches(ext) {
        return true;
    }

    let is_numeric = ext
        .to_str()
        .is_some_and(|s| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()));
    if !is_numeric {
        return false;
    }

    // app.log.1 -> look at the extension of "app.log"
    path.file_stem()
        .map(Path::new)
        .and_then(Path::extension)
        .is_some_and(matches)
}

/// Checks a file size against optional inclusive bounds
pub fn within_size_bounds(size: u64, min: Option<u64>, max: Option<u64>) -> bool {
    min.map_or(true, |min| size >= min) && max.map_or(true, |max| size <= max)
}

/// Determines if a file should be scanned.
///
/// Size bounds are only consulted when set; a file whose metadata cannot be
/// read is skipped in that case rather than failing the walk.
pub fn should_include_file(
    path: &Path,
    metadata: Option<&Metadata>,
    extensions: &[String],
    min_size: Option<u64>,
    max_size: Option<u64>,
) -> bool {
    if !has_valid_extension(path, extensions) {
        return false;
    }

    let Some(metadata) = metadata else {
        return false;
    };
    if !metadata.is_file() {
        return false;
    }

    if min_size.is_none() && max_size.is_none() {
        return true;
    }
    within_size_bounds(metadata.len(), min_size, max_size)
}
