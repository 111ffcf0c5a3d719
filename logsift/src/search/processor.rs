use memchr::{memchr, memchr_iter};
use memmap2::{Mmap, MmapOptions};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::Path;
use tracing::{trace, warn};

use super::context::{decode_line, LineIndex};
use super::matcher::PatternMatcher;
use crate::config::ScanConfig;
use crate::errors::{FileError, SearchResult};
use crate::results::{FileScan, MatchRecord};

/// Scans one file in fixed-size memory-mapped windows.
///
/// Windows are mapped and searched one at a time, so memory use is bounded by
/// the chunk size rather than the file size. A line that crosses a window
/// boundary belongs to the window holding its first byte:
///
/// - the next window skips everything up to and including its first `\n`
/// - a match found in the head of such a line reports the whole line, read on
///   from the file up to its terminator
///
/// Matching itself never looks past the window end. A match whose bytes cross
/// the boundary, or that lies wholly in the skipped tail, is not reported. This
/// is a known limitation; choose a chunk size far larger than any line to make
/// it irrelevant in practice.
#[derive(Debug, Clone)]
pub struct FileProcessor {
    matcher: PatternMatcher,
    chunk_size: u64,
    context_lines: usize,
}

impl FileProcessor {
    pub fn new(matcher: PatternMatcher, chunk_size: u64, context_lines: usize) -> Self {
        Self {
            matcher,
            chunk_size: chunk_size.max(1),
            context_lines,
        }
    }

    /// Builds a processor for a scan request, compiling its pattern
    pub fn from_config(config: &ScanConfig) -> SearchResult<Self> {
        Ok(Self::new(
            PatternMatcher::from_config(config)?,
            config.chunk_size,
            config.context_lines,
        ))
    }

    pub fn matcher(&self) -> &PatternMatcher {
        &self.matcher
    }

    /// Scans `path`. Access failures are returned inside the [`FileScan`], never as `Err`.
    pub fn process_file(&self, path: &Path) -> FileScan {
        trace!("Processing file: {}", path.display());

        match self.scan(path) {
            Ok(scan) => scan,
            Err(e) => {
                let error = FileError::from_io(path, &e);
                warn!("Skipping {}: {}", path.display(), error);
                FileScan::failed(path, error)
            }
        }
    }

    fn scan(&self, path: &Path) -> io::Result<FileScan> {
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if metadata.is_dir() {
            return Err(io::Error::new(io::ErrorKind::Other, "is a directory"));
        }

        let len = metadata.len();
        if len == 0 {
            return Ok(FileScan::scanned(path, 0, Vec::new()));
        }

        let mut matches = Vec::new();
        let mut newlines = 0usize;
        let mut prev_ended_line = true;
        let mut offset = 0u64;

        while offset < len {
            let window_len = self.chunk_size.min(len - offset);
            let window = map_window(&file, offset, window_len)?;
            let window_end = offset + window_len;

            // Skip the tail of a line that began in the previous window
            let skip = if prev_ended_line {
                Some(0)
            } else {
                memchr(b'\n', &window).map(|i| i + 1)
            };

            let mut cursor = 0;
            if let Some(skip) = skip {
                for span in self.matcher.matching_lines(&window, skip) {
                    newlines += memchr_iter(b'\n', &window[cursor..span.start]).count();
                    cursor = span.start;

                    let (line, lossy) = if span.end == window.len() && window_end < len {
                        let mut bytes = window[span.clone()].to_vec();
                        read_line_tail(&file, window_end, &mut bytes)?;
                        decode_line(&bytes)
                    } else {
                        decode_line(&window[span])
                    };
                    matches.push(MatchRecord::new(path, newlines, line, lossy));
                }
            }
            newlines += memchr_iter(b'\n', &window[cursor..]).count();

            prev_ended_line = window.last() == Some(&b'\n');
            offset = window_end;
        }

        if self.context_lines > 0 && !matches.is_empty() {
            self.attach_context(&file, &mut matches)?;
        }

        let lossy = matches.iter().filter(|m| m.lossy).count();
        if lossy > 0 {
            warn!(
                "Invalid UTF-8 replaced in {} matching line(s) of {}",
                lossy,
                path.display()
            );
        }

        Ok(FileScan::scanned(path, len, matches))
    }

    fn attach_context(&self, file: &File, matches: &mut [MatchRecord]) -> io::Result<()> {
        let mmap = unsafe { Mmap::map(file) }?;
        let index = LineIndex::build(&mmap);

        for record in matches.iter_mut() {
            record.context_before = index.before(&mmap, record.line_number, self.context_lines);
            record.context_after = index.after(&mmap, record.line_number, self.context_lines);
        }
        Ok(())
    }
}

fn map_window(file: &File, offset: u64, len: u64) -> io::Result<Mmap> {
    let len = usize::try_from(len)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "chunk too large"))?;
    // Safety: the mapping is read-only and dropped before the next window is mapped
    unsafe { MmapOptions::new().offset(offset).len(len).map(file) }
}

/// Appends the rest of a line that runs past the window end, terminator excluded
fn read_line_tail(file: &File, from: u64, buf: &mut Vec<u8>) -> io::Result<()> {
    let mut handle = file;
    handle.seek(SeekFrom::Start(from))?;
    let mut reader = BufReader::new(handle);
    reader.read_until(b'\n', buf)?;
    if buf.last() == Some(&b'\n') {
        buf.pop();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternMode;
    use std::fs;
    use tempfile::tempdir;

    fn processor(pattern: &str, mode: PatternMode, chunk_size: u64, context: usize) -> FileProcessor {
        FileProcessor::new(PatternMatcher::new(pattern, mode).unwrap(), chunk_size, context)
    }

    fn lines(scan: &FileScan) -> Vec<(usize, String)> {
        scan.matches()
            .iter()
            .map(|m| (m.line_number, m.line.clone()))
            .collect()
    }

    #[test]
    fn test_literal_scan() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "INFO boot\nERROR disk\r\nINFO ok\nERROR net ERROR\n").unwrap();

        let scan = processor("ERROR", PatternMode::Literal, 1024, 0).process_file(&path);
        assert_eq!(
            lines(&scan),
            vec![(1, "ERROR disk".to_string()), (3, "ERROR net ERROR".to_string())]
        );
        assert_eq!(scan.bytes_scanned, fs::metadata(&path).unwrap().len());
    }

    #[test]
    fn test_regex_scan_with_lossy_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, b"ok 1\nfail \xff 2\nok 3\nfail 4".as_slice()).unwrap();

        let scan = processor("^fail", PatternMode::Regex, 1024, 0).process_file(&path);
        let found = scan.matches();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].line_number, 1);
        assert!(found[0].lossy);
        assert_eq!(found[0].line, "fail \u{FFFD} 2");
        assert_eq!(found[1].line_number, 3);
        assert!(!found[1].lossy);
    }

    #[test]
    fn test_context_lines() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        fs::write(&path, "a\nb\nERROR\nc\n").unwrap();

        let scan = processor("ERROR", PatternMode::Literal, 1024, 2).process_file(&path);
        let record = &scan.matches()[0];
        assert_eq!(record.line_number, 2);
        assert_eq!(record.context_before, vec!["a", "b"]);
        assert_eq!(record.context_after, vec!["c"]);
    }

    #[test]
    fn test_empty_and_missing_files() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.log");
        fs::write(&empty, "").unwrap();

        let p = processor("ERROR", PatternMode::Literal, 16, 0);
        let scan = p.process_file(&empty);
        assert!(scan.error().is_none());
        assert_eq!(scan.match_count(), 0);

        let missing = p.process_file(&dir.path().join("missing.log"));
        assert!(matches!(missing.error(), Some(FileError::NotFound(_))));

        let as_dir = p.process_file(dir.path());
        assert!(matches!(as_dir.error(), Some(FileError::IsADirectory(_))));
    }

    #[test]
    fn test_line_numbers_across_windows() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        // 16-byte lines so every window boundary falls on a line start
        let content: String = (0..100).map(|i| format!("ERROR line {:04}\n", i)).collect();
        fs::write(&path, &content).unwrap();

        let whole = processor("ERROR", PatternMode::Literal, 1 << 20, 0).process_file(&path);
        for chunk_size in [16, 32, 48, 160] {
            let chunked =
                processor("ERROR", PatternMode::Literal, chunk_size, 0).process_file(&path);
            assert_eq!(lines(&chunked), lines(&whole), "chunk size {}", chunk_size);
        }
        assert_eq!(whole.match_count(), 100);
        assert_eq!(whole.matches()[99].line_number, 99);
    }

    #[test]
    fn test_line_straddling_boundary_reported_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        // Line 1 starts at byte 11; the first 16-byte window ends inside it
        fs::write(&path, "0123456789\nERROR boundary line\nplain\n").unwrap();

        let scan = processor("ERROR", PatternMode::Literal, 16, 0).process_file(&path);
        assert_eq!(lines(&scan), vec![(1, "ERROR boundary line".to_string())]);

        // Matching only sees the part of the line inside the first window
        let scan = processor("ERROR b", PatternMode::Regex, 16, 0).process_file(&path);
        assert!(scan.matches().is_empty());
    }

    #[test]
    fn test_match_across_boundary_is_missed() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        // "ERROR next" occupies bytes 31..41; window two ends at byte 32
        fs::write(&path, "0123456789\nERROR boundary line\nERROR next\n").unwrap();

        let chunked = processor("ERROR", PatternMode::Literal, 16, 0).process_file(&path);
        assert_eq!(lines(&chunked), vec![(1, "ERROR boundary line".to_string())]);

        let whole = processor("ERROR", PatternMode::Literal, 4096, 0).process_file(&path);
        assert_eq!(
            lines(&whole),
            vec![
                (1, "ERROR boundary line".to_string()),
                (2, "ERROR next".to_string())
            ]
        );
    }

    #[test]
    fn test_window_without_newline_is_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("app.log");
        // Line 0 spans the first three 16-byte windows; its ERROR lies in the skipped tail
        let content = format!("{}ERROR\nOK\nERROR\n", "x".repeat(40));
        fs::write(&path, &content).unwrap();

        let scan = processor("ERROR", PatternMode::Literal, 16, 0).process_file(&path);
        assert_eq!(lines(&scan), vec![(2, "ERROR".to_string())]);

        let whole = processor("ERROR", PatternMode::Literal, 4096, 0).process_file(&path);
        assert_eq!(whole.match_count(), 2);
    }
}
