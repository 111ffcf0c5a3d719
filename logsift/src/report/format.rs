use std::fmt::Write;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::config::PatternMode;
use crate::errors::FileError;
use crate::metrics::CounterSnapshot;
use crate::results::MatchRecord;

const RULE_WIDTH: usize = 80;
const MATCH_RULE_WIDTH: usize = 40;

fn rule(c: char, width: usize) -> String {
    std::iter::repeat(c).take(width).collect()
}

fn timestamp(time: SystemTime) -> String {
    humantime::format_rfc3339_seconds(time).to_string()
}

/// Formats a byte count with 1024-based units and two decimals; TB is the largest unit
pub fn format_size(bytes: f64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", size, UNITS[unit])
}

/// What every artifact's header describes
#[derive(Debug, Clone)]
pub struct ReportHeader {
    pub pattern: String,
    pub mode: PatternMode,
    pub source: String,
    pub started_at: SystemTime,
}

impl ReportHeader {
    pub fn render(&self, part: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "LOG SCAN RESULTS");
        let _ = writeln!(out, "Search Parameter: {}", self.pattern);
        let _ = writeln!(out, "Pattern Mode: {}", self.mode);
        let _ = writeln!(out, "Source: {}", self.source);
        let _ = writeln!(out, "Scan started: {}", timestamp(self.started_at));
        let _ = writeln!(out, "Part: {}", part);
        let _ = writeln!(out, "{}\n", rule('=', RULE_WIDTH));
        out
    }
}

/// Renders one file's matches as a block.
///
/// Without context each match is its line text. With context every match gets
/// a numbered section holding the surrounding lines.
pub fn file_block(path: &Path, matches: &[MatchRecord], with_context: bool) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule('=', RULE_WIDTH));
    let _ = writeln!(out, "MATCHES FROM: {}", path.display());
    let _ = writeln!(out, "{}\n", rule('=', RULE_WIDTH));

    for (idx, record) in matches.iter().enumerate() {
        if with_context {
            write_context_match(&mut out, idx + 1, record);
        } else {
            let _ = writeln!(out, "{}", record.line);
        }
    }

    let _ = writeln!(out, "\nTotal matches in this file: {}\n", matches.len());
    out
}

fn write_context_match(out: &mut String, number: usize, record: &MatchRecord) {
    let _ = writeln!(out, "MATCH #{} (Line {}):", number, record.line_number + 1);
    let _ = writeln!(out, "{}", rule('-', MATCH_RULE_WIDTH));

    if !record.context_before.is_empty() {
        let _ = writeln!(out, "CONTEXT BEFORE:");
        for line in &record.context_before {
            let _ = writeln!(out, "  {}", line);
        }
        out.push('\n');
    }

    let _ = writeln!(out, "MATCHING LINE:");
    let _ = writeln!(out, ">> {}\n", record.line);

    if !record.context_after.is_empty() {
        let _ = writeln!(out, "CONTEXT AFTER:");
        for line in &record.context_after {
            let _ = writeln!(out, "  {}", line);
        }
    }

    let _ = writeln!(out, "\n{}\n", rule('-', RULE_WIDTH));
}

/// Marker for a file that could not be scanned
pub fn error_block(path: &Path, error: &FileError) -> String {
    format!("\nSCAN ERROR: {}: {}\n\n", path.display(), error)
}

/// Summary appended to the final artifact
pub fn footer(stats: &CounterSnapshot, elapsed: Duration, completed_at: SystemTime) -> String {
    let seconds = elapsed.as_secs_f64();
    let throughput = stats.bytes_processed as f64 / seconds.max(1.0);

    let mut out = String::new();
    let _ = writeln!(out, "\n{}", rule('=', RULE_WIDTH));
    let _ = writeln!(out, "SCAN SUMMARY");
    let _ = writeln!(out, "{}\n", rule('=', RULE_WIDTH));
    let _ = writeln!(out, "Total files scanned: {}", stats.files_processed);
    let _ = writeln!(
        out,
        "Total data processed: {}",
        format_size(stats.bytes_processed as f64)
    );
    let _ = writeln!(out, "Total matches found: {}", stats.matches_found);
    let _ = writeln!(out, "Files with matches: {}", stats.files_with_matches);
    let _ = writeln!(out, "File errors: {}", stats.file_errors);
    let _ = writeln!(out, "Elapsed time: {:.2} seconds", seconds);
    let _ = writeln!(out, "Processing speed: {}/second", format_size(throughput));
    let _ = writeln!(out, "Scan completed: {}", timestamp(completed_at));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0.0), "0.00 B");
        assert_eq!(format_size(1023.0), "1023.00 B");
        assert_eq!(format_size(1024.0), "1.00 KB");
        assert_eq!(format_size(1536.0), "1.50 KB");
        assert_eq!(format_size(5.0 * 1024.0 * 1024.0), "5.00 MB");
        assert_eq!(format_size(2048.0 * 1024f64.powi(4)), "2048.00 TB");
    }

    #[test]
    fn test_header() {
        let header = ReportHeader {
            pattern: "ERROR".to_string(),
            mode: PatternMode::Literal,
            source: "/var/log".to_string(),
            started_at: SystemTime::UNIX_EPOCH,
        };
        let text = header.render(2);
        assert!(text.starts_with("LOG SCAN RESULTS\nSearch Parameter: ERROR\n"));
        assert!(text.contains("Pattern Mode: literal\n"));
        assert!(text.contains("Source: /var/log\n"));
        assert!(text.contains("Scan started: 1970-01-01T00:00:00Z\n"));
        assert!(text.contains("Part: 2\n"));
    }

    #[test]
    fn test_plain_block() {
        let path = PathBuf::from("app.log");
        let matches = vec![
            MatchRecord::new(&path, 0, "ERROR one".to_string(), false),
            MatchRecord::new(&path, 7, "ERROR two".to_string(), false),
        ];
        let block = file_block(&path, &matches, false);
        let expected = format!(
            "\n{rule}\nMATCHES FROM: app.log\n{rule}\n\nERROR one\nERROR two\n\nTotal matches in this file: 2\n\n",
            rule = "=".repeat(80)
        );
        assert_eq!(block, expected);
    }

    #[test]
    fn test_context_block() {
        let path = PathBuf::from("app.log");
        let mut record = MatchRecord::new(&path, 4, "ERROR".to_string(), false);
        record.context_before = vec!["before".to_string()];
        record.context_after = vec!["after".to_string()];

        let block = file_block(&path, &[record], true);
        assert!(block.contains("MATCH #1 (Line 5):\n"));
        assert!(block.contains("CONTEXT BEFORE:\n  before\n\n"));
        assert!(block.contains("MATCHING LINE:\n>> ERROR\n\n"));
        assert!(block.contains("CONTEXT AFTER:\n  after\n"));
        assert!(block.ends_with("Total matches in this file: 1\n\n"));
    }

    #[test]
    fn test_footer_floors_elapsed() {
        let stats = CounterSnapshot {
            files_processed: 3,
            bytes_processed: 2048,
            matches_found: 5,
            files_with_matches: 2,
            file_errors: 1,
            lossy_lines: 0,
        };
        let text = footer(&stats, Duration::from_millis(250), SystemTime::UNIX_EPOCH);
        assert!(text.contains("Total files scanned: 3\n"));
        assert!(text.contains("Total data processed: 2.00 KB\n"));
        assert!(text.contains("Total matches found: 5\n"));
        assert!(text.contains("File errors: 1\n"));
        assert!(text.contains("Elapsed time: 0.25 seconds\n"));
        // Sub-second scans report throughput over one second
        assert!(text.contains("Processing speed: 2.00 KB/second\n"));
    }

    #[test]
    fn test_error_block() {
        let path = PathBuf::from("locked.log");
        let block = error_block(&path, &FileError::PermissionDenied(path.clone()));
        assert_eq!(block, "\nSCAN ERROR: locked.log: Permission denied: locked.log\n\n");
    }
}
