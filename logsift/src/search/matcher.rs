use dashmap::DashMap;
use memchr::memmem::Finder;
use memchr::{memchr, memchr_iter, memrchr};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use std::ops::Range;
use std::sync::Arc;
use tracing::debug;

use crate::config::{PatternMode, ScanConfig};
use crate::errors::{SearchError, SearchResult};

/// Compiled regexes keyed by source text; a long-running service sees the same patterns repeatedly
static PATTERN_CACHE: Lazy<DashMap<String, Arc<Regex>>> = Lazy::new(DashMap::new);

/// Strategy for locating matching lines
#[derive(Debug, Clone)]
pub enum MatchStrategy {
    Literal(Finder<'static>),
    Regex(Arc<Regex>),
}

/// Finds the lines of a byte window that match one pattern
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    pattern: String,
    strategy: MatchStrategy,
}

impl PatternMatcher {
    /// Compiles `pattern` for the given mode.
    ///
    /// Fails with [`SearchError::InvalidPattern`] for a bad regex or a literal
    /// containing a line terminator, which could never match a single line.
    pub fn new(pattern: &str, mode: PatternMode) -> SearchResult<Self> {
        if pattern.is_empty() {
            return Err(SearchError::MissingPattern);
        }

        let strategy = match mode {
            PatternMode::Literal => {
                if pattern.contains('\n') {
                    return Err(SearchError::invalid_pattern(
                        "literal pattern cannot contain a line break",
                    ));
                }
                MatchStrategy::Literal(Finder::new(pattern.as_bytes()).into_owned())
            }
            PatternMode::Regex => MatchStrategy::Regex(Self::compile(pattern)?),
        };

        Ok(Self {
            pattern: pattern.to_string(),
            strategy,
        })
    }

    /// Builds the matcher a scan request asks for
    pub fn from_config(config: &ScanConfig) -> SearchResult<Self> {
        Self::new(&config.pattern, config.pattern_mode)
    }

    fn compile(pattern: &str) -> SearchResult<Arc<Regex>> {
        if let Some(entry) = PATTERN_CACHE.get(pattern) {
            return Ok(entry.clone());
        }

        debug!("Compiling regex pattern: {}", pattern);
        let regex = Arc::new(
            Regex::new(pattern).map_err(|e| SearchError::invalid_pattern(e.to_string()))?,
        );
        PATTERN_CACHE.insert(pattern.to_string(), regex.clone());
        Ok(regex)
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn mode(&self) -> PatternMode {
        match self.strategy {
            MatchStrategy::Literal(_) => PatternMode::Literal,
            MatchStrategy::Regex(_) => PatternMode::Regex,
        }
    }

    /// Returns the byte range (terminator excluded) of every matching line in
    /// `window[from..]`, in order, each line at most once.
    ///
    /// Lines are bounded by `\n`, by `from`, and by the end of the window; a line
    /// cut by the window end is reported by the part that lies inside the window.
    pub fn matching_lines(&self, window: &[u8], from: usize) -> Vec<Range<usize>> {
        if from >= window.len() {
            return Vec::new();
        }
        match &self.strategy {
            MatchStrategy::Literal(finder) => literal_lines(finder, window, from),
            MatchStrategy::Regex(regex) => regex_lines(regex, window, from),
        }
    }
}

/// Jumps from occurrence to occurrence, expanding each one to its enclosing line
fn literal_lines(finder: &Finder<'_>, window: &[u8], from: usize) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut pos = from;

    while pos < window.len() {
        let Some(offset) = finder.find(&window[pos..]) else {
            break;
        };
        let found = pos + offset;

        let line_start = memrchr(b'\n', &window[from..found]).map_or(from, |i| from + i + 1);
        let line_end = memchr(b'\n', &window[found..]).map_or(window.len(), |i| found + i);
        lines.push(line_start..line_end);

        // Resume on the next line so a line with several hits is reported once
        pos = line_end + 1;
    }

    lines
}

/// Splits the window into lines and tests each one
fn regex_lines(regex: &Regex, window: &[u8], from: usize) -> Vec<Range<usize>> {
    let mut lines = Vec::new();
    let mut line_start = from;

    for nl in memchr_iter(b'\n', &window[from..]).map(|i| from + i) {
        if regex.is_match(&window[line_start..nl]) {
            lines.push(line_start..nl);
        }
        line_start = nl + 1;
    }
    if line_start < window.len() && regex.is_match(&window[line_start..]) {
        lines.push(line_start..window.len());
    }

    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts<'a>(window: &'a [u8], ranges: &[Range<usize>]) -> Vec<&'a str> {
        ranges
            .iter()
            .map(|r| std::str::from_utf8(&window[r.clone()]).unwrap())
            .collect()
    }

    #[test]
    fn test_literal_matching_lines() {
        let matcher = PatternMatcher::new("ERROR", PatternMode::Literal).unwrap();
        let window = b"INFO start\nERROR disk full\nINFO ok\nERROR again ERROR\n";
        let lines = matcher.matching_lines(window, 0);
        assert_eq!(
            texts(window, &lines),
            vec!["ERROR disk full", "ERROR again ERROR"]
        );
    }

    #[test]
    fn test_literal_respects_window_edges() {
        let matcher = PatternMatcher::new("ERROR", PatternMode::Literal).unwrap();
        // First line is a tail from a previous window; matching starts after it
        let window = b"tail ERROR\nhead\nlast ERROR cut";
        let lines = matcher.matching_lines(window, 11);
        assert_eq!(texts(window, &lines), vec!["last ERROR cut"]);
    }

    #[test]
    fn test_regex_matching_lines() {
        let matcher = PatternMatcher::new(r"^ERROR \d+$", PatternMode::Regex).unwrap();
        let window = b"ERROR 1\nERROR x\nINFO 2\nERROR 33";
        let lines = matcher.matching_lines(window, 0);
        assert_eq!(texts(window, &lines), vec!["ERROR 1", "ERROR 33"]);
    }

    #[test]
    fn test_regex_on_invalid_utf8() {
        let matcher = PatternMatcher::new("fail", PatternMode::Regex).unwrap();
        let window = b"ok\n\xff\xfe fail\n";
        let lines = matcher.matching_lines(window, 0);
        assert_eq!(lines, vec![3..10]);
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(matches!(
            PatternMatcher::new("(unclosed", PatternMode::Regex),
            Err(SearchError::InvalidPattern(_))
        ));
        assert!(matches!(
            PatternMatcher::new("a\nb", PatternMode::Literal),
            Err(SearchError::InvalidPattern(_))
        ));
        assert!(matches!(
            PatternMatcher::new("", PatternMode::Literal),
            Err(SearchError::MissingPattern)
        ));
        // Regex metacharacters are plain text in literal mode
        assert!(PatternMatcher::new("(unclosed", PatternMode::Literal).is_ok());
    }

    #[test]
    fn test_pattern_cache_reuses_compiled_regex() {
        let unique = format!(
            r"cache_test_\d+_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        );
        let first = PatternMatcher::new(&unique, PatternMode::Regex).unwrap();
        let second = PatternMatcher::new(&unique, PatternMode::Regex).unwrap();
        match (&first.strategy, &second.strategy) {
            (MatchStrategy::Regex(a), MatchStrategy::Regex(b)) => assert!(Arc::ptr_eq(a, b)),
            _ => panic!("expected regex strategies"),
        }
    }

    #[test]
    fn test_from_beyond_window() {
        let matcher = PatternMatcher::new("x", PatternMode::Literal).unwrap();
        assert!(matcher.matching_lines(b"x", 1).is_empty());
    }
}
