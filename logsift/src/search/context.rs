use memchr::memchr_iter;
use std::borrow::Cow;

/// Decodes one line for output: drops a trailing `\r` and replaces invalid
/// UTF-8. The flag is set when a replacement happened.
pub fn decode_line(bytes: &[u8]) -> (String, bool) {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    match String::from_utf8_lossy(bytes) {
        Cow::Borrowed(s) => (s.to_string(), false),
        Cow::Owned(s) => (s, true),
    }
}

/// Start offsets of every line in a file.
///
/// Only built when context lines are requested. Unlike the windowed match path it
/// needs the whole file mapped and one `usize` per line, so its memory grows with
/// the file rather than with the chunk size.
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn build(bytes: &[u8]) -> Self {
        let mut starts = Vec::with_capacity(bytes.len() / 64 + 1);
        if !bytes.is_empty() {
            starts.push(0);
        }
        starts.extend(
            memchr_iter(b'\n', bytes)
                .map(|i| i + 1)
                .filter(|&start| start < bytes.len()),
        );
        Self {
            starts,
            len: bytes.len(),
        }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Bytes of line `n` without its terminator
    pub fn line<'a>(&self, bytes: &'a [u8], n: usize) -> Option<&'a [u8]> {
        let start = *self.starts.get(n)?;
        let end = self
            .starts
            .get(n + 1)
            .map_or(self.len, |&next| next - 1);
        bytes.get(start..end)
    }

    /// Up to `count` decoded lines before line `n`, oldest first
    pub fn before(&self, bytes: &[u8], n: usize, count: usize) -> Vec<String> {
        (n.saturating_sub(count)..n.min(self.line_count()))
            .filter_map(|i| self.line(bytes, i))
            .map(|line| decode_line(line).0)
            .collect()
    }

    /// Up to `count` decoded lines after line `n`
    pub fn after(&self, bytes: &[u8], n: usize, count: usize) -> Vec<String> {
        let end = n.saturating_add(count).saturating_add(1).min(self.line_count());
        (n + 1..end)
            .filter_map(|i| self.line(bytes, i))
            .map(|line| decode_line(line).0)
            .collect()
    }
}
