use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

use super::format::ReportHeader;
use crate::results::FileSummary;

/// Name of the `part`-th artifact, starting at 1
pub fn artifact_name(part: usize) -> String {
    format!("scan_results_part{:03}.log", part)
}

struct OpenArtifact {
    name: String,
    writer: BufWriter<File>,
    size: u64,
    blocks: usize,
}

/// What a finished writer leaves behind
#[derive(Debug, Clone, Default)]
pub struct WriterOutput {
    /// Artifact names in the order they were opened
    pub artifacts: Vec<String>,
    pub files: Vec<FileSummary>,
}

/// Appends file blocks to size-bounded artifacts in one output directory.
///
/// A block always lands whole in a single artifact. Before a block is appended,
/// the current artifact is closed and the next one opened when the block would
/// push it over the cap and it already holds at least one block; a block larger
/// than the cap therefore gets an artifact of its own. The first artifact is
/// only created with the first block, so a job without output leaves no files.
pub struct ArtifactWriter {
    dir: PathBuf,
    header: ReportHeader,
    max_size: u64,
    current: Option<OpenArtifact>,
    output: WriterOutput,
}

impl ArtifactWriter {
    pub fn new(dir: impl Into<PathBuf>, header: ReportHeader, max_size: u64) -> Self {
        Self {
            dir: dir.into(),
            header,
            max_size: max_size.max(1),
            current: None,
            output: WriterOutput::default(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends a file's block and returns the artifact it was written to
    pub fn write_block(&mut self, path: &Path, block: &str, matches: usize) -> io::Result<String> {
        let block_len = block.len() as u64;
        let needs_rollover = self
            .current
            .as_ref()
            .is_some_and(|a| a.blocks > 0 && a.size + block_len > self.max_size);

        if needs_rollover {
            self.close_current()?;
        }
        if self.current.is_none() {
            self.open_next()?;
        }

        let artifact = self
            .current
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "no open artifact"))?;
        artifact.writer.write_all(block.as_bytes())?;
        artifact.size += block_len;
        artifact.blocks += 1;

        let name = artifact.name.clone();
        if matches > 0 {
            self.output.files.push(FileSummary {
                path: path.to_path_buf(),
                matches,
                artifact: name.clone(),
            });
        }
        Ok(name)
    }

    fn open_next(&mut self) -> io::Result<()> {
        let part = self.output.artifacts.len() + 1;
        let name = artifact_name(part);
        let path = self.dir.join(&name);
        debug!("Opening artifact {}", path.display());

        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        let header = self.header.render(part);
        writer.write_all(header.as_bytes())?;

        self.output.artifacts.push(name.clone());
        self.current = Some(OpenArtifact {
            name,
            writer,
            size: header.len() as u64,
            blocks: 0,
        });
        Ok(())
    }

    fn close_current(&mut self) -> io::Result<()> {
        if let Some(mut artifact) = self.current.take() {
            artifact.writer.flush()?;
            artifact.writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Writes the footer into the last artifact and closes it.
    ///
    /// The footer is not a block and may take the final artifact past the cap.
    pub fn finish(mut self, footer: &str) -> io::Result<WriterOutput> {
        if let Some(artifact) = self.current.as_mut() {
            artifact.writer.write_all(footer.as_bytes())?;
            artifact.size += footer.len() as u64;
        }
        self.close_current()?;
        Ok(self.output)
    }

    pub fn artifacts(&self) -> &[String] {
        &self.output.artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PatternMode;
    use std::fs;
    use std::time::SystemTime;
    use tempfile::tempdir;

    fn header() -> ReportHeader {
        ReportHeader {
            pattern: "ERROR".to_string(),
            mode: PatternMode::Literal,
            source: "logs".to_string(),
            started_at: SystemTime::UNIX_EPOCH,
        }
    }

    #[test]
    fn test_artifact_name() {
        assert_eq!(artifact_name(1), "scan_results_part001.log");
        assert_eq!(artifact_name(42), "scan_results_part042.log");
    }

    #[test]
    fn test_rollover_keeps_blocks_whole() {
        let dir = tempdir().unwrap();
        let header_len = header().render(1).len() as u64;
        let block = "x".repeat(100);
        // Room for the header and one block, not two
        let mut writer = ArtifactWriter::new(dir.path(), header(), header_len + 150);

        let first = writer.write_block(Path::new("a.log"), &block, 1).unwrap();
        let second = writer.write_block(Path::new("b.log"), &block, 1).unwrap();
        let third = writer.write_block(Path::new("c.log"), &block, 1).unwrap();
        assert_eq!(first, "scan_results_part001.log");
        assert_eq!(second, "scan_results_part002.log");
        assert_eq!(third, "scan_results_part003.log");

        let output = writer.finish("FOOTER\n").unwrap();
        assert_eq!(output.artifacts.len(), 3);
        assert_eq!(output.files.len(), 3);

        let last = fs::read_to_string(dir.path().join("scan_results_part003.log")).unwrap();
        assert!(last.contains("Part: 3\n"));
        assert!(last.ends_with("FOOTER\n"));
        let first = fs::read_to_string(dir.path().join("scan_results_part001.log")).unwrap();
        assert!(!first.contains("FOOTER"));
        assert!(first.ends_with(&block));
    }

    #[test]
    fn test_oversize_block_written_whole() {
        let dir = tempdir().unwrap();
        let mut writer = ArtifactWriter::new(dir.path(), header(), 10);
        let block = "y".repeat(500);

        writer.write_block(Path::new("big.log"), &block, 3).unwrap();
        let output = writer.finish("").unwrap();
        assert_eq!(output.artifacts, vec!["scan_results_part001.log"]);

        let text = fs::read_to_string(dir.path().join("scan_results_part001.log")).unwrap();
        assert!(text.ends_with(&block));
    }

    #[test]
    fn test_no_blocks_no_artifacts() {
        let dir = tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path(), header(), 1024);
        let output = writer.finish("FOOTER").unwrap();
        assert!(output.artifacts.is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
