/// Result artifacts: the text layout of headers, file blocks, and summaries, and
/// the writer that spreads blocks over size-bounded `scan_results_partNNN.log`
/// files.
///
/// Every artifact starts with a header naming the pattern, source, start time,
/// and part number. Only the final artifact carries the `SCAN SUMMARY` footer.
pub mod format;
pub mod writer;

pub use format::{error_block, file_block, footer, format_size, ReportHeader};
pub use writer::{artifact_name, ArtifactWriter, WriterOutput};
