//! JSONL (JSON Lines) read/write support.
//!
//! Each line in a JSONL file is a complete JSON object representing one
//! Issue with its dependencies embedded. The canonical path is
//! `.beads/issues.jsonl`; the legacy `beads.jsonl` is read as a fallback
//! but never written.

use std::io::{self, BufRead, BufReader, Read, Write};

use crate::issue::Issue;

/// Read buffer capacity. Records with large embedded text can run long, so
/// the scanner tolerates lines up to this size without reallocation churn.
pub const READ_BUFFER_CAPACITY: usize = 2 * 1024 * 1024;

/// Canonical JSONL file name inside `.beads/`.
pub const JSONL_FILE_NAME: &str = "issues.jsonl";

/// Legacy JSONL file name, read as a fallback.
pub const LEGACY_JSONL_FILE_NAME: &str = "beads.jsonl";

/// Error type for JSONL operations.
#[derive(Debug, thiserror::Error)]
pub enum JsonlError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("parse error at line {line}: {source}")]
    Json {
        line: usize,
        source: serde_json::Error,
    },
}

/// Result alias for JSONL operations.
pub type Result<T> = std::result::Result<T, JsonlError>;

/// Writes issues as JSONL to the given writer.
///
/// Each issue is written as a single JSON line followed by a newline, with
/// no trailing whitespace.
pub fn write_jsonl<W: Write>(writer: &mut W, issues: &[Issue]) -> Result<()> {
    for issue in issues {
        serde_json::to_writer(&mut *writer, issue)
            .map_err(|e| JsonlError::Json { line: 0, source: e })?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(())
}

/// Serializes issues to an in-memory JSONL byte buffer.
pub fn to_jsonl_bytes(issues: &[Issue]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    write_jsonl(&mut buf, issues)?;
    Ok(buf)
}

/// Returns an iterator that reads issues from a raw reader, wrapping it in
/// a large-capacity buffer.
pub fn read_jsonl<R: Read>(reader: R) -> JsonlIter<BufReader<R>> {
    JsonlIter {
        reader: BufReader::with_capacity(READ_BUFFER_CAPACITY, reader),
        line_number: 0,
    }
}

/// Parses a complete JSONL string into issues.
pub fn parse_jsonl(content: &str) -> Result<Vec<Issue>> {
    let mut issues = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let mut issue: Issue =
            serde_json::from_str(trimmed).map_err(|e| JsonlError::Json {
                line: idx + 1,
                source: e,
            })?;
        issue.set_defaults();
        issues.push(issue);
    }
    Ok(issues)
}

/// Iterator over JSONL-encoded issues.
pub struct JsonlIter<R> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> Iterator for JsonlIter<R> {
    type Item = Result<Issue>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None, // EOF
                Ok(_) => {
                    self.line_number += 1;
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue; // skip empty lines
                    }
                    match serde_json::from_str::<Issue>(trimmed) {
                        Ok(mut issue) => {
                            issue.set_defaults();
                            return Some(Ok(issue));
                        }
                        Err(e) => {
                            return Some(Err(JsonlError::Json {
                                line: self.line_number,
                                source: e,
                            }));
                        }
                    }
                }
                Err(e) => return Some(Err(JsonlError::Io(e))),
            }
        }
    }
}
