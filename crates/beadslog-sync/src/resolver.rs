//! Three-way JSONL merge resolver for git conflict markers.
//!
//! When git leaves `<<<<<<<`/`=======`/`>>>>>>>` markers in a JSONL file,
//! this resolver parses both sides of each conflict region and composes
//! them deterministically: per-ID union, with colliding IDs merged through
//! the field rules in [`beadslog_core::merge`]. A `.pre-resolve` backup of
//! the original file is left alongside.

use std::path::{Path, PathBuf};

use tracing::info;

use beadslog_core::issue::Issue;
use beadslog_core::jsonl::{parse_jsonl, to_jsonl_bytes};
use beadslog_core::merge::merge_issues;

use crate::error::{Result, SyncError};
use crate::export::write_atomic;

/// Extension appended to the backup file.
pub const BACKUP_SUFFIX: &str = ".pre-resolve";

const LEFT_MARKER: &str = "<<<<<<<";
const MID_MARKER: &str = "=======";
const RIGHT_MARKER: &str = ">>>>>>>";

// ---------------------------------------------------------------------------
// Conflict parsing
// ---------------------------------------------------------------------------

/// One conflict region extracted from a marked-up file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConflictRegion {
    /// 1-based line of the `<<<<<<<` marker.
    pub start_line: usize,
    /// 1-based line of the `>>>>>>>` marker.
    pub end_line: usize,
    pub left_lines: Vec<String>,
    pub right_lines: Vec<String>,
    pub left_label: String,
    pub right_label: String,
}

/// A piece of the document in original order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentPart {
    /// A line outside any conflict region.
    Clean(String),
    /// A conflict region.
    Region(ConflictRegion),
}

#[derive(Debug, PartialEq, Eq)]
enum ParseState {
    Clean,
    Left,
    Right,
}

/// Returns `true` if the content contains conflict markers.
pub fn has_conflict_markers(content: &str) -> bool {
    content
        .lines()
        .any(|l| l.starts_with(LEFT_MARKER) || l.starts_with(RIGHT_MARKER))
}

/// Parses a conflict-marked file into clean lines and regions, in document
/// order.
pub fn parse_conflicts(content: &str) -> Result<Vec<DocumentPart>> {
    let mut parts = Vec::new();
    let mut state = ParseState::Clean;

    let mut start_line = 0usize;
    let mut left_label = String::new();
    let mut left_lines: Vec<String> = Vec::new();
    let mut right_lines: Vec<String> = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        if let Some(label) = line.strip_prefix(LEFT_MARKER) {
            if state != ParseState::Clean {
                return Err(SyncError::ConflictParse {
                    line: line_no,
                    message: "nested conflict marker".into(),
                });
            }
            state = ParseState::Left;
            start_line = line_no;
            left_label = label.trim().to_owned();
            left_lines.clear();
            right_lines.clear();
        } else if line.starts_with(MID_MARKER) && state == ParseState::Left {
            state = ParseState::Right;
        } else if let Some(label) = line.strip_prefix(RIGHT_MARKER) {
            if state != ParseState::Right {
                return Err(SyncError::ConflictParse {
                    line: line_no,
                    message: "closing marker without separator".into(),
                });
            }
            parts.push(DocumentPart::Region(ConflictRegion {
                start_line,
                end_line: line_no,
                left_lines: std::mem::take(&mut left_lines),
                right_lines: std::mem::take(&mut right_lines),
                left_label: std::mem::take(&mut left_label),
                right_label: label.trim().to_owned(),
            }));
            state = ParseState::Clean;
        } else {
            match state {
                ParseState::Clean => parts.push(DocumentPart::Clean(line.to_owned())),
                ParseState::Left => left_lines.push(line.to_owned()),
                ParseState::Right => right_lines.push(line.to_owned()),
            }
        }
    }

    if state != ParseState::Clean {
        return Err(SyncError::ConflictParse {
            line: content.lines().count(),
            message: "unclosed conflict region at end of file".into(),
        });
    }

    Ok(parts)
}

// ---------------------------------------------------------------------------
// Region resolution
// ---------------------------------------------------------------------------

/// How a region was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionOutcome {
    /// Neither side yielded issues; both text blocks kept verbatim.
    KeptBothUnparseable,
    /// Only the left side parsed.
    LeftOnlyValid,
    /// Only the right side parsed.
    RightOnlyValid,
    /// Both sides parsed; per-ID union with field merges.
    Merged,
}

/// Report of a resolve pass over one file.
#[derive(Debug, Clone)]
pub struct ResolveReport {
    /// Number of conflict regions found.
    pub regions: usize,
    /// Outcome per region, in document order.
    pub outcomes: Vec<RegionOutcome>,
    /// Path of the backup of the original file.
    pub backup_path: PathBuf,
}

fn parse_side(lines: &[String]) -> Option<Vec<Issue>> {
    let text = lines.join("\n");
    match parse_jsonl(&text) {
        Ok(issues) if !issues.is_empty() => Some(issues),
        _ => None,
    }
}

/// Resolves a single region into output lines.
fn resolve_region(region: &ConflictRegion) -> Result<(Vec<String>, RegionOutcome)> {
    let left = parse_side(&region.left_lines);
    let right = parse_side(&region.right_lines);

    match (left, right) {
        (None, None) => {
            let mut lines = region.left_lines.clone();
            lines.extend(region.right_lines.clone());
            Ok((lines, RegionOutcome::KeptBothUnparseable))
        }
        (Some(issues), None) => Ok((issues_to_lines(&issues)?, RegionOutcome::LeftOnlyValid)),
        (None, Some(issues)) => Ok((issues_to_lines(&issues)?, RegionOutcome::RightOnlyValid)),
        (Some(left), Some(right)) => {
            let merged = union_merge(left, right);
            Ok((issues_to_lines(&merged)?, RegionOutcome::Merged))
        }
    }
}

/// Per-ID union: one-sided issues pass through, both-sided issues merge.
/// Left-side document order is preserved; right-only issues follow.
fn union_merge(left: Vec<Issue>, right: Vec<Issue>) -> Vec<Issue> {
    let mut out = Vec::new();
    let mut right_by_id: Vec<Option<Issue>> = right.into_iter().map(Some).collect();

    for l in left {
        let matched = right_by_id
            .iter_mut()
            .find(|slot| slot.as_ref().is_some_and(|r| r.id == l.id));
        match matched {
            Some(slot) => {
                let r = slot.take().expect("slot checked non-empty");
                out.push(merge_issues(&l, &r));
            }
            None => out.push(l),
        }
    }
    for slot in right_by_id.into_iter().flatten() {
        out.push(slot);
    }
    out
}

fn issues_to_lines(issues: &[Issue]) -> Result<Vec<String>> {
    let bytes = to_jsonl_bytes(issues)?;
    let text = String::from_utf8(bytes)
        .map_err(|_| SyncError::Invalid("serialized JSONL was not UTF-8".into()))?;
    Ok(text.lines().map(str::to_owned).collect())
}

// ---------------------------------------------------------------------------
// File-level entry point
// ---------------------------------------------------------------------------

/// Resolves conflict markers in a JSONL file in place.
///
/// The original content is copied to `<path>.pre-resolve` before the
/// resolved output replaces the file atomically.
pub fn resolve_conflict_file(path: &Path) -> Result<ResolveReport> {
    let content = std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?;
    let parts = parse_conflicts(&content)?;

    let backup_path = backup_path_for(path);
    std::fs::write(&backup_path, &content).map_err(|e| SyncError::io(&backup_path, e))?;

    let mut outcomes = Vec::new();
    let mut out_lines: Vec<String> = Vec::new();
    for part in &parts {
        match part {
            DocumentPart::Clean(line) => out_lines.push(line.clone()),
            DocumentPart::Region(region) => {
                let (lines, outcome) = resolve_region(region)?;
                out_lines.extend(lines);
                outcomes.push(outcome);
            }
        }
    }

    let mut output = out_lines.join("\n");
    if !output.is_empty() {
        output.push('\n');
    }
    write_atomic(path, output.as_bytes())?;

    info!(path = %path.display(), regions = outcomes.len(), "resolved conflict markers");
    Ok(ResolveReport {
        regions: outcomes.len(),
        outcomes,
        backup_path,
    })
}

fn backup_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push_str(BACKUP_SUFFIX);
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    const S3_INPUT: &str = concat!(
        "{\"id\":\"bd-1\",\"title\":\"Clean\"}\n",
        "<<<<<<< HEAD\n",
        "{\"id\":\"bd-2\",\"title\":\"Local\",\"updated_at\":\"2024-01-02T00:00:00Z\"}\n",
        "=======\n",
        "{\"id\":\"bd-2\",\"title\":\"Remote\",\"updated_at\":\"2024-01-01T00:00:00Z\"}\n",
        ">>>>>>> branch\n",
    );

    #[test]
    fn parse_extracts_region_and_clean_lines() {
        let parts = parse_conflicts(S3_INPUT).unwrap();
        assert_eq!(parts.len(), 2);
        match &parts[0] {
            DocumentPart::Clean(line) => assert!(line.contains("Clean")),
            other => panic!("expected clean line, got {other:?}"),
        }
        match &parts[1] {
            DocumentPart::Region(region) => {
                assert_eq!(region.start_line, 2);
                assert_eq!(region.end_line, 6);
                assert_eq!(region.left_label, "HEAD");
                assert_eq!(region.right_label, "branch");
                assert_eq!(region.left_lines.len(), 1);
                assert_eq!(region.right_lines.len(), 1);
            }
            other => panic!("expected region, got {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_nested_marker() {
        let input = "<<<<<<< a\n<<<<<<< b\n=======\n>>>>>>> c\n";
        let err = parse_conflicts(input).unwrap_err();
        match err {
            SyncError::ConflictParse { line, .. } => assert_eq!(line, 2),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn parse_rejects_unclosed_region() {
        let input = "<<<<<<< a\n{\"id\":\"x-1\"}\n";
        let err = parse_conflicts(input).unwrap_err();
        assert!(matches!(err, SyncError::ConflictParse { .. }));
    }

    #[test]
    fn resolve_prefers_later_updated_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        std::fs::write(&path, S3_INPUT).unwrap();

        let report = resolve_conflict_file(&path).unwrap();
        assert_eq!(report.regions, 1);
        assert_eq!(report.outcomes, vec![RegionOutcome::Merged]);

        let resolved = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = resolved.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("Clean"), "clean line preserved");
        assert!(lines[1].contains("\"title\":\"Local\""), "later updated_at wins");
        assert!(lines[1].contains("2024-01-02T00:00:00"));

        // Backup equals the original input.
        let backup = std::fs::read_to_string(&report.backup_path).unwrap();
        assert_eq!(backup, S3_INPUT);
    }

    #[test]
    fn resolve_keeps_one_sided_issues() {
        let input = concat!(
            "<<<<<<< HEAD\n",
            "{\"id\":\"bd-a\",\"title\":\"Left only\"}\n",
            "{\"id\":\"bd-b\",\"title\":\"Shared L\",\"updated_at\":\"2024-02-01T00:00:00Z\"}\n",
            "=======\n",
            "{\"id\":\"bd-b\",\"title\":\"Shared R\",\"updated_at\":\"2024-01-01T00:00:00Z\"}\n",
            "{\"id\":\"bd-c\",\"title\":\"Right only\"}\n",
            ">>>>>>> other\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        std::fs::write(&path, input).unwrap();

        resolve_conflict_file(&path).unwrap();
        let resolved = std::fs::read_to_string(&path).unwrap();
        let issues = parse_jsonl(&resolved).unwrap();
        let ids: Vec<&str> = issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["bd-a", "bd-b", "bd-c"]);
        let shared = issues.iter().find(|i| i.id == "bd-b").unwrap();
        assert_eq!(shared.title, "Shared L");
    }

    #[test]
    fn resolve_keeps_unparseable_regions_verbatim() {
        let input = concat!(
            "<<<<<<< HEAD\n",
            "not json at all\n",
            "=======\n",
            "also { not json\n",
            ">>>>>>> other\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        std::fs::write(&path, input).unwrap();

        let report = resolve_conflict_file(&path).unwrap();
        assert_eq!(report.outcomes, vec![RegionOutcome::KeptBothUnparseable]);

        let resolved = std::fs::read_to_string(&path).unwrap();
        assert!(resolved.contains("not json at all"));
        assert!(resolved.contains("also { not json"));
        assert!(!resolved.contains("<<<<<<<"), "markers stripped");
    }

    #[test]
    fn resolve_takes_single_valid_side() {
        let input = concat!(
            "<<<<<<< HEAD\n",
            "broken {\n",
            "=======\n",
            "{\"id\":\"bd-ok1\",\"title\":\"Valid\"}\n",
            ">>>>>>> other\n",
        );
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("issues.jsonl");
        std::fs::write(&path, input).unwrap();

        let report = resolve_conflict_file(&path).unwrap();
        assert_eq!(report.outcomes, vec![RegionOutcome::RightOnlyValid]);

        let resolved = std::fs::read_to_string(&path).unwrap();
        let issues = parse_jsonl(&resolved).unwrap();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "bd-ok1");
    }

    #[test]
    fn marker_detection() {
        assert!(has_conflict_markers(S3_INPUT));
        assert!(!has_conflict_markers("{\"id\":\"bd-1\"}\n"));
    }
}
