//! ID rename maps and reference rewriting.
//!
//! Prefix rename and repair both rewrite every textual reference to a
//! renamed issue across the text-bearing fields (`title`, `description`,
//! `design`, `acceptance_criteria`, `notes`). Rename uses a narrow pattern
//! anchored on the old prefix; repair uses a broad pattern that matches any
//! ID-shaped token and consults the map.

use std::collections::HashMap;

use regex::Regex;

use crate::idgen::split_id;
use crate::issue::Issue;

/// Map from old issue ID to new issue ID.
pub type RenameMap = HashMap<String, String>;

/// Builds a suffix-preserving rename map `<old>-<suffix>` -> `<new>-<suffix>`.
pub fn prefix_rename_map<'a>(
    old_prefix: &str,
    new_prefix: &str,
    ids: impl IntoIterator<Item = &'a String>,
) -> RenameMap {
    let mut map = RenameMap::new();
    for id in ids {
        if let Some((prefix, suffix)) = split_id(id) {
            if prefix == old_prefix {
                map.insert(id.clone(), format!("{new_prefix}-{suffix}"));
            }
        }
    }
    map
}

/// Rewrites references matching `\b<old_prefix>-<suffix>\b` through the map.
///
/// Tokens anchored on the old prefix but absent from the map keep their
/// suffix and receive the new prefix, so references to issues that no
/// longer exist still follow the rename.
pub fn rewrite_prefix_refs(
    text: &str,
    old_prefix: &str,
    new_prefix: &str,
    map: &RenameMap,
) -> String {
    if text.is_empty() {
        return String::new();
    }
    let pattern = format!(r"\b{}-[a-z0-9][a-z0-9.]*\b", regex::escape(old_prefix));
    let re = Regex::new(&pattern).expect("prefix pattern is valid");
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let token = &caps[0];
        match map.get(token) {
            Some(new_id) => new_id.clone(),
            None => match split_id(token) {
                Some((_, suffix)) => format!("{new_prefix}-{suffix}"),
                None => token.to_owned(),
            },
        }
    })
    .into_owned()
}

/// Rewrites any ID-shaped token found in the map.
///
/// The broad pattern `\b[a-z][a-z0-9-]*-[a-z0-9.]+\b` over-matches ordinary
/// hyphenated words, so only exact map hits are replaced.
pub fn rewrite_mapped_refs(text: &str, map: &RenameMap) -> String {
    if text.is_empty() || map.is_empty() {
        return text.to_owned();
    }
    let re = Regex::new(r"\b[a-z][a-z0-9-]*-[a-z0-9][a-z0-9.]*\b").expect("broad pattern is valid");
    re.replace_all(text, |caps: &regex::Captures<'_>| {
        let token = &caps[0];
        map.get(token).cloned().unwrap_or_else(|| token.to_owned())
    })
    .into_owned()
}

/// Applies [`rewrite_mapped_refs`] to every text-bearing field of an issue.
pub fn rewrite_issue_text(issue: &mut Issue, map: &RenameMap) {
    issue.title = rewrite_mapped_refs(&issue.title, map);
    issue.description = rewrite_mapped_refs(&issue.description, map);
    issue.design = rewrite_mapped_refs(&issue.design, map);
    issue.acceptance_criteria = rewrite_mapped_refs(&issue.acceptance_criteria, map);
    issue.notes = rewrite_mapped_refs(&issue.notes, map);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;

    fn map(pairs: &[(&str, &str)]) -> RenameMap {
        pairs
            .iter()
            .map(|(a, b)| (a.to_string(), b.to_string()))
            .collect()
    }

    #[test]
    fn prefix_map_preserves_suffix() {
        let ids = vec!["old-1".to_string(), "old-abc12".to_string()];
        let m = prefix_rename_map("old", "new", &ids);
        assert_eq!(m.get("old-1").unwrap(), "new-1");
        assert_eq!(m.get("old-abc12").unwrap(), "new-abc12");
    }

    #[test]
    fn prefix_map_skips_foreign_prefixes() {
        let ids = vec!["old-1".to_string(), "other-2".to_string()];
        let m = prefix_rename_map("old", "new", &ids);
        assert_eq!(m.len(), 1);
        assert!(!m.contains_key("other-2"));
    }

    #[test]
    fn rewrite_prefix_refs_basic() {
        let m = map(&[("old-2", "new-2")]);
        let out = rewrite_prefix_refs("See old-2 for details", "old", "new", &m);
        assert_eq!(out, "See new-2 for details");
    }

    #[test]
    fn rewrite_prefix_refs_unmapped_token_still_moves() {
        let m = RenameMap::new();
        let out = rewrite_prefix_refs("Stale ref old-zz9", "old", "new", &m);
        assert_eq!(out, "Stale ref new-zz9");
    }

    #[test]
    fn rewrite_prefix_refs_respects_word_boundary() {
        let m = map(&[("old-2", "new-2")]);
        let out = rewrite_prefix_refs("bold-2 is not an ID, old-2 is", "old", "new", &m);
        assert_eq!(out, "bold-2 is not an ID, new-2 is");
    }

    #[test]
    fn rewrite_prefix_refs_hierarchical() {
        let m = map(&[("old-abc12.2", "new-abc12.2")]);
        let out = rewrite_prefix_refs("child old-abc12.2 done", "old", "new", &m);
        assert_eq!(out, "child new-abc12.2 done");
    }

    #[test]
    fn rewrite_mapped_refs_only_touches_map_hits() {
        let m = map(&[("old-1", "test-k3x9a")]);
        let out = rewrite_mapped_refs("old-1 and parent-child and other-5", &m);
        assert_eq!(out, "test-k3x9a and parent-child and other-5");
    }

    #[test]
    fn rewrite_mapped_refs_multiple_prefixes() {
        let m = map(&[("old-1", "test-aa111"), ("another-9", "test-bb222")]);
        let out = rewrite_mapped_refs("old-1 relates to another-9", &m);
        assert_eq!(out, "test-aa111 relates to test-bb222");
    }

    #[test]
    fn rewrite_issue_text_covers_all_fields() {
        let m = map(&[("old-2", "new-2")]);
        let mut issue = IssueBuilder::new("See old-2")
            .description("Fixes old-2")
            .design("Around old-2")
            .acceptance_criteria("old-2 closed")
            .notes("cf old-2")
            .build();
        rewrite_issue_text(&mut issue, &m);
        assert_eq!(issue.title, "See new-2");
        assert_eq!(issue.description, "Fixes new-2");
        assert_eq!(issue.design, "Around new-2");
        assert_eq!(issue.acceptance_criteria, "new-2 closed");
        assert_eq!(issue.notes, "cf new-2");
    }
}
