//! Hash-stable ID generation.
//!
//! Issue IDs have the form `<prefix>-<suffix>` where the suffix is a short
//! base36 rendering of a hash over the issue's identity tuple
//! `(title, type, actor, created_at)`. The same creation event observed on
//! two forks mints the same ID, which keeps merges sane; different actors
//! or times produce unrelated IDs.
//!
//! Hierarchical suffixes (`<suffix>.<n>.<m>`) mark descendants of an epic.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use num_traits::Zero;
use sha2::{Digest, Sha256};

/// Base36 alphabet (0-9, a-z).
const BASE36_ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Maximum timestamp perturbations before minting gives up.
const MAX_MINT_ATTEMPTS: u32 = 100;

/// Errors from ID generation and parsing.
#[derive(Debug, thiserror::Error)]
pub enum IdError {
    #[error("could not mint a unique ID for '{title}' after {attempts} attempts")]
    Exhausted { title: String, attempts: u32 },

    #[error("invalid issue prefix '{0}': must match [a-z][a-z0-9-]*")]
    InvalidPrefix(String),

    #[error("invalid issue ID '{0}'")]
    InvalidId(String),
}

/// Result alias for ID operations.
pub type Result<T> = std::result::Result<T, IdError>;

/// Converts a byte slice to a base36 string of the specified length.
pub fn encode_base36(data: &[u8], length: usize) -> String {
    let mut num = BigUint::from_bytes_be(data);
    let base = BigUint::from(36u32);
    let zero = BigUint::zero();

    // Build the string in reverse.
    let mut chars: Vec<u8> = Vec::with_capacity(length);
    while num > zero {
        let rem = &num % &base;
        num /= &base;
        // rem is guaranteed to be < 36, so fits in a u8 index.
        let idx = rem.to_u32_digits();
        let i = if idx.is_empty() { 0 } else { idx[0] as usize };
        chars.push(BASE36_ALPHABET[i]);
    }

    // Reverse to get most-significant digit first.
    chars.reverse();

    let mut s = String::from_utf8(chars).expect("base36 chars are valid UTF-8");

    // Pad with zeros if needed.
    if s.len() < length {
        let padding = "0".repeat(length - s.len());
        s = padding + &s;
    }

    // Truncate to exact length (keep least significant digits).
    if s.len() > length {
        s = s[s.len() - length..].to_owned();
    }

    s
}

/// Validates a workspace prefix: `[a-z][a-z0-9-]*`.
pub fn validate_prefix(prefix: &str) -> Result<()> {
    let mut chars = prefix.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_lowercase() => chars.all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'
        }),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(IdError::InvalidPrefix(prefix.to_owned()))
    }
}

/// Creates one hash-ID candidate for an issue.
///
/// The identity tuple hashes fields that do not change post-creation. The
/// timestamp is rounded to milliseconds so forks that record the same
/// creation event at slightly different precision still agree; `nonce`
/// perturbs the rounded value by whole nanoseconds during collision retry.
pub fn generate_hash_id(
    prefix: &str,
    title: &str,
    issue_type: &str,
    actor: &str,
    created_at: DateTime<Utc>,
    length: usize,
    nonce: u32,
) -> String {
    let millis = created_at.timestamp_millis();
    let perturbed_ns = millis * 1_000_000 + i64::from(nonce);
    let content = format!("{title}|{issue_type}|{actor}|{perturbed_ns}");

    let hash = Sha256::digest(content.as_bytes());

    // Bytes of hash consumed per desired suffix width.
    let num_bytes = match length {
        3 => 2,
        4 => 3,
        5 | 6 => 4,
        7 | 8 => 5,
        _ => 2,
    };

    let suffix = encode_base36(&hash[..num_bytes], length);
    format!("{prefix}-{suffix}")
}

/// Mints a unique hash ID, retrying with timestamp perturbation.
///
/// `exists` reports whether an ID is already taken in the store; `used_ids`
/// is a caller-provided set for batch generation (repair re-mints many IDs
/// before any of them hit the store). Successful mints are added to
/// `used_ids`.
///
/// Fails with [`IdError::Exhausted`] after 100 attempts.
pub fn mint_id<F>(
    prefix: &str,
    title: &str,
    issue_type: &str,
    actor: &str,
    created_at: DateTime<Utc>,
    length: usize,
    exists: F,
    used_ids: &mut HashSet<String>,
) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    validate_prefix(prefix)?;

    for nonce in 0..MAX_MINT_ATTEMPTS {
        let id = generate_hash_id(prefix, title, issue_type, actor, created_at, length, nonce);
        if !exists(&id) && !used_ids.contains(&id) {
            used_ids.insert(id.clone());
            return Ok(id);
        }
    }

    Err(IdError::Exhausted {
        title: title.to_owned(),
        attempts: MAX_MINT_ATTEMPTS,
    })
}

/// Classifies an ID suffix as hash-minted or legacy sequential.
///
/// A suffix is a hash if it contains any non-digit character OR is at
/// least 5 characters long and purely numeric. Anything shorter and
/// all-numeric is a legacy sequential ID.
pub fn is_hash_suffix(suffix: &str) -> bool {
    let base = suffix.split('.').next().unwrap_or(suffix);
    if base.is_empty() {
        return false;
    }
    if base.chars().any(|c| !c.is_ascii_digit()) {
        return true;
    }
    base.len() >= 5
}

/// Classifies a full `<prefix>-<suffix>` ID. Non-conforming IDs are not hashes.
pub fn is_hash_id(id: &str) -> bool {
    match split_id(id) {
        Some((_, suffix)) => is_hash_suffix(suffix),
        None => false,
    }
}

/// Splits an ID at the last prefix/suffix boundary.
///
/// Prefixes may themselves contain dashes, so the boundary is the final
/// dash before the base36 suffix.
pub fn split_id(id: &str) -> Option<(&str, &str)> {
    let dash = id.rfind('-')?;
    let (prefix, rest) = (&id[..dash], &id[dash + 1..]);
    if prefix.is_empty() || rest.is_empty() {
        return None;
    }
    Some((prefix, rest))
}

/// Parsed components of an issue ID.
///
/// Supports both root IDs (`bd-abc12`) and hierarchical IDs (`bd-abc12.1.2`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedId {
    pub prefix: String,
    pub suffix: String,
    /// Child path segments for hierarchical IDs (e.g. `[1, 2]` for `.1.2`).
    pub child_path: Vec<u32>,
}

impl ParsedId {
    /// Returns `true` if this is a root (non-hierarchical) ID.
    pub fn is_root(&self) -> bool {
        self.child_path.is_empty()
    }

    /// Returns the parent ID, or `None` for root IDs.
    pub fn parent(&self) -> Option<String> {
        if self.child_path.is_empty() {
            return None;
        }
        let mut parent_path = self.child_path.clone();
        parent_path.pop();
        let mut id = format!("{}-{}", self.prefix, self.suffix);
        for seg in &parent_path {
            id.push_str(&format!(".{seg}"));
        }
        Some(id)
    }

    /// Reconstructs the full ID string.
    pub fn to_id_string(&self) -> String {
        let mut id = format!("{}-{}", self.prefix, self.suffix);
        for seg in &self.child_path {
            id.push_str(&format!(".{seg}"));
        }
        id
    }
}

/// Parses an issue ID into its components.
pub fn parse_id(id: &str) -> Result<ParsedId> {
    let (prefix, rest) = split_id(id).ok_or_else(|| IdError::InvalidId(id.to_owned()))?;

    let mut parts = rest.split('.');
    let suffix = parts.next().unwrap_or_default();
    if suffix.is_empty()
        || !suffix
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        return Err(IdError::InvalidId(id.to_owned()));
    }

    let mut child_path = Vec::new();
    for part in parts {
        match part.parse::<u32>() {
            Ok(n) if n > 0 => child_path.push(n),
            _ => return Err(IdError::InvalidId(id.to_owned())),
        }
    }

    Ok(ParsedId {
        prefix: prefix.to_owned(),
        suffix: suffix.to_owned(),
        child_path,
    })
}

/// Returns the next hierarchical child ID under `parent_id`.
///
/// Picks the smallest unused positive integer among existing siblings, so
/// deleting `p-abc12.2` leaves a gap that the next child fills.
pub fn next_child_id(parent_id: &str, sibling_ids: &[String]) -> String {
    let mut taken: HashSet<u32> = HashSet::new();
    let parent_dot = format!("{parent_id}.");
    for sib in sibling_ids {
        if let Some(rest) = sib.strip_prefix(&parent_dot) {
            // Only direct children: no further dots.
            if let Ok(n) = rest.parse::<u32>() {
                taken.insert(n);
            }
        }
    }

    let mut n = 1u32;
    while taken.contains(&n) {
        n += 1;
    }
    format!("{parent_id}.{n}")
}

/// Computes the collision probability using the birthday paradox
/// approximation: `P ~ 1 - e^(-n^2 / 2N)`.
fn collision_probability(num_issues: usize, id_length: usize) -> f64 {
    let total: f64 = 36.0_f64.powi(id_length as i32);
    let exponent = -(num_issues as f64).powi(2) / (2.0 * total);
    1.0 - exponent.exp()
}

/// Determines the suffix length for the current database size.
///
/// Tries lengths from `min_length` to `max_length`, returning the first
/// that keeps the collision probability at or below `max_collision_prob`.
pub fn compute_adaptive_length(
    num_issues: usize,
    min_length: usize,
    max_length: usize,
    max_collision_prob: f64,
) -> usize {
    for length in min_length..=max_length {
        let prob = collision_probability(num_issues, length);
        if prob <= max_collision_prob {
            return length;
        }
    }
    max_length
}

/// Default adaptive ID configuration constants.
pub mod adaptive_defaults {
    /// Default collision probability threshold (25%).
    pub const MAX_COLLISION_PROB: f64 = 0.25;
    /// Default minimum suffix length.
    pub const MIN_LENGTH: usize = 3;
    /// Default maximum suffix length.
    pub const MAX_LENGTH: usize = 8;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn encode_base36_basic() {
        let result = encode_base36(&[], 4);
        assert_eq!(result, "0000");
    }

    #[test]
    fn encode_base36_length() {
        let data = [0xFF, 0xFF];
        let result = encode_base36(&data, 4);
        assert_eq!(result.len(), 4);
    }

    #[test]
    fn encode_base36_truncates() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF];
        let result = encode_base36(&data, 3);
        assert_eq!(result.len(), 3);
    }

    #[test]
    fn hash_id_deterministic() {
        let t = ts("2024-01-01T00:00:00Z");
        let id1 = generate_hash_id("bd", "Title", "task", "alice", t, 5, 0);
        let id2 = generate_hash_id("bd", "Title", "task", "alice", t, 5, 0);
        assert_eq!(id1, id2);
        assert!(id1.starts_with("bd-"));
        assert_eq!(id1.len(), 8); // "bd-" + 5 chars
    }

    #[test]
    fn hash_id_nonce_changes_output() {
        let t = ts("2024-01-01T00:00:00Z");
        let id1 = generate_hash_id("bd", "Title", "task", "alice", t, 5, 0);
        let id2 = generate_hash_id("bd", "Title", "task", "alice", t, 5, 1);
        assert_ne!(id1, id2);
    }

    #[test]
    fn hash_id_actor_changes_output() {
        let t = ts("2024-01-01T00:00:00Z");
        let id1 = generate_hash_id("bd", "Title", "task", "alice", t, 5, 0);
        let id2 = generate_hash_id("bd", "Title", "task", "bob", t, 5, 0);
        assert_ne!(id1, id2);
    }

    #[test]
    fn mint_retries_on_collision() {
        let t = ts("2024-01-01T00:00:00Z");
        let first = generate_hash_id("bd", "Title", "task", "alice", t, 5, 0);
        let mut used = HashSet::new();
        let taken = first.clone();
        let id = mint_id(
            "bd",
            "Title",
            "task",
            "alice",
            t,
            5,
            |candidate| candidate == taken,
            &mut used,
        )
        .unwrap();
        assert_ne!(id, first);
        assert!(used.contains(&id));
    }

    #[test]
    fn mint_respects_used_ids_set() {
        let t = ts("2024-01-01T00:00:00Z");
        let mut used = HashSet::new();
        let id1 = mint_id("bd", "Same", "task", "alice", t, 5, |_| false, &mut used).unwrap();
        let id2 = mint_id("bd", "Same", "task", "alice", t, 5, |_| false, &mut used).unwrap();
        assert_ne!(id1, id2);
    }

    #[test]
    fn mint_exhausts_after_bounded_attempts() {
        let t = ts("2024-01-01T00:00:00Z");
        let mut used = HashSet::new();
        let err = mint_id("bd", "Title", "task", "alice", t, 5, |_| true, &mut used)
            .unwrap_err();
        assert!(matches!(err, IdError::Exhausted { attempts: 100, .. }));
    }

    #[test]
    fn mint_rejects_bad_prefix() {
        let t = ts("2024-01-01T00:00:00Z");
        let mut used = HashSet::new();
        let err =
            mint_id("9bad", "Title", "task", "alice", t, 5, |_| false, &mut used).unwrap_err();
        assert!(matches!(err, IdError::InvalidPrefix(_)));
    }

    #[test]
    fn prefix_validation() {
        assert!(validate_prefix("bd").is_ok());
        assert!(validate_prefix("my-proj2").is_ok());
        assert!(validate_prefix("").is_err());
        assert!(validate_prefix("Bd").is_err());
        assert!(validate_prefix("9x").is_err());
    }

    #[test]
    fn classifier_matches_contract() {
        assert!(!is_hash_id("bd-1"));
        assert!(is_hash_id("bd-abc12"));
        assert!(is_hash_id("bd-12345"));
        assert!(!is_hash_id("bd-0088"));
    }

    #[test]
    fn classifier_on_suffixes() {
        assert!(is_hash_suffix("a1"));
        assert!(!is_hash_suffix("42"));
        assert!(is_hash_suffix("00880"));
        assert!(!is_hash_suffix(""));
    }

    #[test]
    fn parse_root_id() {
        let parsed = parse_id("bd-abc12").unwrap();
        assert_eq!(parsed.prefix, "bd");
        assert_eq!(parsed.suffix, "abc12");
        assert!(parsed.is_root());
        assert_eq!(parsed.parent(), None);
    }

    #[test]
    fn parse_hierarchical_id() {
        let parsed = parse_id("bd-abc12.1.2").unwrap();
        assert_eq!(parsed.child_path, vec![1, 2]);
        assert_eq!(parsed.parent(), Some("bd-abc12.1".to_string()));
        assert_eq!(parsed.to_id_string(), "bd-abc12.1.2");
    }

    #[test]
    fn parse_dashed_prefix() {
        let parsed = parse_id("my-proj-abc12").unwrap();
        assert_eq!(parsed.prefix, "my-proj");
        assert_eq!(parsed.suffix, "abc12");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(parse_id("nodash").is_err());
        assert!(parse_id("bd-").is_err());
        assert!(parse_id("-abc").is_err());
        assert!(parse_id("bd-ABC").is_err());
        assert!(parse_id("bd-abc12.0").is_err());
    }

    #[test]
    fn child_id_smallest_unused() {
        let sibs = vec![
            "bd-abc12.1".to_string(),
            "bd-abc12.3".to_string(),
            "bd-abc12.1.1".to_string(), // grandchild, ignored
        ];
        assert_eq!(next_child_id("bd-abc12", &sibs), "bd-abc12.2");
        assert_eq!(next_child_id("bd-abc12", &[]), "bd-abc12.1");
    }

    #[test]
    fn adaptive_length_small_repo() {
        let len = compute_adaptive_length(10, 3, 8, 0.25);
        assert_eq!(len, 3);
    }

    #[test]
    fn adaptive_length_large_repo() {
        let len = compute_adaptive_length(100_000, 3, 8, 0.25);
        assert!(len >= 6);
    }

    #[test]
    fn adaptive_length_capped_at_max() {
        let len = compute_adaptive_length(10_000_000, 3, 8, 0.01);
        assert_eq!(len, 8);
    }
}
