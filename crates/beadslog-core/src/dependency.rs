//! Dependency types -- relationships between issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DependencyType;

/// Prefix marking a dependency endpoint that lives in another rig's store.
pub const EXTERNAL_REF_PREFIX: &str = "external:";

/// Represents a relationship between issues.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,

    /// Target issue ID, or an `external:<rig>:<id>` placeholder after a
    /// cross-rig move.
    pub depends_on_id: String,

    /// Dependency type (serialised as "type" in JSON).
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,

    /// Type-specific edge data (JSON blob).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub metadata: String,

    /// Groups conversation edges for efficient thread queries.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub thread_id: String,
}

impl Dependency {
    /// Creates a minimal dependency edge of the given type.
    pub fn new(
        issue_id: impl Into<String>,
        depends_on_id: impl Into<String>,
        dep_type: DependencyType,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            dep_type,
            created_at: Utc::now(),
            created_by: String::new(),
            metadata: String::new(),
            thread_id: String::new(),
        }
    }

    /// The uniqueness key for set-union merges: `(issue_id, depends_on_id, type)`.
    pub fn key(&self) -> (String, String, String) {
        (
            self.issue_id.clone(),
            self.depends_on_id.clone(),
            self.dep_type.as_str().to_owned(),
        )
    }

    /// Returns `true` if the target endpoint is an external cross-rig reference.
    pub fn is_external(&self) -> bool {
        self.depends_on_id.starts_with(EXTERNAL_REF_PREFIX)
    }
}

/// Formats an `external:<rig>:<id>` dependency endpoint.
pub fn format_external_ref(rig: &str, id: &str) -> String {
    format!("{EXTERNAL_REF_PREFIX}{rig}:{id}")
}

/// Parses an `external:<rig>:<id>` endpoint into `(rig, id)`.
///
/// Returns `None` if the string is not an external reference.
pub fn parse_external_ref(s: &str) -> Option<(&str, &str)> {
    let rest = s.strip_prefix(EXTERNAL_REF_PREFIX)?;
    rest.split_once(':')
}

/// Counts for dependencies and dependents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCounts {
    /// Number of issues this issue depends on.
    pub dependency_count: i32,
    /// Number of issues that depend on this issue.
    pub dependent_count: i32,
}
