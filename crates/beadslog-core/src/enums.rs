//! Enum types for the BeadsLog system.
//!
//! Each enum has:
//! - Custom Serialize (as snake_case or kebab-case string)
//! - Custom Deserialize (known variants + catch-all Custom/Other(String))
//! - `as_str()`, `is_default()`, `Display` impl

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: defines an enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! define_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident, custom_variant = $custom_variant:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            $custom_variant(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::$custom_variant(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` if this is a built-in (non-custom) variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::$custom_variant(_))
            }

            /// Returns `true` if this is a known valid variant or any non-empty custom string.
            pub fn is_valid(&self) -> bool {
                match self {
                    Self::$custom_variant(s) => !s.is_empty(),
                    _ => true,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s.as_str()))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::$custom_variant(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                // Check known variants first to avoid allocation in common case.
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::$custom_variant(s),
                }
            }
        }
    };
}

// ===========================================================================
// Status
// ===========================================================================

define_enum! {
    /// Current state of an issue.
    ///
    /// `Tombstone` marks a soft-deleted issue that is retained so merges
    /// across forks observe the deletion.
    Status, default = Open, custom_variant = Custom,
    variants: [
        (Open, "open"),
        (InProgress, "in_progress"),
        (Blocked, "blocked"),
        (Deferred, "deferred"),
        (Closed, "closed"),
        (Tombstone, "tombstone"),
    ]
}

impl Status {
    /// Returns `true` if this status no longer blocks dependents.
    ///
    /// Both closed and tombstoned blockers are treated as resolved by the
    /// readiness computation.
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Closed | Self::Tombstone)
    }
}

// ===========================================================================
// IssueType
// ===========================================================================

define_enum! {
    /// Categorises the kind of work.
    IssueType, default = Task, custom_variant = Custom,
    variants: [
        (Bug, "bug"),
        (Feature, "feature"),
        (Task, "task"),
        (Epic, "epic"),
        (Chore, "chore"),
        (MergeRequest, "merge-request"),
        (Molecule, "molecule"),
        (Gate, "gate"),
        (Agent, "agent"),
        (Role, "role"),
        (Rig, "rig"),
        (Convoy, "convoy"),
        (Event, "event"),
        (Slot, "slot"),
    ]
}

impl IssueType {
    /// Normalises aliases to their canonical form.
    pub fn normalize(&self) -> Self {
        match self.as_str() {
            "enhancement" | "feat" => Self::Feature,
            "mr" => Self::MergeRequest,
            _ => self.clone(),
        }
    }
}

// ===========================================================================
// DependencyType
// ===========================================================================

define_enum! {
    /// Relationship type between issues.
    DependencyType, default = Blocks, custom_variant = Custom,
    variants: [
        (Blocks, "blocks"),
        (ParentChild, "parent-child"),
        (RelatesTo, "relates-to"),
        (DiscoveredFrom, "discovered-from"),
        (Related, "related"),
        (Supersedes, "supersedes"),
        (Duplicates, "duplicates"),
        (RepliesTo, "replies-to"),
        (ApprovedBy, "approved-by"),
        (AuthoredBy, "authored-by"),
        (AssignedTo, "assigned-to"),
        (Tracks, "tracks"),
        (Until, "until"),
        (CausedBy, "caused-by"),
        (Validates, "validates"),
    ]
}

impl DependencyType {
    /// Returns `true` if this dependency type blocks work (affects the
    /// ready calculation).
    pub fn affects_ready_work(&self) -> bool {
        matches!(self, Self::Blocks)
    }

    /// Returns `true` if edges of this type must stay acyclic.
    pub fn requires_acyclic(&self) -> bool {
        matches!(self, Self::Blocks | Self::ParentChild)
    }

    /// Returns `true` if this type is stored as a symmetric pair of edges.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::RelatesTo)
    }
}

// ===========================================================================
// EventType
// ===========================================================================

define_enum! {
    /// Categorises audit trail entries and daemon mutation events.
    EventType, default = Created, custom_variant = Other,
    variants: [
        (Created, "create"),
        (Updated, "update"),
        (StatusChanged, "status"),
        (Closed, "closed"),
        (Deleted, "delete"),
        (Commented, "comment"),
        (DependencyAdded, "dependency_added"),
        (DependencyRemoved, "dependency_removed"),
        (LabelAdded, "label_added"),
        (LabelRemoved, "label_removed"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_default_is_open() {
        assert_eq!(Status::default(), Status::Open);
        assert!(Status::Open.is_default());
        assert!(!Status::Closed.is_default());
    }

    #[test]
    fn status_roundtrip_serde() {
        let s = Status::InProgress;
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(json, r#""in_progress""#);
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn status_resolved() {
        assert!(Status::Closed.is_resolved());
        assert!(Status::Tombstone.is_resolved());
        assert!(!Status::Open.is_resolved());
        assert!(!Status::InProgress.is_resolved());
    }

    #[test]
    fn status_custom_roundtrip() {
        let json = r#""my_custom_status""#;
        let s: Status = serde_json::from_str(json).unwrap();
        assert_eq!(s, Status::Custom("my_custom_status".into()));
        assert_eq!(serde_json::to_string(&s).unwrap(), json);
    }

    #[test]
    fn dependency_type_as_str() {
        assert_eq!(DependencyType::ParentChild.as_str(), "parent-child");
        assert_eq!(DependencyType::DiscoveredFrom.as_str(), "discovered-from");
    }

    #[test]
    fn dependency_type_affects_ready_work() {
        assert!(DependencyType::Blocks.affects_ready_work());
        assert!(!DependencyType::ParentChild.affects_ready_work());
        assert!(!DependencyType::Related.affects_ready_work());
        assert!(!DependencyType::RepliesTo.affects_ready_work());
    }

    #[test]
    fn dependency_type_acyclic() {
        assert!(DependencyType::Blocks.requires_acyclic());
        assert!(DependencyType::ParentChild.requires_acyclic());
        assert!(!DependencyType::RelatesTo.requires_acyclic());
    }

    #[test]
    fn relates_to_is_symmetric() {
        assert!(DependencyType::RelatesTo.is_symmetric());
        assert!(!DependencyType::Blocks.is_symmetric());
    }

    #[test]
    fn issue_type_normalize() {
        assert_eq!(
            IssueType::Custom("enhancement".into()).normalize(),
            IssueType::Feature
        );
        assert_eq!(IssueType::Custom("mr".into()).normalize(), IssueType::MergeRequest);
        assert_eq!(IssueType::Bug.normalize(), IssueType::Bug);
    }

    #[test]
    fn issue_type_spec_variants() {
        assert_eq!(IssueType::from("gate"), IssueType::Gate);
        assert_eq!(IssueType::from("convoy"), IssueType::Convoy);
        assert_eq!(IssueType::from("slot"), IssueType::Slot);
        assert_eq!(IssueType::from("merge-request"), IssueType::MergeRequest);
    }

    #[test]
    fn event_type_other_variant() {
        let json = r#""custom_event""#;
        let e: EventType = serde_json::from_str(json).unwrap();
        assert_eq!(e, EventType::Other("custom_event".into()));
    }
}
