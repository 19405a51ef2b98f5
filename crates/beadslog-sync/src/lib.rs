//! Database/JSONL synchronization engine.
//!
//! Maintains the invariant that the JSONL file is a pure projection of the
//! store, while tolerating out-of-band writes to the JSONL (git merges,
//! sync-branch pulls from other workspaces). Also home to the
//! conflict-marker resolver, the prefix rename/repair orchestration, and
//! the cross-rig router.

pub mod error;
pub mod export;
pub mod flush;
pub mod freshness;
pub mod import;
pub mod repair;
pub mod resolver;
pub mod router;

pub use error::{Result, SyncError};
pub use export::{ExportResult, export_to_jsonl};
pub use flush::FlushScheduler;
pub use freshness::ensure_fresh;
pub use import::{ImportResult, import_from_jsonl, import_issues};
pub use resolver::{ResolveReport, resolve_conflict_file};
