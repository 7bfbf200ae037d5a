//! Checkpoints: snapshots of a change's working files around stage boundaries.
//!
//! Each checkpoint is a full copy of every regular file under the change root
//! (excluding `.changeflow/` and `.git/`) stored in
//! `.changeflow/checkpoints/<id>/`, plus a record in the checkpoint ledger
//! `.changeflow/checkpoints/checkpoints.json`.
//!
//! Full copies scale with the file count of the change. The ledger only
//! promises that `files` can be restored byte-for-byte, so a hardlink or
//! copy-on-write snapshot could replace the copy without changing callers.

mod revision;
mod store;

pub use revision::head_revision;
pub use store::CheckpointStore;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Metadata for one snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `cp-<UTC timestamp>-s<stage>`, sortable by creation time
    pub id: String,
    /// Stage the snapshot was taken before
    pub stage: u32,
    pub name: String,
    pub timestamp: DateTime<Utc>,
    /// Captured files, relative to the change root, `/`-separated
    pub files: Vec<String>,
    /// SHA-256 (hex) of each captured file
    #[serde(default)]
    pub digests: BTreeMap<String, String>,
    /// git HEAD when the snapshot was taken
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Taken automatically before a rollback
    #[serde(default)]
    pub safety: bool,
}

/// On-disk checkpoint ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckpointLedger {
    #[serde(default)]
    pub checkpoints: Vec<Checkpoint>,
    #[serde(default)]
    pub last_successful_stage: Option<u32>,
}

/// What a rollback did.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackOutcome {
    pub checkpoint_id: String,
    /// Snapshot of the state that was replaced
    pub safety_checkpoint: String,
    pub restored: Vec<String>,
    /// Files present before the rollback that the checkpoint did not hold
    pub removed: Vec<String>,
    pub last_successful_stage: Option<u32>,
}
