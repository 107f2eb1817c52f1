//! Outcome of one catalog merge

use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub new_count: usize,
    pub updated_count: usize,
    /// Re-seen entries whose mutable fields did not change
    pub unchanged_count: usize,
    pub skipped_duplicate: usize,
    pub skipped_invalid: usize,
    pub stale_count: usize,
    /// Snapshot written before the merge; `None` for dry runs
    pub backup_ref: Option<BackupRef>,
}

impl MergeResult {
    pub const fn touched(&self) -> usize {
        self.new_count + self.updated_count + self.unchanged_count
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRef {
    pub path: PathBuf,
    /// BLAKE3 hex digest of the snapshot bytes
    pub checksum: String,
    pub bytes: u64,
}
