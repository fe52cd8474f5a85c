use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::instance::BackupType;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum BackupSubtype {
    Instance,
    PluggableDatabase,
}

/// `spec` of the `Backup` custom resource (spec §3). The Instance controller
/// only ever reads these; the backup/export workflow that produces them is
/// an external collaborator (spec §1 out-of-scope).
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "instance.dbops.example.com",
    version = "v1alpha1",
    kind = "Backup",
    namespaced,
    status = "BackupStatus",
    shortname = "bkp"
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    #[serde(rename = "type")]
    pub type_: BackupType,
    pub subtype: BackupSubtype,
    #[serde(default)]
    pub backupset: bool,
    pub local_path: Option<String>,
    pub gcs_path: Option<String>,
    pub dop: Option<u32>,
    /// The instance this backup was taken from; used to scope listing.
    pub instance_ref: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum BackupConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BackupCondition {
    pub status: BackupConditionStatus,
    pub reason: String,
    pub message: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    pub backup_id: Option<String>,
    pub ready: Option<BackupCondition>,
    /// System change number at which this backup was taken; present for
    /// PITR-eligible backups.
    pub scn: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Annotates which PITR stream (if any) this backup belongs to, plus the
    /// redo-stream incarnation it was taken in/from.
    pub pitr: Option<String>,
    pub incarnation: Option<u32>,
    pub parent_incarnation: Option<u32>,
    /// `[window_start, window_end]` this backup is known-recoverable within;
    /// used by the fail-closed PITR cross-check (SPEC_FULL §D).
    pub recovery_window_start: Option<DateTime<Utc>>,
    pub recovery_window_end: Option<DateTime<Utc>>,
    /// For a `Snapshot`-type backup: the `VolumeSnapshot` each disk was
    /// captured into, keyed by disk name. Lets a snapshot restore rebuild
    /// claims with the right `dataSource` per disk.
    #[serde(default)]
    pub snapshot_names: BTreeMap<String, String>,
}

impl BackupStatus {
    pub fn is_ready(&self) -> bool {
        matches!(
            &self.ready,
            Some(BackupCondition {
                status: BackupConditionStatus::True,
                ..
            })
        )
    }
}
