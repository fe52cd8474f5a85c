use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::ResourceRequirements;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::condition::Condition;

/// `spec.images`/`status.activeImages` role key, spec §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImageRole {
    Service,
    Dbinit,
    LoggingSidecar,
    Config,
    Monitoring,
}

/// Images that feed the stateful workload's pod template directly; a diff in
/// any of these (and only these) requires recreating the workload during
/// patching (spec §4.10).
pub const STATEFUL_SET_IMAGE_ROLES: &[ImageRole] = &[ImageRole::Service, ImageRole::Dbinit, ImageRole::LoggingSidecar];

pub type ImageMap = BTreeMap<ImageRole, String>;

/// `spec.services` capability flag, spec §3.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum ServiceCapability {
    Backup,
    Monitoring,
    Logging,
    Patching,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DiskSpec {
    pub name: String,
    pub size: String,
    #[serde(rename = "storageClass")]
    pub storage_class: String,
}

/// Semantic disk names referenced by the workload builder and resize handler.
pub mod disk_names {
    pub const DATA_DISK: &str = "DataDisk";
    pub const LOG_DISK: &str = "LogDisk";
    pub const BACKUP_DISK: &str = "BackupDisk";
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MaintenanceWindowInterval {
    pub start: DateTime<Utc>,
    #[serde(rename = "durationMinutes")]
    pub duration_minutes: i64,
}

impl MaintenanceWindowInterval {
    /// `[start, start+duration)` half-open interval containment check.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let end = self.start + chrono::Duration::minutes(self.duration_minutes);
        instant >= self.start && instant < end
    }
}

pub fn in_maintenance_window(windows: &[MaintenanceWindowInterval], now: DateTime<Utc>) -> bool {
    windows.iter().any(|w| w.contains(now))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum BackupType {
    Snapshot,
    Physical,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PitrRestoreSpec {
    /// Exactly one of `scn`/`timestamp` must be set — spec §4.8.
    pub scn: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(rename = "pitrRef")]
    pub pitr_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RestoreSpec {
    #[serde(rename = "backupType")]
    pub backup_type: BackupType,
    #[serde(rename = "backupID")]
    pub backup_id: Option<String>,
    #[serde(rename = "backupRef")]
    pub backup_ref: Option<String>,
    #[serde(rename = "pitrRestore")]
    pub pitr_restore: Option<PitrRestoreSpec>,
    pub dop: Option<u32>,
    #[serde(rename = "timeLimitMinutes")]
    pub time_limit_minutes: Option<i64>,
    #[serde(default)]
    pub force: bool,
    #[serde(rename = "requestTime")]
    pub request_time: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SecretReference {
    pub name: String,
    #[serde(default = "default_secret_key")]
    pub key: String,
}

fn default_secret_key() -> String {
    "password".to_string()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PrimaryUser {
    pub name: String,
    #[serde(rename = "passwordSecretRef")]
    pub password_secret_ref: SecretReference,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ReplicationSettings {
    #[serde(rename = "primaryHost")]
    pub primary_host: String,
    #[serde(rename = "primaryPort")]
    pub primary_port: i32,
    #[serde(rename = "primaryUser")]
    pub primary_user: PrimaryUser,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "PascalCase")]
pub enum InstanceMode {
    #[default]
    Normal,
    Pause,
    ManuallySetUpStandby,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DbLoadBalancerOptions {
    #[serde(rename = "loadBalancerIP", default)]
    pub load_balancer_ip: Option<String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// `spec` of the `Instance` custom resource (spec §3).
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "instance.dbops.example.com",
    version = "v1alpha1",
    kind = "Instance",
    namespaced,
    status = "InstanceStatus",
    shortname = "inst",
    printcolumn = r#"{"name":"Ready","type":"string","jsonPath":".status.conditions[?(@.type==\"Ready\")].reason"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InstanceSpec {
    pub cdb_name: String,
    pub db_unique_name: Option<String>,
    pub db_domain: Option<String>,
    pub character_set: Option<String>,
    /// 0-100, invariant checked by the validator.
    pub memory_percent: Option<u8>,
    pub version: Option<String>,
    pub edition: Option<String>,
    #[serde(default)]
    pub images: ImageMap,
    #[serde(default)]
    pub disks: Vec<DiskSpec>,
    pub database_resources: Option<ResourceRequirements>,
    #[serde(default)]
    pub services: BTreeMap<ServiceCapability, bool>,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
    #[serde(default)]
    pub maintenance_window: Vec<MaintenanceWindowInterval>,
    pub restore: Option<RestoreSpec>,
    pub replication_settings: Option<ReplicationSettings>,
    #[serde(default)]
    pub mode: InstanceMode,
    #[serde(default)]
    pub db_load_balancer_options: DbLoadBalancerOptions,
    #[serde(default)]
    pub source_cidr_ranges: Vec<String>,
    #[serde(default)]
    pub enable_dnfs: bool,
}

impl InstanceSpec {
    pub fn service_enabled(&self, capability: ServiceCapability) -> bool {
        self.services.get(&capability).copied().unwrap_or(false)
    }
}

/// `status` of the `Instance` custom resource (spec §3).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InstanceStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub observed_generation: i64,
    #[serde(default)]
    pub is_change_applied: bool,
    #[serde(default)]
    pub current_parameters: BTreeMap<String, String>,
    pub last_failed_parameter_update: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub active_images: ImageMap,
    pub last_failed_images: Option<ImageMap>,
    pub current_active_state_machine: Option<String>,
    pub backup_id: Option<String>,
    pub last_restore_time: Option<DateTime<Utc>>,
    pub description: Option<String>,
    pub endpoint: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub database_names: Vec<String>,
    pub current_database_incarnation: Option<u32>,
    pub last_database_incarnation: Option<u32>,
    pub data_guard_output: Option<String>,
    pub current_replication_settings: Option<ReplicationSettings>,
    pub dnfs_enabled: Option<bool>,
    pub locked_by_controller: Option<String>,
    /// Per-disk `VolumeSnapshot` name a snapshot-type restore rebuilt its
    /// claims from; kept so later ticks reapply the same (immutable)
    /// `dataSource` instead of trying to strip it.
    #[serde(default)]
    pub restore_snapshot_sources: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn maintenance_window_is_half_open() {
        let window = MaintenanceWindowInterval {
            start: Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap(),
            duration_minutes: 60,
        };
        assert!(!window.contains(Utc.with_ymd_and_hms(2026, 1, 1, 1, 59, 59).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2026, 1, 1, 2, 0, 0).unwrap()));
        assert!(window.contains(Utc.with_ymd_and_hms(2026, 1, 1, 2, 59, 59).unwrap()));
        assert!(!window.contains(Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap()));
    }

    #[test]
    fn service_enabled_defaults_to_false() {
        let spec = InstanceSpec {
            cdb_name: "GCLOUD".into(),
            db_unique_name: None,
            db_domain: None,
            character_set: None,
            memory_percent: None,
            version: None,
            edition: None,
            images: ImageMap::new(),
            disks: vec![],
            database_resources: None,
            services: BTreeMap::new(),
            parameters: BTreeMap::new(),
            maintenance_window: vec![],
            restore: None,
            replication_settings: None,
            mode: InstanceMode::Normal,
            db_load_balancer_options: DbLoadBalancerOptions::default(),
            source_cidr_ranges: vec![],
            enable_dnfs: false,
        };
        assert!(!spec.service_enabled(ServiceCapability::Backup));
    }
}
