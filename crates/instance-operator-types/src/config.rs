use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::instance::ImageMap;

/// Namespace-level defaults (spec §3). Invariant 1: at most one `Config` per
/// namespace — enforced by the reconciler, not by this type.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "instance.dbops.example.com",
    version = "v1alpha1",
    kind = "Config",
    namespaced,
    shortname = "dbconfig"
)]
#[serde(rename_all = "camelCase")]
pub struct ConfigSpec {
    #[serde(default)]
    pub images: ImageMap,
    #[serde(default)]
    pub disks: BTreeMap<String, String>,
    pub platform: Option<String>,
    pub log_level: Option<String>,
    /// Name of the `VolumeSnapshotClass` to use when the patching/restore
    /// SMs take or consume snapshots.
    pub snapshot_class: Option<String>,
}
