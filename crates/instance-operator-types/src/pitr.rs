use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::instance::MaintenanceWindowInterval;

/// `spec`/`status` of the `PITR` custom resource (spec §3): a point-in-time
/// recovery stream tied to one instance.
#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "instance.dbops.example.com",
    version = "v1alpha1",
    kind = "Pitr",
    namespaced,
    status = "PitrStatus",
    shortname = "pitr"
)]
#[serde(rename_all = "camelCase")]
pub struct PitrSpec {
    pub instance_ref: String,
    #[serde(default)]
    pub window: Vec<MaintenanceWindowInterval>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PitrStatus {
    pub current_database_incarnation: Option<u32>,
}
