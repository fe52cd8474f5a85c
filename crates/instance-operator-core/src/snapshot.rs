//! The `VolumeSnapshot` CRD (`snapshot.storage.k8s.io/v1`) this controller
//! depends on as an external collaborator (spec §6's "persistent-volume/
//! snapshot machinery"). Not part of `k8s-openapi`, so it gets the same
//! hand-rolled `CustomResource` treatment `instance-operator-types` gives the
//! controller's own CRDs.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "snapshot.storage.k8s.io",
    version = "v1",
    kind = "VolumeSnapshot",
    namespaced,
    status = "VolumeSnapshotStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSpec {
    pub source: VolumeSnapshotSource,
    #[serde(rename = "volumeSnapshotClassName")]
    pub volume_snapshot_class_name: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotSource {
    #[serde(rename = "persistentVolumeClaimName")]
    pub persistent_volume_claim_name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSnapshotStatus {
    #[serde(default)]
    pub ready_to_use: Option<bool>,
    pub error: Option<VolumeSnapshotError>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct VolumeSnapshotError {
    pub message: Option<String>,
}

impl VolumeSnapshotStatus {
    pub fn is_ready(&self) -> bool {
        self.ready_to_use == Some(true)
    }

    pub fn failed(&self) -> Option<&str> {
        self.error.as_ref().and_then(|e| e.message.as_deref())
    }
}

/// Builds the snapshot object for one disk's claim, named per spec §4.10.
pub fn build_snapshot(
    metadata: k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta,
    claim_name: &str,
    snapshot_class: Option<&str>,
) -> VolumeSnapshot {
    VolumeSnapshot {
        metadata,
        spec: VolumeSnapshotSpec {
            source: VolumeSnapshotSource { persistent_volume_claim_name: claim_name.to_string() },
            volume_snapshot_class_name: snapshot_class.map(str::to_string),
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_to_use_true_is_ready() {
        let status = VolumeSnapshotStatus { ready_to_use: Some(true), error: None };
        assert!(status.is_ready());
        assert!(status.failed().is_none());
    }

    #[test]
    fn error_message_surfaces_as_failed() {
        let status = VolumeSnapshotStatus {
            ready_to_use: Some(false),
            error: Some(VolumeSnapshotError { message: Some("disk full".into()) }),
        };
        assert!(!status.is_ready());
        assert_eq!(status.failed(), Some("disk full"));
    }
}
