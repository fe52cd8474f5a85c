//! Patching state machine (spec §4.10): rolling image upgrade with automatic
//! rollback. Pure decision helpers; workload/snapshot mutation and LRO calls
//! are performed by the reconciler.

use chrono::{DateTime, Utc};

use instance_operator_types::instance::{ImageMap, ImageRole, STATEFUL_SET_IMAGE_ROLES};

/// Whether patching should start this tick (spec §4.10 preconditions).
pub fn should_start(
    patching_service_enabled: bool,
    ready: bool,
    database_instance_ready: bool,
    spec_images: &ImageMap,
    active_images: &ImageMap,
    last_failed_images: Option<&ImageMap>,
) -> bool {
    patching_service_enabled && ready && database_instance_ready && spec_images != active_images && Some(spec_images) != last_failed_images
}

/// Deterministic volume-snapshot name for a patching backup (spec §4.10):
/// `"patching-backup-<inst>-<date><nsec>-<mount>"`.
pub fn snapshot_name(instance_name: &str, now: DateTime<Utc>, mount: &str) -> String {
    format!("patching-backup-{instance_name}-{}{}-{mount}", now.format("%Y%m%d%H%M%S"), now.timestamp_subsec_nanos())
}

/// Whether the stateful workload actually needs to be recreated: only the
/// three pod-template-affecting roles matter (spec §4.10).
pub fn stateful_set_images_differ(spec_images: &ImageMap, active_images: &ImageMap) -> bool {
    STATEFUL_SET_IMAGE_ROLES.iter().any(|role| spec_images.get(role) != active_images.get(role))
}

/// Which images the monitoring deployment should run: the full proposed set
/// during a forward patch, or the last-known-good set during rollback
/// (spec §4.10's `DeploymentSetPatchingRollbackInProgress`).
pub fn deployment_images<'a>(rollback: bool, spec_images: &'a ImageMap, active_images: &'a ImageMap) -> &'a ImageMap {
    if rollback {
        active_images
    } else {
        spec_images
    }
}

pub fn missing_role(images: &ImageMap, role: ImageRole) -> bool {
    !images.contains_key(&role)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn images(service: &str, dbinit: &str, sidecar: &str) -> ImageMap {
        ImageMap::from([
            (ImageRole::Service, service.to_string()),
            (ImageRole::Dbinit, dbinit.to_string()),
            (ImageRole::LoggingSidecar, sidecar.to_string()),
        ])
    }

    #[test]
    fn should_start_requires_every_precondition() {
        let spec = images("v2", "v2", "v2");
        let active = images("v1", "v1", "v1");
        assert!(should_start(true, true, true, &spec, &active, None));
        assert!(!should_start(false, true, true, &spec, &active, None));
        assert!(!should_start(true, false, true, &spec, &active, None));
        assert!(!should_start(true, true, false, &spec, &active, None));
        assert!(!should_start(true, true, true, &active, &active, None));
    }

    #[test]
    fn should_start_refuses_a_known_bad_image_set() {
        let spec = images("v2", "v2", "v2");
        let active = images("v1", "v1", "v1");
        assert!(!should_start(true, true, true, &spec, &active, Some(&spec)));
    }

    #[test]
    fn snapshot_names_are_deterministic_per_call_inputs() {
        let now = chrono::Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(snapshot_name("gcloud", now, "u02"), format!("patching-backup-gcloud-20260101000000{}-u02", now.timestamp_subsec_nanos()));
    }

    #[test]
    fn stateful_set_images_differ_ignores_config_and_monitoring_roles() {
        let mut spec = images("v1", "v1", "v1");
        let active = images("v1", "v1", "v1");
        spec.insert(ImageRole::Config, "new-config".into());
        assert!(!stateful_set_images_differ(&spec, &active));

        spec.insert(ImageRole::Service, "v2".into());
        assert!(stateful_set_images_differ(&spec, &active));
    }

    #[test]
    fn deployment_images_picks_active_during_rollback() {
        let spec = images("v2", "v2", "v2");
        let active = images("v1", "v1", "v1");
        assert_eq!(deployment_images(true, &spec, &active), &active);
        assert_eq!(deployment_images(false, &spec, &active), &spec);
    }
}
