//! Cross-module state-machine scenarios, exercised without a live cluster:
//! every collaborator here is a pure function or an in-memory fake, so these
//! walk a sequence of ticks the way the reconciler would without needing
//! `kube::Client`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use instance_operator_core::sm::{parameter_update, patching, pitr, restore, standby_dr};
use instance_operator_types::condition::{elapsed_time, find_condition, upsert_condition, Condition, ConditionStatus, ConditionType, Reason};
use instance_operator_types::instance::{ImageMap, ImageRole, PrimaryUser, ReplicationSettings, SecretReference};

fn t(hour: u32) -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap()
}

/// A reserved parameter is refused before the in-progress transition ever
/// happens, and the `Ready` condition never moves off its prior reason.
#[test]
fn reserved_parameter_is_refused_without_touching_conditions() {
    let mut conditions = vec![Condition {
        type_: ConditionType::Ready,
        status: ConditionStatus::True,
        reason: Reason::CreateComplete,
        message: "ready".into(),
        last_transition_time: t(0),
    }];

    let spec_parameters = BTreeMap::from([("processes".to_string(), "400".to_string())]);
    let decision = parameter_update::decide(&spec_parameters, &BTreeMap::new(), None);
    assert_eq!(decision, parameter_update::Decision::Refuse(vec!["processes".to_string()]));

    // A refusal is a no-op from the condition's point of view: no call site
    // in the reconciler upserts on this branch, so it stays CreateComplete.
    assert_eq!(find_condition(&conditions, ConditionType::Ready).unwrap().reason, Reason::CreateComplete);
    upsert_condition(&mut conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "ready", t(1));
    assert_eq!(find_condition(&conditions, ConditionType::Ready).unwrap().last_transition_time, t(0));
}

/// A genuinely new parameter set walks `CreateComplete -> ParameterUpdateInProgress
/// -> CreateComplete`, applying and verifying against the in-memory fake
/// sidecar, with `lastTransitionTime` moving exactly twice.
#[tokio::test]
async fn parameter_update_applies_and_settles() {
    let agent: Arc<dyn instance_operator_agent::AgentClient> = Arc::new(test_support::FakeAgent::default());
    let mut conditions = vec![Condition {
        type_: ConditionType::Ready,
        status: ConditionStatus::True,
        reason: Reason::CreateComplete,
        message: "ready".into(),
        last_transition_time: t(0),
    }];

    let spec_parameters = BTreeMap::from([("open_cursors_user_limit".to_string(), "400".to_string())]);
    let decision = parameter_update::decide(&spec_parameters, &BTreeMap::new(), None);
    assert_eq!(decision, parameter_update::Decision::Start);

    upsert_condition(&mut conditions, ConditionType::Ready, ConditionStatus::False, Reason::ParameterUpdateInProgress, "applying parameters", t(1));
    let applied = parameter_update::apply_all(&agent, &spec_parameters).await.unwrap();
    assert!(parameter_update::verify_applied(&agent, &spec_parameters).await.unwrap());
    assert!(applied.iter().all(|a| !a.required_restart));

    upsert_condition(&mut conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "parameters applied", t(2));

    assert_eq!(conditions.len(), 1);
    assert_eq!(find_condition(&conditions, ConditionType::Ready).unwrap().last_transition_time, t(2));
    assert_eq!(elapsed_time(find_condition(&conditions, ConditionType::Ready).unwrap(), t(5)), Duration::from_secs(3 * 3600));
}

/// A patch that only touches the monitoring-deployment image role never
/// triggers a stateful-set recreation, so the ladder should skip straight
/// from `DeploymentSetPatchingComplete` to `DatabasePatchingInProgress`.
#[test]
fn patching_skips_stateful_set_recreate_for_monitoring_only_change() {
    let active = ImageMap::from([
        (ImageRole::Service, "img:v1".to_string()),
        (ImageRole::Dbinit, "img:v1".to_string()),
        (ImageRole::LoggingSidecar, "img:v1".to_string()),
        (ImageRole::Monitoring, "mon:v1".to_string()),
    ]);
    let mut spec = active.clone();
    spec.insert(ImageRole::Monitoring, "mon:v2".to_string());

    assert!(patching::should_start(true, true, true, &spec, &active, None));
    assert!(!patching::stateful_set_images_differ(&spec, &active));

    let mut conditions = vec![Condition {
        type_: ConditionType::Ready,
        status: ConditionStatus::False,
        reason: Reason::DeploymentSetPatchingComplete,
        message: "monitoring deployment patched".into(),
        last_transition_time: t(0),
    }];
    // Mirrors the reconciler's own branch: no images differ on the
    // stateful-set roles, so it jumps straight past recreation.
    let next = if patching::stateful_set_images_differ(&spec, &active) {
        Reason::StatefulSetPatchingInProgress
    } else {
        Reason::DatabasePatchingInProgress
    };
    upsert_condition(&mut conditions, ConditionType::Ready, ConditionStatus::False, next, "no workload images changed", t(1));
    assert_eq!(find_condition(&conditions, ConditionType::Ready).unwrap().reason, Reason::DatabasePatchingInProgress);
}

/// A failed patch rolls back to the last-known-good image set and the
/// monitoring deployment picks up the active (not the proposed) images.
#[test]
fn patching_failure_rolls_back_to_active_images() {
    let active = ImageMap::from([(ImageRole::Service, "img:v1".to_string())]);
    let spec = ImageMap::from([(ImageRole::Service, "img:v2".to_string())]);
    assert_eq!(patching::deployment_images(true, &spec, &active), &active);
    assert_eq!(patching::deployment_images(false, &spec, &active), &spec);
}

/// PITR selection feeds directly into the restore description string the
/// reconciler writes to `status.description`.
#[test]
fn pitr_selection_feeds_restore_description() {
    let candidates = vec![
        pitr::BackupCandidate {
            backup_id: "backup-1".to_string(),
            ready: true,
            incarnation: Some(2),
            parent_incarnation: Some(1),
            scn: Some(1000),
            timestamp: Some(t(1)),
            recovery_window_start: Some(t(0)),
            recovery_window_end: Some(t(2)),
        },
        pitr::BackupCandidate {
            backup_id: "backup-2".to_string(),
            ready: true,
            incarnation: Some(2),
            parent_incarnation: Some(1),
            scn: Some(2000),
            timestamp: Some(t(3)),
            recovery_window_start: Some(t(2)),
            recovery_window_end: Some(t(4)),
        },
    ];

    let chosen = pitr::select_backup(&candidates, 2, pitr::PitrTarget::Scn(1500)).unwrap();
    assert_eq!(chosen.backup_id, "backup-1");

    let description = restore::restore_description(t(5), &chosen.backup_id, instance_operator_types::instance::BackupType::Physical);
    assert!(description.contains("backup-1"));
    assert!(description.contains("Physical"));
}

/// Standby-DR: a replication spec that fails local verification never
/// reaches the point of requesting promotion, and clearing
/// `replicationSettings` mid-replication is exactly what `promotion_requested`
/// treats as the trigger.
#[test]
fn standby_dr_verification_gates_promotion_trigger() {
    let bad_replication = ReplicationSettings {
        primary_host: "primary.example.com".to_string(),
        primary_port: 1521,
        primary_user: PrimaryUser {
            name: "system".to_string(),
            password_secret_ref: SecretReference { name: "primary-secret".to_string(), key: "password".to_string() },
        },
    };
    assert!(standby_dr::verify_standby_settings_locally(Some("gcloud_standby"), "GCLOUD", Some("img:v1"), &bad_replication).is_err());

    assert!(!standby_dr::promotion_requested(&Some(bad_replication)));
    assert!(standby_dr::promotion_requested(&None));
}

mod test_support {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use instance_operator_agent::{pb, AgentClient, AgentError, OperationHandle, ParameterTypeValue, ServiceImageMetadata};

    #[derive(Default)]
    pub struct FakeAgent {
        set: Mutex<BTreeMap<String, String>>,
    }

    #[async_trait]
    impl AgentClient for FakeAgent {
        async fn create_cdb(&self, _: &str, _: &str, _: &str, _: &str, _: i32) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn bootstrap_database(&self, _: &str, _: pb::BootstrapMode) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn physical_restore(&self, _: &str, _: &str, _: &str, _: &str, _: u32, _: i64) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn apply_data_patch(&self, _: &str, _: &str) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn create_standby(&self, _: &str, _: &str, _: i32, _: &str, _: &str) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn set_up_data_guard(&self, _: &str, _: &str) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn promote_standby(&self, _: &str) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn data_guard_status(&self) -> Result<String, AgentError> {
            unimplemented!()
        }
        async fn bootstrap_standby(&self, _: &str) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn set_parameter(&self, key: &str, value: &str) -> Result<bool, AgentError> {
            self.set.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(false)
        }
        async fn get_parameter_type_value(&self, keys: &[String]) -> Result<Vec<ParameterTypeValue>, AgentError> {
            let set = self.set.lock().unwrap();
            Ok(keys.iter().map(|k| ParameterTypeValue { dynamic: true, value: set.get(k).cloned().unwrap_or_default() }).collect())
        }
        async fn bounce_database(&self) -> Result<(), AgentError> {
            Ok(())
        }
        async fn recover_config_file(&self) -> Result<(), AgentError> {
            Ok(())
        }
        async fn fetch_service_image_metadata(&self) -> Result<ServiceImageMetadata, AgentError> {
            unimplemented!()
        }
        async fn set_dnfs_state(&self, _: bool) -> Result<(), AgentError> {
            unimplemented!()
        }
        async fn get_operation(&self, _: &str) -> Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn delete_operation(&self, _: &str) -> Result<(), AgentError> {
            unimplemented!()
        }
    }
}
