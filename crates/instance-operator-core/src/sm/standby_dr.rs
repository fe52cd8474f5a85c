//! Standby-DR state machine (spec §4.9). Pure verification/derivation
//! helpers; LRO starts and polling are driven by the reconciler against
//! [`instance_operator_agent::AgentClient`].

use instance_operator_types::instance::ReplicationSettings;

use crate::error::{Error, Result};

/// Local pre-flight the SM runs before ever calling `VerifyStandbySettings`
/// on the sidecar (spec §4.9): everything checkable without a round trip.
pub fn verify_standby_settings_locally(
    db_unique_name: Option<&str>,
    cdb_name: &str,
    service_image: Option<&str>,
    replication: &ReplicationSettings,
) -> Result<()> {
    let mut problems = Vec::new();
    if db_unique_name.unwrap_or_default().is_empty() {
        problems.push("dbUniqueName is required for standby setup");
    }
    if cdb_name.is_empty() {
        problems.push("cdbName is required for standby setup");
    }
    if service_image.unwrap_or_default().is_empty() {
        problems.push("images.service is required for standby setup");
    }
    if replication.primary_user.name != "sys" {
        problems.push("replicationSettings.primaryUser.name must be \"sys\"");
    }
    if replication.primary_user.password_secret_ref.name.is_empty() {
        problems.push("replicationSettings.primaryUser.passwordSecretRef is required");
    }
    if !problems.is_empty() {
        return Err(Error::Other(problems.join("; ")));
    }
    Ok(())
}

/// Derives the standby host to hand `SetUpDataGuard` from the load
/// balancer's ingress: hostname first, IP fallback, error if neither is
/// populated yet (spec §4.9).
pub fn standby_host_from_ingress(hostname: Option<&str>, ip: Option<&str>) -> Result<String> {
    hostname
        .filter(|h| !h.is_empty())
        .or(ip.filter(|i| !i.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| Error::IngressNotReady("load-balancer ingress has neither hostname nor IP yet".to_string()))
}

/// `DataGuardReplicationInProgress` only writes `status.dataGuardOutput` at
/// most once per `standbyReconcileInterval`, to avoid reconcile storms
/// (spec §4.9).
pub fn should_poll_data_guard_status(elapsed_since_last_poll: std::time::Duration, standby_reconcile_interval: std::time::Duration) -> bool {
    elapsed_since_last_poll >= standby_reconcile_interval
}

/// The promotion trigger: the operator clearing `spec.replicationSettings`
/// is what moves `DataGuardReplicationInProgress -> PromoteCompleted`
/// (spec §4.9).
pub fn promotion_requested(spec_replication_settings: &Option<ReplicationSettings>) -> bool {
    spec_replication_settings.is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use instance_operator_types::instance::{PrimaryUser, SecretReference};

    fn replication(user: &str, secret: &str) -> ReplicationSettings {
        ReplicationSettings {
            primary_host: "primary.example.com".into(),
            primary_port: 1521,
            primary_user: PrimaryUser {
                name: user.to_string(),
                password_secret_ref: SecretReference {
                    name: secret.to_string(),
                    key: "password".to_string(),
                },
            },
        }
    }

    #[test]
    fn local_verification_passes_with_all_fields_present() {
        let r = replication("sys", "primary-secret");
        assert!(verify_standby_settings_locally(Some("gcloud_standby"), "GCLOUD", Some("gcr.io/image:1"), &r).is_ok());
    }

    #[test]
    fn local_verification_rejects_non_sys_primary_user() {
        let r = replication("system", "primary-secret");
        assert!(verify_standby_settings_locally(Some("gcloud_standby"), "GCLOUD", Some("gcr.io/image:1"), &r).is_err());
    }

    #[test]
    fn local_verification_rejects_missing_db_unique_name() {
        let r = replication("sys", "primary-secret");
        assert!(verify_standby_settings_locally(None, "GCLOUD", Some("gcr.io/image:1"), &r).is_err());
    }

    #[test]
    fn standby_host_prefers_hostname_over_ip() {
        assert_eq!(standby_host_from_ingress(Some("db.example.com"), Some("1.2.3.4")).unwrap(), "db.example.com");
        assert_eq!(standby_host_from_ingress(None, Some("1.2.3.4")).unwrap(), "1.2.3.4");
        assert!(standby_host_from_ingress(None, None).is_err());
    }

    #[test]
    fn data_guard_status_is_not_polled_before_the_interval_elapses() {
        let interval = std::time::Duration::from_secs(60);
        assert!(!should_poll_data_guard_status(std::time::Duration::from_secs(30), interval));
        assert!(should_poll_data_guard_status(std::time::Duration::from_secs(60), interval));
    }

    #[test]
    fn promotion_is_requested_once_replication_settings_are_cleared() {
        assert!(promotion_requested(&None));
        assert!(!promotion_requested(&Some(replication("sys", "primary-secret"))));
    }
}
