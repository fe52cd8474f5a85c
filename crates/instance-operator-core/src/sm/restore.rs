//! Restore state machine (spec §4.8). Most of its logic is pure decision
//! functions over already-fetched cluster objects; PITR backup selection
//! lives in [`super::pitr`].

use chrono::{DateTime, Utc};

use instance_operator_types::backup::{BackupStatus, BackupSubtype};
use instance_operator_types::condition::Reason;
use instance_operator_types::instance::BackupType;

use crate::error::{Error, Result};

/// Whether `spec.restore.requestTime` represents a new request this SM has
/// not already handled (spec §4.8 idempotency rule).
pub fn is_new_request(request_time: DateTime<Utc>, last_restore_time: Option<DateTime<Utc>>) -> bool {
    match last_restore_time {
        Some(last) => request_time > last,
        None => true,
    }
}

/// `RestorePending`'s precondition: the Ready and DatabaseInstanceReady
/// conditions must be in one of the states that make a restore meaningful.
pub fn database_instance_ready_for_restore(reason: Reason) -> bool {
    matches!(reason, Reason::CreateComplete | Reason::AwaitingRestore)
}

/// Validates the selected backup matches what was requested: its declared
/// type must match, and it must be Ready (spec §4.8).
pub fn validate_selected_backup(status: &BackupStatus, requested_type: BackupType, declared_type: BackupType) -> Result<()> {
    if declared_type != requested_type {
        return Err(Error::Other(format!(
            "backup type mismatch: requested {requested_type:?}, backup is {declared_type:?}"
        )));
    }
    if !status.is_ready() {
        return Err(Error::Other("selected backup is not Ready".to_string()));
    }
    Ok(())
}

/// Picks the backup matching `backup_id` out of a namespace listing, used
/// when `spec.restore.backupRef` is unset (spec §4.8).
pub fn find_backup_by_id<'a, T>(backups: &'a [T], backup_id: &str, id_of: impl Fn(&T) -> Option<&str>) -> Option<&'a T> {
    backups.iter().find(|b| id_of(b) == Some(backup_id))
}

/// Physical-restore preflight (spec §4.8 step 3): the load-balancer ingress
/// must already be populated, the backup must be a full backupset, and its
/// subtype must be `Instance` (a PDB-level backup cannot restore a whole CDB).
pub fn physical_restore_preflight(ingress_populated: bool, backupset: bool, subtype: BackupSubtype) -> Result<()> {
    if !ingress_populated {
        return Err(Error::IngressNotReady("load-balancer ingress not yet populated".to_string()));
    }
    if !backupset {
        return Err(Error::Other("physical restore requires a full backupset".to_string()));
    }
    if subtype != BackupSubtype::Instance {
        return Err(Error::Other(format!("physical restore requires an Instance-subtype backup, got {subtype:?}")));
    }
    Ok(())
}

/// Degree of parallelism precedence for `PhysicalRestore`: `spec.restore.dop
/// > backup.dop > 1` (spec §4.8).
pub fn choose_dop(spec_dop: Option<u32>, backup_dop: Option<u32>) -> u32 {
    spec_dop.or(backup_dop).unwrap_or(1)
}

/// The LRO deadline for `PhysicalRestore`: `spec.restore.timeLimitMinutes` if
/// set, else `3 * phys_backup_time_limit_default` (spec §4.8).
pub fn choose_time_limit_minutes(spec_time_limit_minutes: Option<i64>, phys_backup_time_limit_default: std::time::Duration) -> i64 {
    spec_time_limit_minutes.unwrap_or_else(|| 3 * phys_backup_time_limit_default.as_secs() as i64 / 60)
}

/// The human-readable `status.description` written on success (spec §4.8
/// step 5).
pub fn restore_description(now: DateTime<Utc>, backup_id: &str, backup_type: BackupType) -> String {
    format!("Restored on {} from backup {backup_id} (type {backup_type:?})", now.to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use instance_operator_types::backup::BackupCondition;
    use instance_operator_types::backup::BackupConditionStatus;

    fn t(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap()
    }

    #[test]
    fn new_request_requires_strictly_greater_time() {
        assert!(is_new_request(t(2), Some(t(1))));
        assert!(!is_new_request(t(1), Some(t(1))));
        assert!(!is_new_request(t(1), Some(t(2))));
        assert!(is_new_request(t(1), None));
    }

    #[test]
    fn restore_precondition_accepts_create_complete_or_awaiting_restore() {
        assert!(database_instance_ready_for_restore(Reason::CreateComplete));
        assert!(database_instance_ready_for_restore(Reason::AwaitingRestore));
        assert!(!database_instance_ready_for_restore(Reason::BootstrapInProgress));
    }

    fn ready_backup() -> BackupStatus {
        BackupStatus {
            backup_id: Some("b1".into()),
            ready: Some(BackupCondition {
                status: BackupConditionStatus::True,
                reason: "Ready".into(),
                message: String::new(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn validate_rejects_type_mismatch() {
        let status = ready_backup();
        assert!(validate_selected_backup(&status, BackupType::Physical, BackupType::Snapshot).is_err());
        assert!(validate_selected_backup(&status, BackupType::Snapshot, BackupType::Snapshot).is_ok());
    }

    #[test]
    fn validate_rejects_not_ready_backup() {
        let mut status = ready_backup();
        status.ready = None;
        assert!(validate_selected_backup(&status, BackupType::Snapshot, BackupType::Snapshot).is_err());
    }

    #[test]
    fn physical_preflight_requires_ingress_backupset_and_instance_subtype() {
        assert!(physical_restore_preflight(false, true, BackupSubtype::Instance).is_err());
        assert!(physical_restore_preflight(true, false, BackupSubtype::Instance).is_err());
        assert!(physical_restore_preflight(true, true, BackupSubtype::PluggableDatabase).is_err());
        assert!(physical_restore_preflight(true, true, BackupSubtype::Instance).is_ok());
    }

    #[test]
    fn dop_precedence_prefers_spec_then_backup_then_one() {
        assert_eq!(choose_dop(Some(4), Some(2)), 4);
        assert_eq!(choose_dop(None, Some(2)), 2);
        assert_eq!(choose_dop(None, None), 1);
    }

    #[test]
    fn time_limit_defaults_to_triple_the_backup_default() {
        let default = std::time::Duration::from_secs(60 * 60);
        assert_eq!(choose_time_limit_minutes(None, default), 180);
        assert_eq!(choose_time_limit_minutes(Some(42), default), 42);
    }
}
