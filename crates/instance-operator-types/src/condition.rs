use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The closed vocabulary of condition types this controller writes.
///
/// Unlike `reason`, `type` is small and stable across the lifetime of the
/// resource: every condition below is upserted by exactly one component.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Ready,
    DatabaseInstanceReady,
    StandbyDRReady,
    StandbyReady,
}

impl ConditionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConditionType::Ready => "Ready",
            ConditionType::DatabaseInstanceReady => "DatabaseInstanceReady",
            ConditionType::StandbyDRReady => "StandbyDRReady",
            ConditionType::StandbyReady => "StandbyReady",
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// The closed vocabulary of `Ready`/`DatabaseInstanceReady`/`StandbyDRReady`
/// reasons described in spec §4.1. Grouped by the sub-state-machine that
/// owns them; a reason belongs to exactly one owner at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Reason {
    // Provisioning
    CreateInProgress,
    CreateComplete,
    CreatePending,
    BootstrapPending,
    BootstrapInProgress,
    ReconcileServices,
    CreateFailed,

    // Restore
    RestorePending,
    RestorePreparationInProgress,
    RestorePreparationComplete,
    RestoreInProgress,
    PostRestoreBootstrapInProgress,
    RestoreComplete,
    RestoreFailed,
    AwaitingRestore,

    // Parameter update
    ParameterUpdateInProgress,
    ParameterUpdateRollback,
    ParameterUpdateAwaitingWindow,

    // Resize
    ResizingInProgress,

    // Patching
    PatchingBackupStarted,
    PatchingBackupCompleted,
    PatchingBackupFailure,
    DeploymentSetPatchingInProgress,
    DeploymentSetPatchingComplete,
    DeploymentSetPatchingFailure,
    DeploymentSetPatchingRollbackInProgress,
    StatefulSetPatchingInProgress,
    StatefulSetPatchingComplete,
    StatefulSetPatchingFailure,
    DatabasePatchingInProgress,
    DatabasePatchingComplete,
    DatabasePatchingFailure,
    PatchingRecoveryInProgress,
    PatchingRecoveryCompleted,
    PatchingRecoveryFailure,

    // Standby DR
    StandbyDRVerifyFailed,
    StandbyDRVerifyCompleted,
    StandbyDRCreateInProgress,
    StandbyDRCreateCompleted,
    StandbyDRCreateFailed,
    StandbyDRSetUpDataGuardFailed,
    StandbyDRSetUpDataGuardCompleted,
    StandbyDRDataGuardReplicationInProgress,
    StandbyDRPromoteFailed,
    StandbyDRPromoteCompleted,
    StandbyDRBootstrapFailed,
    StandbyDRBootstrapCompleted,

    // Mode
    PauseMode,
    ManuallySetUpStandbyInProgress,
}

impl Reason {
    pub fn as_str(self) -> &'static str {
        use Reason::*;
        match self {
            CreateInProgress => "CreateInProgress",
            CreateComplete => "CreateComplete",
            CreatePending => "CreatePending",
            BootstrapPending => "BootstrapPending",
            BootstrapInProgress => "BootstrapInProgress",
            ReconcileServices => "ReconcileServices",
            CreateFailed => "CreateFailed",
            RestorePending => "RestorePending",
            RestorePreparationInProgress => "RestorePreparationInProgress",
            RestorePreparationComplete => "RestorePreparationComplete",
            RestoreInProgress => "RestoreInProgress",
            PostRestoreBootstrapInProgress => "PostRestoreBootstrapInProgress",
            RestoreComplete => "RestoreComplete",
            RestoreFailed => "RestoreFailed",
            AwaitingRestore => "AwaitingRestore",
            ParameterUpdateInProgress => "ParameterUpdateInProgress",
            ParameterUpdateRollback => "ParameterUpdateRollback",
            ParameterUpdateAwaitingWindow => "ParameterUpdateAwaitingWindow",
            ResizingInProgress => "ResizingInProgress",
            PatchingBackupStarted => "PatchingBackupStarted",
            PatchingBackupCompleted => "PatchingBackupCompleted",
            PatchingBackupFailure => "PatchingBackupFailure",
            DeploymentSetPatchingInProgress => "DeploymentSetPatchingInProgress",
            DeploymentSetPatchingComplete => "DeploymentSetPatchingComplete",
            DeploymentSetPatchingFailure => "DeploymentSetPatchingFailure",
            DeploymentSetPatchingRollbackInProgress => "DeploymentSetPatchingRollbackInProgress",
            StatefulSetPatchingInProgress => "StatefulSetPatchingInProgress",
            StatefulSetPatchingComplete => "StatefulSetPatchingComplete",
            StatefulSetPatchingFailure => "StatefulSetPatchingFailure",
            DatabasePatchingInProgress => "DatabasePatchingInProgress",
            DatabasePatchingComplete => "DatabasePatchingComplete",
            DatabasePatchingFailure => "DatabasePatchingFailure",
            PatchingRecoveryInProgress => "PatchingRecoveryInProgress",
            PatchingRecoveryCompleted => "PatchingRecoveryCompleted",
            PatchingRecoveryFailure => "PatchingRecoveryFailure",
            StandbyDRVerifyFailed => "StandbyDRVerifyFailed",
            StandbyDRVerifyCompleted => "StandbyDRVerifyCompleted",
            StandbyDRCreateInProgress => "StandbyDRCreateInProgress",
            StandbyDRCreateCompleted => "StandbyDRCreateCompleted",
            StandbyDRCreateFailed => "StandbyDRCreateFailed",
            StandbyDRSetUpDataGuardFailed => "StandbyDRSetUpDataGuardFailed",
            StandbyDRSetUpDataGuardCompleted => "StandbyDRSetUpDataGuardCompleted",
            StandbyDRDataGuardReplicationInProgress => "StandbyDRDataGuardReplicationInProgress",
            StandbyDRPromoteFailed => "StandbyDRPromoteFailed",
            StandbyDRPromoteCompleted => "StandbyDRPromoteCompleted",
            StandbyDRBootstrapFailed => "StandbyDRBootstrapFailed",
            StandbyDRBootstrapCompleted => "StandbyDRBootstrapCompleted",
            PauseMode => "PauseMode",
            ManuallySetUpStandbyInProgress => "ManuallySetUpStandbyInProgress",
        }
    }
}

impl std::fmt::Display for Reason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single condition, mirroring the shape `metav1.Condition` has in the
/// cluster API: `type` is unique within a resource's condition list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    pub reason: Reason,
    pub message: String,
    #[serde(rename = "lastTransitionTime")]
    pub last_transition_time: DateTime<Utc>,
}

/// Upsert a condition by `type`, as described in spec §4.1: `lastTransitionTime`
/// only changes when `(status, reason)` changes, never on a message-only edit.
pub fn upsert_condition(
    conditions: &mut Vec<Condition>,
    type_: ConditionType,
    status: ConditionStatus,
    reason: Reason,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    let message = message.into();
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status || existing.reason != reason {
            existing.last_transition_time = now;
        }
        existing.status = status;
        existing.reason = reason;
        existing.message = message;
    } else {
        conditions.push(Condition {
            type_,
            status,
            reason,
            message,
            last_transition_time: now,
        });
    }
}

pub fn find_condition(conditions: &[Condition], type_: ConditionType) -> Option<&Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// `ElapsedTime(cond)` from spec §4.1: the wall-clock duration since the
/// condition's last real transition, used by the SMs for their timeouts.
pub fn elapsed_time(condition: &Condition, now: DateTime<Utc>) -> Duration {
    let delta = now.signed_duration_since(condition.last_transition_time);
    delta.to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn upsert_sets_transition_time_only_on_real_change() {
        let mut conditions = Vec::new();
        upsert_condition(
            &mut conditions,
            ConditionType::Ready,
            ConditionStatus::False,
            Reason::CreateInProgress,
            "0%",
            t(0),
        );
        let first_transition = conditions[0].last_transition_time;

        // message-only change: lastTransitionTime must not move.
        upsert_condition(
            &mut conditions,
            ConditionType::Ready,
            ConditionStatus::False,
            Reason::CreateInProgress,
            "50%",
            t(100),
        );
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first_transition);
        assert_eq!(conditions[0].message, "50%");

        // reason change: lastTransitionTime must move.
        upsert_condition(
            &mut conditions,
            ConditionType::Ready,
            ConditionStatus::True,
            Reason::CreateComplete,
            "done",
            t(200),
        );
        assert_eq!(conditions[0].last_transition_time, t(200));
    }

    #[test]
    fn elapsed_time_tracks_last_transition() {
        let mut conditions = Vec::new();
        upsert_condition(
            &mut conditions,
            ConditionType::Ready,
            ConditionStatus::False,
            Reason::RestoreInProgress,
            "in progress",
            t(1_000),
        );
        let cond = find_condition(&conditions, ConditionType::Ready).unwrap();
        assert_eq!(elapsed_time(cond, t(1_090)), Duration::from_secs(90));
    }
}
