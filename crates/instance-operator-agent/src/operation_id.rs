use chrono::{DateTime, Utc};

/// The kinds of long-running operation this controller starts against the
/// sidecar. Each variant corresponds to one of the RPCs in `agent.proto`
/// that returns an `Operation`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationKind {
    CreateCdb,
    BootstrapDatabase,
    PhysicalRestore,
    ApplyDataPatch,
    CreateStandby,
    SetUpDataGuard,
    PromoteStandby,
    BootstrapStandby,
}

impl OperationKind {
    fn tag(self) -> &'static str {
        match self {
            OperationKind::CreateCdb => "create-cdb",
            OperationKind::BootstrapDatabase => "bootstrap-database",
            OperationKind::PhysicalRestore => "physical-restore",
            OperationKind::ApplyDataPatch => "apply-data-patch",
            OperationKind::CreateStandby => "create-standby",
            OperationKind::SetUpDataGuard => "set-up-data-guard",
            OperationKind::PromoteStandby => "promote-standby",
            OperationKind::BootstrapStandby => "bootstrap-standby",
        }
    }
}

/// Deterministic operation id derivation (spec §4.5): stable across
/// controller restarts and across retries of the same logical operation, so
/// that a second `Start` call is recognized as "already running" rather than
/// spawning a duplicate. For restores, `restore_request_time` (RFC3339) is
/// folded in so a *new* restore request gets a fresh id while a replay of
/// the same request resolves to the same LRO.
pub fn operation_id(resource_uid: &str, kind: OperationKind, restore_request_time: Option<DateTime<Utc>>) -> String {
    match restore_request_time {
        Some(t) => format!("{resource_uid}-{}-{}", kind.tag(), t.to_rfc3339()),
        None => format!("{resource_uid}-{}", kind.tag()),
    }
}
