use kube::runtime::events::{Event, EventType, Recorder};

use crate::error::Result;

/// Stable event reasons emitted against the `Instance` object (spec §6),
/// for operator audit dashboards and alerting.
pub mod reason {
    pub const INSTANCE_READY: &str = "InstanceReady";
    pub const RESTORE_COMPLETE: &str = "RestoreComplete";
    pub const RESTORE_FAILED: &str = "RestoreFailed";
    pub const DATABASE_INSTANCE_TIMEOUT: &str = "DatabaseInstanceTimeout";
    pub const PATCHING_ROLLBACK: &str = "PatchingRollback";
    pub const STANDBY_PROMOTED: &str = "StandbyPromoted";
}

/// Thin wrapper over `kube::runtime::events::Recorder`, so sub-state-machines
/// depend on a narrow surface instead of threading a raw `Recorder` through
/// every call. The `Recorder` is already bound to the `Instance`'s object
/// reference at construction (see `reconciler::recorder_for`).
pub struct EventEmitter<'a> {
    recorder: &'a Recorder,
}

impl<'a> EventEmitter<'a> {
    pub fn new(recorder: &'a Recorder) -> Self {
        EventEmitter { recorder }
    }

    pub async fn normal(&self, action: &str, reason: &str, note: impl Into<String>) -> Result<()> {
        self.publish(EventType::Normal, action, reason, note).await
    }

    pub async fn warning(&self, action: &str, reason: &str, note: impl Into<String>) -> Result<()> {
        self.publish(EventType::Warning, action, reason, note).await
    }

    async fn publish(&self, type_: EventType, action: &str, reason: &str, note: impl Into<String>) -> Result<()> {
        self.recorder
            .publish(Event {
                type_,
                reason: reason.to_owned(),
                note: Some(note.into()),
                action: action.to_owned(),
                secondary: None,
            })
            .await?;
        Ok(())
    }
}
