//! Database-instance bootstrap state machine (spec §4.7). Starts only once
//! `Ready` is True; drives `DatabaseInstanceReady` from `nil` to
//! `CreateComplete`.

use instance_operator_agent::pb::BootstrapMode;
use instance_operator_types::condition::Reason;

/// The path this instance takes, chosen once at the start of bootstrap from
/// the service image's seeded/unseeded flag and whether a restore was
/// requested (spec §4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Path {
    Seeded,
    Unseeded,
    Restore,
}

/// The first `DatabaseInstanceReady` reason for a freshly-provisioned
/// instance, before any reconcile tick has run.
pub fn initial_reason(path: Path) -> Reason {
    match path {
        Path::Seeded => Reason::BootstrapPending,
        Path::Unseeded => Reason::CreatePending,
        Path::Restore => Reason::RestorePending,
    }
}

/// `mode` passed to `BootstrapDatabase` for the `BootstrapPending ->
/// BootstrapInProgress` edge.
pub fn bootstrap_mode(path: Path) -> BootstrapMode {
    match path {
        Path::Seeded => BootstrapMode::ProvisionSeeded,
        Path::Unseeded => BootstrapMode::ProvisionUnseeded,
        // Restore's own state machine calls BootstrapDatabase(mode=Restore)
        // directly (spec §4.8 step 5); this SM never reaches it on that path.
        Path::Restore => BootstrapMode::Restore,
    }
}

/// `CreatePending -> CreateInProgress -> BootstrapPending` applies only on
/// the unseeded path; seeded and restore paths skip straight past it.
pub fn needs_create_step(path: Path) -> bool {
    matches!(path, Path::Unseeded)
}

/// The bootstrap timeout for this path, per spec §4.7 — seeded images
/// bootstrap faster because there is no datafile creation to wait on.
pub fn bootstrap_timeout(path: Path, seeded_timeout: std::time::Duration, unseeded_timeout: std::time::Duration) -> std::time::Duration {
    match path {
        Path::Seeded => seeded_timeout,
        Path::Unseeded | Path::Restore => unseeded_timeout,
    }
}
