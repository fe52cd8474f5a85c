use std::time::Duration;

/// Operator-wide knobs that are not carried on the per-namespace `Config`
/// CRD (spec §3's `Config` resource covers images/disks/platform defaults;
/// this covers the controller process itself). Populated by the binary's
/// `clap::Parser` CLI and handed down as plain data so this crate stays
/// free of a CLI-parsing dependency.
#[derive(Clone, Debug)]
pub struct OperatorConfig {
    pub reconcile_concurrency: u16,
    pub default_requeue: Duration,
    pub lro_poll_interval: Duration,
    pub lro_dial_timeout: Duration,
    pub standby_reconcile_interval: Duration,
    pub instance_ready_timeout: Duration,
    pub db_ready_seeded_timeout: Duration,
    pub db_ready_unseeded_timeout: Duration,
    pub deployment_patching_timeout: Duration,
    pub database_patching_timeout: Duration,
    pub phys_backup_time_limit_default: Duration,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        OperatorConfig {
            reconcile_concurrency: 4,
            default_requeue: Duration::from_secs(30),
            lro_poll_interval: Duration::from_secs(15),
            lro_dial_timeout: Duration::from_secs(60),
            standby_reconcile_interval: Duration::from_secs(60),
            instance_ready_timeout: Duration::from_secs(120 * 60),
            db_ready_seeded_timeout: Duration::from_secs(30 * 60),
            db_ready_unseeded_timeout: Duration::from_secs(60 * 60),
            deployment_patching_timeout: Duration::from_secs(3 * 60),
            database_patching_timeout: Duration::from_secs(25 * 60),
            phys_backup_time_limit_default: Duration::from_secs(60 * 60),
        }
    }
}
