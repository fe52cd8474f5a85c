//! Wire types for the Instance controller's custom resources.
//!
//! This crate is pure data plus small pure helpers: no I/O, no `kube::Client`
//! calls. The reconciler and sub-state-machines in `instance-operator-core`
//! are the only consumers that talk to the cluster API.

pub mod backup;
pub mod condition;
pub mod config;
pub mod instance;
pub mod pitr;
pub mod reserved_params;
pub mod validate;

pub use backup::{Backup, BackupSpec, BackupStatus};
pub use condition::{upsert_condition, Condition, ConditionStatus, ConditionType, Reason};
pub use config::{Config, ConfigSpec};
pub use instance::{Instance, InstanceSpec, InstanceStatus};
pub use pitr::{Pitr, PitrSpec, PitrStatus};
