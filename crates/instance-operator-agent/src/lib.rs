//! Client for the per-pod database-daemon gRPC sidecar (spec §4.5, §6).
//!
//! Mirrors the shape `mysten-network` gives its `tonic` transport crates: a
//! thin crate whose only job is "talk to this one network peer," generated
//! code included via `build.rs`, plus the small amount of hand-written glue
//! (deterministic operation ids, error mapping) the generated client needs.

pub mod pb {
    tonic::include_proto!("instance.agent.v1");
}

mod client;
mod operation_id;

pub use client::{AgentClient, AgentError, OperationHandle, ParameterTypeValue, ServiceImageMetadata, TonicAgentClient};
pub use operation_id::{operation_id, OperationKind};
