use std::sync::Arc;

use instance_operator_agent::{AgentClient, AgentError, OperationHandle};

use crate::error::{Error, Result};

/// The outcome of polling a named long-running operation once (spec §4.5,
/// §7's "LRO not-done"/"LRO error" rows).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LroPoll {
    /// Still running; caller should `RequeueAfter` the configured poll
    /// interval and try again next tick.
    InProgress,
    /// Completed successfully; the LRO has already been deleted.
    Done,
    /// Completed with a remote error; the LRO has already been deleted. The
    /// caller transitions to the SM's `*Failed` reason.
    Failed(String),
}

/// Polls `operation_id` once: if done, deletes the LRO (spec §4.5: "on
/// completion they must call DeleteLROOperation") and reports success or
/// failure; if not done, reports `InProgress` without deleting anything.
pub async fn poll(client: &Arc<dyn AgentClient>, operation_id: &str) -> Result<LroPoll> {
    let op = client.get_operation(operation_id).await?;
    if !op.done {
        return Ok(LroPoll::InProgress);
    }
    client.delete_operation(operation_id).await?;
    match op.error {
        Some(message) => Ok(LroPoll::Failed(message)),
        None => Ok(LroPoll::Done),
    }
}

/// Starts an operation, treating the gRPC already-exists signal as success
/// (spec §4.5: "Requests that are already running return an already-exists
/// signal, which callers must treat as success").
pub async fn start_idempotent<F, Fut>(start: F) -> Result<OperationHandle>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<OperationHandle, AgentError>>,
{
    match start().await {
        Ok(handle) => Ok(handle),
        Err(AgentError::Status(status)) if status.code() == tonic::Code::AlreadyExists => {
            Ok(OperationHandle { id: String::new(), done: false, error: None })
        }
        Err(err) => Err(Error::Agent(err)),
    }
}
