use instance_operator_agent::AgentError;
use instance_operator_types::validate::ValidationError;

pub type Result<T> = core::result::Result<T, Error>;

/// The reconciler's top-level error type, composed from the narrower error
/// enums each module raises — mirrors the way the teacher's `DBError`
/// gathers `NodesError`/`TableError` behind one `#[from]`-driven enum.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("cluster API error: {0}")]
    Kube(#[from] kube::Error),
    #[error("spec validation failed: {0}")]
    Validation(#[from] ValidationError),
    #[error("database daemon error: {0}")]
    Agent(#[from] AgentError),
    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<kube::runtime::finalizer::Error<Error>>),
    #[error("more than one Config exists in namespace {0:?}")]
    MultipleConfigs(String),
    #[error("maintenance lock held by {holder:?}, requested by {requester:?}")]
    LockHeld { holder: String, requester: String },
    #[error("{0} timed out after {1:?}")]
    TimedOut(&'static str, std::time::Duration),
    #[error("backup {0:?} not found")]
    BackupNotFound(String),
    #[error("no eligible PITR backup for target in incarnation or its parent")]
    NoEligiblePitrBackup,
    #[error("backup {0:?} window could not be confirmed to contain the target; failing closed")]
    PitrWindowUnconfirmed(String),
    #[error("load-balancer ingress not yet populated for {0:?}")]
    IngressNotReady(String),
    #[error("{0}")]
    Other(String),
}

impl From<Box<kube::runtime::finalizer::Error<Error>>> for Error {
    fn from(e: Box<kube::runtime::finalizer::Error<Error>>) -> Self {
        Error::Finalizer(e)
    }
}

impl Error {
    /// Whether this error should surface as a retryable (transient) result
    /// rather than a terminal SM failure — spec §7's "Transient API"/"LRO
    /// not-done" rows.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Kube(_) | Error::Agent(_))
    }
}
