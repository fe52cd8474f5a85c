use async_trait::async_trait;
use tonic::transport::Channel;
use tonic::Request;

use crate::pb;

#[derive(thiserror::Error, Debug)]
pub enum AgentError {
    #[error("database daemon transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
    #[error("database daemon returned an error status: {0}")]
    Status(#[from] tonic::Status),
}

/// The result of a completed (or still-running) long-running operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperationHandle {
    pub id: String,
    pub done: bool,
    pub error: Option<String>,
}

impl From<pb::Operation> for OperationHandle {
    fn from(op: pb::Operation) -> Self {
        OperationHandle {
            id: op.id,
            done: op.done,
            error: (!op.error.is_empty()).then_some(op.error),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ParameterTypeValue {
    pub dynamic: bool,
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceImageMetadata {
    pub version: String,
    pub cdb_name: String,
    pub oracle_home: String,
    pub seeded_image: bool,
}

/// The per-pod database-daemon gRPC surface (spec §4.5, §6), as a trait so
/// the sub-state-machines can be tested against an in-memory fake instead of
/// a live sidecar.
#[async_trait]
pub trait AgentClient: Send + Sync {
    async fn create_cdb(
        &self,
        operation_id: &str,
        cdb_name: &str,
        db_unique_name: &str,
        character_set: &str,
        memory_percent: i32,
    ) -> Result<OperationHandle, AgentError>;

    async fn bootstrap_database(&self, operation_id: &str, mode: pb::BootstrapMode) -> Result<OperationHandle, AgentError>;

    async fn physical_restore(
        &self,
        operation_id: &str,
        backup_id: &str,
        local_path: &str,
        gcs_path: &str,
        dop: u32,
        time_limit_minutes: i64,
    ) -> Result<OperationHandle, AgentError>;

    async fn apply_data_patch(&self, operation_id: &str, target_version: &str) -> Result<OperationHandle, AgentError>;

    async fn create_standby(
        &self,
        operation_id: &str,
        primary_host: &str,
        primary_port: i32,
        primary_user: &str,
        primary_password: &str,
    ) -> Result<OperationHandle, AgentError>;

    async fn set_up_data_guard(&self, operation_id: &str, standby_host: &str) -> Result<OperationHandle, AgentError>;

    async fn promote_standby(&self, operation_id: &str) -> Result<OperationHandle, AgentError>;

    async fn data_guard_status(&self) -> Result<String, AgentError>;

    async fn bootstrap_standby(&self, operation_id: &str) -> Result<OperationHandle, AgentError>;

    async fn set_parameter(&self, key: &str, value: &str) -> Result<bool, AgentError>;

    async fn get_parameter_type_value(&self, keys: &[String]) -> Result<Vec<ParameterTypeValue>, AgentError>;

    async fn bounce_database(&self) -> Result<(), AgentError>;

    async fn recover_config_file(&self) -> Result<(), AgentError>;

    async fn fetch_service_image_metadata(&self) -> Result<ServiceImageMetadata, AgentError>;

    async fn set_dnfs_state(&self, enabled: bool) -> Result<(), AgentError>;

    async fn get_operation(&self, operation_id: &str) -> Result<OperationHandle, AgentError>;

    async fn delete_operation(&self, operation_id: &str) -> Result<(), AgentError>;
}

/// `AgentClient` backed by a live `tonic` channel to the sidecar.
#[derive(Clone)]
pub struct TonicAgentClient {
    inner: pb::database_daemon_client::DatabaseDaemonClient<Channel>,
}

impl TonicAgentClient {
    pub fn new(channel: Channel) -> Self {
        Self {
            inner: pb::database_daemon_client::DatabaseDaemonClient::new(channel),
        }
    }
}

#[async_trait]
impl AgentClient for TonicAgentClient {
    async fn create_cdb(
        &self,
        operation_id: &str,
        cdb_name: &str,
        db_unique_name: &str,
        character_set: &str,
        memory_percent: i32,
    ) -> Result<OperationHandle, AgentError> {
        let req = pb::CreateCdbRequest {
            operation_id: operation_id.to_string(),
            cdb_name: cdb_name.to_string(),
            db_unique_name: db_unique_name.to_string(),
            character_set: character_set.to_string(),
            memory_percent,
        };
        let resp = self.inner.clone().create_cdb(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn bootstrap_database(&self, operation_id: &str, mode: pb::BootstrapMode) -> Result<OperationHandle, AgentError> {
        let req = pb::BootstrapDatabaseRequest {
            operation_id: operation_id.to_string(),
            mode: mode as i32,
        };
        let resp = self.inner.clone().bootstrap_database(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn physical_restore(
        &self,
        operation_id: &str,
        backup_id: &str,
        local_path: &str,
        gcs_path: &str,
        dop: u32,
        time_limit_minutes: i64,
    ) -> Result<OperationHandle, AgentError> {
        let req = pb::PhysicalRestoreRequest {
            operation_id: operation_id.to_string(),
            backup_id: backup_id.to_string(),
            local_path: local_path.to_string(),
            gcs_path: gcs_path.to_string(),
            dop,
            time_limit_minutes,
        };
        let resp = self.inner.clone().physical_restore(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn apply_data_patch(&self, operation_id: &str, target_version: &str) -> Result<OperationHandle, AgentError> {
        let req = pb::ApplyDataPatchRequest {
            operation_id: operation_id.to_string(),
            target_version: target_version.to_string(),
        };
        let resp = self.inner.clone().apply_data_patch(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn create_standby(
        &self,
        operation_id: &str,
        primary_host: &str,
        primary_port: i32,
        primary_user: &str,
        primary_password: &str,
    ) -> Result<OperationHandle, AgentError> {
        let req = pb::CreateStandbyRequest {
            operation_id: operation_id.to_string(),
            primary_host: primary_host.to_string(),
            primary_port,
            primary_user: primary_user.to_string(),
            primary_password: primary_password.to_string(),
        };
        let resp = self.inner.clone().create_standby(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn set_up_data_guard(&self, operation_id: &str, standby_host: &str) -> Result<OperationHandle, AgentError> {
        let req = pb::SetUpDataGuardRequest {
            operation_id: operation_id.to_string(),
            standby_host: standby_host.to_string(),
        };
        let resp = self.inner.clone().set_up_data_guard(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn promote_standby(&self, operation_id: &str) -> Result<OperationHandle, AgentError> {
        let req = pb::PromoteStandbyRequest {
            operation_id: operation_id.to_string(),
        };
        let resp = self.inner.clone().promote_standby(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn data_guard_status(&self) -> Result<String, AgentError> {
        let resp = self
            .inner
            .clone()
            .data_guard_status(Request::new(pb::DataGuardStatusRequest {}))
            .await?;
        Ok(resp.into_inner().output)
    }

    async fn bootstrap_standby(&self, operation_id: &str) -> Result<OperationHandle, AgentError> {
        let req = pb::BootstrapStandbyRequest {
            operation_id: operation_id.to_string(),
        };
        let resp = self.inner.clone().bootstrap_standby(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn set_parameter(&self, key: &str, value: &str) -> Result<bool, AgentError> {
        let req = pb::SetParameterRequest {
            key: key.to_string(),
            value: value.to_string(),
        };
        let resp = self.inner.clone().set_parameter(Request::new(req)).await?;
        Ok(resp.into_inner().is_static)
    }

    async fn get_parameter_type_value(&self, keys: &[String]) -> Result<Vec<ParameterTypeValue>, AgentError> {
        let req = pb::GetParameterTypeValueRequest { keys: keys.to_vec() };
        let resp = self.inner.clone().get_parameter_type_value(Request::new(req)).await?.into_inner();
        Ok(resp
            .dynamic
            .into_iter()
            .zip(resp.values)
            .map(|(dynamic, value)| ParameterTypeValue { dynamic, value })
            .collect())
    }

    async fn bounce_database(&self) -> Result<(), AgentError> {
        self.inner.clone().bounce_database(Request::new(pb::BounceDatabaseRequest {})).await?;
        Ok(())
    }

    async fn recover_config_file(&self) -> Result<(), AgentError> {
        self.inner
            .clone()
            .recover_config_file(Request::new(pb::RecoverConfigFileRequest {}))
            .await?;
        Ok(())
    }

    async fn fetch_service_image_metadata(&self) -> Result<ServiceImageMetadata, AgentError> {
        let resp = self
            .inner
            .clone()
            .fetch_service_image_meta_data(Request::new(pb::FetchServiceImageMetaDataRequest {}))
            .await?
            .into_inner();
        Ok(ServiceImageMetadata {
            version: resp.version,
            cdb_name: resp.cdb_name,
            oracle_home: resp.oracle_home,
            seeded_image: resp.seeded_image,
        })
    }

    async fn set_dnfs_state(&self, enabled: bool) -> Result<(), AgentError> {
        self.inner
            .clone()
            .set_dnfs_state(Request::new(pb::SetDnfsStateRequest { enabled }))
            .await?;
        Ok(())
    }

    async fn get_operation(&self, operation_id: &str) -> Result<OperationHandle, AgentError> {
        let req = pb::GetOperationRequest {
            operation_id: operation_id.to_string(),
        };
        let resp = self.inner.clone().get_operation(Request::new(req)).await?;
        Ok(resp.into_inner().into())
    }

    async fn delete_operation(&self, operation_id: &str) -> Result<(), AgentError> {
        let req = pb::DeleteOperationRequest {
            operation_id: operation_id.to_string(),
        };
        self.inner.clone().delete_operation(Request::new(req)).await?;
        Ok(())
    }
}
