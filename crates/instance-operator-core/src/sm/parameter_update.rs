//! Parameter-update state machine (spec §2.6, §4.6).

use std::collections::BTreeMap;
use std::sync::Arc;

use instance_operator_agent::AgentClient;
use instance_operator_types::reserved_params::find_reserved;

use crate::error::{Error, Result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    /// `spec.parameters` matches either the currently-applied set or the
    /// last set that failed and was rolled back — nothing to do.
    Skip,
    /// At least one key is reserved; refuse before any `SetParameter` call
    /// (property P1).
    Refuse(Vec<String>),
    /// Begin the update: snapshot dynamic parameters, then proceed.
    Start,
}

/// Whether this tick should (re)start a parameter update, skip, or refuse —
/// the `CreateComplete -> ParameterUpdateInProgress` edge's guard (spec
/// §4.6).
pub fn decide(
    spec_parameters: &BTreeMap<String, String>,
    current_parameters: &BTreeMap<String, String>,
    last_failed_parameter_update: Option<&BTreeMap<String, String>>,
) -> Decision {
    if spec_parameters == current_parameters {
        return Decision::Skip;
    }
    if Some(spec_parameters) == last_failed_parameter_update {
        return Decision::Skip;
    }
    let reserved = find_reserved(spec_parameters.keys());
    if !reserved.is_empty() {
        return Decision::Refuse(reserved);
    }
    Decision::Start
}

/// A single parameter's apply result: whether the sidecar reports it as
/// requiring a restart to take effect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Applied {
    pub key: String,
    pub required_restart: bool,
}

/// Applies every parameter via `SetParameter`, all-or-nothing: the first
/// error aborts and the caller transitions to `ParameterUpdateRollback`
/// (spec §4.6).
pub async fn apply_all(agent: &Arc<dyn AgentClient>, parameters: &BTreeMap<String, String>) -> Result<Vec<Applied>> {
    let mut applied = Vec::with_capacity(parameters.len());
    for (key, value) in parameters {
        let required_restart = agent.set_parameter(key, value).await.map_err(Error::Agent)?;
        applied.push(Applied { key: key.clone(), required_restart });
    }
    Ok(applied)
}

/// Reads every parameter back via `GetParameterTypeValue` and compares
/// case-insensitively "to accommodate server-normalisation" (spec §4.6).
pub async fn verify_applied(agent: &Arc<dyn AgentClient>, parameters: &BTreeMap<String, String>) -> Result<bool> {
    let keys: Vec<String> = parameters.keys().cloned().collect();
    let values = agent.get_parameter_type_value(&keys).await.map_err(Error::Agent)?;
    if values.len() != keys.len() {
        return Ok(false);
    }
    Ok(keys
        .iter()
        .zip(values.iter())
        .all(|(key, value)| parameters.get(key).is_some_and(|expected| expected.eq_ignore_ascii_case(&value.value))))
}

/// `ParameterUpdateRollback -> CreateComplete`: restore the last-known-good
/// parameter file, bounce, then re-apply the previously snapshotted dynamic
/// values (spec §4.6).
pub async fn rollback(agent: &Arc<dyn AgentClient>, dynamic_snapshot: &BTreeMap<String, String>) -> Result<()> {
    agent.recover_config_file().await.map_err(Error::Agent)?;
    agent.bounce_database().await.map_err(Error::Agent)?;
    apply_all(agent, dynamic_snapshot).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use instance_operator_agent::{pb, AgentError, OperationHandle, ParameterTypeValue, ServiceImageMetadata};
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAgent {
        set: Mutex<BTreeMap<String, String>>,
        bounced: Mutex<bool>,
        recovered: Mutex<bool>,
    }

    #[async_trait]
    impl AgentClient for FakeAgent {
        async fn create_cdb(&self, _: &str, _: &str, _: &str, _: &str, _: i32) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn bootstrap_database(&self, _: &str, _: pb::BootstrapMode) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn physical_restore(&self, _: &str, _: &str, _: &str, _: &str, _: u32, _: i64) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn apply_data_patch(&self, _: &str, _: &str) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn create_standby(&self, _: &str, _: &str, _: i32, _: &str, _: &str) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn set_up_data_guard(&self, _: &str, _: &str) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn promote_standby(&self, _: &str) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn data_guard_status(&self) -> std::result::Result<String, AgentError> {
            unimplemented!()
        }
        async fn bootstrap_standby(&self, _: &str) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn set_parameter(&self, key: &str, value: &str) -> std::result::Result<bool, AgentError> {
            self.set.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(key == "parallel_servers_target")
        }
        async fn get_parameter_type_value(&self, keys: &[String]) -> std::result::Result<Vec<ParameterTypeValue>, AgentError> {
            let set = self.set.lock().unwrap();
            Ok(keys
                .iter()
                .map(|k| ParameterTypeValue { dynamic: k != "parallel_servers_target", value: set.get(k).cloned().unwrap_or_default() })
                .collect())
        }
        async fn bounce_database(&self) -> std::result::Result<(), AgentError> {
            *self.bounced.lock().unwrap() = true;
            Ok(())
        }
        async fn recover_config_file(&self) -> std::result::Result<(), AgentError> {
            *self.recovered.lock().unwrap() = true;
            Ok(())
        }
        async fn fetch_service_image_metadata(&self) -> std::result::Result<ServiceImageMetadata, AgentError> {
            unimplemented!()
        }
        async fn set_dnfs_state(&self, _: bool) -> std::result::Result<(), AgentError> {
            unimplemented!()
        }
        async fn get_operation(&self, _: &str) -> std::result::Result<OperationHandle, AgentError> {
            unimplemented!()
        }
        async fn delete_operation(&self, _: &str) -> std::result::Result<(), AgentError> {
            unimplemented!()
        }
    }

    #[test]
    fn skip_when_spec_matches_current() {
        let params = BTreeMap::from([("parallel_servers_target".to_string(), "8".to_string())]);
        assert_eq!(decide(&params, &params, None), Decision::Skip);
    }

    #[test]
    fn skip_when_spec_matches_last_failed() {
        let params = BTreeMap::from([("parallel_servers_target".to_string(), "8".to_string())]);
        assert_eq!(decide(&params, &BTreeMap::new(), Some(&params)), Decision::Skip);
    }

    #[test]
    fn refuses_reserved_keys_before_any_call() {
        let params = BTreeMap::from([("processes".to_string(), "300".to_string())]);
        assert_eq!(decide(&params, &BTreeMap::new(), None), Decision::Refuse(vec!["processes".to_string()]));
    }

    #[test]
    fn starts_on_a_genuinely_new_parameter_map() {
        let params = BTreeMap::from([("parallel_servers_target".to_string(), "16".to_string())]);
        assert_eq!(decide(&params, &BTreeMap::new(), None), Decision::Start);
    }

    #[tokio::test]
    async fn apply_then_verify_round_trips() {
        let agent: Arc<dyn AgentClient> = Arc::new(FakeAgent::default());
        let params = BTreeMap::from([("open_cursors_user_limit".to_string(), "400".to_string())]);
        let applied = apply_all(&agent, &params).await.unwrap();
        assert_eq!(applied, vec![Applied { key: "open_cursors_user_limit".into(), required_restart: false }]);
        assert!(verify_applied(&agent, &params).await.unwrap());
    }

    #[tokio::test]
    async fn rollback_recovers_bounces_and_reapplies() {
        let agent: Arc<dyn AgentClient> = Arc::new(FakeAgent::default());
        let snapshot = BTreeMap::from([("parallel_servers_target".to_string(), "4".to_string())]);
        rollback(&agent, &snapshot).await.unwrap();
        let fake = agent.as_ref();
        assert!(verify_applied(&agent, &snapshot).await.unwrap());
        let _ = fake;
    }
}
