//! The main per-resource reconcile loop (spec §4.12): fetches the `Instance`,
//! validates its spec, reconciles derived objects, and dispatches the first
//! applicable sub-state-machine. Everything else in this crate is a building
//! block this module assembles.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolumeClaim, Pod, Secret, Service};
use k8s_openapi::api::storage::v1::StorageClass;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::runtime::controller::{Action, Controller};
use kube::runtime::events::{Recorder, Reporter};
use kube::runtime::finalizer::{finalizer, Event as FinalizerEvent};
use kube::{Client, Resource, ResourceExt};
use tracing::{debug, warn};

use instance_operator_agent::{AgentClient, AgentError, TonicAgentClient};
use instance_operator_types::condition::{elapsed_time, find_condition, upsert_condition, Condition, ConditionStatus, ConditionType, Reason};
use instance_operator_types::instance::{disk_names, in_maintenance_window, InstanceMode, SecretReference, ServiceCapability};
use instance_operator_types::validate::validate_spec;
use instance_operator_types::{Backup, Config, Instance, InstanceStatus, Pitr};

use crate::error::{Error, Result};
use crate::events::{reason as event_reason, EventEmitter};
use crate::lock::{self, InstanceLocks};
use crate::lro::{self, LroPoll};
use crate::metrics::Metrics;
use crate::progress::{self, ProgressResult};
use crate::sm::{database_instance, parameter_update, patching, pitr, restore, standby_dr, SmOutcome};
use crate::{config::OperatorConfig, resize, status, workload};

pub const FINALIZER: &str = "instance.dbops.example.com/finalizer";
const FIELD_MANAGER: &str = "instance-operator";

/// Shared state handed to every reconcile tick, mirroring the teacher-adjacent
/// `Context` the CoreDB operator carries: the cluster client, process-wide
/// metrics, and this crate's own advisory lock map.
#[derive(Clone)]
pub struct Context {
    pub client: Client,
    pub config: OperatorConfig,
    pub metrics: Metrics,
    pub locks: Arc<InstanceLocks>,
}

impl Context {
    pub fn new(client: Client, config: OperatorConfig, metrics: Metrics) -> Arc<Self> {
        Arc::new(Context { client, config, metrics, locks: Arc::new(InstanceLocks::new()) })
    }
}

/// Starts the controller loop; returns once the event stream ends (normally
/// only on shutdown).
pub async fn run(ctx: Arc<Context>) {
    let instances: Api<Instance> = Api::all(ctx.client.clone());
    Controller::new(instances, kube::runtime::watcher::Config::default())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok(o) => debug!("reconciled {:?}", o),
                Err(e) => warn!("reconcile failed: {:?}", e),
            }
        })
        .await;
}

fn error_policy(instance: Arc<Instance>, error: &Error, ctx: Arc<Context>) -> Action {
    warn!(instance = %instance.name_any(), "reconcile failed: {error}");
    ctx.metrics.reconcile_failures.with_label_values(&[&instance.name_any()]).inc();
    if error.is_transient() {
        Action::requeue(Duration::from_secs(15))
    } else {
        Action::requeue(ctx.config.default_requeue)
    }
}

async fn reconcile(instance: Arc<Instance>, ctx: Arc<Context>) -> Result<Action> {
    ctx.metrics.reconcile_count.inc();
    let ns = instance.namespace().unwrap_or_default();
    let instances: Api<Instance> = Api::namespaced(ctx.client.clone(), &ns);

    finalizer(&instances, FINALIZER, instance, |event| async {
        match event {
            FinalizerEvent::Apply(instance) => apply(&instance, &ctx).await,
            FinalizerEvent::Cleanup(instance) => cleanup(&instance, &ctx).await,
        }
    })
    .await
    .map_err(|e| Error::from(Box::new(e)))
}

fn recorder_for(client: Client, instance: &Instance) -> Recorder {
    let reporter = Reporter::from("instance-operator");
    Recorder::new(client, reporter, instance.object_ref(&()))
}

/// Cascade-deletes the PDB-scoped and monitoring children this controller
/// owns beyond what owner-reference garbage collection already covers, then
/// lets `finalizer()` remove the finalizer (spec §4.12).
async fn cleanup(instance: &Instance, ctx: &Context) -> Result<Action> {
    let ns = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    let recorder = recorder_for(ctx.client.clone(), instance);
    let events = EventEmitter::new(&recorder);

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ns);
    let monitoring_name = workload::names::monitoring_deployment(&name);
    if deployments.get_opt(&monitoring_name).await?.is_some() {
        deployments.delete(&monitoring_name, &DeleteParams::default()).await?;
    }

    events.normal("Delete", "InstanceDeleted", format!("Instance {name} deleted")).await?;
    Ok(Action::await_change())
}

/// One reconcile tick's worth of work (spec §4.12). Dispatch order: standby
/// DR, parameter update, dNFS toggle, patching, restore, resize — the first
/// applicable one advances a single step.
async fn apply(instance: &Instance, ctx: &Context) -> Result<Action> {
    let _timer = ctx.metrics.reconcile_duration_seconds.with_label_values(&[&instance.name_any()]).start_timer();
    let ns = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    let now = Utc::now();

    validate_spec(&instance.spec)?;
    reject_multiple_configs(&ns, ctx).await?;

    let instances: Api<Instance> = Api::namespaced(ctx.client.clone(), &ns);
    let mut status = instance.status.clone().unwrap_or_default();
    let prior_reason = find_condition(&status.conditions, ConditionType::Ready).map(|c| c.reason.as_str());

    let recorder = recorder_for(ctx.client.clone(), instance);
    let events = EventEmitter::new(&recorder);

    if instance.spec.mode == InstanceMode::Pause {
        status.locked_by_controller = lock::try_acquire(&status.locked_by_controller, "pause").ok().flatten();
        upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::PauseMode, "paused by spec.mode", now);
        patch_status(&instances, &name, &status).await?;
        return Ok(Action::requeue(ctx.config.default_requeue));
    }

    reconcile_derived_objects(instance, &status, ctx).await?;

    let requeue = advance_provisioning(instance, &mut status, ctx, now).await?;

    if let Some(requeue) = requeue {
        ctx.metrics.record_reason(&ns, &name, prior_reason, find_condition(&status.conditions, ConditionType::Ready).map(|c| c.reason.as_str()).unwrap_or(""));
        status::apply_generation_bookkeeping(&instance.spec, &mut status, instance.meta().generation.unwrap_or(0));
        patch_status(&instances, &name, &status).await?;
        return Ok(requeue);
    }

    // Ready is True: dispatch the database-instance SM, then (once it is
    // CreateComplete) the operational sub-state-machines in spec order.
    let db_ready_reason = find_condition(&status.conditions, ConditionType::DatabaseInstanceReady).map(|c| c.reason);
    let outcome = if db_ready_reason != Some(Reason::CreateComplete) {
        run_database_instance_sm(instance, &mut status, ctx, &events, now).await?
    } else {
        run_operational_sms(instance, &mut status, ctx, &events, now).await?
    };

    reconcile_endpoint(instance, &mut status, ctx).await?;

    status::apply_generation_bookkeeping(&instance.spec, &mut status, instance.meta().generation.unwrap_or(0));
    ctx.metrics.record_reason(
        &ns,
        &name,
        prior_reason,
        find_condition(&status.conditions, ConditionType::Ready).map(|c| c.reason.as_str()).unwrap_or(""),
    );
    patch_status(&instances, &name, &status).await?;

    Ok(match outcome {
        SmOutcome::Progressed(delay) => Action::requeue(delay),
        SmOutcome::Idle | SmOutcome::Settled => Action::requeue(ctx.config.default_requeue),
    })
}

async fn reject_multiple_configs(ns: &str, ctx: &Context) -> Result<()> {
    let configs: Api<Config> = Api::namespaced(ctx.client.clone(), ns);
    let list = configs.list(&ListParams::default()).await?;
    if list.items.len() > 1 {
        return Err(Error::MultipleConfigs(ns.to_string()));
    }
    Ok(())
}

/// Provisioning stage: ensure derived objects exist, probe progress, and
/// drive `Ready` from `nil` through `CreateInProgress` to `CreateComplete`.
/// Returns `Some(Action)` while still provisioning (caller should return
/// immediately); `None` once `Ready` is already True.
async fn advance_provisioning(instance: &Instance, status: &mut InstanceStatus, ctx: &Context, now: chrono::DateTime<Utc>) -> Result<Option<Action>> {
    if find_condition(&status.conditions, ConditionType::Ready).map(|c| c.status) == Some(ConditionStatus::True) {
        return Ok(None);
    }

    let ns = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
    let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &ns);

    let sts_name = workload::names::stateful_set(&name);
    let sts = sts_api.get_opt(&sts_name).await?;
    let pods = pod_api.list(&ListParams::default().labels(&format!("app={name}"))).await?.items;
    let pod_name = workload::names::pod(&name);

    let result: ProgressResult = progress::probe(1, sts.as_ref(), &pods, &pod_name);
    let message = progress::format_message("CreateInProgress", &result);

    if result.percent >= 100 {
        upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "provisioned", now);
        return Ok(None);
    }

    let elapsed = find_condition(&status.conditions, ConditionType::Ready)
        .map(|c| elapsed_time(c, now))
        .unwrap_or(Duration::ZERO);
    if elapsed > ctx.config.instance_ready_timeout {
        warn!(instance = %name, "instance ready timeout exceeded, still waiting ({} elapsed)", humantime_secs(elapsed));
    }

    upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::CreateInProgress, message, now);
    Ok(Some(Action::requeue(Duration::from_secs(5))))
}

fn humantime_secs(d: Duration) -> String {
    format!("{}s", d.as_secs())
}

/// Database-instance bootstrap (spec §4.7): chooses the initial path on
/// first entry, then advances the `BootstrapDatabase` LRO to completion.
async fn run_database_instance_sm(
    instance: &Instance,
    status: &mut InstanceStatus,
    ctx: &Context,
    events: &EventEmitter<'_>,
    now: chrono::DateTime<Utc>,
) -> Result<SmOutcome> {
    let reason = find_condition(&status.conditions, ConditionType::DatabaseInstanceReady).map(|c| c.reason);

    let path = if instance.spec.restore.is_some() {
        database_instance::Path::Restore
    } else {
        // Seeded/unseeded is discovered from the service image; conservatively
        // assume unseeded (the longer, safer path) until proven seeded.
        let agent = agent_client_for(instance, ctx).await;
        match agent {
            Ok(agent) => match agent.fetch_service_image_metadata().await {
                Ok(meta) if meta.seeded_image => database_instance::Path::Seeded,
                Ok(_) => database_instance::Path::Unseeded,
                Err(_) => database_instance::Path::Unseeded,
            },
            Err(_) => database_instance::Path::Unseeded,
        }
    };

    let Some(reason) = reason else {
        let initial = database_instance::initial_reason(path);
        upsert_condition(&mut status.conditions, ConditionType::DatabaseInstanceReady, ConditionStatus::False, initial, "awaiting bootstrap", now);
        return Ok(SmOutcome::Progressed(Duration::from_secs(5)));
    };

    match reason {
        Reason::CreatePending if database_instance::needs_create_step(path) => {
            upsert_condition(&mut status.conditions, ConditionType::DatabaseInstanceReady, ConditionStatus::False, Reason::CreateInProgress, "creating CDB", now);
            Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval))
        }
        Reason::CreateInProgress => {
            upsert_condition(
                &mut status.conditions,
                ConditionType::DatabaseInstanceReady,
                ConditionStatus::False,
                Reason::BootstrapPending,
                "CDB created",
                now,
            );
            Ok(SmOutcome::Progressed(Duration::from_secs(5)))
        }
        Reason::BootstrapPending | Reason::RestorePending => {
            let agent = agent_client_for(instance, ctx).await?;
            let operation_id = instance_operator_agent::operation_id(instance.uid().as_deref().unwrap_or_default(), instance_operator_agent::OperationKind::BootstrapDatabase, None);
            lro::start_idempotent(|| agent.bootstrap_database(&operation_id, database_instance::bootstrap_mode(path))).await?;
            upsert_condition(
                &mut status.conditions,
                ConditionType::DatabaseInstanceReady,
                ConditionStatus::False,
                Reason::BootstrapInProgress,
                "bootstrap started",
                now,
            );
            Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval))
        }
        Reason::BootstrapInProgress => {
            let agent = agent_client_for(instance, ctx).await?;
            let operation_id = instance_operator_agent::operation_id(instance.uid().as_deref().unwrap_or_default(), instance_operator_agent::OperationKind::BootstrapDatabase, None);
            match lro::poll(&agent, &operation_id).await? {
                LroPoll::InProgress => {
                    let elapsed = find_condition(&status.conditions, ConditionType::DatabaseInstanceReady).map(|c| elapsed_time(c, now)).unwrap_or(Duration::ZERO);
                    let timeout = database_instance::bootstrap_timeout(path, ctx.config.db_ready_seeded_timeout, ctx.config.db_ready_unseeded_timeout);
                    if elapsed > timeout {
                        events.warning("BootstrapTimeout", event_reason::DATABASE_INSTANCE_TIMEOUT, "bootstrap still in progress past its timeout").await?;
                    }
                    Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval))
                }
                LroPoll::Done => {
                    upsert_condition(
                        &mut status.conditions,
                        ConditionType::DatabaseInstanceReady,
                        ConditionStatus::False,
                        Reason::ReconcileServices,
                        "bootstrap complete",
                        now,
                    );
                    Ok(SmOutcome::Progressed(Duration::from_secs(5)))
                }
                LroPoll::Failed(message) => {
                    warn!(instance = %instance.name_any(), "bootstrap failed: {message}");
                    Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval))
                }
            }
        }
        Reason::ReconcileServices => {
            if instance.spec.service_enabled(ServiceCapability::Monitoring) {
                let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &instance.namespace().unwrap_or_default());
                let monitoring = workload::build_monitoring_deployment(instance, &instance.spec.images);
                server_side_apply(&deployments, &monitoring.name_any(), &monitoring).await?;
            }
            // First incarnation after resetlogs; the agent bumps this again on
            // every subsequent open-resetlogs (restore, standby failover).
            status.current_database_incarnation.get_or_insert(1);
            upsert_condition(&mut status.conditions, ConditionType::DatabaseInstanceReady, ConditionStatus::True, Reason::CreateComplete, "ready", now);
            events.normal("BootstrapComplete", event_reason::INSTANCE_READY, "database instance bootstrap complete").await?;
            Ok(SmOutcome::Settled)
        }
        _ => Ok(SmOutcome::Idle),
    }
}

/// Dispatches the first applicable operational sub-state-machine, spec §4.12
/// order: standby-DR, parameter-update, dNFS toggle, patching, restore,
/// resize.
async fn run_operational_sms(
    instance: &Instance,
    status: &mut InstanceStatus,
    ctx: &Context,
    events: &EventEmitter<'_>,
    now: chrono::DateTime<Utc>,
) -> Result<SmOutcome> {
    if instance.spec.replication_settings.is_some() || find_condition(&status.conditions, ConditionType::StandbyDRReady).is_some() {
        return run_standby_dr_sm(instance, status, ctx, events, now).await;
    }

    let decision = parameter_update::decide(&instance.spec.parameters, &status.current_parameters, status.last_failed_parameter_update.as_ref());
    if decision != parameter_update::Decision::Skip {
        return run_parameter_update_sm(instance, status, ctx, decision, now).await;
    }

    if instance.spec.enable_dnfs != status.dnfs_enabled.unwrap_or(false) {
        let agent = agent_client_for(instance, ctx).await?;
        agent.set_dnfs_state(instance.spec.enable_dnfs).await.map_err(Error::Agent)?;
        status.dnfs_enabled = Some(instance.spec.enable_dnfs);
        return Ok(SmOutcome::Settled);
    }

    if instance.spec.service_enabled(ServiceCapability::Patching)
        && patching::should_start(true, true, true, &instance.spec.images, &status.active_images, status.last_failed_images.as_ref())
    {
        return run_patching_sm(instance, status, ctx, events, now).await;
    }

    if let Some(restore_spec) = &instance.spec.restore {
        if restore::is_new_request(restore_spec.request_time, status.last_restore_time) {
            return run_restore_sm(instance, status, ctx, events, now).await;
        }
    }

    run_resize_sm(instance, status, ctx, now).await
}

async fn run_parameter_update_sm(
    instance: &Instance,
    status: &mut InstanceStatus,
    ctx: &Context,
    decision: parameter_update::Decision,
    now: chrono::DateTime<Utc>,
) -> Result<SmOutcome> {
    match decision {
        parameter_update::Decision::Refuse(offenders) => {
            warn!(instance = %instance.name_any(), "refusing reserved parameters: {offenders:?}");
            Ok(SmOutcome::Idle)
        }
        parameter_update::Decision::Skip => Ok(SmOutcome::Idle),
        parameter_update::Decision::Start => {
            let agent = agent_client_for(instance, ctx).await?;
            let reason = find_condition(&status.conditions, ConditionType::Ready).map(|c| c.reason);
            match reason {
                Some(Reason::ParameterUpdateRollback) => {
                    let dynamic_snapshot = status.current_parameters.clone();
                    match parameter_update::rollback(&agent, &dynamic_snapshot).await {
                        Ok(()) => {
                            status.last_failed_parameter_update = Some(instance.spec.parameters.clone());
                            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "rollback complete", now);
                            Ok(SmOutcome::Settled)
                        }
                        Err(e) => {
                            warn!(instance = %instance.name_any(), "rollback failed: {e}");
                            Ok(SmOutcome::Progressed(Duration::from_secs(10)))
                        }
                    }
                }
                Some(Reason::ParameterUpdateAwaitingWindow) => {
                    if !in_maintenance_window(&instance.spec.maintenance_window, now) {
                        return Ok(SmOutcome::Progressed(Duration::from_secs(60)));
                    }
                    agent.bounce_database().await.map_err(Error::Agent)?;
                    status.current_parameters = instance.spec.parameters.clone();
                    upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "parameters applied", now);
                    Ok(SmOutcome::Settled)
                }
                _ => {
                    upsert_condition(
                        &mut status.conditions,
                        ConditionType::Ready,
                        ConditionStatus::False,
                        Reason::ParameterUpdateInProgress,
                        "applying parameters",
                        now,
                    );
                    match parameter_update::apply_all(&agent, &instance.spec.parameters).await {
                        Ok(applied) => {
                            if !parameter_update::verify_applied(&agent, &instance.spec.parameters).await? {
                                upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::ParameterUpdateRollback, "verification failed", now);
                                return Ok(SmOutcome::Progressed(Duration::from_secs(10)));
                            }
                            if applied.iter().any(|a| a.required_restart) {
                                // A restart bounces the instance; only do that inside
                                // a declared maintenance window (spec §4.6).
                                if !in_maintenance_window(&instance.spec.maintenance_window, now) {
                                    upsert_condition(
                                        &mut status.conditions,
                                        ConditionType::Ready,
                                        ConditionStatus::False,
                                        Reason::ParameterUpdateAwaitingWindow,
                                        "parameters applied, restart awaiting maintenance window",
                                        now,
                                    );
                                    return Ok(SmOutcome::Progressed(Duration::from_secs(60)));
                                }
                                agent.bounce_database().await.map_err(Error::Agent)?;
                            }
                            status.current_parameters = instance.spec.parameters.clone();
                            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "parameters applied", now);
                            Ok(SmOutcome::Settled)
                        }
                        Err(e) => {
                            warn!(instance = %instance.name_any(), "parameter update failed: {e}");
                            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::ParameterUpdateRollback, "update failed, rolling back", now);
                            Ok(SmOutcome::Progressed(Duration::from_secs(5)))
                        }
                    }
                }
            }
        }
    }
}

async fn run_standby_dr_sm(instance: &Instance, status: &mut InstanceStatus, ctx: &Context, events: &EventEmitter<'_>, now: chrono::DateTime<Utc>) -> Result<SmOutcome> {
    let Some(replication) = instance.spec.replication_settings.clone() else {
        // Promotion trigger: spec.replicationSettings was cleared.
        if find_condition(&status.conditions, ConditionType::StandbyDRReady).map(|c| c.reason) == Some(Reason::StandbyDRDataGuardReplicationInProgress) {
            let agent = agent_client_for(instance, ctx).await?;
            let uid = instance.uid().unwrap_or_default();
            let promote_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::PromoteStandby, None);
            lro::start_idempotent(|| agent.promote_standby(&promote_id)).await?;
            let bootstrap_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::BootstrapStandby, None);
            lro::start_idempotent(|| agent.bootstrap_standby(&bootstrap_id)).await?;
            upsert_condition(&mut status.conditions, ConditionType::StandbyDRReady, ConditionStatus::True, Reason::StandbyDRPromoteCompleted, "promoted", now);
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "standby promoted", now);
            upsert_condition(&mut status.conditions, ConditionType::DatabaseInstanceReady, ConditionStatus::True, Reason::CreateComplete, "standby promoted", now);
            events.normal("Promote", event_reason::STANDBY_PROMOTED, "standby promoted to primary").await?;
            return Ok(SmOutcome::Settled);
        }
        return Ok(SmOutcome::Idle);
    };

    let reason = find_condition(&status.conditions, ConditionType::StandbyDRReady).map(|c| c.reason).unwrap_or(Reason::StandbyDRVerifyFailed);

    match reason {
        Reason::StandbyDRVerifyFailed => {
            match standby_dr::verify_standby_settings_locally(
                instance.spec.db_unique_name.as_deref(),
                &instance.spec.cdb_name,
                instance.spec.images.get(&instance_operator_types::instance::ImageRole::Service).map(String::as_str),
                &replication,
            ) {
                Ok(()) => {
                    upsert_condition(&mut status.conditions, ConditionType::StandbyDRReady, ConditionStatus::False, Reason::StandbyDRVerifyCompleted, "verified", now);
                    Ok(SmOutcome::Progressed(Duration::from_secs(5)))
                }
                Err(e) => {
                    warn!(instance = %instance.name_any(), "standby verification failed: {e}");
                    Ok(SmOutcome::Progressed(Duration::from_secs(60)))
                }
            }
        }
        Reason::StandbyDRVerifyCompleted => {
            let agent = agent_client_for(instance, ctx).await?;
            let uid = instance.uid().unwrap_or_default();
            let operation_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::CreateStandby, None);
            let password = resolve_secret_password(ctx, &instance.namespace().unwrap_or_default(), &replication.primary_user.password_secret_ref).await?;
            lro::start_idempotent(|| {
                agent.create_standby(
                    &operation_id,
                    &replication.primary_host,
                    replication.primary_port,
                    &replication.primary_user.name,
                    &password,
                )
            })
            .await?;
            upsert_condition(&mut status.conditions, ConditionType::StandbyDRReady, ConditionStatus::False, Reason::StandbyDRCreateInProgress, "creating standby", now);
            Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval))
        }
        Reason::StandbyDRCreateInProgress => {
            let agent = agent_client_for(instance, ctx).await?;
            let uid = instance.uid().unwrap_or_default();
            let operation_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::CreateStandby, None);
            match lro::poll(&agent, &operation_id).await? {
                LroPoll::InProgress => Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval)),
                LroPoll::Done => {
                    upsert_condition(&mut status.conditions, ConditionType::StandbyDRReady, ConditionStatus::False, Reason::StandbyDRCreateCompleted, "standby created", now);
                    Ok(SmOutcome::Progressed(Duration::from_secs(5)))
                }
                LroPoll::Failed(message) => {
                    upsert_condition(&mut status.conditions, ConditionType::StandbyDRReady, ConditionStatus::False, Reason::StandbyDRCreateFailed, message, now);
                    Ok(SmOutcome::Progressed(Duration::from_secs(30)))
                }
            }
        }
        Reason::StandbyDRCreateCompleted => {
            let services: Api<Service> = Api::namespaced(ctx.client.clone(), &instance.namespace().unwrap_or_default());
            let db_svc = services.get_opt(&workload::names::db_service(&instance.name_any())).await?;
            let ingress = db_svc.as_ref().and_then(|s| s.status.as_ref()).and_then(|s| s.load_balancer.as_ref()).and_then(|lb| lb.ingress.as_ref()).and_then(|v| v.first());
            let host = standby_dr::standby_host_from_ingress(
                ingress.and_then(|i| i.hostname.as_deref()),
                ingress.and_then(|i| i.ip.as_deref()),
            )?;
            let agent = agent_client_for(instance, ctx).await?;
            let uid = instance.uid().unwrap_or_default();
            let operation_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::SetUpDataGuard, None);
            lro::start_idempotent(|| agent.set_up_data_guard(&operation_id, &host)).await?;
            upsert_condition(&mut status.conditions, ConditionType::StandbyDRReady, ConditionStatus::False, Reason::StandbyDRSetUpDataGuardCompleted, "data guard configured", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(5)))
        }
        Reason::StandbyDRSetUpDataGuardCompleted => {
            upsert_condition(
                &mut status.conditions,
                ConditionType::StandbyDRReady,
                ConditionStatus::False,
                Reason::StandbyDRDataGuardReplicationInProgress,
                "replicating",
                now,
            );
            Ok(SmOutcome::Progressed(ctx.config.standby_reconcile_interval))
        }
        Reason::StandbyDRDataGuardReplicationInProgress => {
            let poll_due = find_condition(&status.conditions, ConditionType::StandbyDRReady).map(|c| elapsed_time(c, now)).unwrap_or(Duration::ZERO);
            if !standby_dr::should_poll_data_guard_status(poll_due, ctx.config.standby_reconcile_interval) {
                return Ok(SmOutcome::Idle);
            }
            let agent = agent_client_for(instance, ctx).await?;
            status.data_guard_output = Some(agent.data_guard_status().await.map_err(Error::Agent)?);
            Ok(SmOutcome::Progressed(ctx.config.standby_reconcile_interval))
        }
        _ => Ok(SmOutcome::Idle),
    }
}

async fn run_patching_sm(instance: &Instance, status: &mut InstanceStatus, ctx: &Context, events: &EventEmitter<'_>, now: chrono::DateTime<Utc>) -> Result<SmOutcome> {
    let reason = find_condition(&status.conditions, ConditionType::Ready).map(|c| c.reason).unwrap_or(Reason::CreateComplete);
    let ns = instance.namespace().unwrap_or_default();
    let name = instance.name_any();

    match reason {
        Reason::CreateComplete => {
            let snapshots: Api<crate::snapshot::VolumeSnapshot> = Api::namespaced(ctx.client.clone(), &ns);
            let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &ns);
            let claim_list = claims.list(&ListParams::default().labels(&format!("app={name}"))).await?;
            let backup_id = format!("patching-backup-{name}-{}", now.timestamp_nanos_opt().unwrap_or_default());
            for claim in &claim_list.items {
                let claim_name = claim.name_any();
                let snap_meta = k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta {
                    name: Some(patching::snapshot_name(&name, now, &claim_name)),
                    namespace: Some(ns.clone()),
                    ..Default::default()
                };
                let snapshot = crate::snapshot::build_snapshot(snap_meta, &claim_name, None);
                server_side_apply(&snapshots, &snapshot.name_any(), &snapshot).await?;
            }
            status.backup_id = Some(backup_id);
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::PatchingBackupStarted, "taking pre-patch snapshot", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(10)))
        }
        Reason::PatchingBackupStarted => {
            let snapshots: Api<crate::snapshot::VolumeSnapshot> = Api::namespaced(ctx.client.clone(), &ns);
            let list = snapshots.list(&ListParams::default().labels(&format!("app={name}"))).await?;
            if list.items.iter().any(|s| s.status.as_ref().and_then(|st| st.failed()).is_some()) {
                upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::PatchingBackupFailure, "snapshot failed", now);
                return Ok(SmOutcome::Progressed(Duration::from_secs(10)));
            }
            if list.items.iter().all(|s| s.status.as_ref().map(|st| st.is_ready()).unwrap_or(false)) {
                upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::DeploymentSetPatchingInProgress, "patching monitoring deployment", now);
                return Ok(SmOutcome::Progressed(Duration::from_secs(5)));
            }
            Ok(SmOutcome::Progressed(Duration::from_secs(10)))
        }
        Reason::DeploymentSetPatchingInProgress => {
            if instance.spec.service_enabled(ServiceCapability::Monitoring) {
                let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ns);
                let images = patching::deployment_images(false, &instance.spec.images, &status.active_images);
                let deployment = workload::build_monitoring_deployment(instance, images);
                server_side_apply(&deployments, &deployment.name_any(), &deployment).await?;
            }
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::DeploymentSetPatchingComplete, "monitoring deployment patched", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(5)))
        }
        Reason::DeploymentSetPatchingComplete => {
            if !patching::stateful_set_images_differ(&instance.spec.images, &status.active_images) {
                upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::DatabasePatchingInProgress, "no workload images changed", now);
                return Ok(SmOutcome::Progressed(Duration::from_secs(5)));
            }
            acquire_or_err(status, "patching")?;
            let sts: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
            sts.delete(&workload::names::stateful_set(&name), &DeleteParams::default()).await.ok();
            let new_sts = workload::build_stateful_set(instance, &instance.spec.images);
            server_side_apply(&sts, &new_sts.name_any(), &new_sts).await?;
            release_lock(status, "patching");
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::StatefulSetPatchingInProgress, "recreating workload", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(10)))
        }
        Reason::StatefulSetPatchingInProgress => {
            let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
            let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &ns);
            let sts = sts_api.get_opt(&workload::names::stateful_set(&name)).await?;
            let pods = pod_api.list(&ListParams::default().labels(&format!("app={name}"))).await?.items;
            let result = progress::probe(1, sts.as_ref(), &pods, &workload::names::pod(&name));
            if result.percent >= 100 {
                upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::StatefulSetPatchingComplete, "workload ready", now);
                return Ok(SmOutcome::Progressed(Duration::from_secs(5)));
            }
            let elapsed = find_condition(&status.conditions, ConditionType::Ready).map(|c| elapsed_time(c, now)).unwrap_or(Duration::ZERO);
            if elapsed > ctx.config.database_patching_timeout {
                upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::StatefulSetPatchingFailure, "workload patching timed out", now);
            }
            Ok(SmOutcome::Progressed(Duration::from_secs(10)))
        }
        Reason::StatefulSetPatchingComplete => {
            let agent = agent_client_for(instance, ctx).await?;
            let uid = instance.uid().unwrap_or_default();
            let operation_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::ApplyDataPatch, None);
            let target_version = instance.spec.version.clone().unwrap_or_default();
            lro::start_idempotent(|| agent.apply_data_patch(&operation_id, &target_version)).await?;
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::DatabasePatchingInProgress, "applying database patch", now);
            Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval))
        }
        Reason::DatabasePatchingInProgress => {
            let agent = agent_client_for(instance, ctx).await?;
            let uid = instance.uid().unwrap_or_default();
            let operation_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::ApplyDataPatch, None);
            match lro::poll(&agent, &operation_id).await? {
                LroPoll::InProgress => Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval)),
                LroPoll::Done => {
                    status.active_images = instance.spec.images.clone();
                    status.current_active_state_machine = None;
                    upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "patching complete", now);
                    Ok(SmOutcome::Settled)
                }
                LroPoll::Failed(message) => {
                    upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::DatabasePatchingFailure, message, now);
                    Ok(SmOutcome::Progressed(Duration::from_secs(10)))
                }
            }
        }
        Reason::PatchingBackupFailure
        | Reason::DeploymentSetPatchingFailure
        | Reason::StatefulSetPatchingFailure
        | Reason::DatabasePatchingFailure => {
            events.warning("PatchingFailed", event_reason::PATCHING_ROLLBACK, "rolling back patching to the last known-good image set").await?;
            status.last_failed_images = Some(instance.spec.images.clone());
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::PatchingRecoveryInProgress, "recovering", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(10)))
        }
        Reason::PatchingRecoveryInProgress => {
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::PatchingRecoveryCompleted, "recovered", now);
            Ok(SmOutcome::Settled)
        }
        _ => Ok(SmOutcome::Idle),
    }
}

/// In-place resource resize and online volume expansion (spec §4.11). Unlike
/// the other sub-SMs this one has a single in-flight reason
/// (`ResizingInProgress`): the decision is recomputed against the live
/// workload/claims each tick rather than tracked in its own vocabulary.
async fn run_resize_sm(instance: &Instance, status: &mut InstanceStatus, ctx: &Context, now: chrono::DateTime<Utc>) -> Result<SmOutcome> {
    let ns = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    let sts_name = workload::names::stateful_set(&name);

    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
    let claims_api: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &ns);

    let running_sts = sts_api.get_opt(&sts_name).await?;
    let running_resources = running_sts
        .as_ref()
        .and_then(|sts| sts.spec.as_ref())
        .and_then(|spec| spec.template.spec.as_ref())
        .and_then(|pod| pod.containers.iter().find(|c| c.name == "oracledb"))
        .and_then(|c| c.resources.clone());

    let claim_list = claims_api.list(&ListParams::default().labels(&format!("app={name}"))).await?;
    let claim_capacity = |disk_name: &str| -> Option<k8s_openapi::apimachinery::pkg::api::resource::Quantity> {
        let claim_name = workload::names::volume_claim(disk_name, &sts_name);
        claim_list.items.iter().find(|c| c.name_any() == claim_name)?.status.as_ref()?.capacity.as_ref()?.get("storage").cloned()
    };

    let decision = resize::decide(instance.spec.database_resources.as_ref(), running_resources.as_ref(), &instance.spec.disks, claim_capacity);
    let reason = find_condition(&status.conditions, ConditionType::Ready).map(|c| c.reason).unwrap_or(Reason::CreateComplete);

    if reason == Reason::ResizingInProgress {
        return match decision {
            resize::ResizeDecision::DisksGrew(grown) => {
                if resize::all_claims_caught_up(&grown, claim_capacity) {
                    acquire_or_err(status, "resize")?;
                    sts_api.delete(&sts_name, &DeleteParams::default()).await.ok();
                    release_lock(status, "resize");
                    upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "volume expansion complete, workload recreating", now);
                    Ok(SmOutcome::Settled)
                } else {
                    Ok(SmOutcome::Progressed(Duration::from_secs(15)))
                }
            }
            resize::ResizeDecision::ResourcesChanged | resize::ResizeDecision::None => {
                upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::CreateComplete, "resize complete", now);
                Ok(SmOutcome::Settled)
            }
        };
    }

    match decision {
        resize::ResizeDecision::None => Ok(SmOutcome::Idle),
        resize::ResizeDecision::DisksGrew(grown) => {
            let storage_classes: Api<StorageClass> = Api::all(ctx.client.clone());
            for growth in &grown {
                let Some(disk) = instance.spec.disks.iter().find(|d| d.name == growth.disk_name) else {
                    continue;
                };
                let expandable = storage_classes.get_opt(&disk.storage_class).await?.and_then(|sc| sc.allow_volume_expansion).unwrap_or(false);
                if !expandable {
                    return Err(Error::Other(format!("storage class {:?} does not allow volume expansion", disk.storage_class)));
                }
                let claim_name = workload::names::volume_claim(&disk.name, &sts_name);
                let mut requests = std::collections::BTreeMap::new();
                requests.insert("storage".to_string(), k8s_openapi::apimachinery::pkg::api::resource::Quantity(disk.size.clone()));
                let patch = serde_json::json!({ "spec": { "resources": { "requests": requests } } });
                claims_api.patch(&claim_name, &PatchParams::default(), &Patch::Merge(patch)).await?;
            }
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::ResizingInProgress, "expanding volume claims", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(15)))
        }
        resize::ResizeDecision::ResourcesChanged => {
            if let Some(mut sts) = running_sts {
                if let Some(container) = sts.spec.as_mut().and_then(|s| s.template.spec.as_mut()).and_then(|p| p.containers.iter_mut().find(|c| c.name == "oracledb")) {
                    container.resources = instance.spec.database_resources.clone();
                }
                server_side_apply(&sts_api, &sts_name, &sts).await?;
            }
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::ResizingInProgress, "resizing database container resources", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(10)))
        }
    }
}

async fn run_restore_sm(instance: &Instance, status: &mut InstanceStatus, ctx: &Context, events: &EventEmitter<'_>, now: chrono::DateTime<Utc>) -> Result<SmOutcome> {
    let Some(restore_spec) = &instance.spec.restore else {
        return Ok(SmOutcome::Idle);
    };
    let reason = find_condition(&status.conditions, ConditionType::Ready).map(|c| c.reason).unwrap_or(Reason::CreateComplete);
    let ns = instance.namespace().unwrap_or_default();
    let name = instance.name_any();

    match reason {
        Reason::CreateComplete | Reason::RestoreComplete | Reason::RestoreFailed => {
            status.last_restore_time = Some(restore_spec.request_time);
            status.backup_id = None;
            status.restore_snapshot_sources.clear();
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::RestorePreparationInProgress, "preparing restore", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(5)))
        }
        Reason::RestorePreparationInProgress => {
            if restore_spec.backup_type == instance_operator_types::instance::BackupType::Snapshot {
                acquire_or_err(status, "restore")?;
                let sts: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
                let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &ns);
                let sts_name = workload::names::stateful_set(&name);
                sts.delete(&sts_name, &DeleteParams::default()).await.ok();
                for disk in &instance.spec.disks {
                    let claim_name = workload::names::volume_claim(&disk.name, &sts_name);
                    claims.delete(&claim_name, &DeleteParams::default()).await.ok();
                }
                release_lock(status, "restore");
            }
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::RestorePreparationComplete, "prepared", now);
            Ok(SmOutcome::Progressed(Duration::from_secs(10)))
        }
        Reason::RestorePreparationComplete => {
            match restore_spec.backup_type {
                instance_operator_types::instance::BackupType::Snapshot => {
                    let backup = fetch_snapshot_restore_backup(instance, status, restore_spec, ctx).await?;
                    status.restore_snapshot_sources = backup.status.map(|s| s.snapshot_names).unwrap_or_default();
                    let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &ns);
                    for claim in workload::build_volume_claims(instance, &status.restore_snapshot_sources) {
                        server_side_apply(&claims, &claim.name_any(), &claim).await?;
                    }
                    let sts: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
                    let new_sts = workload::build_stateful_set(instance, &instance.spec.images);
                    server_side_apply(&sts, &new_sts.name_any(), &new_sts).await?;
                }
                instance_operator_types::instance::BackupType::Physical => {
                    let backup = resolve_physical_restore_backup(instance, status, restore_spec, ctx).await?;
                    let backup_id = backup.status.as_ref().and_then(|s| s.backup_id.clone()).ok_or_else(|| Error::BackupNotFound("selected backup has no status.backupID".to_string()))?;
                    let dop = restore::choose_dop(restore_spec.dop, backup.spec.dop);
                    let time_limit = restore::choose_time_limit_minutes(restore_spec.time_limit_minutes, ctx.config.phys_backup_time_limit_default);
                    let agent = agent_client_for(instance, ctx).await?;
                    let uid = instance.uid().unwrap_or_default();
                    let operation_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::PhysicalRestore, Some(restore_spec.request_time));
                    lro::start_idempotent(|| agent.physical_restore(&operation_id, &backup_id, "", "", dop, time_limit)).await?;
                }
            }
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::RestoreInProgress, "restoring", now);
            Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval))
        }
        Reason::RestoreInProgress => {
            let done = match restore_spec.backup_type {
                instance_operator_types::instance::BackupType::Snapshot => {
                    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
                    let pod_api: Api<Pod> = Api::namespaced(ctx.client.clone(), &ns);
                    let sts = sts_api.get_opt(&workload::names::stateful_set(&name)).await?;
                    let pods = pod_api.list(&ListParams::default().labels(&format!("app={name}"))).await?.items;
                    progress::probe(1, sts.as_ref(), &pods, &workload::names::pod(&name)).percent >= 100
                }
                instance_operator_types::instance::BackupType::Physical => {
                    let agent = agent_client_for(instance, ctx).await?;
                    let uid = instance.uid().unwrap_or_default();
                    let operation_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::PhysicalRestore, Some(restore_spec.request_time));
                    match lro::poll(&agent, &operation_id).await? {
                        LroPoll::Done => true,
                        LroPoll::InProgress => false,
                        LroPoll::Failed(message) => {
                            events.warning("RestoreFailed", event_reason::RESTORE_FAILED, message).await?;
                            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::RestoreFailed, "restore failed", now);
                            return Ok(SmOutcome::Progressed(Duration::from_secs(10)));
                        }
                    }
                }
            };
            if done {
                upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::False, Reason::PostRestoreBootstrapInProgress, "restore data in place", now);
                Ok(SmOutcome::Progressed(Duration::from_secs(5)))
            } else {
                Ok(SmOutcome::Progressed(ctx.config.lro_poll_interval))
            }
        }
        Reason::PostRestoreBootstrapInProgress => {
            let agent = agent_client_for(instance, ctx).await?;
            let uid = instance.uid().unwrap_or_default();
            let operation_id = instance_operator_agent::operation_id(&uid, instance_operator_agent::OperationKind::BootstrapDatabase, Some(restore_spec.request_time));
            lro::start_idempotent(|| agent.bootstrap_database(&operation_id, instance_operator_agent::pb::BootstrapMode::Restore)).await?;
            events.normal("RestoreComplete", event_reason::RESTORE_COMPLETE, "restore bootstrap started").await?;
            status.description = Some(restore::restore_description(now, restore_spec.backup_id.as_deref().unwrap_or("unknown"), restore_spec.backup_type));
            upsert_condition(&mut status.conditions, ConditionType::Ready, ConditionStatus::True, Reason::RestoreComplete, "restore complete", now);
            Ok(SmOutcome::Settled)
        }
        _ => Ok(SmOutcome::Idle),
    }
}

/// Determines the target PITR object a PITR restore refers to: directly via
/// `pitrRef`, or by listing `Pitr`s and matching `instanceRef` (spec §4.8).
async fn resolve_target_pitr(instance: &Instance, pitr_restore: &instance_operator_types::instance::PitrRestoreSpec, ctx: &Context) -> Result<Pitr> {
    let ns = instance.namespace().unwrap_or_default();
    let pitrs: Api<Pitr> = Api::namespaced(ctx.client.clone(), &ns);
    if let Some(pitr_ref) = &pitr_restore.pitr_ref {
        return Ok(pitrs.get(pitr_ref).await?);
    }
    pitrs
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .find(|p| p.spec.instance_ref == instance.name_any())
        .ok_or_else(|| Error::Other(format!("no Pitr found for instance {:?}", instance.name_any())))
}

/// Resolves the backup id a PITR restore should target: fetches the target
/// `Pitr` object, filters candidate backups down to its stream, and defaults
/// the target incarnation from `status.currentDatabaseIncarnation` or (absent
/// that) the `Pitr`'s own last-known incarnation (spec §4.8).
async fn resolve_pitr_backup_id(
    instance: &Instance,
    status: &InstanceStatus,
    pitr_restore: &instance_operator_types::instance::PitrRestoreSpec,
    ctx: &Context,
) -> Result<String> {
    let target = match (pitr_restore.scn, pitr_restore.timestamp) {
        (Some(scn), _) => pitr::PitrTarget::Scn(scn),
        (None, Some(ts)) => pitr::PitrTarget::Timestamp(ts),
        (None, None) => return Err(Error::Other("exactly one of pitrRestore.scn/timestamp must be set".to_string())),
    };

    let target_pitr = resolve_target_pitr(instance, pitr_restore, ctx).await?;
    let pitr_name = target_pitr.name_any();
    let target_incarnation = status
        .current_database_incarnation
        .or_else(|| target_pitr.status.as_ref().and_then(|s| s.current_database_incarnation))
        .ok_or_else(|| Error::Other("status.currentDatabaseIncarnation is not yet known, cannot select a PITR backup".to_string()))?;

    let ns = instance.namespace().unwrap_or_default();
    let backups: Api<Backup> = Api::namespaced(ctx.client.clone(), &ns);
    let candidates: Vec<pitr::BackupCandidate> = backups
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .filter(|b| b.spec.instance_ref == instance.name_any())
        .filter_map(|b| {
            let backup_status = b.status?;
            if backup_status.pitr.as_deref() != Some(pitr_name.as_str()) {
                return None;
            }
            let ready = backup_status.is_ready();
            Some(pitr::BackupCandidate {
                backup_id: backup_status.backup_id?,
                ready,
                incarnation: backup_status.incarnation,
                parent_incarnation: backup_status.parent_incarnation,
                scn: backup_status.scn,
                timestamp: backup_status.timestamp,
                recovery_window_start: backup_status.recovery_window_start,
                recovery_window_end: backup_status.recovery_window_end,
            })
        })
        .collect();

    let chosen = pitr::select_backup(&candidates, target_incarnation, target)?;
    Ok(chosen.backup_id.clone())
}

/// Looks a `Backup` up by `backupRef`/`backupID` (spec §4.8's "Backup
/// selection"), resolving a PITR request through [`resolve_pitr_backup_id`]
/// first.
async fn lookup_restore_backup(
    instance: &Instance,
    status: &InstanceStatus,
    restore_spec: &instance_operator_types::instance::RestoreSpec,
    ctx: &Context,
) -> Result<Backup> {
    let ns = instance.namespace().unwrap_or_default();
    let backups: Api<Backup> = Api::namespaced(ctx.client.clone(), &ns);

    if let Some(pitr_restore) = &restore_spec.pitr_restore {
        let backup_id = resolve_pitr_backup_id(instance, status, pitr_restore, ctx).await?;
        let list = backups.list(&ListParams::default()).await?;
        return restore::find_backup_by_id(&list.items, &backup_id, |b| b.status.as_ref().and_then(|s| s.backup_id.as_deref()))
            .cloned()
            .ok_or(Error::BackupNotFound(backup_id));
    }
    if let Some(backup_ref) = &restore_spec.backup_ref {
        return Ok(backups.get(backup_ref).await?);
    }
    let backup_id = restore_spec
        .backup_id
        .clone()
        .ok_or_else(|| Error::BackupNotFound("spec.restore.backupID is required when backupRef/pitrRestore are unset".to_string()))?;
    let list = backups.list(&ListParams::default()).await?;
    restore::find_backup_by_id(&list.items, &backup_id, |b| b.status.as_ref().and_then(|s| s.backup_id.as_deref()))
        .cloned()
        .ok_or(Error::BackupNotFound(backup_id))
}

/// Resolves, fetches and validates the `Backup` a snapshot restore should
/// rebuild its claims from (spec §4.8's "Backup selection").
async fn fetch_snapshot_restore_backup(
    instance: &Instance,
    status: &InstanceStatus,
    restore_spec: &instance_operator_types::instance::RestoreSpec,
    ctx: &Context,
) -> Result<Backup> {
    let backup = lookup_restore_backup(instance, status, restore_spec, ctx).await?;
    let backup_status = backup.status.clone().unwrap_or_default();
    restore::validate_selected_backup(&backup_status, restore_spec.backup_type, backup.spec.type_)?;
    Ok(backup)
}

/// Resolves, fetches and validates the `Backup` a physical restore should
/// target, then runs the physical-restore preflight (spec §4.8 step 3).
async fn resolve_physical_restore_backup(
    instance: &Instance,
    status: &InstanceStatus,
    restore_spec: &instance_operator_types::instance::RestoreSpec,
    ctx: &Context,
) -> Result<Backup> {
    let backup = lookup_restore_backup(instance, status, restore_spec, ctx).await?;
    let backup_status = backup.status.clone().unwrap_or_default();
    restore::validate_selected_backup(&backup_status, restore_spec.backup_type, backup.spec.type_)?;

    let ns = instance.namespace().unwrap_or_default();
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    let db_svc = services.get_opt(&workload::names::db_service(&instance.name_any())).await?;
    let ingress_populated = db_svc
        .as_ref()
        .and_then(|s| s.status.as_ref())
        .and_then(|s| s.load_balancer.as_ref())
        .and_then(|lb| lb.ingress.as_ref())
        .map(|v| !v.is_empty())
        .unwrap_or(false);
    restore::physical_restore_preflight(ingress_populated, backup.spec.backupset, backup.spec.subtype)?;

    Ok(backup)
}

async fn reconcile_derived_objects(instance: &Instance, status: &InstanceStatus, ctx: &Context) -> Result<()> {
    let ns = instance.namespace().unwrap_or_default();

    let config_maps: Api<ConfigMap> = Api::namespaced(ctx.client.clone(), &ns);
    let config_map = workload::build_config_map(instance);
    server_side_apply(&config_maps, &config_map.name_any(), &config_map).await?;

    let claims: Api<PersistentVolumeClaim> = Api::namespaced(ctx.client.clone(), &ns);
    for claim in workload::build_volume_claims(instance, &status.restore_snapshot_sources) {
        server_side_apply(&claims, &claim.name_any(), &claim).await?;
    }

    let sts_api: Api<StatefulSet> = Api::namespaced(ctx.client.clone(), &ns);
    let sts = workload::build_stateful_set(instance, &instance.spec.images);
    server_side_apply(&sts_api, &sts.name_any(), &sts).await?;

    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &ns);
    let dbdaemon_svc = workload::build_dbdaemon_service(instance);
    server_side_apply(&services, &dbdaemon_svc.name_any(), &dbdaemon_svc).await?;
    let db_svc = workload::build_db_service(instance);
    server_side_apply(&services, &db_svc.name_any(), &db_svc).await?;
    let agent_svc = workload::build_agent_service(instance);
    server_side_apply(&services, &agent_svc.name_any(), &agent_svc).await?;

    let deployments: Api<Deployment> = Api::namespaced(ctx.client.clone(), &ns);
    let agent_deployment = workload::build_agent_deployment(instance, &instance.spec.images);
    server_side_apply(&deployments, &agent_deployment.name_any(), &agent_deployment).await?;

    Ok(())
}

async fn reconcile_endpoint(instance: &Instance, status: &mut InstanceStatus, ctx: &Context) -> Result<()> {
    let services: Api<Service> = Api::namespaced(ctx.client.clone(), &instance.namespace().unwrap_or_default());
    let db_svc = services.get_opt(&workload::names::db_service(&instance.name_any())).await?;
    let ingress = db_svc.as_ref().and_then(|s| s.status.as_ref()).and_then(|s| s.load_balancer.as_ref()).and_then(|lb| lb.ingress.as_ref()).and_then(|v| v.first());
    let host = ingress.and_then(|i| i.hostname.clone()).or_else(|| ingress.and_then(|i| i.ip.clone()));
    if let Some(host) = host {
        status.endpoint = Some(format!("{host}:1521"));
        status.url = Some(format!("{host}:1521/{}", instance.spec.cdb_name));
    }
    Ok(())
}

/// Fetches the password a `SecretReference` points at (spec §4.9's
/// `replicationSettings.primaryUser.passwordSecretRef`).
async fn resolve_secret_password(ctx: &Context, ns: &str, secret_ref: &SecretReference) -> Result<String> {
    let secrets: Api<Secret> = Api::namespaced(ctx.client.clone(), ns);
    let secret = secrets.get(&secret_ref.name).await?;
    let bytes = secret
        .data
        .as_ref()
        .and_then(|data| data.get(&secret_ref.key))
        .ok_or_else(|| Error::Other(format!("secret {:?} has no key {:?}", secret_ref.name, secret_ref.key)))?;
    String::from_utf8(bytes.0.clone()).map_err(|e| Error::Other(format!("secret {:?} key {:?} is not valid UTF-8: {e}", secret_ref.name, secret_ref.key)))
}

/// Claims the maintenance lock for `owner`, failing with `Error::LockHeld`
/// when another owner already holds it (spec §4.2/§5's rendez-vous point for
/// sub-workflows that would otherwise race on a destructive workload change).
fn acquire_or_err(status: &mut InstanceStatus, owner: &str) -> Result<()> {
    match lock::try_acquire(&status.locked_by_controller, owner) {
        Ok(locked_by) => {
            status.locked_by_controller = locked_by;
            Ok(())
        }
        Err(()) => Err(Error::LockHeld {
            holder: status.locked_by_controller.clone().unwrap_or_default(),
            requester: owner.to_string(),
        }),
    }
}

fn release_lock(status: &mut InstanceStatus, owner: &str) {
    status.locked_by_controller = lock::release(&status.locked_by_controller, owner);
}

async fn patch_status(instances: &Api<Instance>, name: &str, status: &InstanceStatus) -> Result<()> {
    let patch = serde_json::json!({
        "apiVersion": "instance.dbops.example.com/v1alpha1",
        "kind": "Instance",
        "status": status,
    });
    instances.patch_status(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Merge(patch)).await?;
    Ok(())
}

async fn server_side_apply<K>(api: &Api<K>, name: &str, object: &K) -> Result<()>
where
    K: kube::Resource + Clone + serde::Serialize + serde::de::DeserializeOwned + std::fmt::Debug,
    K::DynamicType: Default,
{
    api.patch(name, &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(object)).await?;
    Ok(())
}

async fn agent_client_for(instance: &Instance, ctx: &Context) -> Result<Arc<dyn AgentClient>> {
    let ns = instance.namespace().unwrap_or_default();
    let name = instance.name_any();
    let endpoint = format!("http://{}.{ns}.svc.cluster.local:3205", workload::names::dbdaemon_service(&name));
    let channel = tonic::transport::Endpoint::from_shared(endpoint)
        .map_err(|e| Error::Other(e.to_string()))?
        .timeout(ctx.config.lro_dial_timeout)
        .connect()
        .await
        .map_err(AgentError::Transport)?;
    Ok(Arc::new(TonicAgentClient::new(channel)))
}
