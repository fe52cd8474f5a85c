//! Pure functions producing the declarative objects the Instance controller
//! owns (spec §4.3). Nothing in this module talks to the cluster API: given
//! an `Instance` (plus resolved images/disks), each `build_*` function
//! returns the object the reconciler should `Patch::Apply`.

use std::collections::BTreeMap;

use instance_operator_types::instance::{disk_names, DiskSpec, ImageMap, ImageRole};
use instance_operator_types::Instance;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    ConfigMap, Container, PersistentVolumeClaim, PersistentVolumeClaimSpec, PodSpec, PodTemplateSpec,
    ResourceRequirements, Service, ServicePort, ServiceSpec, TypedLocalObjectReference, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::ResourceExt;

/// Naming conventions, spec §4.3: `"{shortName}-{stsName}-0"` for claims;
/// the three services are `"<inst>-svc"`, `"<inst>-dbdaemon-svc"`,
/// `"<inst>-agent-svc"` (spec §8 Scenario 1).
pub mod names {
    pub fn stateful_set(instance_name: &str) -> String {
        instance_name.to_string()
    }

    pub fn db_service(instance_name: &str) -> String {
        format!("{instance_name}-svc")
    }

    pub fn dbdaemon_service(instance_name: &str) -> String {
        format!("{instance_name}-dbdaemon-svc")
    }

    pub fn agent_service(instance_name: &str) -> String {
        format!("{instance_name}-agent-svc")
    }

    pub fn agent_deployment(instance_name: &str) -> String {
        format!("{instance_name}-agent")
    }

    pub fn monitoring_deployment(instance_name: &str) -> String {
        format!("{instance_name}-monitoring")
    }

    pub fn config_map(instance_name: &str) -> String {
        format!("{instance_name}-config")
    }

    pub fn pod(instance_name: &str) -> String {
        // 1-replica stateful set: the sole pod is always ordinal 0.
        format!("{instance_name}-0")
    }

    pub fn volume_claim(disk: &str, sts_name: &str) -> String {
        format!("{disk}-{sts_name}-0")
    }
}

fn labels(instance: &Instance) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("app".to_string(), instance.name_any());
    labels.insert("instance.dbops.example.com/name".to_string(), instance.name_any());
    labels
}

fn owner_reference(instance: &Instance) -> OwnerReference {
    instance.controller_owner_ref(&()).expect("Instance is a namespaced object with uid/resourceVersion set")
}

fn object_meta(instance: &Instance, name: String) -> ObjectMeta {
    ObjectMeta {
        name: Some(name),
        namespace: instance.namespace(),
        labels: Some(labels(instance)),
        owner_references: Some(vec![owner_reference(instance)]),
        ..Default::default()
    }
}

/// A config map holding the instance's static (non-reserved) parameters, so
/// `dbinit`/`dbdaemon` can read the desired parameter file on startup (spec
/// §4.3, §4.6).
pub fn build_config_map(instance: &Instance) -> ConfigMap {
    ConfigMap {
        metadata: object_meta(instance, names::config_map(&instance.name_any())),
        data: Some(instance.spec.parameters.clone()),
        ..Default::default()
    }
}

/// One `PersistentVolumeClaim` per entry in `spec.disks`, deterministically
/// named (spec §4.3). Claims outlive workload recreation during resize and
/// restore (spec §5's "Shared resources"). `snapshot_sources` maps disk name
/// to the `VolumeSnapshot` a restore should clone it from; empty outside a
/// snapshot restore.
pub fn build_volume_claims(instance: &Instance, snapshot_sources: &BTreeMap<String, String>) -> Vec<PersistentVolumeClaim> {
    let sts_name = names::stateful_set(&instance.name_any());
    instance
        .spec
        .disks
        .iter()
        .map(|disk| build_volume_claim(instance, disk, &sts_name, snapshot_sources.get(&disk.name).map(String::as_str)))
        .collect()
}

fn build_volume_claim(instance: &Instance, disk: &DiskSpec, sts_name: &str, snapshot_source: Option<&str>) -> PersistentVolumeClaim {
    let mut requests = BTreeMap::new();
    requests.insert("storage".to_string(), k8s_openapi::apimachinery::pkg::api::resource::Quantity(disk.size.clone()));

    PersistentVolumeClaim {
        metadata: object_meta(instance, names::volume_claim(&disk.name, sts_name)),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            storage_class_name: Some(disk.storage_class.clone()),
            resources: Some(ResourceRequirements { requests: Some(requests), ..Default::default() }),
            data_source: snapshot_source.map(|name| TypedLocalObjectReference {
                api_group: Some("snapshot.storage.k8s.io".to_string()),
                kind: "VolumeSnapshot".to_string(),
                name: name.to_string(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn image_for(images: &ImageMap, role: ImageRole) -> String {
    images.get(&role).cloned().unwrap_or_default()
}

/// The stateful workload (1 replica): `oracledb`, `dbinit`, `dbdaemon`
/// containers plus listener/alert-log sidecars (spec §4.3).
pub fn build_stateful_set(instance: &Instance, images: &ImageMap) -> StatefulSet {
    let name = names::stateful_set(&instance.name_any());
    let selector_labels = labels(instance);

    let data_mount = instance.spec.disks.iter().find(|d| d.name == disk_names::DATA_DISK);
    let log_mount = instance.spec.disks.iter().find(|d| d.name == disk_names::LOG_DISK);

    let mut volume_mounts = Vec::new();
    if let Some(disk) = data_mount {
        volume_mounts.push(VolumeMount {
            name: names::volume_claim(&disk.name, &name),
            mount_path: "/u02".to_string(),
            ..Default::default()
        });
    }
    if let Some(disk) = log_mount {
        volume_mounts.push(VolumeMount {
            name: names::volume_claim(&disk.name, &name),
            mount_path: "/u03".to_string(),
            ..Default::default()
        });
    }

    let containers = vec![
        Container {
            name: "oracledb".to_string(),
            image: Some(image_for(images, ImageRole::Service)),
            resources: instance.spec.database_resources.clone(),
            volume_mounts: Some(volume_mounts.clone()),
            ..Default::default()
        },
        Container {
            name: "dbdaemon".to_string(),
            image: Some(image_for(images, ImageRole::Service)),
            volume_mounts: Some(volume_mounts.clone()),
            ..Default::default()
        },
        Container { name: "listener-log-sidecar".to_string(), image: Some(image_for(images, ImageRole::LoggingSidecar)), ..Default::default() },
        Container { name: "alert-log-sidecar".to_string(), image: Some(image_for(images, ImageRole::LoggingSidecar)), ..Default::default() },
    ];

    let init_containers = vec![Container {
        name: "dbinit".to_string(),
        image: Some(image_for(images, ImageRole::Dbinit)),
        volume_mounts: Some(volume_mounts),
        ..Default::default()
    }];

    StatefulSet {
        metadata: object_meta(instance, name.clone()),
        spec: Some(StatefulSetSpec {
            replicas: Some(1),
            service_name: names::dbdaemon_service(&instance.name_any()),
            selector: LabelSelector { match_labels: Some(selector_labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(selector_labels), ..Default::default() }),
                spec: Some(PodSpec {
                    containers,
                    init_containers: Some(init_containers),
                    volumes: Some(instance.spec.disks.iter().map(|d| claim_volume(&d.name, &name)).collect()),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

fn claim_volume(disk_name: &str, sts_name: &str) -> Volume {
    let claim_name = names::volume_claim(disk_name, sts_name);
    Volume {
        name: claim_name.clone(),
        persistent_volume_claim: Some(k8s_openapi::api::core::v1::PersistentVolumeClaimVolumeSource {
            claim_name,
            read_only: Some(false),
        }),
        ..Default::default()
    }
}

/// Headless service fronting the database daemon, used as the stateful
/// workload's governing service (spec §4.3).
pub fn build_dbdaemon_service(instance: &Instance) -> Service {
    Service {
        metadata: object_meta(instance, names::dbdaemon_service(&instance.name_any())),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(labels(instance)),
            ports: Some(vec![ServicePort { name: Some("dbdaemon".to_string()), port: 3205, ..Default::default() }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// The database endpoint service: `LoadBalancer`, honoring the requested
/// static IP / annotations / source CIDR ranges (spec §4.3).
pub fn build_db_service(instance: &Instance) -> Service {
    let opts = &instance.spec.db_load_balancer_options;
    Service {
        metadata: ObjectMeta {
            annotations: Some(opts.annotations.clone()),
            ..object_meta(instance, names::db_service(&instance.name_any()))
        },
        spec: Some(ServiceSpec {
            type_: Some("LoadBalancer".to_string()),
            load_balancer_ip: opts.load_balancer_ip.clone(),
            selector: Some(labels(instance)),
            load_balancer_source_ranges: (!instance.spec.source_cidr_ranges.is_empty())
                .then(|| instance.spec.source_cidr_ranges.clone()),
            ports: Some(vec![ServicePort {
                name: Some("ora-listener".to_string()),
                port: 1521,
                target_port: Some(IntOrString::Int(1521)),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// Service exposing the agent deployment's gRPC surface (spec §4.3).
pub fn build_agent_service(instance: &Instance) -> Service {
    Service {
        metadata: object_meta(instance, names::agent_service(&instance.name_any())),
        spec: Some(ServiceSpec {
            selector: Some(labels(instance)),
            ports: Some(vec![ServicePort { name: Some("agent-grpc".to_string()), port: 3206, ..Default::default() }]),
            ..Default::default()
        }),
        status: None,
    }
}

/// The agent deployment exposing the sidecar services (spec §4.3).
pub fn build_agent_deployment(instance: &Instance, images: &ImageMap) -> Deployment {
    let name = names::agent_deployment(&instance.name_any());
    let selector_labels = labels(instance);

    Deployment {
        metadata: object_meta(instance, name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(selector_labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(selector_labels), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "agent".to_string(),
                        image: Some(image_for(images, ImageRole::Service)),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// The monitoring deployment, built only when `spec.services[Monitoring]` is
/// enabled (spec §4.3, §4.7's "ReconcileServices" step).
pub fn build_monitoring_deployment(instance: &Instance, images: &ImageMap) -> Deployment {
    let name = names::monitoring_deployment(&instance.name_any());
    let selector_labels = labels(instance);

    Deployment {
        metadata: object_meta(instance, name.clone()),
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector { match_labels: Some(selector_labels.clone()), ..Default::default() },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(selector_labels), ..Default::default() }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: "monitoring".to_string(),
                        image: Some(image_for(images, ImageRole::Monitoring)),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}
