use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::Pod;

/// Result of inspecting the owned workload and its single pod (spec §4.4).
/// `percent` is always one of the fixed buckets the spec enumerates;
/// `detail` is the human-readable reason for that bucket, used to format
/// `"<op>: <pct>%"` on the `Ready` condition's message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressResult {
    pub percent: u8,
    pub detail: &'static str,
}

/// Inspects the expected stateful workload (by name) and its single pod,
/// returning a coarse provisioning-progress percentage. `expected_replicas`
/// is always 1 for this controller (spec §4.3: "a stateful workload (1
/// replica)"), kept as a parameter so the probe stays a pure function of its
/// inputs rather than hard-coding the constant.
pub fn probe(expected_replicas: i32, sts: Option<&StatefulSet>, pods: &[Pod], pod_name: &str) -> ProgressResult {
    let Some(sts) = sts else {
        return ProgressResult { percent: 0, detail: "workload not found" };
    };

    let status = sts.status.as_ref();
    let replicas = status.map(|s| s.replicas).unwrap_or(0);
    if replicas != expected_replicas {
        return ProgressResult { percent: 10, detail: "workload replica count not yet as expected" };
    }

    let ready_replicas = status.and_then(|s| s.ready_replicas).unwrap_or(0);
    if ready_replicas != expected_replicas {
        return ProgressResult { percent: 50, detail: "workload ready-replica count not yet as expected" };
    }

    if pods.is_empty() {
        return ProgressResult { percent: 60, detail: "pod list empty" };
    }

    let Some(pod) = pods.iter().find(|p| p.metadata.name.as_deref() == Some(pod_name)) else {
        return ProgressResult { percent: 65, detail: "named pod missing" };
    };

    let pod_status = pod.status.as_ref();
    let running = pod_status.and_then(|s| s.phase.as_deref()) == Some("Running");
    let containers_ready = pod_status
        .map(|s| {
            let init_ready = s.init_container_statuses.iter().flatten().all(|c| c.ready);
            let container_ready = s.container_statuses.iter().flatten().all(|c| c.ready);
            init_ready && container_ready
        })
        .unwrap_or(false);

    if !running || !containers_ready {
        return ProgressResult { percent: 85, detail: "pod not running or a container not ready" };
    }

    ProgressResult { percent: 100, detail: "all containers ready" }
}

/// Formats the `Ready` condition message per spec §4.4: `"<op>: <pct>%"`.
pub fn format_message(op: &str, result: &ProgressResult) -> String {
    format!("{op}: {}%", result.percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::StatefulSetStatus;
    use k8s_openapi::api::core::v1::{ContainerStatus, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn sts(replicas: i32, ready: Option<i32>) -> StatefulSet {
        StatefulSet {
            status: Some(StatefulSetStatus {
                replicas,
                ready_replicas: ready,
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn missing_workload_is_zero_percent() {
        assert_eq!(probe(1, None, &[], "p").percent, 0);
    }

    #[test]
    fn replica_count_mismatch_is_ten_percent() {
        assert_eq!(probe(1, Some(&sts(0, None)), &[], "p").percent, 10);
    }

    #[test]
    fn ready_replica_mismatch_is_fifty_percent() {
        assert_eq!(probe(1, Some(&sts(1, Some(0))), &[], "p").percent, 50);
    }

    #[test]
    fn empty_pod_list_is_sixty_percent() {
        assert_eq!(probe(1, Some(&sts(1, Some(1))), &[], "p").percent, 60);
    }

    #[test]
    fn missing_named_pod_is_sixty_five_percent() {
        let other = Pod {
            metadata: ObjectMeta { name: Some("other".into()), ..Default::default() },
            ..Default::default()
        };
        assert_eq!(probe(1, Some(&sts(1, Some(1))), &[other], "p").percent, 65);
    }

    #[test]
    fn not_running_pod_is_eighty_five_percent() {
        let pod = Pod {
            metadata: ObjectMeta { name: Some("p".into()), ..Default::default() },
            status: Some(PodStatus { phase: Some("Pending".into()), ..Default::default() }),
            ..Default::default()
        };
        assert_eq!(probe(1, Some(&sts(1, Some(1))), &[pod], "p").percent, 85);
    }

    #[test]
    fn all_ready_is_one_hundred_percent() {
        let pod = Pod {
            metadata: ObjectMeta { name: Some("p".into()), ..Default::default() },
            status: Some(PodStatus {
                phase: Some("Running".into()),
                container_statuses: Some(vec![ContainerStatus {
                    ready: true,
                    name: "oracledb".into(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        let result = probe(1, Some(&sts(1, Some(1))), &[pod], "p");
        assert_eq!(result.percent, 100);
        assert_eq!(format_message("CreateInProgress", &result), "CreateInProgress: 100%");
    }
}
