//! In-place CPU/memory and online-volume-expansion resize handling (spec
//! §4.11). Pure decision functions; the reconciler performs the actual
//! patch/delete calls based on what these return.

use instance_operator_types::instance::DiskSpec;
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

/// A disk whose `spec.disks` size has outgrown its current claim capacity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DiskGrowth {
    pub disk_name: String,
    pub requested_size: String,
}

/// Whether resize work is needed this tick, and what kind. `Ready` is
/// `ResizingInProgress` for the whole duration (spec §4.11).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResizeDecision {
    None,
    ResourcesChanged,
    DisksGrew(Vec<DiskGrowth>),
}

/// Compares the desired CPU/memory against what the running database
/// container actually has.
pub fn resources_changed(desired: Option<&ResourceRequirements>, running: Option<&ResourceRequirements>) -> bool {
    desired.map(|r| &r.requests) != running.map(|r| &r.requests) || desired.map(|r| &r.limits) != running.map(|r| &r.limits)
}

/// Every disk whose `spec.disks` size is strictly greater than its claim's
/// current requested capacity, in spec order.
pub fn disks_that_grew(desired_disks: &[DiskSpec], claim_capacity: impl Fn(&str) -> Option<Quantity>) -> Vec<DiskGrowth> {
    desired_disks
        .iter()
        .filter_map(|disk| {
            let current = claim_capacity(&disk.name)?;
            (parse_bytes(&disk.size) > parse_bytes(&current.0))
                .then(|| DiskGrowth { disk_name: disk.name.clone(), requested_size: disk.size.clone() })
        })
        .collect()
}

pub fn decide(
    desired_resources: Option<&ResourceRequirements>,
    running_resources: Option<&ResourceRequirements>,
    desired_disks: &[DiskSpec],
    claim_capacity: impl Fn(&str) -> Option<Quantity>,
) -> ResizeDecision {
    let grown = disks_that_grew(desired_disks, claim_capacity);
    if !grown.is_empty() {
        return ResizeDecision::DisksGrew(grown);
    }
    if resources_changed(desired_resources, running_resources) {
        return ResizeDecision::ResourcesChanged;
    }
    ResizeDecision::None
}

/// Whether every grown claim's reported capacity has caught up to its
/// request, at which point the workload can be safely deleted for
/// recreation with the new template (spec §4.11).
pub fn all_claims_caught_up(grown: &[DiskGrowth], claim_capacity: impl Fn(&str) -> Option<Quantity>) -> bool {
    grown.iter().all(|g| claim_capacity(&g.disk_name).map(|q| parse_bytes(&q.0) >= parse_bytes(&g.requested_size)).unwrap_or(false))
}

/// Minimal Kubernetes resource-quantity parser covering the binary suffixes
/// (`Ki`,`Mi`,`Gi`,`Ti`) this controller's disk sizes use; bare numbers are
/// bytes. Good enough for size comparisons, not a general quantity parser.
fn parse_bytes(quantity: &str) -> u128 {
    let suffixes: &[(&str, u128)] = &[("Ti", 1u128 << 40), ("Gi", 1u128 << 30), ("Mi", 1u128 << 20), ("Ki", 1u128 << 10)];
    for (suffix, mult) in suffixes {
        if let Some(digits) = quantity.strip_suffix(suffix) {
            if let Ok(n) = digits.parse::<u128>() {
                return n * mult;
            }
        }
    }
    quantity.parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_grown_disk() {
        let disks = vec![DiskSpec { name: "DataDisk".into(), size: "200Gi".into(), storage_class: "standard".into() }];
        let grown = disks_that_grew(&disks, |_| Some(Quantity("100Gi".to_string())));
        assert_eq!(grown, vec![DiskGrowth { disk_name: "DataDisk".into(), requested_size: "200Gi".into() }]);
    }

    #[test]
    fn no_growth_when_sizes_match() {
        let disks = vec![DiskSpec { name: "DataDisk".into(), size: "100Gi".into(), storage_class: "standard".into() }];
        let grown = disks_that_grew(&disks, |_| Some(Quantity("100Gi".to_string())));
        assert!(grown.is_empty());
    }

    #[test]
    fn claims_caught_up_once_capacity_matches_request() {
        let grown = vec![DiskGrowth { disk_name: "DataDisk".into(), requested_size: "200Gi".into() }];
        assert!(!all_claims_caught_up(&grown, |_| Some(Quantity("100Gi".to_string()))));
        assert!(all_claims_caught_up(&grown, |_| Some(Quantity("200Gi".to_string()))));
    }

    #[test]
    fn resize_decision_prefers_disk_growth_over_resources() {
        let disks = vec![DiskSpec { name: "DataDisk".into(), size: "200Gi".into(), storage_class: "standard".into() }];
        let decision = decide(None, None, &disks, |_| Some(Quantity("100Gi".to_string())));
        assert!(matches!(decision, ResizeDecision::DisksGrew(_)));
    }

    #[test]
    fn resize_decision_is_none_when_nothing_changed() {
        let disks = vec![DiskSpec { name: "DataDisk".into(), size: "100Gi".into(), storage_class: "standard".into() }];
        let decision = decide(None, None, &disks, |_| Some(Quantity("100Gi".to_string())));
        assert_eq!(decision, ResizeDecision::None);
    }
}
