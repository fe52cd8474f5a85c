use instance_operator_types::{InstanceSpec, InstanceStatus};

/// Invoked at the very end of every tick (spec §4.12, Scenario 6 of §8):
/// records the generation this tick observed, and whether the spec the
/// controller is now converged on matches what is actually running.
pub fn apply_generation_bookkeeping(spec: &InstanceSpec, status: &mut InstanceStatus, observed_generation: i64) {
    status.observed_generation = observed_generation;
    status.is_change_applied = spec.parameters == status.current_parameters;
}

#[cfg(test)]
mod tests {
    use super::*;
    use instance_operator_types::instance::{DbLoadBalancerOptions, ImageMap, InstanceMode};
    use std::collections::BTreeMap;

    fn base_spec() -> InstanceSpec {
        InstanceSpec {
            cdb_name: "GCLOUD".into(),
            db_unique_name: None,
            db_domain: None,
            character_set: None,
            memory_percent: None,
            version: None,
            edition: None,
            images: ImageMap::new(),
            disks: vec![],
            database_resources: None,
            services: BTreeMap::new(),
            parameters: BTreeMap::new(),
            maintenance_window: vec![],
            restore: None,
            replication_settings: None,
            mode: InstanceMode::Normal,
            db_load_balancer_options: DbLoadBalancerOptions::default(),
            source_cidr_ranges: vec![],
            enable_dnfs: false,
        }
    }

    #[test]
    fn is_change_applied_false_until_parameters_converge() {
        let mut spec = base_spec();
        spec.parameters.insert("parallel_servers_target".into(), "15".into());
        let mut status = InstanceStatus::default();

        apply_generation_bookkeeping(&spec, &mut status, 3);
        assert_eq!(status.observed_generation, 3);
        assert!(!status.is_change_applied);

        status.current_parameters = spec.parameters.clone();
        apply_generation_bookkeeping(&spec, &mut status, 3);
        assert!(status.is_change_applied);
    }
}
