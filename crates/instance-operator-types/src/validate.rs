use crate::instance::InstanceSpec;
use crate::reserved_params::find_reserved;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("spec.cdbName {0:?} is not a valid SQL identifier")]
    InvalidCdbName(String),
    #[error("spec.dbUniqueName {unique:?} has suffix not matching spec.dbDomain {domain:?}")]
    DbUniqueNameDomainMismatch { unique: String, domain: String },
    #[error("spec.parameters contains reserved keys: {0:?}")]
    ReservedParameters(Vec<String>),
    #[error("spec.memoryPercent {0} is out of range 0-100")]
    MemoryPercentOutOfRange(u8),
}

/// A valid SQL identifier per invariant 2: starts with a letter, then
/// letters/digits/underscore, max 30 characters (classic CDB name limit).
pub fn is_valid_sql_identifier(name: &str) -> bool {
    if name.is_empty() || name.len() > 30 {
        return false;
    }
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if !first.is_ascii_alphabetic() {
        return false;
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates the spec-level invariants from spec §3 that do not require
/// talking to the cluster API (invariants 2, 3, 4). Invariant 1 (at most one
/// `Config` per namespace) and invariant 5 (lock exclusivity) are checked by
/// the reconciler/lock module respectively, since they require cluster
/// state.
pub fn validate_spec(spec: &InstanceSpec) -> Result<(), ValidationError> {
    if !spec.cdb_name.is_empty() && !is_valid_sql_identifier(&spec.cdb_name) {
        return Err(ValidationError::InvalidCdbName(spec.cdb_name.clone()));
    }

    if let Some(unique) = &spec.db_unique_name {
        if let Some((_, suffix)) = unique.split_once('.') {
            let domain = spec.db_domain.as_deref().unwrap_or("");
            if suffix != domain {
                return Err(ValidationError::DbUniqueNameDomainMismatch {
                    unique: unique.clone(),
                    domain: domain.to_string(),
                });
            }
        }
    }

    let reserved = find_reserved(spec.parameters.keys());
    if !reserved.is_empty() {
        return Err(ValidationError::ReservedParameters(reserved));
    }

    if let Some(pct) = spec.memory_percent {
        if pct > 100 {
            return Err(ValidationError::MemoryPercentOutOfRange(pct));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::{DbLoadBalancerOptions, ImageMap, InstanceMode};
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
    fn accepts_valid_identifier() {
        assert!(is_valid_sql_identifier("GCLOUD"));
        assert!(is_valid_sql_identifier("my_cdb_1"));
        assert!(!is_valid_sql_identifier("1cdb"));
        assert!(!is_valid_sql_identifier(""));
        assert!(!is_valid_sql_identifier("bad-name"));
    }

    #[test]
    fn rejects_mismatched_db_unique_name_suffix() {
        let mut spec = base_spec();
        spec.db_domain = Some("prod.example.com".into());
        spec.db_unique_name = Some("mydb.other.example.com".into());
        assert_eq!(
            validate_spec(&spec),
            Err(ValidationError::DbUniqueNameDomainMismatch {
                unique: "mydb.other.example.com".into(),
                domain: "prod.example.com".into(),
            })
        );
    }

    #[test]
    fn accepts_matching_db_unique_name_suffix() {
        let mut spec = base_spec();
        spec.db_domain = Some("prod.example.com".into());
        spec.db_unique_name = Some("mydb.prod.example.com".into());
        assert!(validate_spec(&spec).is_ok());
    }

    #[test]
    fn rejects_reserved_parameters() {
        let mut spec = base_spec();
        spec.parameters.insert("processes".into(), "300".into());
        assert_eq!(
            validate_spec(&spec),
            Err(ValidationError::ReservedParameters(vec!["processes".into()]))
        );
    }
}
