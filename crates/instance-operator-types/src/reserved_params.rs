/// The closed set of reserved database parameters (spec §6). Any key in
/// `spec.parameters` that appears here is rejected outright — invariant 4.
pub const RESERVED_PARAMETERS: &[&str] = &[
    "audit_file_dest",
    "audit_trail",
    "compatible",
    "control_files",
    "db_block_size",
    "db_recovery_file_dest",
    "db_recovery_file_dest_size",
    "diagnostic_dest",
    "dispatchers",
    "enable_pluggable_database",
    "filesystemio_options",
    "local_listener",
    "open_cursors",
    "pga_aggregate_target",
    "processes",
    "remote_login_passwordfile",
    "sga_target",
    "undo_tablespace",
    "log_archive_dest_1",
    "log_archive_dest_state_1",
    "log_archive_format",
    "standby_file_management",
];

/// Case-sensitive membership check; the reserved set is spelled in
/// lower_snake_case and parameter names are compared as given.
pub fn is_reserved(key: &str) -> bool {
    RESERVED_PARAMETERS.contains(&key)
}

/// Returns every reserved key present in `parameters`, preserving the
/// caller's iteration order. Used to fail fast with a complete message
/// instead of reporting one offending key at a time.
pub fn find_reserved<'a, I, K>(parameters: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a K>,
    K: AsRef<str> + 'a,
{
    parameters
        .into_iter()
        .map(|k| k.as_ref())
        .filter(|k| is_reserved(k))
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn rejects_every_reserved_key() {
        for key in RESERVED_PARAMETERS {
            assert!(is_reserved(key), "{key} should be reserved");
        }
        assert!(!is_reserved("parallel_servers_target"));
    }

    #[test]
    fn find_reserved_reports_all_offenders() {
        let mut params = BTreeMap::new();
        params.insert("processes".to_string(), "300".to_string());
        params.insert("parallel_servers_target".to_string(), "15".to_string());
        params.insert("sga_target".to_string(), "4G".to_string());
        let keys: Vec<&String> = params.keys().collect();
        let offenders = find_reserved(keys);
        assert_eq!(offenders.len(), 2);
        assert!(offenders.contains(&"processes".to_string()));
        assert!(offenders.contains(&"sga_target".to_string()));
    }
}
