//! The PITR backup selector (spec §2.9, §4.8's "PITR selection", property
//! P7). Pure function over a list of candidate backups; no cluster I/O.

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};

/// The subset of `Backup.status` the selector needs, already filtered to
/// the namespace and PITR stream the caller is restoring from.
#[derive(Clone, Debug, PartialEq)]
pub struct BackupCandidate {
    pub backup_id: String,
    pub ready: bool,
    pub incarnation: Option<u32>,
    pub parent_incarnation: Option<u32>,
    pub scn: Option<u64>,
    pub timestamp: Option<DateTime<Utc>>,
    pub recovery_window_start: Option<DateTime<Utc>>,
    pub recovery_window_end: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PitrTarget {
    Scn(u64),
    Timestamp(DateTime<Utc>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Comparable {
    Scn(u64),
    Timestamp(DateTime<Utc>),
}

fn candidate_value(candidate: &BackupCandidate, target: PitrTarget) -> Option<Comparable> {
    match target {
        PitrTarget::Scn(_) => candidate.scn.map(Comparable::Scn),
        PitrTarget::Timestamp(_) => candidate.timestamp.map(Comparable::Timestamp),
    }
}

fn target_value(target: PitrTarget) -> Comparable {
    match target {
        PitrTarget::Scn(scn) => Comparable::Scn(scn),
        PitrTarget::Timestamp(ts) => Comparable::Timestamp(ts),
    }
}

/// Picks the Ready-true candidate in `incarnation` with the largest
/// scn/timestamp not exceeding `target` (equality accepted, no further
/// tie-break — spec §4.8). Returns `None` if no candidate qualifies.
fn best_in_incarnation(candidates: &[BackupCandidate], incarnation: u32, target: PitrTarget) -> Option<&BackupCandidate> {
    let target_value = target_value(target);
    candidates
        .iter()
        .filter(|c| c.ready && c.incarnation == Some(incarnation))
        .filter_map(|c| candidate_value(c, target).map(|v| (c, v)))
        .filter(|(_, v)| *v <= target_value)
        .max_by_key(|(_, v)| *v)
        .map(|(c, _)| c)
}

/// Spec §4.8: search the target incarnation first, then its parent
/// incarnation, failing if neither yields a candidate.
pub fn select_backup<'a>(candidates: &'a [BackupCandidate], target_incarnation: u32, target: PitrTarget) -> Result<&'a BackupCandidate> {
    if let Some(found) = best_in_incarnation(candidates, target_incarnation, target) {
        return confirm_recovery_window(found, target);
    }

    // Prefer the label a same-incarnation candidate actually carries, but an
    // incarnation with no candidate at all still has a well-defined parent:
    // Oracle incarnations are numbered sequentially from resetlogs.
    let parent = candidates
        .iter()
        .find(|c| c.incarnation == Some(target_incarnation))
        .and_then(|c| c.parent_incarnation)
        .or_else(|| target_incarnation.checked_sub(1));

    if let Some(parent) = parent {
        if let Some(found) = best_in_incarnation(candidates, parent, target) {
            return confirm_recovery_window(found, target);
        }
    }

    Err(Error::NoEligiblePitrBackup)
}

/// SPEC_FULL §D: fail closed unless the selected backup's own recorded
/// recovery window is present and actually contains the target.
fn confirm_recovery_window(candidate: &BackupCandidate, target: PitrTarget) -> Result<&BackupCandidate> {
    let (Some(start), Some(end)) = (candidate.recovery_window_start, candidate.recovery_window_end) else {
        return Err(Error::PitrWindowUnconfirmed(candidate.backup_id.clone()));
    };
    let target_time = match target {
        PitrTarget::Timestamp(ts) => ts,
        // An SCN-based target has no wall-clock value of its own; the best
        // we can cross-check is that the backup's own timestamp (the point
        // it was taken) falls in its recorded window.
        PitrTarget::Scn(_) => match candidate.timestamp {
            Some(ts) => ts,
            None => return Err(Error::PitrWindowUnconfirmed(candidate.backup_id.clone())),
        },
    };
    if target_time < start || target_time > end {
        return Err(Error::PitrWindowUnconfirmed(candidate.backup_id.clone()));
    }
    Ok(candidate)
}
