//! Shared record of the last observed status of every host.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use super::spec::{HostRequirement, HostSpec, HostStatus};

/// Last report for one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpecStatus {
    /// The host
    pub host: HostSpec,
    /// Reported status
    pub status: HostStatus,
    /// When the report was made
    pub last_updated: Instant,
}

/// Map from host to its last reported status.
///
/// Entries are created on the first report and overwritten by later ones.
/// They are never removed, so the map only grows with the set of distinct
/// hosts seen by the process.
#[derive(Debug, Default)]
pub struct HostStatusTracker {
    statuses: Mutex<HashMap<HostSpec, HostSpecStatus>>,
}

impl HostStatusTracker {
    /// Create an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `status` for `host` as of now.
    pub fn report(&self, host: &HostSpec, status: HostStatus) {
        self.report_at(host, status, Instant::now());
    }

    /// Record `status` for `host` as of `at`.
    pub fn report_at(&self, host: &HostSpec, status: HostStatus, at: Instant) {
        tracing::debug!(%host, ?status, "host status reported");
        let mut statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
        statuses
            .entry(host.clone())
            .and_modify(|entry| {
                entry.status = status;
                entry.last_updated = at;
            })
            .or_insert_with(|| HostSpecStatus {
                host: host.clone(),
                status,
                last_updated: at,
            });
    }

    /// Last report for `host`, if any.
    pub fn status(&self, host: &HostSpec) -> Option<HostSpecStatus> {
        let statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);
        statuses.get(host).cloned()
    }

    /// Hosts worth trying for `requirement`, in input order.
    ///
    /// A host qualifies when it was never reported, when its report is older
    /// than `stale_after`, or when its reported status satisfies the
    /// requirement.
    pub fn candidates(
        &self,
        hosts: &[HostSpec],
        requirement: HostRequirement,
        stale_after: Duration,
    ) -> Vec<HostSpec> {
        self.candidates_at(hosts, requirement, stale_after, Instant::now())
    }

    /// Same as [`candidates`](Self::candidates) with an explicit clock.
    pub fn candidates_at(
        &self,
        hosts: &[HostSpec],
        requirement: HostRequirement,
        stale_after: Duration,
        now: Instant,
    ) -> Vec<HostSpec> {
        let oldest_fresh = now.checked_sub(stale_after);
        let statuses = self.statuses.lock().unwrap_or_else(PoisonError::into_inner);

        hosts
            .iter()
            .filter(|host| match statuses.get(*host) {
                None => true,
                Some(entry) => {
                    let stale = oldest_fresh.is_some_and(|t| entry.last_updated < t);
                    stale || requirement.allows(entry.status)
                }
            })
            .cloned()
            .collect()
    }
}
