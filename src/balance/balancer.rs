//! Cluster membership and per-member connection counters.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use rand::seq::IndexedRandom;

use crate::error::Result;
use crate::handler::TextRow;
use crate::host::DEFAULT_PORT;

use super::placement::PlacementSet;

/// Membership query. Rows carry `host`, `port`, `public_ip`, `cloud`, `region` and `zone`.
pub const SERVERS_QUERY: &str = "SELECT * FROM yb_servers()";

/// What a balancer needs from an open connection to discover the cluster.
pub trait ClusterConnection {
    /// The host name or address this connection was opened to.
    fn connected_host(&self) -> &str;

    /// Run `sql` and return every row in text format.
    fn fetch_rows(&mut self, sql: &str) -> Result<Vec<TextRow>>;
}

/// Name-to-address resolution used to match the connected host against members.
pub trait AddressResolver: Send + Sync {
    /// First address of `host`, if it resolves.
    fn resolve(&self, host: &str) -> Option<IpAddr>;
}

/// Resolves through the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl AddressResolver for SystemResolver {
    fn resolve(&self, host: &str) -> Option<IpAddr> {
        if let Ok(ip) = host.parse() {
            return Some(ip);
        }
        (host, 0)
            .to_socket_addrs()
            .ok()?
            .next()
            .map(|addr| addr.ip())
    }
}

/// Which members a balancer may route to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Policy {
    /// Every member
    Uniform,
    /// Members in one of the listed placements
    Topology(PlacementSet),
}

impl Policy {
    fn admits(&self, row: &TextRow) -> bool {
        match self {
            Policy::Uniform => true,
            Policy::Topology(placements) => placements.contains(
                row.get("cloud").unwrap_or_default(),
                row.get("region").unwrap_or_default(),
                row.get("zone").unwrap_or_default(),
            ),
        }
    }
}

#[derive(Debug, Default)]
struct Membership {
    servers: Vec<String>,
    ports: HashMap<String, u16>,
    counts: BTreeMap<String, u32>,
    unreachable: BTreeSet<String>,
    last_refresh: Option<Instant>,
    force_refresh: bool,
}

struct Member {
    address: String,
    port: u16,
}

/// Tracks cluster members and picks the least-loaded one.
///
/// All state sits behind one lock per balancer, so the counter increment of
/// a pick is visible to the next pick on any thread. The lock is never held
/// while the membership query runs.
pub struct LoadBalancer {
    name: String,
    policy: Policy,
    refresh_interval: Duration,
    resolver: Arc<dyn AddressResolver>,
    state: Mutex<Membership>,
}

impl fmt::Debug for LoadBalancer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadBalancer")
            .field("name", &self.name)
            .field("policy", &self.policy)
            .field("refresh_interval", &self.refresh_interval)
            .finish_non_exhaustive()
    }
}

impl LoadBalancer {
    /// Create a balancer with no known members.
    pub fn new(name: impl Into<String>, policy: Policy, refresh_interval: Duration) -> Self {
        Self {
            name: name.into(),
            policy,
            refresh_interval,
            resolver: Arc::new(SystemResolver),
            state: Mutex::new(Membership::default()),
        }
    }

    /// Replace the address resolver.
    pub fn with_resolver(mut self, resolver: Arc<dyn AddressResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Registry key of this balancer.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Routing policy.
    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Membership> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next [`refresh`](Self::refresh) query the server regardless of age.
    pub fn set_for_refresh(&self) {
        self.lock().force_refresh = true;
    }

    /// Whether the cached membership is missing, expired or flagged.
    pub fn needs_refresh(&self) -> bool {
        let state = self.lock();
        state.force_refresh
            || state
                .last_refresh
                .is_none_or(|t| t.elapsed() >= self.refresh_interval)
    }

    /// Re-discover the cluster through `conn` when the cached view is stale.
    ///
    /// Returns `Ok(false)` when the connected address matches neither the
    /// private nor the public address of any member; the cached view is left
    /// untouched and the caller should fall back to its existing connection.
    pub fn refresh(&self, conn: &mut dyn ClusterConnection) -> Result<bool> {
        if !self.needs_refresh() {
            return Ok(true);
        }

        let rows = conn.fetch_rows(SERVERS_QUERY)?;
        let Some(members) = self.reconcile(conn.connected_host(), &rows) else {
            tracing::warn!(
                balancer = %self.name,
                connected = conn.connected_host(),
                "connected address matches no cluster member"
            );
            return Ok(false);
        };

        let mut state = self.lock();
        state.servers = members.iter().map(|m| m.address.clone()).collect();
        state.ports = members
            .iter()
            .map(|m| (m.address.clone(), m.port))
            .collect();
        let current: BTreeSet<&str> = state.servers.iter().map(String::as_str).collect();
        let departed: Vec<String> = state
            .counts
            .keys()
            .filter(|host| !current.contains(host.as_str()))
            .cloned()
            .collect();
        for host in departed {
            state.counts.remove(&host);
        }
        for member in &members {
            state.counts.entry(member.address.clone()).or_insert(0);
        }
        state.unreachable.clear();
        state.last_refresh = Some(Instant::now());
        state.force_refresh = false;

        tracing::debug!(balancer = %self.name, servers = ?state.servers, "cluster membership refreshed");
        Ok(true)
    }

    fn reconcile(&self, connected: &str, rows: &[TextRow]) -> Option<Vec<Member>> {
        let connected_ip = self.resolver.resolve(connected);
        let same = |candidate: &str| {
            !candidate.is_empty()
                && (candidate.eq_ignore_ascii_case(connected)
                    || connected_ip.is_some_and(|ip| self.resolver.resolve(candidate) == Some(ip)))
        };

        let use_public = rows.iter().find_map(|row| {
            if same(row.get("host").unwrap_or_default()) {
                Some(false)
            } else if same(row.get("public_ip").unwrap_or_default()) {
                Some(true)
            } else {
                None
            }
        })?;

        let members = rows
            .iter()
            .filter(|row| self.policy.admits(row))
            .filter_map(|row| {
                let column = if use_public { "public_ip" } else { "host" };
                let address = row.get(column).filter(|a| !a.is_empty())?;
                let port = row
                    .get("port")
                    .and_then(|p| p.parse().ok())
                    .unwrap_or(DEFAULT_PORT);
                Some(Member {
                    address: address.to_string(),
                    port,
                })
            })
            .collect();
        Some(members)
    }

    /// Pick the member with the fewest connections, skipping `excluding`.
    ///
    /// Ties are broken uniformly at random. The picked member's counter is
    /// incremented before the lock is released.
    pub fn least_loaded_server(&self, excluding: &[String]) -> Option<String> {
        let mut state = self.lock();
        let eligible: Vec<(&String, u32)> = state
            .counts
            .iter()
            .filter(|(host, _)| !excluding.contains(host) && !state.unreachable.contains(*host))
            .map(|(host, count)| (host, *count))
            .collect();

        let min = eligible.iter().map(|(_, count)| *count).min()?;
        let ties: Vec<&String> = eligible
            .iter()
            .filter(|(_, count)| *count == min)
            .map(|(host, _)| *host)
            .collect();
        let chosen = (*ties.choose(&mut rand::rng())?).clone();

        if let Some(count) = state.counts.get_mut(&chosen) {
            *count = count.saturating_add(1);
        }
        tracing::debug!(balancer = %self.name, host = %chosen, load = min, "picked least loaded server");
        Some(chosen)
    }

    /// Adjust the counter of `host` by `delta`, never below zero.
    ///
    /// An unknown host is only inserted for a positive delta.
    pub fn update_connection_map(&self, host: &str, delta: i64) {
        let mut state = self.lock();
        match state.counts.get_mut(host) {
            Some(count) => {
                let next = i64::from(*count).saturating_add(delta).max(0);
                *count = u32::try_from(next).unwrap_or(u32::MAX);
            }
            None if delta > 0 => {
                state
                    .counts
                    .insert(host.to_string(), u32::try_from(delta).unwrap_or(u32::MAX));
            }
            None => {}
        }
    }

    /// Forget the counter of `host` and avoid it until the next refresh.
    pub fn update_failed_hosts(&self, host: &str) {
        let mut state = self.lock();
        state.counts.remove(host);
        state.unreachable.insert(host.to_string());
        tracing::debug!(balancer = %self.name, %host, "member marked unreachable");
    }

    /// Members from the last refresh, in server order.
    pub fn servers(&self) -> Vec<String> {
        self.lock().servers.clone()
    }

    /// Port reported for `host`.
    pub fn port_for(&self, host: &str) -> Option<u16> {
        self.lock().ports.get(host).copied()
    }

    /// Open connections counted against `host`.
    pub fn connection_count(&self, host: &str) -> Option<u32> {
        self.lock().counts.get(host).copied()
    }

    /// Members marked unreachable since the last refresh.
    pub fn unreachable_hosts(&self) -> Vec<String> {
        self.lock().unreachable.iter().cloned().collect()
    }
}
