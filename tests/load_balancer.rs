use std::net::IpAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pgbridge::balance::{
    AddressResolver, BalancerRegistry, ClusterConnection, LoadBalancer, Policy, PlacementSet,
    SERVERS_QUERY,
};
use pgbridge::{Error, TextRow};

/// Resolves nothing, so members only match the connected host by name.
struct NoDns;

impl AddressResolver for NoDns {
    fn resolve(&self, _host: &str) -> Option<IpAddr> {
        None
    }
}

struct Cluster {
    connected: String,
    rows: Vec<TextRow>,
}

impl ClusterConnection for Cluster {
    fn connected_host(&self) -> &str {
        &self.connected
    }

    fn fetch_rows(&mut self, sql: &str) -> pgbridge::Result<Vec<TextRow>> {
        assert_eq!(sql, SERVERS_QUERY);
        Ok(self.rows.clone())
    }
}

struct Unreachable;

impl ClusterConnection for Unreachable {
    fn connected_host(&self) -> &str {
        "h1"
    }

    fn fetch_rows(&mut self, _sql: &str) -> pgbridge::Result<Vec<TextRow>> {
        Err(Error::ConnectionBroken)
    }
}

fn member(host: &str, cloud: &str, region: &str, zone: &str) -> TextRow {
    let columns: Arc<[String]> = ["host", "port", "public_ip", "cloud", "region", "zone"]
        .map(String::from)
        .to_vec()
        .into();
    TextRow::new(
        columns,
        vec![
            Some(host.into()),
            Some("5433".into()),
            None,
            Some(cloud.into()),
            Some(region.into()),
            Some(zone.into()),
        ],
    )
}

fn two_region_cluster() -> Cluster {
    Cluster {
        connected: "h1".into(),
        rows: vec![
            member("h1", "aws", "us-east", "1a"),
            member("h2", "aws", "us-west", "1b"),
        ],
    }
}

#[test]
fn topology_policy_keeps_allowed_placements_only() {
    let placements = PlacementSet::parse("aws.us-east.1a").unwrap();
    let balancer = LoadBalancer::new("aws.us-east.1a", Policy::Topology(placements), Duration::from_secs(300))
        .with_resolver(Arc::new(NoDns));

    assert!(balancer.refresh(&mut two_region_cluster()).unwrap());
    assert_eq!(balancer.servers(), ["h1"]);
    assert_eq!(balancer.port_for("h1"), Some(5433));

    assert_eq!(balancer.least_loaded_server(&[]).as_deref(), Some("h1"));
    assert_eq!(balancer.least_loaded_server(&["h1".to_string()]), None);
}

#[test]
fn uniform_policy_spreads_picks() {
    let balancer = LoadBalancer::new("simple", Policy::Uniform, Duration::from_secs(300))
        .with_resolver(Arc::new(NoDns));
    assert!(balancer.refresh(&mut two_region_cluster()).unwrap());

    let first = balancer.least_loaded_server(&[]).unwrap();
    let second = balancer.least_loaded_server(&[]).unwrap();
    assert_ne!(first, second);
    assert_eq!(balancer.connection_count("h1"), Some(1));
    assert_eq!(balancer.connection_count("h2"), Some(1));

    balancer.update_connection_map(&first, -1);
    assert_eq!(balancer.least_loaded_server(&[]), Some(first));
}

#[test]
fn concurrent_picks_are_counted_exactly() {
    let balancer = Arc::new(
        LoadBalancer::new("simple", Policy::Uniform, Duration::from_secs(300))
            .with_resolver(Arc::new(NoDns)),
    );
    assert!(balancer.refresh(&mut two_region_cluster()).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let balancer = Arc::clone(&balancer);
            thread::spawn(move || {
                for _ in 0..25 {
                    assert!(balancer.least_loaded_server(&[]).is_some());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let h1 = balancer.connection_count("h1").unwrap();
    let h2 = balancer.connection_count("h2").unwrap();
    assert_eq!(h1 + h2, 100);
    assert!(h1.abs_diff(h2) <= 1);
}

#[test]
fn unknown_connected_address_leaves_view_untouched() {
    let balancer = LoadBalancer::new("simple", Policy::Uniform, Duration::from_secs(300))
        .with_resolver(Arc::new(NoDns));
    let mut cluster = two_region_cluster();
    cluster.connected = "elsewhere".into();

    assert!(!balancer.refresh(&mut cluster).unwrap());
    assert!(balancer.servers().is_empty());
    assert!(balancer.needs_refresh());
}

#[test]
fn refresh_errors_propagate() {
    let balancer = LoadBalancer::new("simple", Policy::Uniform, Duration::from_secs(300));
    assert!(matches!(
        balancer.refresh(&mut Unreachable),
        Err(Error::ConnectionBroken)
    ));
}

#[test]
fn failed_member_is_skipped_until_refresh() {
    let balancer = LoadBalancer::new("simple", Policy::Uniform, Duration::from_secs(300))
        .with_resolver(Arc::new(NoDns));
    assert!(balancer.refresh(&mut two_region_cluster()).unwrap());

    balancer.update_failed_hosts("h2");
    for _ in 0..3 {
        assert_eq!(balancer.least_loaded_server(&[]).as_deref(), Some("h1"));
    }
    assert_eq!(balancer.unreachable_hosts(), ["h2"]);

    balancer.set_for_refresh();
    assert!(balancer.refresh(&mut two_region_cluster()).unwrap());
    assert!(balancer.unreachable_hosts().is_empty());
    assert_eq!(balancer.connection_count("h2"), Some(0));
}

#[test]
fn registry_shares_balancers_per_placement() {
    let registry = BalancerRegistry::new();
    let refresh = Duration::from_secs(300);

    let uniform = registry.get_or_create(None, refresh).unwrap();
    assert!(Arc::ptr_eq(&uniform, &registry.get_or_create(None, refresh).unwrap()));

    let east = registry.get_or_create(Some("aws.us-east.1a"), refresh).unwrap();
    assert!(!Arc::ptr_eq(&uniform, &east));
    assert!(matches!(east.policy(), Policy::Topology(_)));

    assert!(registry.get_or_create(Some("aws.us-east"), refresh).is_err());
}
