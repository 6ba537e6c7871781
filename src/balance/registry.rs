//! Named load balancer instances.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::error::Result;

use super::balancer::{LoadBalancer, Policy};
use super::placement::PlacementSet;

/// Key of the balancer that routes to every member.
pub const UNIFORM_KEY: &str = "simple";

/// One balancer per placement string, created on first use.
///
/// Balancers never share a lock with each other; this map is only locked
/// to look one up.
#[derive(Debug, Default)]
pub struct BalancerRegistry {
    instances: Mutex<HashMap<String, Arc<LoadBalancer>>>,
}

impl BalancerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Balancer for `topology_keys`, or the uniform one when `None`.
    ///
    /// `refresh_interval` only applies when the balancer is created.
    pub fn get_or_create(
        &self,
        topology_keys: Option<&str>,
        refresh_interval: Duration,
    ) -> Result<Arc<LoadBalancer>> {
        let (key, policy) = match topology_keys {
            None => (UNIFORM_KEY.to_string(), Policy::Uniform),
            Some(keys) => (keys.to_string(), Policy::Topology(PlacementSet::parse(keys)?)),
        };

        let mut instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        let balancer = instances
            .entry(key)
            .or_insert_with_key(|key| Arc::new(LoadBalancer::new(key.as_str(), policy, refresh_interval)));
        Ok(Arc::clone(balancer))
    }

    /// Existing balancer registered under `key`.
    pub fn get(&self, key: &str) -> Option<Arc<LoadBalancer>> {
        let instances = self.instances.lock().unwrap_or_else(PoisonError::into_inner);
        instances.get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_instance_per_key() {
        let registry = BalancerRegistry::new();
        let refresh = Duration::from_secs(300);
        let a = registry.get_or_create(None, refresh).unwrap();
        let b = registry.get_or_create(None, refresh).unwrap();
        let c = registry.get_or_create(Some("aws.us-east.1a"), refresh).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(c.name(), "aws.us-east.1a");
        assert!(registry.get(UNIFORM_KEY).is_some());
    }

    #[test]
    fn malformed_keys_are_rejected() {
        let registry = BalancerRegistry::new();
        assert!(registry.get_or_create(Some("aws"), Duration::from_secs(1)).is_err());
        assert!(registry.get("aws").is_none());
    }
}
