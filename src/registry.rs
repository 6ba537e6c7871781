//! Process-wide routing state shared by connections.

use std::sync::Arc;

use crate::balance::BalancerRegistry;
use crate::host::{ChooserRegistry, HostStatusTracker};

/// Host status, load balancers and custom choosers.
///
/// Connections made through the same registry share what they learn about
/// the cluster. Build one per application and hand it to a
/// [`Connector`](crate::sync::Connector).
#[derive(Debug, Default)]
pub struct Registry {
    tracker: Arc<HostStatusTracker>,
    balancers: BalancerRegistry,
    choosers: ChooserRegistry,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last known status of each host.
    pub fn tracker(&self) -> &Arc<HostStatusTracker> {
        &self.tracker
    }

    /// Cluster-aware balancers keyed by placement.
    pub fn balancers(&self) -> &BalancerRegistry {
        &self.balancers
    }

    /// Custom host chooser factories and instances.
    pub fn choosers(&self) -> &ChooserRegistry {
        &self.choosers
    }
}
