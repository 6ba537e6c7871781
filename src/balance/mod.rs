//! Cluster-aware load balancing.
//!
//! A [`LoadBalancer`] learns the cluster membership by running
//! [`SERVERS_QUERY`] over an existing connection, then hands out the
//! member with the fewest connections opened through it. A topology
//! policy restricts routing to members in allowed `cloud.region.zone`
//! placements.

mod balancer;
mod placement;
mod registry;

pub use balancer::{
    AddressResolver, ClusterConnection, LoadBalancer, Policy, SERVERS_QUERY, SystemResolver,
};
pub use placement::{Placement, PlacementSet};
pub use registry::{BalancerRegistry, UNIFORM_KEY};
