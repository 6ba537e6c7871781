//! `cloud.region.zone` placement allow-lists.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One placement. Fields are stored lowercased and compared case-insensitively.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placement {
    cloud: String,
    region: String,
    zone: String,
}

impl Placement {
    /// Create a placement.
    pub fn new(cloud: &str, region: &str, zone: &str) -> Self {
        Self {
            cloud: cloud.to_ascii_lowercase(),
            region: region.to_ascii_lowercase(),
            zone: zone.to_ascii_lowercase(),
        }
    }

    /// Whether a member in `cloud`/`region`/`zone` lives in this placement.
    pub fn matches(&self, cloud: &str, region: &str, zone: &str) -> bool {
        self.cloud.eq_ignore_ascii_case(cloud)
            && self.region.eq_ignore_ascii_case(region)
            && self.zone.eq_ignore_ascii_case(zone)
    }
}

impl FromStr for Placement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        match parts.as_slice() {
            [cloud, region, zone]
                if !cloud.is_empty() && !region.is_empty() && !zone.is_empty() =>
            {
                Ok(Self::new(cloud, region, zone))
            }
            _ => Err(Error::Config(format!(
                "Malformed topology key '{s}': expected cloud.region.zone"
            ))),
        }
    }
}

impl fmt::Display for Placement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.cloud, self.region, self.zone)
    }
}

/// Comma-separated placement allow-list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementSet {
    placements: Vec<Placement>,
}

impl PlacementSet {
    /// Parse `aws.us-east.1a,aws.us-east.1b`.
    pub fn parse(list: &str) -> Result<Self> {
        let placements = list
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Placement>>>()?;
        if placements.is_empty() {
            return Err(Error::Config("topology-keys is empty".into()));
        }
        Ok(Self { placements })
    }

    /// Whether any placement admits the member.
    pub fn contains(&self, cloud: &str, region: &str, zone: &str) -> bool {
        self.placements
            .iter()
            .any(|p| p.matches(cloud, region, zone))
    }

    /// The placements.
    pub fn placements(&self) -> &[Placement] {
        &self.placements
    }
}
