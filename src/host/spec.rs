//! Host identity, observed status and role requirements.

use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default PostgreSQL port.
pub const DEFAULT_PORT: u16 = 5432;

/// A server address. Compared and hashed by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HostSpec {
    /// Hostname or IP literal (IPv6 without brackets)
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl HostSpec {
    /// Create a new host spec.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse one `host[:port]` entry. IPv6 literals must be bracketed when a port is given.
    pub fn parse(entry: &str, default_port: u16) -> Result<Self> {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(Error::InvalidUsage("empty host entry".into()));
        }

        if let Some(rest) = entry.strip_prefix('[') {
            let (host, tail) = rest
                .split_once(']')
                .ok_or_else(|| Error::InvalidUsage(format!("unterminated IPv6 host: {entry}")))?;
            let port = match tail.strip_prefix(':') {
                Some(port) => parse_port(port)?,
                None if tail.is_empty() => default_port,
                None => return Err(Error::InvalidUsage(format!("invalid host entry: {entry}"))),
            };
            return Ok(Self::new(host, port));
        }

        match entry.rsplit_once(':') {
            // a bare IPv6 literal has more than one colon and no port
            Some((host, _)) if host.contains(':') => Ok(Self::new(entry, default_port)),
            Some((host, port)) => Ok(Self::new(host, parse_port(port)?)),
            None => Ok(Self::new(entry, default_port)),
        }
    }

    /// Parse a comma-separated host list such as `h1:5432,h2,[::1]:5433`.
    pub fn parse_list(list: &str, default_port: u16) -> Result<Vec<Self>> {
        list.split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| Self::parse(s, default_port))
            .collect()
    }
}

fn parse_port(port: &str) -> Result<u16> {
    port.parse()
        .map_err(|_| Error::InvalidUsage(format!("invalid port: {port}")))
}

impl fmt::Display for HostSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Last observed state of a host. Only changed by explicit reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostStatus {
    /// The last connection attempt failed
    ConnectFail,
    /// Connected, role not checked
    ConnectOk,
    /// Accepts writes
    Primary,
    /// Read-only standby
    Secondary,
}

/// Role a caller wants from the server it connects to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostRequirement {
    /// Any reachable server
    #[default]
    Any,
    /// Only a primary
    Primary,
    /// Only a standby
    Secondary,
    /// A primary if one is reachable, otherwise anything
    PreferPrimary,
    /// A standby if one is reachable, otherwise anything
    PreferSecondary,
}

impl HostRequirement {
    /// Whether a host last seen with `status` may satisfy this requirement.
    pub fn allows(self, status: HostStatus) -> bool {
        match self {
            HostRequirement::Any
            | HostRequirement::PreferPrimary
            | HostRequirement::PreferSecondary => status != HostStatus::ConnectFail,
            HostRequirement::Primary => {
                matches!(status, HostStatus::Primary | HostStatus::ConnectOk)
            }
            HostRequirement::Secondary => {
                matches!(status, HostStatus::Secondary | HostStatus::ConnectOk)
            }
        }
    }

    /// The strict role a two-tier requirement tries first.
    pub fn preferred(self) -> Option<HostRequirement> {
        match self {
            HostRequirement::PreferPrimary => Some(HostRequirement::Primary),
            HostRequirement::PreferSecondary => Some(HostRequirement::Secondary),
            _ => None,
        }
    }

    /// Whether the server's role has to be queried after connecting.
    pub fn needs_role_check(self) -> bool {
        self != HostRequirement::Any
    }
}

impl fmt::Display for HostRequirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HostRequirement::Any => "any",
            HostRequirement::Primary => "primary",
            HostRequirement::Secondary => "secondary",
            HostRequirement::PreferPrimary => "preferPrimary",
            HostRequirement::PreferSecondary => "preferSecondary",
        })
    }
}

impl FromStr for HostRequirement {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "any" => Ok(HostRequirement::Any),
            "primary" | "master" | "read-write" => Ok(HostRequirement::Primary),
            "secondary" | "slave" | "standby" | "read-only" => Ok(HostRequirement::Secondary),
            "preferPrimary" | "prefer-primary" => Ok(HostRequirement::PreferPrimary),
            "preferSecondary" | "preferSlave" | "prefer-standby" => {
                Ok(HostRequirement::PreferSecondary)
            }
            _ => Err(Error::InvalidUsage(format!(
                "Invalid target server type: {s}"
            ))),
        }
    }
}

/// A host paired with the role the connector must verify once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateHost {
    /// Where to connect
    pub host: HostSpec,
    /// Role to check after connecting
    pub requirement: HostRequirement,
}

impl CandidateHost {
    /// Create a new candidate.
    pub fn new(host: HostSpec, requirement: HostRequirement) -> Self {
        Self { host, requirement }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_host_list() {
        let hosts = HostSpec::parse_list("db1:5433,db2,[::1]:6000,[fe80::1]", 5432).unwrap();
        assert_eq!(
            hosts,
            vec![
                HostSpec::new("db1", 5433),
                HostSpec::new("db2", 5432),
                HostSpec::new("::1", 6000),
                HostSpec::new("fe80::1", 5432),
            ]
        );
        assert_eq!(hosts[2].to_string(), "[::1]:6000");
    }

    #[test]
    fn parse_rejects_bad_port() {
        assert!(HostSpec::parse("db1:notaport", 5432).is_err());
        assert!(HostSpec::parse("[::1", 5432).is_err());
    }

    #[test]
    fn requirement_predicates() {
        use HostStatus::*;

        assert!(HostRequirement::Any.allows(ConnectOk));
        assert!(HostRequirement::Any.allows(Secondary));
        assert!(!HostRequirement::Any.allows(ConnectFail));

        assert!(HostRequirement::Primary.allows(Primary));
        assert!(HostRequirement::Primary.allows(ConnectOk));
        assert!(!HostRequirement::Primary.allows(Secondary));

        assert!(HostRequirement::Secondary.allows(Secondary));
        assert!(!HostRequirement::Secondary.allows(Primary));

        assert!(HostRequirement::PreferSecondary.allows(Primary));
        assert!(!HostRequirement::PreferPrimary.allows(ConnectFail));
    }

    #[test]
    fn requirement_aliases() {
        assert_eq!(
            "master".parse::<HostRequirement>().unwrap(),
            HostRequirement::Primary
        );
        assert_eq!(
            "preferSlave".parse::<HostRequirement>().unwrap(),
            HostRequirement::PreferSecondary
        );
        assert!("leader".parse::<HostRequirement>().is_err());
    }
}
