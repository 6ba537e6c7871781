//! Host choosers: ordered candidate sequences for a connection attempt.

use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;

use crate::error::{Error, Result};
use crate::opts::Opts;

use super::spec::{CandidateHost, HostRequirement, HostSpec};
use super::tracker::HostStatusTracker;

/// Lazily produced, finite candidate sequence.
pub type Candidates = Box<dyn Iterator<Item = CandidateHost> + Send>;

/// Decides which hosts a connection attempt tries, and in which order.
///
/// Built-in choosers only consult the shared [`HostStatusTracker`]; the
/// callbacks exist for custom implementations registered through
/// [`ChooserRegistry`](super::ChooserRegistry) that keep their own state.
pub trait HostChooser: Send {
    /// Called once after construction with the connection URL, the parsed
    /// options and the requested role.
    fn init(&mut self, url: &str, opts: &Opts, requirement: HostRequirement) -> Result<()> {
        let _ = (url, opts, requirement);
        Ok(())
    }

    /// A fresh candidate sequence. Each call restarts from the beginning.
    fn candidates(&mut self) -> Candidates;

    /// A connection to `host` succeeded and passed the role check.
    fn register_success(&mut self, host: &HostSpec) {
        let _ = host;
    }

    /// A connection to `host` failed.
    fn register_failure(&mut self, host: &HostSpec, error: &Error) {
        let _ = (host, error);
    }

    /// A connection to `host` obtained through this chooser was closed.
    fn register_disconnect(&mut self, host: &HostSpec) {
        let _ = host;
    }

    /// Whether new connections to `host` should be avoided.
    fn is_draining(&self, host: &HostSpec) -> bool {
        let _ = host;
        false
    }

    /// Connect timeout for `host`. `None` uses [`Opts::connect_timeout`].
    fn connection_timeout(&self, host: &HostSpec) -> Option<Duration> {
        let _ = host;
        None
    }
}

/// Chooser for a single configured host.
#[derive(Debug, Clone)]
pub struct SingleHostChooser {
    candidate: CandidateHost,
}

impl SingleHostChooser {
    /// Always yield `host` with `requirement` attached.
    pub fn new(host: HostSpec, requirement: HostRequirement) -> Self {
        Self {
            candidate: CandidateHost::new(host, requirement),
        }
    }
}

impl HostChooser for SingleHostChooser {
    fn candidates(&mut self) -> Candidates {
        Box::new(std::iter::once(self.candidate.clone()))
    }
}

/// Chooser over several hosts, ordered by what the tracker has seen.
#[derive(Debug, Clone)]
pub struct MultiHostChooser {
    hosts: Arc<[HostSpec]>,
    requirement: HostRequirement,
    recheck: Duration,
    load_balance: bool,
    tracker: Arc<HostStatusTracker>,
}

impl MultiHostChooser {
    /// Create a chooser over `hosts`.
    pub fn new(
        hosts: Vec<HostSpec>,
        requirement: HostRequirement,
        tracker: Arc<HostStatusTracker>,
    ) -> Self {
        Self {
            hosts: hosts.into(),
            requirement,
            recheck: Duration::from_secs(10),
            load_balance: false,
            tracker,
        }
    }

    /// How long a report stays authoritative before the host is retried regardless.
    pub fn with_recheck(mut self, recheck: Duration) -> Self {
        self.recheck = recheck;
        self
    }

    /// Shuffle each candidate tier.
    pub fn with_load_balance(mut self, load_balance: bool) -> Self {
        self.load_balance = load_balance;
        self
    }

    fn tier(&self, requirement: HostRequirement) -> Vec<CandidateHost> {
        let mut hosts = self
            .tracker
            .candidates(&self.hosts, requirement, self.recheck);
        if self.load_balance {
            hosts.shuffle(&mut rand::rng());
        }
        hosts
            .into_iter()
            .map(|host| CandidateHost::new(host, requirement))
            .collect()
    }

    fn ordered(&self) -> Vec<CandidateHost> {
        let Some(preferred_role) = self.requirement.preferred() else {
            return self.tier(self.requirement);
        };

        let mut preferred = self.tier(preferred_role);
        let any = self.tier(HostRequirement::Any);

        // the last preferred host would be retried immediately as the first "any" host
        if let (Some(last), Some(first)) = (preferred.last(), any.first())
            && last.host == first.host
        {
            preferred.pop();
        }

        preferred.extend(any);
        preferred
    }

    /// Compute the full candidate order now.
    pub fn resolve(&self) -> Vec<CandidateHost> {
        let ordered = self.ordered();
        if !ordered.is_empty() {
            return ordered;
        }

        tracing::debug!(
            requirement = %self.requirement,
            "no known-good host, falling back to every configured host"
        );
        let mut all = self.hosts.to_vec();
        if self.load_balance {
            all.shuffle(&mut rand::rng());
        }
        all.into_iter()
            .map(|host| CandidateHost::new(host, self.requirement))
            .collect()
    }
}

impl HostChooser for MultiHostChooser {
    fn candidates(&mut self) -> Candidates {
        Box::new(LazyCandidates {
            chooser: self.clone(),
            resolved: None,
        })
    }
}

/// Defers reading the tracker until the first candidate is requested.
struct LazyCandidates {
    chooser: MultiHostChooser,
    resolved: Option<std::vec::IntoIter<CandidateHost>>,
}

impl Iterator for LazyCandidates {
    type Item = CandidateHost;

    fn next(&mut self) -> Option<CandidateHost> {
        let chooser = &self.chooser;
        self.resolved
            .get_or_insert_with(|| chooser.resolve().into_iter())
            .next()
    }
}

/// Build the built-in chooser for `opts`.
pub fn chooser_for(opts: &Opts, tracker: &Arc<HostStatusTracker>) -> Result<Box<dyn HostChooser>> {
    match opts.hosts.as_slice() {
        [] => Err(Error::InvalidUsage("no host configured".into())),
        [host] => Ok(Box::new(SingleHostChooser::new(
            host.clone(),
            opts.target_server_type,
        ))),
        hosts => Ok(Box::new(
            MultiHostChooser::new(hosts.to_vec(), opts.target_server_type, Arc::clone(tracker))
                .with_recheck(opts.host_recheck)
                .with_load_balance(opts.load_balance_hosts),
        )),
    }
}
