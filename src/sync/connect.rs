//! Opening connections across several hosts.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError};

use crate::error::{Error, HostFailure, Result};
use crate::gss::GssProvider;
use crate::host::{CandidateHost, HostRequirement, HostSpec, HostStatus, SharedChooser};
use crate::opts::Opts;
use crate::registry::Registry;

use super::conn::Conn;

/// Query whose answer decides whether a server is a primary.
pub const ROLE_QUERY: &str = "SHOW transaction_read_only";

/// Opens connections using the shared state of a [`Registry`].
///
/// Candidates come from the host chooser for the options. Each one is
/// dialed in turn, its role checked, and the outcome reported to the
/// registry's tracker. With `load_balance` set, the first connection
/// refreshes the cluster view and the connector moves to the least loaded
/// member.
#[derive(Clone)]
pub struct Connector {
    registry: Arc<Registry>,
    gss: Option<Arc<dyn GssProvider>>,
}

impl fmt::Debug for Connector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connector")
            .field("registry", &self.registry)
            .field("gss", &self.gss.is_some())
            .finish()
    }
}

fn lock(chooser: &SharedChooser) -> std::sync::MutexGuard<'_, Box<dyn crate::host::HostChooser>> {
    chooser.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Role of the server behind `conn`.
fn detect_role(conn: &mut Conn) -> Result<HostStatus> {
    let rows = conn.query_rows(ROLE_QUERY)?;
    let read_only = rows.first().and_then(|row| row.get_index(0));
    Ok(if read_only == Some("off") {
        HostStatus::Primary
    } else {
        HostStatus::Secondary
    })
}

impl Connector {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            gss: None,
        }
    }

    /// Offer GSS transport encryption through `provider`.
    pub fn with_gss(mut self, provider: Arc<dyn GssProvider>) -> Self {
        self.gss = Some(provider);
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn gss(&self) -> Option<&dyn GssProvider> {
        self.gss.as_deref()
    }

    /// Connect according to `opts`.
    pub fn connect(&self, opts: &Opts) -> Result<Conn> {
        let conn = self.connect_any(opts)?;
        if !opts.load_balance {
            return Ok(conn);
        }
        self.connect_balanced(opts, conn)
    }

    fn connect_any(&self, opts: &Opts) -> Result<Conn> {
        let chooser = self
            .registry
            .choosers()
            .resolve(opts, self.registry.tracker())?;
        let candidates = lock(&chooser).candidates();

        let mut known: HashMap<HostSpec, HostStatus> = HashMap::new();
        let mut failures = Vec::new();

        for candidate in candidates {
            let host = &candidate.host;
            if let Some(&status) = known.get(host)
                && !candidate.requirement.allows(status)
            {
                continue;
            }
            let (draining, timeout) = {
                let chooser = lock(&chooser);
                (chooser.is_draining(host), chooser.connection_timeout(host))
            };
            if draining {
                tracing::debug!(%host, "skipping draining host");
                continue;
            }

            match self.try_candidate(&candidate, opts, timeout.or(opts.connect_timeout)) {
                Ok((mut conn, status)) => {
                    known.insert(host.clone(), status);
                    self.registry.tracker().report(host, status);
                    if !candidate.requirement.allows(status) {
                        tracing::debug!(%host, ?status, requirement = %candidate.requirement, "role mismatch");
                        failures.push(HostFailure {
                            host: host.clone(),
                            reason: format!("server role {status:?} does not satisfy {}", candidate.requirement),
                        });
                        continue;
                    }
                    lock(&chooser).register_success(host);
                    let shared = Arc::clone(&chooser);
                    let disconnected = host.clone();
                    conn.on_close(move || lock(&shared).register_disconnect(&disconnected));
                    return Ok(conn);
                }
                Err(e @ (Error::InvalidUsage(_) | Error::Config(_))) => return Err(e),
                Err(e) => {
                    tracing::warn!(%host, error = %e, "connection failed, trying next host");
                    known.insert(host.clone(), HostStatus::ConnectFail);
                    self.registry.tracker().report(host, HostStatus::ConnectFail);
                    lock(&chooser).register_failure(host, &e);
                    failures.push(HostFailure {
                        host: host.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        Err(Error::NoHostAvailable {
            requirement: opts.target_server_type,
            failures,
        })
    }

    fn try_candidate(
        &self,
        candidate: &CandidateHost,
        opts: &Opts,
        timeout: Option<std::time::Duration>,
    ) -> Result<(Conn, HostStatus)> {
        let mut conn = Conn::open(&candidate.host, opts, timeout, self.gss())?;
        if candidate.requirement == HostRequirement::Any {
            return Ok((conn, HostStatus::ConnectOk));
        }
        let status = detect_role(&mut conn)?;
        Ok((conn, status))
    }

    /// Move from `control` to the least loaded member of the cluster.
    fn connect_balanced(&self, opts: &Opts, mut control: Conn) -> Result<Conn> {
        let balancer = self
            .registry
            .balancers()
            .get_or_create(opts.topology_keys.as_deref(), opts.load_balancer_refresh)?;

        match balancer.refresh(&mut control) {
            Ok(true) => {}
            Ok(false) => return Ok(control),
            Err(e) => {
                tracing::warn!(balancer = balancer.name(), error = %e, "cluster refresh failed");
                return Ok(control);
            }
        }

        let mut excluded = Vec::new();
        while let Some(server) = balancer.least_loaded_server(&excluded) {
            let port = balancer.port_for(&server).unwrap_or(control.host().port);
            let host = HostSpec::new(server.clone(), port);

            let mut conn = if host == *control.host() {
                control
            } else {
                match Conn::open(&host, opts, opts.connect_timeout, self.gss()) {
                    Ok(conn) => conn,
                    Err(e) => {
                        tracing::warn!(%host, error = %e, "least loaded server unreachable");
                        balancer.update_failed_hosts(&server);
                        self.registry.tracker().report(&host, HostStatus::ConnectFail);
                        excluded.push(server);
                        continue;
                    }
                }
            };

            let counted = Arc::clone(&balancer);
            conn.on_close(move || counted.update_connection_map(&server, -1));
            return Ok(conn);
        }

        Ok(control)
    }
}
