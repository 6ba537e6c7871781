//! The XA state machine.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

use crate::error::{Error, Result};
use crate::protocol::types::TransactionStatus;

use super::connection::{LogicalConnection, XaConnection};
use super::error::{XaError, XaErrorCode, XaResult};
use super::xid::Xid;
use super::{EndFlags, RecoverFlags, StartFlags, Vote};

const RECOVER_QUERY: &str = "SELECT gid FROM pg_prepared_xacts WHERE database = current_database()";

// SQLSTATE of an unknown prepared transaction
const UNDEFINED_OBJECT: &str = "42704";

static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
enum State {
    /// No branch associated. `prepared` is the last branch this resource
    /// prepared; `resolved` is set once a branch was committed or rolled
    /// back.
    Idle { prepared: Option<Xid>, resolved: bool },
    Active(Xid),
    Ended(Xid),
}

impl State {
    fn current(&self) -> Option<&Xid> {
        match self {
            Self::Active(xid) | Self::Ended(xid) => Some(xid),
            Self::Idle { .. } => None,
        }
    }

    fn prepared(&self) -> Option<&Xid> {
        match self {
            Self::Idle { prepared, .. } => prepared.as_ref(),
            Self::Active(_) | Self::Ended(_) => None,
        }
    }

    fn resolved(&self) -> bool {
        matches!(self, Self::Idle { resolved: true, .. })
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Idle { .. } => "IDLE",
            Self::Active(_) => "ACTIVE",
            Self::Ended(_) => "ENDED",
        }
    }
}

struct OptXid<'a>(Option<&'a Xid>);

impl fmt::Display for OptXid<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(xid) => xid.fmt(f),
            None => f.write_str("null"),
        }
    }
}

/// XA resource manager over one connection.
pub struct XaResource<C: XaConnection> {
    conn: C,
    state: State,
    // Autocommit setting to restore when the branch is done
    local_autocommit: bool,
    id: u64,
}

impl<C: XaConnection> fmt::Debug for XaResource<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("XaResource")
            .field("state", &self.state)
            .field("local_autocommit", &self.local_autocommit)
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl<C: XaConnection> XaResource<C> {
    /// Take ownership of `conn`.
    pub fn new(conn: C) -> Self {
        Self {
            local_autocommit: conn.autocommit(),
            conn,
            state: State::Idle {
                prepared: None,
                resolved: false,
            },
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// Give back the connection.
    pub fn into_inner(self) -> C {
        self.conn
    }

    /// Handle for application work. Outside a branch the connection is
    /// switched to autocommit first.
    pub fn connection(&mut self) -> Result<LogicalConnection<'_, C>> {
        let idle = matches!(self.state, State::Idle { .. });
        if idle {
            self.conn.set_autocommit(true)?;
        }
        Ok(LogicalConnection::new(&mut self.conn, !idle))
    }

    /// The branch associated with this resource.
    pub fn current_xid(&self) -> Option<&Xid> {
        self.state.current()
    }

    /// The branch this resource prepared last, while idle.
    pub fn prepared_xid(&self) -> Option<&Xid> {
        self.state.prepared()
    }

    /// Two resources are the same resource manager only if they are the
    /// same instance.
    pub fn is_same_rm<D: XaConnection>(&self, other: &XaResource<D>) -> bool {
        self.id == other.id
    }

    /// Transaction timeouts are not supported.
    pub fn transaction_timeout(&self) -> u32 {
        0
    }

    /// Transaction timeouts are not supported; always `false`.
    pub fn set_transaction_timeout(&mut self, _seconds: u32) -> bool {
        false
    }

    fn context(&self) -> String {
        format!(
            "currentXid={}, preparedXid={}, state={}",
            OptXid(self.state.current()),
            OptXid(self.state.prepared()),
            self.state.name()
        )
    }

    /// Associate the connection with `xid`.
    pub fn start(&mut self, xid: &Xid, flags: StartFlags) -> XaResult<()> {
        debug!(%xid, ?flags, state = self.state.name(), "xa start");

        if let State::Active(_) = self.state {
            return Err(XaError::new(
                XaErrorCode::Proto,
                format!("Connection is busy with another transaction. start xid={xid}, {}", self.context()),
            ));
        }

        match flags {
            StartFlags::Resume => {
                return Err(XaError::new(
                    XaErrorCode::RmErr,
                    "Not implemented: suspend/resume",
                ));
            }
            StartFlags::Join => {
                let joinable = matches!(&self.state, State::Ended(current) if current == xid);
                if !joinable {
                    return Err(XaError::new(
                        XaErrorCode::RmErr,
                        format!(
                            "Invalid protocol state requested. Attempted transaction interleaving is not supported. xid={xid}, {}",
                            self.context()
                        ),
                    ));
                }
            }
            StartFlags::NoFlags => {
                if let State::Ended(_) = self.state {
                    return Err(XaError::new(
                        XaErrorCode::RmErr,
                        format!(
                            "Invalid protocol state requested. Attempted transaction interleaving is not supported. xid={xid}, {}",
                            self.context()
                        ),
                    ));
                }
                self.local_autocommit = self.conn.autocommit();
                self.conn.set_autocommit(false).map_err(|e| {
                    XaError::with_cause(XaErrorCode::RmErr, "Error disabling autocommit", e)
                })?;
            }
        }

        self.state = State::Active(xid.clone());
        Ok(())
    }

    /// Dissociate the connection from `xid`.
    pub fn end(&mut self, xid: &Xid, flags: EndFlags) -> XaResult<()> {
        debug!(%xid, ?flags, state = self.state.name(), "xa end");

        let associated = matches!(&self.state, State::Active(current) if current == xid);
        if !associated {
            return Err(XaError::new(
                XaErrorCode::Proto,
                format!(
                    "tried to call end without corresponding start call. end xid={xid}, {}",
                    self.context()
                ),
            ));
        }
        if flags == EndFlags::Suspend {
            return Err(XaError::new(XaErrorCode::RmErr, "Not implemented: suspend"));
        }

        self.state = State::Ended(xid.clone());
        Ok(())
    }

    /// Prepare the ended branch `xid`.
    pub fn prepare(&mut self, xid: &Xid) -> XaResult<Vote> {
        debug!(%xid, state = self.state.name(), "xa prepare");

        match &self.state {
            State::Ended(current) if current == xid => {}
            State::Active(current) if current == xid => {
                return Err(XaError::new(
                    XaErrorCode::Inval,
                    format!("Prepare called before end. prepare xid={xid}, {}", self.context()),
                ));
            }
            State::Active(_) | State::Ended(_) => {
                return Err(XaError::new(
                    XaErrorCode::RmErr,
                    format!(
                        "Not implemented: Prepare must be issued using the same connection that started the transaction. prepare xid={xid}, {}",
                        self.context()
                    ),
                ));
            }
            State::Idle { prepared: Some(_), .. } => {
                return Err(XaError::new(
                    XaErrorCode::Proto,
                    format!(
                        "Preparing already prepared transaction. prepare xid={xid}, {}",
                        self.context()
                    ),
                ));
            }
            State::Idle { prepared: None, .. } => {
                return Err(XaError::new(
                    XaErrorCode::Nota,
                    format!("Current connection does not have an associated xid. prepare xid={xid}"),
                ));
            }
        }

        self.state = State::Idle {
            prepared: Some(xid.clone()),
            resolved: false,
        };

        let result = self
            .conn
            .execute(&format!("PREPARE TRANSACTION '{}'", xid.encode()))
            .and_then(|()| self.conn.set_autocommit(self.local_autocommit));

        match result {
            Ok(()) => Ok(Vote::Ok),
            Err(e) => {
                let code = if e.sqlstate().is_some_and(|s| s.starts_with("23")) {
                    XaErrorCode::RbIntegrity
                } else {
                    XaErrorCode::RmFail
                };
                Err(XaError::with_cause(
                    code,
                    format!("Error preparing transaction. prepare xid={xid}"),
                    e,
                ))
            }
        }
    }

    /// Commit `xid`, in one phase from `Ended` or as a prepared branch.
    pub fn commit(&mut self, xid: &Xid, one_phase: bool) -> XaResult<()> {
        debug!(%xid, one_phase, state = self.state.name(), "xa commit");
        if one_phase {
            self.commit_one_phase(xid)
        } else {
            self.commit_prepared(xid)
        }
    }

    fn commit_one_phase(&mut self, xid: &Xid) -> XaResult<()> {
        if self.state.prepared() == Some(xid) {
            return Err(XaError::new(
                XaErrorCode::Proto,
                format!(
                    "One-phase commit called for xid {xid} but connection was prepared with xid {}",
                    OptXid(self.state.prepared())
                ),
            ));
        }
        match &self.state {
            State::Ended(current) if current == xid => {}
            State::Active(current) if current == xid => {
                return Err(XaError::new(
                    XaErrorCode::Proto,
                    format!("commit called before end. commit xid={xid}, {}", self.context()),
                ));
            }
            State::Idle { resolved: false, .. } => {
                return Err(XaError::new(
                    XaErrorCode::RmErr,
                    format!(
                        "Not implemented: one-phase commit must be issued using the same connection that was used to start it. commit xid={xid}, {}",
                        self.context()
                    ),
                ));
            }
            // a branch already resolved here, or another branch is associated
            State::Idle { resolved: true, .. } | State::Active(_) | State::Ended(_) => {
                return Err(XaError::new(
                    XaErrorCode::Nota,
                    format!(
                        "One-phase commit with unknown xid. commit xid={xid}, {}",
                        self.context()
                    ),
                ));
            }
        }

        self.state = State::Idle {
            prepared: None,
            resolved: true,
        };

        self.conn
            .commit()
            .and_then(|()| self.conn.set_autocommit(self.local_autocommit))
            .map_err(|e| {
                let code = if e.is_connection_error() {
                    XaErrorCode::RmFail
                } else {
                    XaErrorCode::RmErr
                };
                XaError::with_cause(
                    code,
                    format!("Error during one-phase commit. commit xid={xid}"),
                    e,
                )
            })
    }

    fn commit_prepared(&mut self, xid: &Xid) -> XaResult<()> {
        let idle = matches!(self.state, State::Idle { .. });
        let tx_status = self.conn.transaction_status();
        if !idle || tx_status != TransactionStatus::Idle {
            return Err(XaError::new(
                XaErrorCode::RmErr,
                format!(
                    "Not implemented: 2nd phase commit must be issued using an idle connection. commit xid={xid}, {}, transactionState={tx_status:?}",
                    self.context()
                ),
            ));
        }

        self.local_autocommit = self.conn.autocommit();
        let result = self.conn.set_autocommit(true).and_then(|()| {
            let committed = self
                .conn
                .execute(&format!("COMMIT PREPARED '{}'", xid.encode()));
            let restored = self.conn.set_autocommit(self.local_autocommit);
            committed.and(restored)
        });
        if result.is_ok() {
            self.mark_resolved();
        }

        result.map_err(|e| {
            let code = self.resolution_code(xid, &e);
            XaError::with_cause(
                code,
                format!(
                    "Error committing prepared transaction. commit xid={xid}, {}",
                    self.context()
                ),
                e,
            )
        })
    }

    /// Roll back `xid`: the associated branch locally, anything else as a
    /// prepared transaction.
    pub fn rollback(&mut self, xid: &Xid) -> XaResult<()> {
        debug!(%xid, state = self.state.name(), "xa rollback");

        let result = if self.state.current() == Some(xid) {
            self.state = State::Idle {
                prepared: None,
                resolved: false,
            };
            self.conn
                .rollback()
                .and_then(|()| self.conn.set_autocommit(self.local_autocommit))
        } else {
            self.conn.set_autocommit(true).and_then(|()| {
                self.conn
                    .execute(&format!("ROLLBACK PREPARED '{}'", xid.encode()))
            })
        };

        match result {
            Ok(()) => {
                self.mark_resolved();
                Ok(())
            }
            Err(e) => {
                let code = self.resolution_code(xid, &e);
                Err(XaError::with_cause(
                    code,
                    format!(
                        "Error rolling back prepared transaction. rollback xid={xid}, {}",
                        self.context()
                    ),
                    e,
                ))
            }
        }
    }

    /// Prepared branches of the current database. Only a call that starts
    /// a scan returns anything; it returns every branch at once.
    pub fn recover(&mut self, flags: RecoverFlags) -> XaResult<Vec<Xid>> {
        if !flags.starts_scan() {
            return Ok(Vec::new());
        }

        let gids = self
            .conn
            .query_column(RECOVER_QUERY)
            .map_err(|e| XaError::with_cause(XaErrorCode::RmErr, "Error during recover", e))?;

        let xids = gids
            .into_iter()
            .flatten()
            .filter_map(|gid| {
                let xid = Xid::decode(&gid);
                if xid.is_none() {
                    debug!(gid, "skipping prepared transaction not named by an xid");
                }
                xid
            })
            .collect();
        Ok(xids)
    }

    /// Heuristic completion is never reported, so there is nothing to
    /// forget.
    pub fn forget(&mut self, xid: &Xid) -> XaResult<()> {
        Err(XaError::new(
            XaErrorCode::Nota,
            format!("Not implemented: forget. xid={xid}"),
        ))
    }

    fn mark_resolved(&mut self) {
        if let State::Idle { resolved, .. } = &mut self.state {
            *resolved = true;
        }
    }

    fn resolution_code(&self, xid: &Xid, err: &Error) -> XaErrorCode {
        if err.is_connection_error() {
            XaErrorCode::RmFail
        } else if err.sqlstate() == Some(UNDEFINED_OBJECT)
            && (self.state.resolved() || self.state.prepared() != Some(xid))
        {
            XaErrorCode::Nota
        } else {
            XaErrorCode::RmErr
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServerError;

    /// Records statements and fails the ones matching `fail_on`.
    #[derive(Default)]
    struct Scripted {
        log: Vec<String>,
        autocommit: bool,
        in_tx: bool,
        fail_on: Option<(&'static str, &'static str)>,
        gids: Vec<Option<String>>,
    }

    impl Scripted {
        fn new() -> Self {
            Self {
                autocommit: true,
                ..Default::default()
            }
        }

        fn check(&self, sql: &str) -> Result<()> {
            match self.fail_on {
                Some((prefix, code)) if sql.starts_with(prefix) => {
                    Err(Error::Server(ServerError {
                        severity: Some("ERROR".into()),
                        code: Some(code.into()),
                        message: Some("scripted failure".into()),
                        ..Default::default()
                    }))
                }
                _ => Ok(()),
            }
        }
    }

    impl XaConnection for Scripted {
        fn execute(&mut self, sql: &str) -> Result<()> {
            self.log.push(sql.to_string());
            self.check(sql)?;
            if !self.autocommit {
                self.in_tx = !sql.starts_with("PREPARE TRANSACTION");
            }
            Ok(())
        }

        fn query_column(&mut self, sql: &str) -> Result<Vec<Option<String>>> {
            self.log.push(sql.to_string());
            Ok(self.gids.clone())
        }

        fn autocommit(&self) -> bool {
            self.autocommit
        }

        fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
            if autocommit && !self.autocommit && self.in_tx {
                self.commit()?;
            }
            self.autocommit = autocommit;
            Ok(())
        }

        fn commit(&mut self) -> Result<()> {
            self.log.push("COMMIT".into());
            self.check("COMMIT")?;
            self.in_tx = false;
            Ok(())
        }

        fn rollback(&mut self) -> Result<()> {
            self.log.push("ROLLBACK".into());
            self.in_tx = false;
            Ok(())
        }

        fn transaction_status(&self) -> TransactionStatus {
            if self.in_tx {
                TransactionStatus::InTransaction
            } else {
                TransactionStatus::Idle
            }
        }
    }

    fn xid(n: u8) -> Xid {
        Xid::new(7, vec![n; 4], vec![1]).unwrap()
    }

    #[test]
    fn two_phase_commit_restores_autocommit() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(1);
        res.start(&x, StartFlags::NoFlags).unwrap();
        assert!(!res.connection().unwrap().autocommit());
        res.connection().unwrap().execute("INSERT INTO t VALUES (1)").unwrap();
        res.end(&x, EndFlags::Success).unwrap();
        assert_eq!(res.prepare(&x).unwrap(), Vote::Ok);
        assert_eq!(res.prepared_xid(), Some(&x));
        res.commit(&x, false).unwrap();

        let conn = res.into_inner();
        assert!(conn.autocommit);
        let gid = x.encode();
        assert_eq!(
            conn.log,
            [
                "INSERT INTO t VALUES (1)".to_string(),
                format!("PREPARE TRANSACTION '{gid}'"),
                format!("COMMIT PREPARED '{gid}'"),
            ]
        );
    }

    #[test]
    fn one_phase_commit() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(2);
        res.start(&x, StartFlags::NoFlags).unwrap();
        res.end(&x, EndFlags::Success).unwrap();
        res.commit(&x, true).unwrap();
        assert_eq!(res.current_xid(), None);
        assert_eq!(res.into_inner().log, ["COMMIT"]);
    }

    #[test]
    fn prepare_before_end_is_rejected() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(3);
        res.start(&x, StartFlags::NoFlags).unwrap();
        assert_eq!(res.prepare(&x).unwrap_err().code(), XaErrorCode::Inval);
        assert_eq!(res.prepare(&xid(4)).unwrap_err().code(), XaErrorCode::RmErr);
    }

    #[test]
    fn protocol_violations() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(5);
        assert_eq!(res.end(&x, EndFlags::Success).unwrap_err().code(), XaErrorCode::Proto);
        res.start(&x, StartFlags::NoFlags).unwrap();
        assert_eq!(
            res.start(&xid(6), StartFlags::NoFlags).unwrap_err().code(),
            XaErrorCode::Proto
        );
        assert_eq!(res.end(&xid(6), EndFlags::Success).unwrap_err().code(), XaErrorCode::Proto);
        assert_eq!(res.end(&x, EndFlags::Suspend).unwrap_err().code(), XaErrorCode::RmErr);
        assert_eq!(res.commit(&x, true).unwrap_err().code(), XaErrorCode::Proto);
        res.end(&x, EndFlags::Fail).unwrap();

        assert_eq!(
            res.start(&xid(6), StartFlags::Join).unwrap_err().code(),
            XaErrorCode::RmErr
        );
        assert_eq!(
            res.start(&xid(6), StartFlags::NoFlags).unwrap_err().code(),
            XaErrorCode::RmErr
        );
        assert_eq!(res.start(&x, StartFlags::Resume).unwrap_err().code(), XaErrorCode::RmErr);
        res.start(&x, StartFlags::Join).unwrap();
        assert_eq!(res.current_xid(), Some(&x));
    }

    #[test]
    fn suspend_of_a_foreign_branch_is_a_protocol_error() {
        let mut res = XaResource::new(Scripted::new());
        res.start(&xid(20), StartFlags::NoFlags).unwrap();
        assert_eq!(
            res.end(&xid(21), EndFlags::Suspend).unwrap_err().code(),
            XaErrorCode::Proto
        );
        assert_eq!(res.current_xid(), Some(&xid(20)));
    }

    #[test]
    fn one_phase_commit_of_an_unknown_xid_is_nota() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(22);
        assert_eq!(res.commit(&x, true).unwrap_err().code(), XaErrorCode::RmErr);

        res.start(&x, StartFlags::NoFlags).unwrap();
        res.end(&x, EndFlags::Success).unwrap();
        assert_eq!(res.commit(&xid(23), true).unwrap_err().code(), XaErrorCode::Nota);
        assert_eq!(res.current_xid(), Some(&x));

        res.commit(&x, true).unwrap();
        assert_eq!(res.commit(&x, true).unwrap_err().code(), XaErrorCode::Nota);
        assert_eq!(res.into_inner().log, ["COMMIT"]);
    }

    #[test]
    fn prepare_needs_an_ended_branch() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(24);
        assert_eq!(res.prepare(&x).unwrap_err().code(), XaErrorCode::Nota);

        res.start(&x, StartFlags::NoFlags).unwrap();
        res.end(&x, EndFlags::Success).unwrap();
        res.prepare(&x).unwrap();
        assert_eq!(res.prepare(&x).unwrap_err().code(), XaErrorCode::Proto);
        res.commit(&x, false).unwrap();
        assert_eq!(res.prepare(&x).unwrap_err().code(), XaErrorCode::Proto);
    }

    #[test]
    fn failed_commit_prepared_restores_autocommit() {
        let mut conn = Scripted::new();
        conn.autocommit = false;
        let mut res = XaResource::new(conn);
        let x = xid(25);
        res.start(&x, StartFlags::NoFlags).unwrap();
        res.end(&x, EndFlags::Success).unwrap();
        res.prepare(&x).unwrap();

        res.conn.fail_on = Some(("COMMIT PREPARED", "40001"));
        assert_eq!(res.commit(&x, false).unwrap_err().code(), XaErrorCode::RmErr);
        assert!(!res.conn.autocommit);
        assert!(!res.state.resolved());

        res.conn.fail_on = None;
        res.commit(&x, false).unwrap();
        assert!(!res.conn.autocommit);
    }

    #[test]
    fn rollback_of_associated_branch_is_local() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(7);
        res.start(&x, StartFlags::NoFlags).unwrap();
        res.end(&x, EndFlags::Fail).unwrap();
        res.rollback(&x).unwrap();
        let conn = res.into_inner();
        assert_eq!(conn.log, ["ROLLBACK"]);
        assert!(conn.autocommit);
    }

    #[test]
    fn second_resolution_is_nota() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(8);
        res.start(&x, StartFlags::NoFlags).unwrap();
        res.end(&x, EndFlags::Success).unwrap();
        res.prepare(&x).unwrap();
        res.commit(&x, false).unwrap();

        res.conn.fail_on = Some(("ROLLBACK PREPARED", "42704"));
        let err = res.rollback(&x).unwrap_err();
        assert_eq!(err.code(), XaErrorCode::Nota);
        assert!(err.message().contains(&x.encode()));
    }

    #[test]
    fn unknown_prepared_xid_is_nota_but_own_is_rmerr() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(9);
        res.start(&x, StartFlags::NoFlags).unwrap();
        res.end(&x, EndFlags::Success).unwrap();
        res.prepare(&x).unwrap();

        res.conn.fail_on = Some(("COMMIT PREPARED", "42704"));
        assert_eq!(res.commit(&xid(10), false).unwrap_err().code(), XaErrorCode::Nota);
        assert_eq!(res.commit(&x, false).unwrap_err().code(), XaErrorCode::RmErr);

        res.conn.fail_on = Some(("COMMIT PREPARED", "08006"));
        assert_eq!(res.commit(&x, false).unwrap_err().code(), XaErrorCode::RmFail);
    }

    #[test]
    fn prepare_failures_are_classified() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(11);
        res.start(&x, StartFlags::NoFlags).unwrap();
        res.end(&x, EndFlags::Success).unwrap();
        res.conn.fail_on = Some(("PREPARE", "23505"));
        assert_eq!(res.prepare(&x).unwrap_err().code(), XaErrorCode::RbIntegrity);

        let y = xid(12);
        res.conn.fail_on = Some(("PREPARE", "53100"));
        res.start(&y, StartFlags::NoFlags).unwrap();
        res.end(&y, EndFlags::Success).unwrap();
        assert_eq!(res.prepare(&y).unwrap_err().code(), XaErrorCode::RmFail);
    }

    #[test]
    fn second_phase_needs_an_idle_connection() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(13);
        res.start(&x, StartFlags::NoFlags).unwrap();
        assert_eq!(res.commit(&x, false).unwrap_err().code(), XaErrorCode::RmErr);
    }

    #[test]
    fn recover_decodes_own_gids() {
        let mut conn = Scripted::new();
        let x = xid(14);
        conn.gids = vec![Some(x.encode()), Some("manual_tx".into()), None];
        let mut res = XaResource::new(conn);
        assert!(res.recover(RecoverFlags::NoFlags).unwrap().is_empty());
        assert_eq!(res.recover(RecoverFlags::StartScan).unwrap(), [x]);
        assert_eq!(res.conn.log, [RECOVER_QUERY]);
    }

    #[test]
    fn logical_connection_guards_local_transaction_control() {
        let mut res = XaResource::new(Scripted::new());
        let x = xid(15);
        res.start(&x, StartFlags::NoFlags).unwrap();
        {
            let mut conn = res.connection().unwrap();
            assert!(conn.in_global_transaction());
            assert!(matches!(conn.commit(), Err(Error::InvalidUsage(_))));
            assert!(matches!(conn.rollback(), Err(Error::InvalidUsage(_))));
            assert!(conn.set_autocommit(true).is_err());
            conn.set_autocommit(false).unwrap();
        }
        res.end(&x, EndFlags::Success).unwrap();
        res.rollback(&x).unwrap();

        let mut conn = res.connection().unwrap();
        assert!(!conn.in_global_transaction());
        assert!(conn.autocommit());
        conn.commit().unwrap();
    }

    #[test]
    fn identity_and_unsupported_calls() {
        let a = XaResource::new(Scripted::new());
        let mut b = XaResource::new(Scripted::new());
        assert!(a.is_same_rm(&a));
        assert!(!a.is_same_rm(&b));
        assert_eq!(b.transaction_timeout(), 0);
        assert!(!b.set_transaction_timeout(30));
        assert_eq!(b.forget(&xid(1)).unwrap_err().code(), XaErrorCode::Nota);
    }
}
