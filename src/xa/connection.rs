//! The SQL surface the coordinator drives, and the guarded handle given to
//! applications.

use crate::error::{Error, Result};
use crate::protocol::types::TransactionStatus;

/// What the coordinator needs from a physical connection.
pub trait XaConnection {
    /// Run one statement, discarding results.
    fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run a query and return its first column.
    fn query_column(&mut self, sql: &str) -> Result<Vec<Option<String>>>;

    fn autocommit(&self) -> bool;

    /// Switch autocommit. Enabling it inside a transaction commits it.
    fn set_autocommit(&mut self, autocommit: bool) -> Result<()>;

    fn commit(&mut self) -> Result<()>;

    fn rollback(&mut self) -> Result<()>;

    /// Status from the last ReadyForQuery.
    fn transaction_status(&self) -> TransactionStatus;
}

/// Application handle on a connection owned by an XA resource.
///
/// While a global transaction is associated, local transaction control
/// (`commit`, `rollback`, `set_autocommit(true)`) is refused.
pub struct LogicalConnection<'a, C: XaConnection> {
    conn: &'a mut C,
    associated: bool,
}

impl<'a, C: XaConnection> LogicalConnection<'a, C> {
    pub(super) fn new(conn: &'a mut C, associated: bool) -> Self {
        Self { conn, associated }
    }

    /// Whether a global transaction is associated.
    pub fn in_global_transaction(&self) -> bool {
        self.associated
    }

    fn refuse(&self, call: &str) -> Result<()> {
        if self.associated {
            return Err(Error::InvalidUsage(format!(
                "{call} is not allowed while an XA transaction is active"
            )));
        }
        Ok(())
    }
}

impl<C: XaConnection> XaConnection for LogicalConnection<'_, C> {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.conn.execute(sql)
    }

    fn query_column(&mut self, sql: &str) -> Result<Vec<Option<String>>> {
        self.conn.query_column(sql)
    }

    fn autocommit(&self) -> bool {
        self.conn.autocommit()
    }

    fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
        if autocommit {
            self.refuse("set_autocommit(true)")?;
        }
        self.conn.set_autocommit(autocommit)
    }

    fn commit(&mut self) -> Result<()> {
        self.refuse("commit")?;
        self.conn.commit()
    }

    fn rollback(&mut self) -> Result<()> {
        self.refuse("rollback")?;
        self.conn.rollback()
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.conn.transaction_status()
    }
}
