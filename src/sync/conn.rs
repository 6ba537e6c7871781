//! Synchronous PostgreSQL connection.

use std::fmt;

use crate::balance::ClusterConnection;
use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::gss::{GssProvider, MAX_FRAME_SIZE};
use crate::handler::{DropHandler, RowsHandler, TextHandler, TextRow};
use crate::host::HostSpec;
use crate::opts::{Opts, SslMode};
use crate::params::{ParameterList, Query};
use crate::protocol::backend::parse_server_error;
use crate::protocol::frontend::{write_gss_token, write_terminate};
use crate::protocol::types::TransactionStatus;
use crate::registry::Registry;
use crate::state::{
    Action, AsyncMessage, ConnectionStateMachine, ExtendedQueryStateMachine,
    SimpleQueryStateMachine, StateMachine,
};
use crate::xa::XaConnection;

use super::connect::Connector;
use super::stream::Stream;

type CloseHook = Box<dyn FnOnce() + Send>;

/// Synchronous PostgreSQL connection.
///
/// With autocommit off, `BEGIN` is sent before the first statement that
/// runs while the server is idle.
pub struct Conn {
    stream: Stream,
    buffer_set: BufferSet,
    host: HostSpec,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    autocommit: bool,
    is_broken: bool,
    closed: bool,
    close_hooks: Vec<CloseHook>,
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("host", &self.host)
            .field("transaction_status", &self.transaction_status)
            .field("autocommit", &self.autocommit)
            .field("is_broken", &self.is_broken)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl Conn {
    /// Connect with a private [`Registry`].
    ///
    /// Status learned about hosts is not shared with other connections; use
    /// a [`Connector`] for that.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        Connector::new(std::sync::Arc::new(Registry::new())).connect(&opts)
    }

    /// Open a connection to one host and run the startup exchange.
    pub(crate) fn open(
        host: &HostSpec,
        opts: &Opts,
        timeout: Option<std::time::Duration>,
        gss: Option<&dyn GssProvider>,
    ) -> Result<Self> {
        let stream = Stream::connect(&host.host, host.port, timeout)?;
        Self::new_with_stream(stream, host.clone(), opts, gss)
    }

    fn new_with_stream(
        mut stream: Stream,
        host: HostSpec,
        opts: &Opts,
        gss: Option<&dyn GssProvider>,
    ) -> Result<Self> {
        let mut options = opts.clone();
        if cfg!(not(feature = "sync-tls")) {
            match options.ssl_mode {
                SslMode::Require => {
                    return Err(Error::Unsupported(
                        "sslmode=require needs the sync-tls feature".into(),
                    ));
                }
                SslMode::Prefer => options.ssl_mode = SslMode::Disable,
                SslMode::Disable => {}
            }
        }

        let mut buffer_set = BufferSet::new();
        let mut machine = ConnectionStateMachine::new(options, gss.is_some());

        loop {
            match machine.step(&mut buffer_set)? {
                Action::WriteAndReadByte => {
                    stream.send(&buffer_set.write_buffer)?;
                    let byte = stream.read_u8()?;
                    if stream.buffered() > 0 {
                        return Err(Error::Protocol(
                            "received unencrypted data after the encryption response".into(),
                        ));
                    }
                    machine.set_encryption_response(byte);
                }
                Action::TlsHandshake => stream = upgrade_tls(stream, &host.host)?,
                Action::GssHandshake => {
                    let provider = gss.ok_or_else(|| {
                        Error::Gss("server accepted GSS encryption but no provider is set".into())
                    })?;
                    stream = gss_handshake(stream, provider, &host.host, opts, &mut buffer_set)?;
                }
                Action::Write => stream.send(&buffer_set.write_buffer)?,
                Action::WriteAndReadMessage => {
                    stream.send(&buffer_set.write_buffer)?;
                    stream.read_message(&mut buffer_set)?;
                }
                Action::ReadMessage => stream.read_message(&mut buffer_set)?,
                Action::HandleAsyncMessageAndReadMessage(message) => {
                    tracing::debug!(?message, "message during startup");
                    stream.read_message(&mut buffer_set)?;
                }
                Action::Finished => break,
            }
        }

        Ok(Self {
            stream,
            buffer_set,
            host,
            backend_key: machine.backend_key(),
            transaction_status: machine.transaction_status(),
            server_params: machine.into_server_params(),
            autocommit: true,
            is_broken: false,
            closed: false,
            close_hooks: Vec::new(),
        })
    }

    /// Run `hook` once when the connection is closed or dropped.
    pub(crate) fn on_close(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.close_hooks.push(Box::new(hook));
    }

    /// The host this connection was opened to.
    pub fn host(&self) -> &HostSpec {
        &self.host
    }

    /// Backend process id and secret for cancel requests.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    /// Backend process id, 0 when unknown.
    pub fn connection_id(&self) -> u32 {
        self.backend_key.map_or(0, |(pid, _)| pid)
    }

    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Current value of a server parameter.
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether backslashes in ordinary string literals are literal.
    pub fn standard_conforming_strings(&self) -> bool {
        self.server_param("standard_conforming_strings") != Some("off")
    }

    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn autocommit(&self) -> bool {
        self.autocommit
    }

    /// Switch autocommit. Turning it on inside a transaction commits it.
    pub fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
        if autocommit && !self.autocommit && self.in_transaction() {
            self.run_simple("COMMIT", &mut DropHandler::new())?;
        }
        self.autocommit = autocommit;
        Ok(())
    }

    /// Commit the current transaction. Nothing to do if none is open.
    pub fn commit(&mut self) -> Result<()> {
        if self.autocommit {
            return Err(Error::InvalidUsage("commit is not allowed in autocommit mode".into()));
        }
        if self.transaction_status == TransactionStatus::Idle {
            return Ok(());
        }
        self.run_simple("COMMIT", &mut DropHandler::new())
    }

    /// Roll back the current transaction. Nothing to do if none is open.
    pub fn rollback(&mut self) -> Result<()> {
        if self.autocommit {
            return Err(Error::InvalidUsage("rollback is not allowed in autocommit mode".into()));
        }
        if self.transaction_status == TransactionStatus::Idle {
            return Ok(());
        }
        self.run_simple("ROLLBACK", &mut DropHandler::new())
    }

    fn check_usable(&self) -> Result<()> {
        if self.closed || self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        Ok(())
    }

    fn begin_if_needed(&mut self) -> Result<()> {
        if !self.autocommit && self.transaction_status == TransactionStatus::Idle {
            self.run_simple("BEGIN", &mut DropHandler::new())?;
        }
        Ok(())
    }

    fn handle_async(&mut self, message: AsyncMessage) {
        match message {
            AsyncMessage::Notice(notice) => tracing::debug!(%notice, "server notice"),
            AsyncMessage::ParameterChanged { name, value } => {
                match self.server_params.iter_mut().find(|(n, _)| *n == name) {
                    Some(entry) => entry.1 = value,
                    None => self.server_params.push((name, value)),
                }
            }
        }
    }

    /// Drive `machine` to completion over this connection's stream.
    fn drive<M: StateMachine>(&mut self, machine: &mut M) -> Result<()> {
        self.check_usable()?;
        let mut sent = false;
        let result = self.drive_inner(machine, &mut sent);
        if machine.is_complete() {
            self.transaction_status = machine.transaction_status();
        }
        if let Err(e) = &result
            && (e.is_connection_broken() || (sent && !machine.is_complete()))
        {
            self.is_broken = true;
        }
        result
    }

    fn drive_inner<M: StateMachine>(&mut self, machine: &mut M, sent: &mut bool) -> Result<()> {
        loop {
            match machine.step(&mut self.buffer_set)? {
                Action::Write => {
                    *sent = true;
                    self.stream.send(&self.buffer_set.write_buffer)?;
                }
                Action::WriteAndReadMessage => {
                    *sent = true;
                    self.stream.send(&self.buffer_set.write_buffer)?;
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::ReadMessage => self.stream.read_message(&mut self.buffer_set)?,
                Action::HandleAsyncMessageAndReadMessage(message) => {
                    self.handle_async(message);
                    self.stream.read_message(&mut self.buffer_set)?;
                }
                Action::Finished => return Ok(()),
                other => {
                    return Err(Error::Protocol(format!("Unexpected action after startup: {other:?}")));
                }
            }
        }
    }

    fn run_simple<H: TextHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        let mut machine = SimpleQueryStateMachine::new(handler, sql);
        self.drive(&mut machine)
    }

    /// Run `sql` with the simple query protocol.
    pub fn query<H: TextHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        self.check_usable()?;
        self.begin_if_needed()?;
        self.run_simple(sql, handler)
    }

    /// Run `sql` and return the affected row count of the last statement.
    pub fn query_drop(&mut self, sql: &str) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.query(sql, &mut handler)?;
        Ok(handler.rows_affected())
    }

    /// Run `sql` and collect every row.
    pub fn query_rows(&mut self, sql: &str) -> Result<Vec<TextRow>> {
        let mut handler = RowsHandler::new();
        self.query(sql, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Run `sql` with the values of `params` bound to `$1..$n`.
    ///
    /// Parameter types the server infers are written back into `params`.
    pub fn exec<H: TextHandler>(
        &mut self,
        sql: &str,
        params: &mut ParameterList,
        handler: &mut H,
    ) -> Result<()> {
        self.check_usable()?;
        params.check_all_parameters_set()?;
        self.begin_if_needed()?;
        let result = {
            let mut machine = ExtendedQueryStateMachine::new(handler, sql, params);
            self.drive(&mut machine)
        };
        if let Err(e) = &result {
            let statement = Query::new(sql).render(params, self.standard_conforming_strings());
            tracing::debug!(%statement, error = %e, "statement failed");
        }
        result
    }

    /// Bound-parameter statement, returning the affected row count.
    pub fn execute(&mut self, sql: &str, params: &mut ParameterList) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.exec(sql, params, &mut handler)?;
        Ok(handler.rows_affected())
    }

    /// Bound-parameter query, collecting every row.
    pub fn execute_rows(&mut self, sql: &str, params: &mut ParameterList) -> Result<Vec<TextRow>> {
        let mut handler = RowsHandler::new();
        self.exec(sql, params, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Round trip with an empty query.
    pub fn ping(&mut self) -> Result<()> {
        self.run_simple("", &mut DropHandler::new())
    }

    fn terminate(&mut self) -> Result<()> {
        self.buffer_set.write_buffer.clear();
        write_terminate(&mut self.buffer_set.write_buffer)?;
        self.stream.send(&self.buffer_set.write_buffer)
    }

    fn run_close_hooks(&mut self) {
        for hook in self.close_hooks.drain(..) {
            hook();
        }
    }

    /// Send Terminate. Closing an already closed connection does nothing.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        let result = if self.is_broken { Ok(()) } else { self.terminate() };
        self.run_close_hooks();
        result
    }
}

impl Drop for Conn {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!(host = %self.host, error = %e, "failed to send Terminate");
        }
    }
}

fn upgrade_tls(stream: Stream, host: &str) -> Result<Stream> {
    #[cfg(feature = "sync-tls")]
    {
        // No certificate verification mode is offered.
        stream.into_tls(host, true)
    }
    #[cfg(not(feature = "sync-tls"))]
    {
        let _ = (stream, host);
        Err(Error::Unsupported("TLS requested but sync-tls feature not enabled".into()))
    }
}

/// Exchange GSS tokens until the context is established, then wrap the
/// stream.
fn gss_handshake(
    mut stream: Stream,
    provider: &dyn GssProvider,
    host: &str,
    opts: &Opts,
    buffer_set: &mut BufferSet,
) -> Result<Stream> {
    let mut ctx = provider.create_context(host, &opts.krb_server_name, &opts.user)?;
    let mut input = Vec::new();
    loop {
        if let Some(token) = ctx.step(&input)?
            && !token.is_empty()
        {
            buffer_set.write_buffer.clear();
            write_gss_token(&mut buffer_set.write_buffer, &token)?;
            stream.send(&buffer_set.write_buffer)?;
        }
        if ctx.is_established() {
            break;
        }

        let mut header = [0u8; 4];
        stream.read_exact(&mut header)?;
        if header[0] == b'E' {
            // ErrorResponse instead of a token.
            let mut last = [0u8; 1];
            stream.read_exact(&mut last)?;
            let len = u32::from_be_bytes([header[1], header[2], header[3], last[0]]);
            let payload_len = len.saturating_sub(4) as usize;
            if payload_len > MAX_FRAME_SIZE {
                return Err(Error::Gss(format!("oversized error during GSS handshake: {len}")));
            }
            let mut payload = vec![0u8; payload_len];
            stream.read_exact(&mut payload)?;
            return Err(Error::Server(parse_server_error(&payload)?));
        }
        let len = u32::from_be_bytes(header) as usize;
        if len > MAX_FRAME_SIZE {
            return Err(Error::Gss(format!("GSS token of {len} bytes exceeds frame limit")));
        }
        input.clear();
        input.resize(len, 0);
        stream.read_exact(&mut input)?;
    }
    if stream.buffered() > 0 {
        return Err(Error::Protocol("received unencrypted data after GSS handshake".into()));
    }
    stream.into_gss(ctx)
}

impl XaConnection for Conn {
    fn execute(&mut self, sql: &str) -> Result<()> {
        self.query_drop(sql).map(drop)
    }

    fn query_column(&mut self, sql: &str) -> Result<Vec<Option<String>>> {
        Ok(self
            .query_rows(sql)?
            .iter()
            .map(|row| row.get_index(0).map(str::to_string))
            .collect())
    }

    fn autocommit(&self) -> bool {
        self.autocommit
    }

    fn set_autocommit(&mut self, autocommit: bool) -> Result<()> {
        Conn::set_autocommit(self, autocommit)
    }

    fn commit(&mut self) -> Result<()> {
        Conn::commit(self)
    }

    fn rollback(&mut self) -> Result<()> {
        Conn::rollback(self)
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }
}

impl ClusterConnection for Conn {
    fn connected_host(&self) -> &str {
        &self.host.host
    }

    fn fetch_rows(&mut self, sql: &str) -> Result<Vec<TextRow>> {
        self.query_rows(sql)
    }
}
