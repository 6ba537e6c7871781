//! Connection startup and authentication state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::opts::{GssEncMode, Opts, SslMode};
use crate::protocol::backend::{
    AuthenticationMessage, BackendKeyData, ParameterStatus, ReadyForQuery, msg_type,
    parse_server_error,
};
use crate::protocol::frontend::{
    ScramClient, md5_password, write_gssenc_request, write_password, write_sasl_initial_response,
    write_sasl_response, write_ssl_request, write_startup,
};
use crate::protocol::types::TransactionStatus;

use super::{Action, StateMachine, async_action, parse_async};

const SCRAM_SHA_256: &str = "SCRAM-SHA-256";

/// Connection state during startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Initial,
    WaitingGssResponse,
    GssHandshake,
    WaitingSslResponse,
    SslHandshake,
    WaitingAuth,
    SaslInProgress,
    WaitingAuthResult,
    WaitingReady,
    Ready,
    Failed,
}

/// Connection startup state machine.
///
/// Negotiates transport encryption (GSS first, then SSL), sends the
/// startup message and answers authentication requests until the first
/// ReadyForQuery.
pub struct ConnectionStateMachine {
    state: ConnectionState,
    options: Opts,
    gss_available: bool,
    encryption_response: Option<u8>,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    scram_client: Option<ScramClient>,
}

impl ConnectionStateMachine {
    /// `gss_available` tells whether the driver can establish a GSS context.
    pub fn new(options: Opts, gss_available: bool) -> Self {
        Self {
            state: ConnectionState::Initial,
            options,
            gss_available,
            encryption_response: None,
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            scram_client: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Process id and secret for cancel requests.
    pub fn backend_key(&self) -> Option<(u32, u32)> {
        self.backend_key
    }

    /// Server parameters reported during startup.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    pub fn into_server_params(self) -> Vec<(String, String)> {
        self.server_params
    }

    /// Response byte to the last SSLRequest or GSSENCRequest.
    pub fn set_encryption_response(&mut self, byte: u8) {
        self.encryption_response = Some(byte);
    }

    fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        let wants_gss = self.options.gss_enc_mode != GssEncMode::Disable;
        if wants_gss && self.gss_available {
            write_gssenc_request(&mut buffer_set.write_buffer)?;
            self.state = ConnectionState::WaitingGssResponse;
            return Ok(Action::WriteAndReadByte);
        }
        if self.options.gss_enc_mode == GssEncMode::Require {
            self.state = ConnectionState::Failed;
            return Err(Error::Gss(
                "GSS encryption required but no GSS provider is configured".into(),
            ));
        }
        self.after_gss(buffer_set)
    }

    // GSS encryption was refused or not attempted.
    fn after_gss(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        match self.options.ssl_mode {
            SslMode::Disable => self.send_startup(buffer_set),
            SslMode::Prefer | SslMode::Require => {
                write_ssl_request(&mut buffer_set.write_buffer)?;
                self.state = ConnectionState::WaitingSslResponse;
                Ok(Action::WriteAndReadByte)
            }
        }
    }

    fn take_response(&mut self) -> Result<u8> {
        self.encryption_response
            .take()
            .ok_or_else(|| Error::Protocol("encryption response byte was not provided".into()))
    }

    fn handle_gss_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.take_response()? {
            b'G' => {
                self.state = ConnectionState::GssHandshake;
                Ok(Action::GssHandshake)
            }
            b'N' if self.options.gss_enc_mode == GssEncMode::Require => {
                self.state = ConnectionState::Failed;
                Err(Error::Gss("GSS encryption required but refused by server".into()))
            }
            b'N' => {
                tracing::debug!("server refused GSS encryption");
                self.after_gss(buffer_set)
            }
            other => {
                self.state = ConnectionState::Failed;
                Err(Error::Protocol(format!("Unexpected GSSENC response: {other}")))
            }
        }
    }

    fn handle_ssl_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match self.take_response()? {
            b'S' => {
                self.state = ConnectionState::SslHandshake;
                Ok(Action::TlsHandshake)
            }
            b'N' if self.options.ssl_mode == SslMode::Require => {
                self.state = ConnectionState::Failed;
                Err(Error::Tls("SSL required but not supported by server".into()))
            }
            b'N' => {
                buffer_set.write_buffer.clear();
                self.send_startup(buffer_set)
            }
            other => {
                self.state = ConnectionState::Failed;
                Err(Error::Protocol(format!("Unexpected SSL response: {other}")))
            }
        }
    }

    fn send_startup(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let opts = &self.options;
        let mut params: Vec<(&str, &str)> = vec![("user", &opts.user), ("client_encoding", "UTF8")];
        if let Some(db) = &opts.database {
            params.push(("database", db));
        }
        if let Some(app) = &opts.application_name {
            params.push(("application_name", app));
        }
        for (name, value) in &opts.params {
            params.push((name, value));
        }
        write_startup(&mut buffer_set.write_buffer, &params)?;
        self.state = ConnectionState::WaitingAuth;
        Ok(Action::WriteAndReadMessage)
    }

    fn password(&self) -> Result<&str> {
        self.options
            .password
            .as_deref()
            .ok_or_else(|| Error::Auth("Password required but not provided".into()))
    }

    fn expect_auth<'b>(buffer_set: &'b BufferSet) -> Result<AuthenticationMessage<'b>> {
        if buffer_set.type_byte != msg_type::AUTHENTICATION {
            return Err(Error::Protocol(format!(
                "Expected Authentication message, got '{}'",
                buffer_set.type_byte as char
            )));
        }
        AuthenticationMessage::parse(&buffer_set.read_buffer)
    }

    fn handle_auth(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let reply = match Self::expect_auth(buffer_set)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                return Ok(Action::ReadMessage);
            }
            AuthenticationMessage::CleartextPassword => self.password()?.to_string(),
            AuthenticationMessage::Md5Password { salt } => {
                md5_password(&self.options.user, self.password()?, &salt)
            }
            AuthenticationMessage::Sasl { mechanisms } => {
                if !mechanisms.contains(&SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "No supported SASL mechanism. Server offers: {mechanisms:?}"
                    )));
                }
                let scram = ScramClient::new(self.password()?);
                buffer_set.write_buffer.clear();
                write_sasl_initial_response(
                    &mut buffer_set.write_buffer,
                    SCRAM_SHA_256,
                    scram.client_first_message().as_bytes(),
                )?;
                self.scram_client = Some(scram);
                self.state = ConnectionState::SaslInProgress;
                return Ok(Action::WriteAndReadMessage);
            }
            other => {
                return Err(Error::Unsupported(format!(
                    "Unsupported authentication method: {other:?}"
                )));
            }
        };
        buffer_set.write_buffer.clear();
        write_password(&mut buffer_set.write_buffer, &reply)?;
        self.state = ConnectionState::WaitingAuthResult;
        Ok(Action::WriteAndReadMessage)
    }

    fn handle_sasl(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let scram = self
            .scram_client
            .as_mut()
            .ok_or_else(|| Error::Protocol("SCRAM client not initialized".into()))?;
        match Self::expect_auth(buffer_set)? {
            AuthenticationMessage::SaslContinue { data } => {
                let server_first = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-first-message: {e}")))?;
                let client_final = scram.process_server_first(server_first)?;
                buffer_set.write_buffer.clear();
                write_sasl_response(&mut buffer_set.write_buffer, client_final.as_bytes())?;
                Ok(Action::WriteAndReadMessage)
            }
            AuthenticationMessage::SaslFinal { data } => {
                let server_final = simdutf8::compat::from_utf8(data)
                    .map_err(|e| Error::Auth(format!("Invalid server-final-message: {e}")))?;
                scram.verify_server_final(server_final)?;
                self.state = ConnectionState::WaitingAuthResult;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!("Unexpected SASL message: {other:?}"))),
        }
    }

    fn handle_auth_result(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        match Self::expect_auth(buffer_set)? {
            AuthenticationMessage::Ok => {
                self.state = ConnectionState::WaitingReady;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Auth(format!("Unexpected auth result: {other:?}"))),
        }
    }

    fn record_param(&mut self, payload: &[u8]) -> Result<()> {
        let param = ParameterStatus::parse(payload)?;
        match self.server_params.iter_mut().find(|(n, _)| n == param.name) {
            Some(entry) => entry.1 = param.value.to_string(),
            None => self
                .server_params
                .push((param.name.to_string(), param.value.to_string())),
        }
        Ok(())
    }

    fn handle_ready(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::BACKEND_KEY_DATA => {
                let key = BackendKeyData::parse(payload)?;
                self.backend_key = Some((key.process_id(), key.secret()));
                Ok(Action::ReadMessage)
            }
            msg_type::READY_FOR_QUERY => {
                self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
                self.state = ConnectionState::Ready;
                Ok(Action::Finished)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message during startup: '{}'",
                other as char
            ))),
        }
    }

    /// The stream is now TLS; send the startup message.
    pub fn tls_handshake_complete(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        self.send_startup(buffer_set)
    }

    /// The stream is now GSS-encrypted; send the startup message.
    pub fn gss_handshake_complete(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        buffer_set.write_buffer.clear();
        self.send_startup(buffer_set)
    }

    fn handle_message(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let type_byte = buffer_set.type_byte;

        if type_byte == msg_type::ERROR_RESPONSE {
            self.state = ConnectionState::Failed;
            return Err(Error::Server(parse_server_error(&buffer_set.read_buffer)?));
        }
        if type_byte == msg_type::PARAMETER_STATUS {
            self.record_param(&buffer_set.read_buffer)?;
            return Ok(Action::ReadMessage);
        }
        if type_byte == msg_type::NOTICE_RESPONSE {
            return Ok(async_action(parse_async(type_byte, &buffer_set.read_buffer)?));
        }

        match self.state {
            ConnectionState::WaitingAuth => self.handle_auth(buffer_set),
            ConnectionState::SaslInProgress => self.handle_sasl(buffer_set),
            ConnectionState::WaitingAuthResult => self.handle_auth_result(buffer_set),
            ConnectionState::WaitingReady => self.handle_ready(buffer_set),
            state => Err(Error::Protocol(format!("Unexpected message in state {state:?}"))),
        }
    }
}

impl StateMachine for ConnectionStateMachine {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let result = match self.state {
            ConnectionState::Initial => self.start(buffer_set),
            ConnectionState::WaitingGssResponse => self.handle_gss_response(buffer_set),
            ConnectionState::WaitingSslResponse => self.handle_ssl_response(buffer_set),
            ConnectionState::GssHandshake => self.gss_handshake_complete(buffer_set),
            ConnectionState::SslHandshake => self.tls_handshake_complete(buffer_set),
            ConnectionState::Ready => Ok(Action::Finished),
            ConnectionState::Failed => {
                Err(Error::Protocol("connection startup already failed".into()))
            }
            _ => self.handle_message(buffer_set),
        };
        if result.is_err() {
            self.state = ConnectionState::Failed;
        }
        result
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn is_complete(&self) -> bool {
        self.state == ConnectionState::Ready
    }
}
