//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! A machine never touches a socket. Each `step` returns an [`Action`]
//! telling the driver which I/O to perform before stepping again.

pub mod action;
pub mod connection;
pub mod extended;
pub mod simple_query;

use crate::buffer_set::BufferSet;
use crate::error::{Result, ServerError};
use crate::protocol::backend::{ParameterStatus, msg_type, parse_server_error};
use crate::protocol::types::TransactionStatus;

pub use action::{Action, AsyncMessage};
pub use connection::{ConnectionState, ConnectionStateMachine};
pub use extended::ExtendedQueryStateMachine;
pub use simple_query::SimpleQueryStateMachine;

/// A request/response exchange driven to completion by a connection.
pub trait StateMachine {
    /// Advance with the message in `buffer_set` (ignored on the first call).
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action>;

    /// Status from the last ReadyForQuery seen.
    fn transaction_status(&self) -> TransactionStatus;

    /// Whether the closing ReadyForQuery was processed, leaving the
    /// stream at a message boundary.
    fn is_complete(&self) -> bool;
}

/// Decode a message that can arrive between any two others.
///
/// Notifications are not surfaced and yield `None`.
pub(crate) fn parse_async(type_byte: u8, payload: &[u8]) -> Result<Option<AsyncMessage>> {
    Ok(match type_byte {
        msg_type::NOTICE_RESPONSE => Some(AsyncMessage::Notice(parse_server_error(payload)?)),
        msg_type::PARAMETER_STATUS => {
            let param = ParameterStatus::parse(payload)?;
            Some(AsyncMessage::ParameterChanged {
                name: param.name.to_string(),
                value: param.value.to_string(),
            })
        }
        _ => None,
    })
}

/// Action for an async message: deliver it, or just keep reading.
pub(crate) fn async_action(message: Option<AsyncMessage>) -> Action {
    match message {
        Some(message) => Action::HandleAsyncMessageAndReadMessage(message),
        None => Action::ReadMessage,
    }
}

/// Error response held until ReadyForQuery so the stream stays in sync.
pub(crate) fn pending_error(payload: &[u8]) -> Result<ServerError> {
    parse_server_error(payload)
}
