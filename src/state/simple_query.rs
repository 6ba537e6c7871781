//! Simple query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result, ServerError};
use crate::handler::TextHandler;
use crate::protocol::backend::{
    CommandComplete, DataRow, ReadyForQuery, RowDescription, is_async_type, msg_type,
};
use crate::protocol::frontend::write_query;
use crate::protocol::types::TransactionStatus;

use super::{Action, StateMachine, async_action, parse_async, pending_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    WaitingResponse,
    ProcessingRows,
    WaitingReady,
    Finished,
}

/// Runs one Query message, which may hold several statements.
///
/// A server error is held until ReadyForQuery and returned then, so the
/// connection is usable afterwards.
pub struct SimpleQueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    sql: &'a str,
    error: Option<ServerError>,
    transaction_status: TransactionStatus,
}

impl<'a, H: TextHandler> SimpleQueryStateMachine<'a, H> {
    pub fn new(handler: &'a mut H, sql: &'a str) -> Self {
        Self {
            state: State::Initial,
            handler,
            sql,
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    fn handle_response(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::ROW_DESCRIPTION => {
                buffer_set.column_buffer.clear();
                buffer_set.column_buffer.extend_from_slice(payload);
                self.handler
                    .result_start(RowDescription::parse(&buffer_set.column_buffer)?)?;
                self.state = State::ProcessingRows;
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                self.handler.result_end(CommandComplete::parse(payload)?)?;
                Ok(Action::ReadMessage)
            }
            msg_type::EMPTY_QUERY_RESPONSE => Ok(Action::ReadMessage),
            msg_type::READY_FOR_QUERY => self.finish(payload),
            msg_type::COPY_IN_RESPONSE | msg_type::COPY_OUT_RESPONSE => {
                Err(Error::Unsupported("COPY is not supported".into()))
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message in query response: '{}'",
                other as char
            ))),
        }
    }

    fn handle_rows(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::DATA_ROW => {
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                self.handler.row(cols, DataRow::parse(payload)?)?;
                Ok(Action::ReadMessage)
            }
            msg_type::COMMAND_COMPLETE => {
                self.handler.result_end(CommandComplete::parse(payload)?)?;
                self.state = State::WaitingResponse;
                Ok(Action::ReadMessage)
            }
            other => Err(Error::Protocol(format!(
                "Unexpected message in row processing: '{}'",
                other as char
            ))),
        }
    }

    fn finish(&mut self, payload: &[u8]) -> Result<Action> {
        self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
        self.state = State::Finished;
        match self.error.take() {
            Some(error) => Err(Error::Server(error)),
            None => Ok(Action::Finished),
        }
    }
}

impl<H: TextHandler> StateMachine for SimpleQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            buffer_set.write_buffer.clear();
            write_query(&mut buffer_set.write_buffer, self.sql)?;
            self.state = State::WaitingResponse;
            return Ok(Action::WriteAndReadMessage);
        }

        let type_byte = buffer_set.type_byte;
        if is_async_type(type_byte) {
            return Ok(async_action(parse_async(type_byte, &buffer_set.read_buffer)?));
        }
        if type_byte == msg_type::ERROR_RESPONSE {
            self.error = Some(pending_error(&buffer_set.read_buffer)?);
            self.state = State::WaitingReady;
            return Ok(Action::ReadMessage);
        }

        match self.state {
            State::WaitingResponse => self.handle_response(buffer_set),
            State::ProcessingRows => self.handle_rows(buffer_set),
            State::WaitingReady if type_byte == msg_type::READY_FOR_QUERY => {
                self.finish(&buffer_set.read_buffer)
            }
            // Anything else before ReadyForQuery belongs to the failed statement.
            State::WaitingReady => Ok(Action::ReadMessage),
            state => Err(Error::Protocol(format!("Unexpected state {state:?}"))),
        }
    }

    fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn is_complete(&self) -> bool {
        self.state == State::Finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::RowsHandler;

    fn feed(buffer_set: &mut BufferSet, type_byte: u8, payload: &[u8]) {
        buffer_set.type_byte = type_byte;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.extend_from_slice(payload);
    }

    fn row_description(name: &str) -> Vec<u8> {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(name.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&[0; 18]);
        payload
    }

    fn data_row(value: &[u8]) -> Vec<u8> {
        let mut payload = 1_u16.to_be_bytes().to_vec();
        payload.extend_from_slice(&(value.len() as i32).to_be_bytes());
        payload.extend_from_slice(value);
        payload
    }

    #[test]
    fn collects_rows_across_statements() {
        let mut buffer_set = BufferSet::new();
        let mut handler = RowsHandler::new();
        let mut machine = SimpleQueryStateMachine::new(&mut handler, "SELECT 1; BEGIN");

        assert!(matches!(machine.step(&mut buffer_set).unwrap(), Action::WriteAndReadMessage));
        assert_eq!(buffer_set.write_buffer.first(), Some(&b'Q'));

        feed(&mut buffer_set, msg_type::ROW_DESCRIPTION, &row_description("one"));
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::DATA_ROW, &data_row(b"1"));
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::COMMAND_COMPLETE, b"SELECT 1\0");
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::COMMAND_COMPLETE, b"BEGIN\0");
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::READY_FOR_QUERY, b"T");
        assert!(matches!(machine.step(&mut buffer_set).unwrap(), Action::Finished));
        assert_eq!(machine.transaction_status(), TransactionStatus::InTransaction);

        assert_eq!(handler.rows().len(), 1);
        assert_eq!(handler.rows()[0].get("one"), Some("1"));
    }

    #[test]
    fn error_is_reported_after_ready() {
        let mut buffer_set = BufferSet::new();
        let mut handler = RowsHandler::new();
        let mut machine = SimpleQueryStateMachine::new(&mut handler, "ROLLBACK PREPARED 'x'");
        machine.step(&mut buffer_set).unwrap();

        feed(&mut buffer_set, msg_type::ERROR_RESPONSE, b"SERROR\0C42704\0Mnot found\0\0");
        assert!(matches!(machine.step(&mut buffer_set).unwrap(), Action::ReadMessage));

        feed(&mut buffer_set, msg_type::NOTICE_RESPONSE, b"SNOTICE\0C00000\0Mhi\0\0");
        assert!(matches!(
            machine.step(&mut buffer_set).unwrap(),
            Action::HandleAsyncMessageAndReadMessage(_)
        ));

        feed(&mut buffer_set, msg_type::READY_FOR_QUERY, b"I");
        let err = machine.step(&mut buffer_set).unwrap_err();
        assert_eq!(err.sqlstate(), Some("42704"));
        assert_eq!(machine.transaction_status(), TransactionStatus::Idle);
    }
}
