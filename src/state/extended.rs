//! Extended query protocol state machine.

use crate::buffer_set::BufferSet;
use crate::error::{Error, Result};
use crate::handler::TextHandler;
use crate::params::ParameterList;
use crate::protocol::backend::{
    CommandComplete, DataRow, ParameterDescription, ReadyForQuery, RowDescription, is_async_type,
    msg_type,
};
use crate::protocol::frontend::{
    write_bind, write_describe_statement, write_execute, write_parse, write_sync,
};
use crate::protocol::types::{FormatCode, TransactionStatus};

use super::{Action, StateMachine, async_action, parse_async, pending_error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Initial,
    /// Until BindComplete: parse, parameter and row descriptions.
    Describing,
    ProcessingRows,
    WaitingReady,
    Finished,
}

/// Runs one statement with bound parameters through the unnamed
/// statement and portal.
///
/// Parse, Describe, Bind, Execute and Sync go out in one write. Types the
/// server reports in ParameterDescription are recorded in the list.
/// Results are requested in text format.
pub struct ExtendedQueryStateMachine<'a, H> {
    state: State,
    handler: &'a mut H,
    sql: &'a str,
    params: &'a mut ParameterList,
    has_columns: bool,
    error: Option<Error>,
    transaction_status: TransactionStatus,
}

impl<'a, H: TextHandler> ExtendedQueryStateMachine<'a, H> {
    pub fn new(handler: &'a mut H, sql: &'a str, params: &'a mut ParameterList) -> Self {
        Self {
            state: State::Initial,
            handler,
            sql,
            params,
            has_columns: false,
            error: None,
            transaction_status: TransactionStatus::Idle,
        }
    }

    fn start(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        self.params.check_all_parameters_set()?;
        let buf = &mut buffer_set.write_buffer;
        buf.clear();
        write_parse(buf, "", self.sql, &self.params.type_oids())?;
        write_describe_statement(buf, "")?;
        write_bind(buf, "", "", self.params, FormatCode::Text)?;
        write_execute(buf, "", 0)?;
        write_sync(buf)?;
        self.state = State::Describing;
        Ok(Action::WriteAndReadMessage)
    }

    fn record_parameter_types(&mut self, payload: &[u8]) -> Result<()> {
        let description = ParameterDescription::parse(payload)?;
        for (i, &oid) in description.oids().iter().enumerate() {
            if let Err(e) = self.params.set_resolved_type(i + 1, oid) {
                self.error.get_or_insert(e);
            }
        }
        Ok(())
    }

    fn handle_describing(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::PARSE_COMPLETE | msg_type::NO_DATA => {}
            msg_type::PARAMETER_DESCRIPTION => self.record_parameter_types(payload)?,
            msg_type::ROW_DESCRIPTION => {
                buffer_set.column_buffer.clear();
                buffer_set.column_buffer.extend_from_slice(payload);
                self.handler
                    .result_start(RowDescription::parse(&buffer_set.column_buffer)?)?;
                self.has_columns = true;
            }
            msg_type::BIND_COMPLETE => self.state = State::ProcessingRows,
            other => {
                return Err(Error::Protocol(format!(
                    "Unexpected message before BindComplete: '{}'",
                    other as char
                )));
            }
        }
        Ok(Action::ReadMessage)
    }

    fn handle_rows(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        let payload = &buffer_set.read_buffer;
        match buffer_set.type_byte {
            msg_type::DATA_ROW if self.has_columns => {
                let cols = RowDescription::parse(&buffer_set.column_buffer)?;
                self.handler.row(cols, DataRow::parse(payload)?)?;
            }
            msg_type::COMMAND_COMPLETE => {
                self.handler.result_end(CommandComplete::parse(payload)?)?;
                self.state = State::WaitingReady;
            }
            msg_type::EMPTY_QUERY_RESPONSE | msg_type::PORTAL_SUSPENDED => {
                self.state = State::WaitingReady;
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Unexpected message in row processing: '{}'",
                    other as char
                )));
            }
        }
        Ok(Action::ReadMessage)
    }

    fn finish(&mut self, payload: &[u8]) -> Result<Action> {
        self.transaction_status = ReadyForQuery::parse(payload)?.transaction_status()?;
        self.state = State::Finished;
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(Action::Finished),
        }
    }
}

impl<H: TextHandler> StateMachine for ExtendedQueryStateMachine<'_, H> {
    fn step(&mut self, buffer_set: &mut BufferSet) -> Result<Action> {
        if self.state == State::Initial {
            return self.start(buffer_set);
        }

        let type_byte = buffer_set.type_byte;
        if is_async_type(type_byte) {
            return Ok(async_action(parse_async(type_byte, &buffer_set.read_buffer)?));
        }
        if type_byte == msg_type::ERROR_RESPONSE {
            let error = Error::Server(pending_error(&buffer_set.read_buffer)?);
            self.error = Some(error);
            self.state = State::WaitingReady;
            return Ok(Action::ReadMessage);
        }
        if type_byte == msg_type::READY_FOR_QUERY {
            if self.state != State::WaitingReady {
                return Err(Error::Protocol(format!(
                    "ReadyForQuery in state {:?}",
                    self.state
                )));
            }
            return self.finish(&buffer_set.read_buffer);
        }

        match self.state {
            State::Describing => self.handle_describing(buffer_set),
            State::ProcessingRows => self.handle_rows(buffer_set),
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
    use crate::handler::{DropHandler, RowsHandler};
    use crate::protocol::types::oid;

    fn feed(buffer_set: &mut BufferSet, type_byte: u8, payload: &[u8]) {
        buffer_set.type_byte = type_byte;
        buffer_set.read_buffer.clear();
        buffer_set.read_buffer.extend_from_slice(payload);
    }

    fn parameter_description(oids: &[u32]) -> Vec<u8> {
        let mut payload = (oids.len() as u16).to_be_bytes().to_vec();
        for oid in oids {
            payload.extend_from_slice(&oid.to_be_bytes());
        }
        payload
    }

    #[test]
    fn writes_full_batch_and_resolves_types() {
        let mut buffer_set = BufferSet::new();
        let mut params = ParameterList::new(2);
        params.set_int4(1, 5).unwrap();
        params.set_literal(2, "x", oid::UNSPECIFIED).unwrap();

        let mut handler = RowsHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler, "SELECT $1, $2", &mut params);
        assert!(matches!(machine.step(&mut buffer_set).unwrap(), Action::WriteAndReadMessage));
        let types: Vec<u8> = [b'P', b'D', b'B', b'E', b'S']
            .into_iter()
            .filter(|t| buffer_set.write_buffer.contains(t))
            .collect();
        assert_eq!(types.len(), 5);
        assert_eq!(buffer_set.write_buffer.first(), Some(&b'P'));

        feed(&mut buffer_set, msg_type::PARSE_COMPLETE, b"");
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::PARAMETER_DESCRIPTION, &parameter_description(&[23, 25]));
        machine.step(&mut buffer_set).unwrap();

        let mut desc = 2_u16.to_be_bytes().to_vec();
        for name in ["a", "b"] {
            desc.extend_from_slice(name.as_bytes());
            desc.push(0);
            desc.extend_from_slice(&[0; 18]);
        }
        feed(&mut buffer_set, msg_type::ROW_DESCRIPTION, &desc);
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::BIND_COMPLETE, b"");
        machine.step(&mut buffer_set).unwrap();

        let mut row = 2_u16.to_be_bytes().to_vec();
        row.extend_from_slice(&1_i32.to_be_bytes());
        row.extend_from_slice(b"5");
        row.extend_from_slice(&(-1_i32).to_be_bytes());
        feed(&mut buffer_set, msg_type::DATA_ROW, &row);
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::COMMAND_COMPLETE, b"SELECT 1\0");
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(machine.step(&mut buffer_set).unwrap(), Action::Finished));

        assert_eq!(params.type_oids(), [oid::INT4, oid::TEXT]);
        let rows = handler.into_rows();
        assert_eq!(rows[0].get("a"), Some("5"));
        assert_eq!(rows[0].get("b"), None);
    }

    #[test]
    fn unset_parameter_is_rejected_before_writing() {
        let mut buffer_set = BufferSet::new();
        let mut params = ParameterList::new(1);
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler, "SELECT $1", &mut params);
        assert!(machine.step(&mut buffer_set).is_err());
        assert!(buffer_set.write_buffer.is_empty());
    }

    #[test]
    fn server_error_waits_for_ready() {
        let mut buffer_set = BufferSet::new();
        let mut params = ParameterList::new(0);
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler, "SELEC", &mut params);
        machine.step(&mut buffer_set).unwrap();

        feed(&mut buffer_set, msg_type::ERROR_RESPONSE, b"SERROR\0C42601\0Msyntax\0\0");
        assert!(matches!(machine.step(&mut buffer_set).unwrap(), Action::ReadMessage));
        feed(&mut buffer_set, msg_type::READY_FOR_QUERY, b"E");
        let err = machine.step(&mut buffer_set).unwrap_err();
        assert_eq!(err.sqlstate(), Some("42601"));
        assert_eq!(machine.transaction_status(), TransactionStatus::Failed);
    }

    #[test]
    fn conflicting_resolved_type_is_reported() {
        let mut buffer_set = BufferSet::new();
        let mut params = ParameterList::new(1);
        params.set_int4(1, 1).unwrap();
        let mut handler = DropHandler::new();
        let mut machine = ExtendedQueryStateMachine::new(&mut handler, "SELECT $1::text", &mut params);
        machine.step(&mut buffer_set).unwrap();

        feed(&mut buffer_set, msg_type::PARSE_COMPLETE, b"");
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::PARAMETER_DESCRIPTION, &parameter_description(&[25]));
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::NO_DATA, b"");
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::BIND_COMPLETE, b"");
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::COMMAND_COMPLETE, b"SELECT 1\0");
        machine.step(&mut buffer_set).unwrap();
        feed(&mut buffer_set, msg_type::READY_FOR_QUERY, b"I");
        assert!(matches!(machine.step(&mut buffer_set), Err(Error::InvalidUsage(_))));
    }
}
