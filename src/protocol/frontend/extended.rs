//! Extended query protocol messages.

use crate::error::Result;
use crate::params::ParameterList;
use crate::protocol::codec::MessageBuilder;
use crate::protocol::types::{FormatCode, Oid};

/// Write a Parse message. An oid of 0 lets the server infer the type.
pub fn write_parse(buf: &mut Vec<u8>, name: &str, query: &str, param_oids: &[Oid]) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::PARSE);
    msg.write_cstr(name);
    msg.write_cstr(query);
    msg.write_count(param_oids.len())?;
    for &oid in param_oids {
        msg.write_u32(oid);
    }
    msg.finish()
}

/// Write a Describe message for a statement.
pub fn write_describe_statement(buf: &mut Vec<u8>, name: &str) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::DESCRIBE);
    msg.write_u8(b'S');
    msg.write_cstr(name);
    msg.finish()
}

/// Write a Bind message carrying every value of `params`.
///
/// Parameter formats come from the list; results are requested in
/// `result_format` for all columns.
pub fn write_bind(
    buf: &mut Vec<u8>,
    portal: &str,
    statement: &str,
    params: &mut ParameterList,
    result_format: FormatCode,
) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::BIND);
    msg.write_cstr(portal);
    msg.write_cstr(statement);

    let formats = params.format_codes();
    msg.write_count(formats.len())?;
    for format in formats {
        msg.write_i16(format.code());
    }

    msg.write_count(params.len())?;
    for index in 1..=params.len() {
        params.write_value(index, msg.buf())?;
    }

    msg.write_i16(1);
    msg.write_i16(result_format.code());
    msg.finish()
}

/// Write an Execute message. `max_rows` of 0 means no limit.
pub fn write_execute(buf: &mut Vec<u8>, portal: &str, max_rows: u32) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::EXECUTE);
    msg.write_cstr(portal);
    msg.write_u32(max_rows);
    msg.finish()
}

/// Write a Sync message.
pub fn write_sync(buf: &mut Vec<u8>) -> Result<()> {
    MessageBuilder::new(buf, super::msg_type::SYNC).finish()
}
