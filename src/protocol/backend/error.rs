//! ErrorResponse and NoticeResponse fields.

use crate::error::{Result, ServerError};
use crate::protocol::codec::{read_cstr, read_u8};

/// Parse the field list shared by ErrorResponse and NoticeResponse.
pub fn parse_server_error(payload: &[u8]) -> Result<ServerError> {
    let mut fields = ServerError::default();
    let mut data = payload;

    loop {
        let (field_type, rest) = read_u8(data)?;
        if field_type == 0 {
            break;
        }
        let (value, rest) = read_cstr(rest)?;
        data = rest;

        let value = Some(value.to_string());
        match field_type {
            b'S' => fields.severity = value,
            b'V' => fields.severity_non_localized = value,
            b'C' => fields.code = value,
            b'M' => fields.message = value,
            b'D' => fields.detail = value,
            b'H' => fields.hint = value,
            b'P' => fields.position = value.and_then(|v| v.parse().ok()),
            b'W' => fields.where_ = value,
            b's' => fields.schema = value,
            b't' => fields.table = value,
            b'c' => fields.column = value,
            b'n' => fields.constraint = value,
            b'R' => fields.routine = value,
            // file, line, data type and internal query are not kept
            _ => {}
        }
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fields_are_parsed() {
        let payload = b"SERROR\0VERROR\0C42704\0Mprepared transaction with identifier \"x\" does not exist\0P12\0Fxact.c\0\0";
        let fields = parse_server_error(payload).unwrap();
        assert_eq!(fields.severity(), Some("ERROR"));
        assert_eq!(fields.code.as_deref(), Some("42704"));
        assert_eq!(fields.position, Some(12));
        assert!(fields.message.unwrap().contains("does not exist"));
    }

    #[test]
    fn truncated_payload_is_an_error() {
        assert!(parse_server_error(b"SERROR").is_err());
        assert!(parse_server_error(b"SERROR\0").is_err());
    }
}
