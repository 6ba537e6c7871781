//! Startup, pre-startup requests and Terminate.

use crate::error::Result;
use crate::gss::GSSENC_REQUEST_CODE;
use crate::protocol::codec::MessageBuilder;

/// Protocol version 3.0.
pub const PROTOCOL_VERSION_3_0: i32 = 196_608;

/// SSLRequest code.
pub const SSL_REQUEST_CODE: u32 = 80_877_103;

/// Write an SSLRequest. The server answers `S` or `N`.
pub fn write_ssl_request(buf: &mut Vec<u8>) -> Result<()> {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_u32(SSL_REQUEST_CODE);
    msg.finish()
}

/// Write a GSSENCRequest. The server answers `G` or `N`.
pub fn write_gssenc_request(buf: &mut Vec<u8>) -> Result<()> {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_u32(GSSENC_REQUEST_CODE);
    msg.finish()
}

/// Write a StartupMessage with `(name, value)` parameters.
pub fn write_startup(buf: &mut Vec<u8>, params: &[(&str, &str)]) -> Result<()> {
    let mut msg = MessageBuilder::new_startup(buf);
    msg.write_i32(PROTOCOL_VERSION_3_0);
    for (name, value) in params {
        msg.write_cstr(name);
        msg.write_cstr(value);
    }
    msg.write_u8(0);
    msg.finish()
}

/// Write a GSS token exchanged during the encryption handshake: a bare
/// big-endian length followed by the token.
pub fn write_gss_token(buf: &mut Vec<u8>, token: &[u8]) -> Result<()> {
    let len = u32::try_from(token.len())
        .map_err(|_| crate::error::Error::Gss(format!("token too large: {} bytes", token.len())))?;
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(token);
    Ok(())
}

/// Write a Terminate message.
pub fn write_terminate(buf: &mut Vec<u8>) -> Result<()> {
    MessageBuilder::new(buf, super::msg_type::TERMINATE).finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encryption_requests() {
        let mut buf = Vec::new();
        write_gssenc_request(&mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x30]);

        buf.clear();
        write_ssl_request(&mut buf).unwrap();
        assert_eq!(buf, [0, 0, 0, 8, 0x04, 0xd2, 0x16, 0x2f]);
    }

    #[test]
    fn startup_layout() {
        let mut buf = Vec::new();
        write_startup(&mut buf, &[("user", "postgres"), ("database", "test")]).unwrap();
        assert_eq!(buf.get(..4), Some(&(buf.len() as i32).to_be_bytes()[..]));
        assert_eq!(buf.get(4..8), Some(&PROTOCOL_VERSION_3_0.to_be_bytes()[..]));
        assert!(buf.ends_with(b"test\0\0"));
    }

    #[test]
    fn terminate_layout() {
        let mut buf = Vec::new();
        write_terminate(&mut buf).unwrap();
        assert_eq!(buf, [b'X', 0, 0, 0, 4]);
    }
}
