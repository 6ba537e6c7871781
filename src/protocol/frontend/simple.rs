//! Simple query protocol.

use crate::error::Result;
use crate::protocol::codec::MessageBuilder;

/// Write a Query message. `query` may hold several statements.
pub fn write_query(buf: &mut Vec<u8>, query: &str) -> Result<()> {
    let mut msg = MessageBuilder::new(buf, super::msg_type::QUERY);
    msg.write_cstr(query);
    msg.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_layout() {
        let mut buf = Vec::new();
        write_query(&mut buf, "SHOW transaction_read_only").unwrap();
        assert_eq!(buf.first(), Some(&b'Q'));
        assert_eq!(buf.len(), 1 + 4 + 27);
        assert!(buf.ends_with(b"read_only\0"));
    }
}
