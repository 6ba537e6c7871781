//! I/O requests produced by the state machines.

use crate::error::ServerError;

/// What the driver must do before calling `step` again.
///
/// Outgoing bytes are always in `buffer_set.write_buffer`; an incoming
/// message is read into `buffer_set.read_buffer` with its type in
/// `buffer_set.type_byte`.
#[derive(Debug)]
pub enum Action {
    /// Write, then read the single response byte of an SSLRequest or
    /// GSSENCRequest and hand it to `set_encryption_response`.
    WriteAndReadByte,

    /// Read one message.
    ReadMessage,

    /// Write and flush.
    Write,

    /// Write, flush, then read one message.
    WriteAndReadMessage,

    /// Upgrade the stream to TLS.
    TlsHandshake,

    /// Establish a GSS security context and wrap the stream.
    GssHandshake,

    /// Deliver the message, then read the next one.
    HandleAsyncMessageAndReadMessage(AsyncMessage),

    /// Done.
    Finished,
}

/// A message the server may send at any time.
#[derive(Debug, Clone)]
pub enum AsyncMessage {
    /// Warning or informational notice.
    Notice(ServerError),

    /// A server setting changed.
    ParameterChanged { name: String, value: String },
}
