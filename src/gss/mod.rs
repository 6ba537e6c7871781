//! GSSAPI transport encryption.
//!
//! After a `GSSENCRequest` is accepted, every byte on the socket travels
//! inside frames: a 4-byte big-endian token length followed by a token
//! produced by the security context's wrap primitive. [`FrameWriter`] and
//! [`FrameReader`] hold the framing state and [`GssStream`] joins them
//! over one underlying stream.
//!
//! The security mechanism itself is pluggable through [`GssProvider`].

mod stream;
mod unwrap;
mod wrap;

use std::io::{BufReader, Read};

use crate::error::Result;

pub use stream::GssStream;
pub use unwrap::FrameReader;
pub use wrap::FrameWriter;

/// Request code of `GSSENCRequest`.
pub const GSSENC_REQUEST_CODE: u32 = 80_877_104;

/// Largest frame a peer may send, length prefix included.
pub const MAX_FRAME_SIZE: usize = 16_384;

/// Size of the length prefix.
pub const FRAME_HEADER_SIZE: usize = 4;

/// Largest token accepted from a peer. Frames over [`MAX_FRAME_SIZE`] grow
/// the receive buffer up to this size.
pub const MAX_TOKEN_SIZE: usize = 16 * 1024 * 1024;

/// An established or establishing security context.
pub trait GssContext: Send {
    /// Feed the peer's token (empty on the first call) and get the next
    /// token to send, if any.
    fn step(&mut self, input: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Whether the handshake is complete.
    fn is_established(&self) -> bool;

    /// Protect `plain` into one token.
    fn wrap(&mut self, plain: &[u8]) -> Result<Vec<u8>>;

    /// Verify and decrypt one token.
    fn unwrap(&mut self, token: &[u8]) -> Result<Vec<u8>>;

    /// Largest plaintext whose wrapped token fits in `max_token` bytes.
    fn wrap_size_limit(&self, max_token: usize) -> usize {
        max_token
    }
}

/// Creates security contexts for new connections.
pub trait GssProvider: Send + Sync {
    /// Initiate a context for `service@host` on behalf of `user`.
    fn create_context(&self, host: &str, service: &str, user: &str) -> Result<Box<dyn GssContext>>;
}

/// A reader that can report how many bytes a read would return without
/// blocking.
pub trait ReadAvailable: Read {
    /// Bytes readable right now. Zero means a read may block.
    fn available(&self) -> usize;
}

impl<R: Read> ReadAvailable for BufReader<R> {
    fn available(&self) -> usize {
        self.buffer().len()
    }
}

impl ReadAvailable for &[u8] {
    fn available(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! An XOR "cipher" with a one-byte integrity tag and sources that
    //! deliver data in small pieces.

    use std::io::{self, Read};

    use super::{GssContext, ReadAvailable};
    use crate::error::{Error, Result};

    #[derive(Debug)]
    pub struct XorContext {
        pub key: u8,
        pub rounds: usize,
        pub established: bool,
    }

    impl XorContext {
        pub fn new(key: u8) -> Self {
            Self {
                key,
                rounds: 0,
                established: true,
            }
        }
    }

    impl GssContext for XorContext {
        fn step(&mut self, _input: &[u8]) -> Result<Option<Vec<u8>>> {
            self.rounds += 1;
            self.established = true;
            Ok(None)
        }

        fn is_established(&self) -> bool {
            self.established
        }

        fn wrap(&mut self, plain: &[u8]) -> Result<Vec<u8>> {
            let mut token: Vec<u8> = plain.iter().map(|b| b ^ self.key).collect();
            token.push(plain.len() as u8);
            Ok(token)
        }

        fn unwrap(&mut self, token: &[u8]) -> Result<Vec<u8>> {
            let (tag, body) = token
                .split_last()
                .ok_or_else(|| Error::Gss("empty token".into()))?;
            if *tag != body.len() as u8 {
                return Err(Error::Gss("integrity check failed".into()));
            }
            Ok(body.iter().map(|b| b ^ self.key).collect())
        }

        fn wrap_size_limit(&self, max_token: usize) -> usize {
            max_token - 1
        }
    }

    /// Delivers at most `chunk` bytes per read. With `buffered` off it
    /// reports nothing available, like a socket with an empty buffer.
    pub struct Trickle {
        pub data: Vec<u8>,
        pub pos: usize,
        pub chunk: usize,
        pub buffered: bool,
    }

    impl Trickle {
        pub fn new(data: Vec<u8>, chunk: usize) -> Self {
            Self {
                data,
                pos: 0,
                chunk,
                buffered: true,
            }
        }
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.chunk).min(self.data.len() - self.pos);
            buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }

    impl ReadAvailable for Trickle {
        fn available(&self) -> usize {
            if self.buffered {
                self.data.len() - self.pos
            } else {
                0
            }
        }
    }
}
