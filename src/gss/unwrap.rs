//! Inbound framing.

use std::io::{self, ErrorKind};

use tracing::trace;

use crate::error::Error;

use super::{FRAME_HEADER_SIZE, GssContext, MAX_FRAME_SIZE, MAX_TOKEN_SIZE, ReadAvailable};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Collecting the 4-byte length.
    Header,
    /// Collecting `len` token bytes.
    Body(usize),
    /// Serving unwrapped plaintext.
    Plain,
}

/// Reassembles frames from a source that may deliver any number of bytes
/// per read, and serves their plaintext.
#[derive(Debug)]
pub struct FrameReader {
    phase: Phase,
    header: [u8; FRAME_HEADER_SIZE],
    filled: usize,
    token: Vec<u8>,
    plain: Vec<u8>,
    plain_pos: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}

enum Step {
    Progress,
    Eof,
    WouldBlock,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            phase: Phase::Header,
            header: [0; FRAME_HEADER_SIZE],
            filled: 0,
            token: vec![0; MAX_FRAME_SIZE],
            plain: Vec::new(),
            plain_pos: 0,
        }
    }

    /// Plaintext readable without touching the source.
    pub fn available(&self) -> usize {
        match self.phase {
            Phase::Plain => self.plain.len() - self.plain_pos,
            Phase::Header | Phase::Body(_) => 0,
        }
    }

    /// Whether no frame is partially received.
    pub fn at_frame_boundary(&self) -> bool {
        self.phase == Phase::Header && self.filled == 0
    }

    /// Read plaintext into `buf`.
    ///
    /// Blocks until at least one byte is available. After that, frames are
    /// only pulled while the source reports buffered bytes. End of stream
    /// inside a frame is an error; at a frame boundary it ends the read.
    pub fn read<R: ReadAvailable>(
        &mut self,
        ctx: &mut dyn GssContext,
        src: &mut R,
        buf: &mut [u8],
    ) -> io::Result<usize> {
        let mut delivered = 0;
        while delivered < buf.len() {
            if self.phase == Phase::Plain {
                let n = (self.plain.len() - self.plain_pos).min(buf.len() - delivered);
                buf[delivered..delivered + n]
                    .copy_from_slice(&self.plain[self.plain_pos..self.plain_pos + n]);
                self.plain_pos += n;
                delivered += n;
                if self.plain_pos == self.plain.len() {
                    self.phase = Phase::Header;
                    self.filled = 0;
                }
                continue;
            }

            if delivered > 0 && src.available() == 0 {
                break;
            }

            match self.pull(ctx, src)? {
                Step::Progress => {}
                Step::Eof if self.at_frame_boundary() => break,
                Step::Eof => {
                    return Err(io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "stream ended inside a GSS frame",
                    ));
                }
                Step::WouldBlock if delivered > 0 => break,
                Step::WouldBlock => return Err(ErrorKind::WouldBlock.into()),
            }
        }
        Ok(delivered)
    }

    /// One read from the source toward the current phase.
    fn pull<R: ReadAvailable>(&mut self, ctx: &mut dyn GssContext, src: &mut R) -> io::Result<Step> {
        let target: &mut [u8] = match self.phase {
            Phase::Header => &mut self.header[self.filled..],
            Phase::Body(len) => &mut self.token[self.filled..len],
            Phase::Plain => return Ok(Step::Progress),
        };

        if !target.is_empty() {
            let n = loop {
                match src.read(target) {
                    Ok(n) => break n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(Step::WouldBlock),
                    Err(e) => return Err(e),
                }
            };
            if n == 0 {
                return Ok(Step::Eof);
            }
            self.filled += n;
        }

        match self.phase {
            Phase::Header if self.filled == FRAME_HEADER_SIZE => {
                let len = u32::from_be_bytes(self.header) as usize;
                if len > MAX_TOKEN_SIZE {
                    return Err(Error::Protocol(format!(
                        "GSS frame of {len} bytes exceeds the {MAX_TOKEN_SIZE} byte limit"
                    ))
                    .into());
                }
                if len > self.token.len() {
                    self.token.resize(len, 0);
                }
                self.filled = 0;
                // Empty frames carry no token
                self.phase = if len == 0 { Phase::Header } else { Phase::Body(len) };
            }
            Phase::Body(len) if self.filled == len => self.finish_frame(ctx, len)?,
            _ => {}
        }
        Ok(Step::Progress)
    }

    fn finish_frame(&mut self, ctx: &mut dyn GssContext, len: usize) -> io::Result<()> {
        self.plain = ctx.unwrap(&self.token[..len])?;
        self.plain_pos = 0;
        self.filled = 0;
        trace!(wrapped = len, plain = self.plain.len(), "gss frame in");
        self.phase = if self.plain.is_empty() {
            Phase::Header
        } else {
            Phase::Plain
        };
        Ok(())
    }
}
