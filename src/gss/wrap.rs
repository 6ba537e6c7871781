//! Outbound framing.

use std::io::{self, Write};

use tracing::trace;

use super::{FRAME_HEADER_SIZE, GssContext, MAX_FRAME_SIZE};

/// Buffers plaintext and emits it as wrapped frames.
///
/// At most one frame's worth of plaintext is held. A full buffer is sent
/// as soon as more data arrives; a partial one waits for [`flush`].
///
/// [`flush`]: FrameWriter::flush
#[derive(Debug)]
pub struct FrameWriter {
    buffer: Vec<u8>,
    limit: usize,
}

impl FrameWriter {
    /// Writer whose frames fit in [`MAX_FRAME_SIZE`] under `ctx`.
    pub fn new(ctx: &dyn GssContext) -> Self {
        let limit = ctx.wrap_size_limit(MAX_FRAME_SIZE - FRAME_HEADER_SIZE).max(1);
        Self {
            buffer: Vec::with_capacity(limit),
            limit,
        }
    }

    /// Plaintext bytes per frame.
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Plaintext waiting for the next frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Accept all of `data`, sending every buffer that fills up.
    pub fn write<W: Write>(
        &mut self,
        ctx: &mut dyn GssContext,
        out: &mut W,
        mut data: &[u8],
    ) -> io::Result<usize> {
        let total = data.len();
        while !data.is_empty() {
            if self.buffer.len() == self.limit {
                self.send_frame(ctx, out)?;
            }
            let n = (self.limit - self.buffer.len()).min(data.len());
            self.buffer.extend_from_slice(&data[..n]);
            data = &data[n..];
        }
        Ok(total)
    }

    /// Send buffered plaintext, then flush `out`.
    pub fn flush<W: Write>(&mut self, ctx: &mut dyn GssContext, out: &mut W) -> io::Result<()> {
        if !self.buffer.is_empty() {
            self.send_frame(ctx, out)?;
        }
        out.flush()
    }

    fn send_frame<W: Write>(&mut self, ctx: &mut dyn GssContext, out: &mut W) -> io::Result<()> {
        let token = ctx.wrap(&self.buffer)?;
        let len = u32::try_from(token.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "wrapped token too large"))?;
        trace!(plain = self.buffer.len(), wrapped = token.len(), "gss frame out");
        out.write_all(&len.to_be_bytes())?;
        out.write_all(&token)?;
        self.buffer.clear();
        Ok(())
    }
}
