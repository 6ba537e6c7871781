use std::io::{self, Read, Write};

use super::{FrameReader, FrameWriter, GssContext, ReadAvailable};

/// A stream whose traffic is wrapped by an established security context.
pub struct GssStream<S> {
    inner: S,
    ctx: Box<dyn GssContext>,
    reader: FrameReader,
    writer: FrameWriter,
}

impl<S: ReadAvailable + Write> GssStream<S> {
    pub fn new(inner: S, ctx: Box<dyn GssContext>) -> Self {
        let writer = FrameWriter::new(ctx.as_ref());
        Self {
            inner,
            ctx,
            reader: FrameReader::new(),
            writer,
        }
    }

    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.inner
    }
}

impl<S> core::fmt::Debug for GssStream<S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("GssStream")
            .field("reader", &self.reader)
            .field("writer", &self.writer)
            .finish_non_exhaustive()
    }
}

impl<S: ReadAvailable + Write> Read for GssStream<S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(self.ctx.as_mut(), &mut self.inner, buf)
    }
}

impl<S: ReadAvailable + Write> ReadAvailable for GssStream<S> {
    fn available(&self) -> usize {
        self.reader.available()
    }
}

impl<S: ReadAvailable + Write> Write for GssStream<S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(self.ctx.as_mut(), &mut self.inner, buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush(self.ctx.as_mut(), &mut self.inner)
    }
}
