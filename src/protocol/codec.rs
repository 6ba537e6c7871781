//! Encoding and decoding primitives.
//!
//! Integers are big-endian. Readers return the value and the remaining
//! input; they never index past the end of a slice.

use zerocopy::FromBytes;

use crate::error::{Error, Result};

use super::types::{I16BE, I32BE, U16BE, U32BE};

fn split<'a>(data: &'a [u8], len: usize, what: &str) -> Result<(&'a [u8], &'a [u8])> {
    data.split_at_checked(len).ok_or_else(|| {
        Error::Protocol(format!("{what}: buffer too short: {} < {len}", data.len()))
    })
}

/// Read a zerocopy header of type `T` from the front of `data`.
pub fn read_header<T>(data: &[u8]) -> Result<(&T, &[u8])>
where
    T: FromBytes + zerocopy::KnownLayout + zerocopy::Immutable,
{
    T::ref_from_prefix(data)
        .map_err(|e| Error::Protocol(format!("{}: {e:?}", core::any::type_name::<T>())))
}

pub fn read_u8(data: &[u8]) -> Result<(u8, &[u8])> {
    match data.split_first() {
        Some((&byte, rest)) => Ok((byte, rest)),
        None => Err(Error::Protocol("read_u8: empty buffer".into())),
    }
}

pub fn read_i16(data: &[u8]) -> Result<(i16, &[u8])> {
    let (value, rest) = read_header::<I16BE>(data)?;
    Ok((value.get(), rest))
}

pub fn read_u16(data: &[u8]) -> Result<(u16, &[u8])> {
    let (value, rest) = read_header::<U16BE>(data)?;
    Ok((value.get(), rest))
}

pub fn read_i32(data: &[u8]) -> Result<(i32, &[u8])> {
    let (value, rest) = read_header::<I32BE>(data)?;
    Ok((value.get(), rest))
}

pub fn read_u32(data: &[u8]) -> Result<(u32, &[u8])> {
    let (value, rest) = read_header::<U32BE>(data)?;
    Ok((value.get(), rest))
}

/// Read `len` raw bytes.
pub fn read_bytes(data: &[u8], len: usize) -> Result<(&[u8], &[u8])> {
    split(data, len, "read_bytes")
}

/// Read a NUL-terminated string, without the terminator.
pub fn read_cstring(data: &[u8]) -> Result<(&[u8], &[u8])> {
    let pos = memchr::memchr(0, data)
        .ok_or_else(|| Error::Protocol("read_cstring: no null terminator found".into()))?;
    let (bytes, rest) = split(data, pos, "read_cstring")?;
    Ok((bytes, rest.get(1..).unwrap_or_default()))
}

/// Read a NUL-terminated UTF-8 string.
pub fn read_cstr(data: &[u8]) -> Result<(&str, &[u8])> {
    let (bytes, rest) = read_cstring(data)?;
    let s = simdutf8::compat::from_utf8(bytes)
        .map_err(|e| Error::Protocol(format!("read_cstr: invalid UTF-8: {e}")))?;
    Ok((s, rest))
}

/// Writes one message and fills in its length on [`finish`](Self::finish).
///
/// The length covers itself and the payload but not the type byte.
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        Self::new_startup(buf)
    }

    /// Start an untyped message (startup and the pre-startup requests).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0; 4]);
        Self { buf, start }
    }

    pub fn buf(&mut self) -> &mut Vec<u8> {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_u32(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    pub fn write_cstr(&mut self, s: &str) {
        self.buf.extend_from_slice(s.as_bytes());
        self.buf.push(0);
    }

    /// Write a count as the wire's i16, rejecting counts that do not fit.
    pub fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i16::try_from(count)
            .map_err(|_| Error::InvalidUsage(format!("too many items for one message: {count}")))?;
        self.write_i16(count);
        Ok(())
    }

    /// Fill in the length field.
    pub fn finish(self) -> Result<()> {
        let len = self.buf.len().saturating_sub(self.start);
        let len = i32::try_from(len)
            .map_err(|_| Error::InvalidUsage(format!("message too large: {len} bytes")))?;
        if let Some(field) = self.buf.get_mut(self.start..self.start + 4) {
            field.copy_from_slice(&len.to_be_bytes());
        }
        Ok(())
    }
}
