//! Result and statement description messages.

use zerocopy::{FromBytes, Immutable, KnownLayout};

use crate::error::{Error, Result};
use crate::protocol::codec::{read_cstr, read_header, read_i32, read_u16, read_u32};
use crate::protocol::types::{FormatCode, I16BE, I32BE, Oid, U16BE, U32BE};

/// Fixed-size tail of a field description.
#[derive(Debug, Clone, Copy, FromBytes, KnownLayout, Immutable)]
#[repr(C, packed)]
pub struct FieldTail {
    table_oid: U32BE,
    column_id: I16BE,
    type_oid: U32BE,
    type_size: I16BE,
    type_modifier: I32BE,
    format: U16BE,
}

/// One column of a RowDescription.
#[derive(Debug, Clone, Copy)]
pub struct FieldDescription<'a> {
    pub name: &'a str,
    tail: &'a FieldTail,
}

impl FieldDescription<'_> {
    pub fn table_oid(&self) -> Oid {
        self.tail.table_oid.get()
    }

    pub fn column_id(&self) -> i16 {
        self.tail.column_id.get()
    }

    pub fn type_oid(&self) -> Oid {
        self.tail.type_oid.get()
    }

    pub fn type_size(&self) -> i16 {
        self.tail.type_size.get()
    }

    pub fn type_modifier(&self) -> i32 {
        self.tail.type_modifier.get()
    }

    pub fn format(&self) -> FormatCode {
        FormatCode::from_u16(self.tail.format.get())
    }
}

/// Columns of a result set.
#[derive(Debug, Clone)]
pub struct RowDescription<'a> {
    fields: Vec<FieldDescription<'a>>,
}

impl<'a> RowDescription<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (count, mut data) = read_u16(payload)?;
        let mut fields = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let (name, rest) = read_cstr(data)?;
            let (tail, rest) = read_header::<FieldTail>(rest)?;
            fields.push(FieldDescription { name, tail });
            data = rest;
        }
        Ok(Self { fields })
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn fields(&self) -> &[FieldDescription<'a>] {
        &self.fields
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDescription<'a>> {
        self.fields.iter()
    }

    /// Column names, in order.
    pub fn names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.to_string()).collect()
    }
}

/// One row of a result set.
#[derive(Debug, Clone, Copy)]
pub struct DataRow<'a> {
    count: u16,
    data: &'a [u8],
}

impl<'a> DataRow<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (count, data) = read_u16(payload)?;
        Ok(Self { count, data })
    }

    pub fn len(&self) -> usize {
        usize::from(self.count)
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Column values; `None` is SQL NULL. A truncated row yields an error.
    pub fn iter(&self) -> DataRowIter<'a> {
        DataRowIter {
            remaining: self.data,
            left: self.count,
        }
    }
}

/// Iterator over the values of a [`DataRow`].
#[derive(Debug, Clone)]
pub struct DataRowIter<'a> {
    remaining: &'a [u8],
    left: u16,
}

impl<'a> DataRowIter<'a> {
    fn read_value(&mut self) -> Result<Option<&'a [u8]>> {
        let (len, rest) = read_i32(self.remaining)?;
        let Ok(len) = usize::try_from(len) else {
            self.remaining = rest;
            return Ok(None);
        };
        let (value, rest) = rest
            .split_at_checked(len)
            .ok_or_else(|| Error::Protocol(format!("DataRow: value of {len} bytes is truncated")))?;
        self.remaining = rest;
        Ok(Some(value))
    }
}

impl<'a> Iterator for DataRowIter<'a> {
    type Item = Result<Option<&'a [u8]>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        let value = self.read_value();
        if value.is_err() {
            self.left = 0;
        }
        Some(value)
    }
}

/// Command tag of a finished statement.
#[derive(Debug, Clone, Copy)]
pub struct CommandComplete<'a> {
    pub tag: &'a str,
}

impl<'a> CommandComplete<'a> {
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        let (tag, _) = read_cstr(payload)?;
        Ok(Self { tag })
    }

    /// Row count from tags like `SELECT 5`, `INSERT 0 1` or `UPDATE 10`.
    pub fn rows_affected(&self) -> Option<u64> {
        let mut parts = self.tag.split_whitespace();
        let command = parts.next()?;
        match command {
            "INSERT" => parts.nth(1)?.parse().ok(),
            "SELECT" | "UPDATE" | "DELETE" | "MERGE" | "COPY" | "MOVE" | "FETCH" => {
                parts.next()?.parse().ok()
            }
            _ => None,
        }
    }

    /// First word of the tag.
    pub fn command(&self) -> Option<&str> {
        self.tag.split_whitespace().next()
    }
}

/// Parameter types the server resolved for a statement.
#[derive(Debug, Clone)]
pub struct ParameterDescription {
    oids: Vec<Oid>,
}

impl ParameterDescription {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let (count, mut data) = read_u16(payload)?;
        let mut oids = Vec::with_capacity(usize::from(count));
        for _ in 0..count {
            let (oid, rest) = read_u32(data)?;
            oids.push(oid);
            data = rest;
        }
        Ok(Self { oids })
    }

    pub fn oids(&self) -> &[Oid] {
        &self.oids
    }
}
