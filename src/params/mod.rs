//! Parameter binding for one statement invocation.
//!
//! A [`ParameterList`] has one slot per placeholder. Each slot tracks its
//! value, type OID, direction and wire format. Values that need text
//! encoding are encoded once and cached until the slot is rebound.

mod query;
mod render;

use core::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::protocol::types::{FormatCode, Oid, oid};

pub use query::Query;
pub use render::{numeric_to_string, quote};

/// A bound parameter value.
#[derive(Clone)]
pub enum ParamValue {
    /// SQL NULL.
    Null,
    /// Text, sent as UTF-8.
    Text(String),
    /// Raw bytes, sent as-is.
    Bytes(Arc<[u8]>),
    /// A value rendered with `Display` when first encoded.
    Display(Arc<dyn fmt::Display + Send + Sync>),
}

impl fmt::Debug for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("Null"),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Display(d) => f.debug_tuple("Display").field(&d.to_string()).finish(),
        }
    }
}

/// Parameter direction bitset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Direction(u8);

impl Direction {
    /// Not bound or registered yet.
    pub const NONE: Self = Self(0);
    pub const IN: Self = Self(1);
    pub const OUT: Self = Self(2);
    pub const INOUT: Self = Self(3);

    /// Whether a value is sent for this slot.
    pub fn is_in(self) -> bool {
        self.0 & Self::IN.0 != 0
    }

    /// Whether the slot is returned by a function call.
    pub fn is_out(self) -> bool {
        self.0 & Self::OUT.0 != 0
    }

    fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }
}

#[derive(Debug, Clone, Default)]
struct Slot {
    value: Option<ParamValue>,
    oid: Oid,
    direction: Direction,
    format: FormatCode,
    encoded: Option<Arc<[u8]>>,
}

/// Values bound to one statement's placeholders.
#[derive(Debug, Clone, Default)]
pub struct ParameterList {
    slots: Vec<Slot>,
    // Slots before this are taken; `append_all` writes from here
    pos: usize,
}

impl ParameterList {
    /// A list with `count` unset slots.
    pub fn new(count: usize) -> Self {
        Self {
            slots: vec![Slot::default(); count],
            pos: 0,
        }
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the statement has no placeholders.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn slot(&self, index: usize) -> Result<&Slot> {
        let count = self.slots.len();
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get(i))
            .ok_or_else(|| out_of_range(index, count))
    }

    fn slot_mut(&mut self, index: usize) -> Result<&mut Slot> {
        let count = self.slots.len();
        index
            .checked_sub(1)
            .and_then(|i| self.slots.get_mut(i))
            .ok_or_else(|| out_of_range(index, count))
    }

    /// Bind `value` at 1-based `index`. [`append_all`](Self::append_all)
    /// continues after the slot bound last.
    ///
    /// Binding NULL with [`oid::UNSPECIFIED`] keeps a type resolved earlier.
    pub fn bind(
        &mut self,
        index: usize,
        value: ParamValue,
        type_oid: Oid,
        format: FormatCode,
    ) -> Result<()> {
        let keep_type = matches!(value, ParamValue::Null) && type_oid == oid::UNSPECIFIED;
        let slot = self.slot_mut(index)?;
        slot.value = Some(value);
        slot.format = format;
        slot.direction = slot.direction.with(Direction::IN);
        slot.encoded = None;
        if keep_type && slot.oid != oid::UNSPECIFIED {
            return Ok(());
        }
        slot.oid = type_oid;
        self.pos = index;
        Ok(())
    }

    pub fn set_int2(&mut self, index: usize, value: i16) -> Result<()> {
        self.set_binary(index, &value.to_be_bytes(), oid::INT2)
    }

    pub fn set_int4(&mut self, index: usize, value: i32) -> Result<()> {
        self.set_binary(index, &value.to_be_bytes(), oid::INT4)
    }

    pub fn set_int8(&mut self, index: usize, value: i64) -> Result<()> {
        self.set_binary(index, &value.to_be_bytes(), oid::INT8)
    }

    pub fn set_float4(&mut self, index: usize, value: f32) -> Result<()> {
        self.set_binary(index, &value.to_be_bytes(), oid::FLOAT4)
    }

    pub fn set_float8(&mut self, index: usize, value: f64) -> Result<()> {
        self.set_binary(index, &value.to_be_bytes(), oid::FLOAT8)
    }

    pub fn set_bool(&mut self, index: usize, value: bool) -> Result<()> {
        self.set_binary(index, &[u8::from(value)], oid::BOOL)
    }

    /// Bind text with type `type_oid` (use [`oid::UNSPECIFIED`] to let the
    /// server infer it).
    pub fn set_text(&mut self, index: usize, value: &str, type_oid: Oid) -> Result<()> {
        self.bind(index, ParamValue::Text(value.to_string()), type_oid, FormatCode::Text)
    }

    pub fn set_bytea(&mut self, index: usize, value: &[u8]) -> Result<()> {
        self.set_binary(index, value, oid::BYTEA)
    }

    /// Bind an already binary-encoded value.
    pub fn set_binary(&mut self, index: usize, value: &[u8], type_oid: Oid) -> Result<()> {
        self.bind(index, ParamValue::Bytes(value.into()), type_oid, FormatCode::Binary)
    }

    /// Bind a value sent as its `Display` text.
    pub fn set_literal<T>(&mut self, index: usize, value: T, type_oid: Oid) -> Result<()>
    where
        T: fmt::Display + Send + Sync + 'static,
    {
        self.bind(index, ParamValue::Display(Arc::new(value)), type_oid, FormatCode::Text)
    }

    pub fn set_null(&mut self, index: usize, type_oid: Oid) -> Result<()> {
        self.bind(index, ParamValue::Null, type_oid, FormatCode::Text)
    }

    /// Mark the slot as a function out parameter.
    pub fn register_out_parameter(&mut self, index: usize) -> Result<()> {
        let slot = self.slot_mut(index)?;
        slot.direction = slot.direction.with(Direction::OUT);
        Ok(())
    }

    /// Record the type the server resolved for the slot.
    ///
    /// Only an unspecified or void type is overwritten. A different
    /// concrete type is a usage error.
    pub fn set_resolved_type(&mut self, index: usize, type_oid: Oid) -> Result<()> {
        let slot = self.slot_mut(index)?;
        match slot.oid {
            oid::UNSPECIFIED | oid::VOID => {
                slot.oid = type_oid;
                Ok(())
            }
            current if current == type_oid => Ok(()),
            current => Err(Error::InvalidUsage(format!(
                "Can't change resolved type for param: {index} from {current} to {type_oid}"
            ))),
        }
    }

    /// Whether the server still has to describe some parameter types.
    pub fn has_unresolved_types(&self) -> bool {
        self.slots.iter().any(|s| s.oid == oid::UNSPECIFIED)
    }

    /// Type OID of the slot.
    pub fn type_oid(&self, index: usize) -> Result<Oid> {
        Ok(self.slot(index)?.oid)
    }

    /// Type OIDs of all slots, in order.
    pub fn type_oids(&self) -> Vec<Oid> {
        self.slots.iter().map(|s| s.oid).collect()
    }

    /// Wire formats of all slots, in order.
    pub fn format_codes(&self) -> Vec<FormatCode> {
        self.slots.iter().map(|s| s.format).collect()
    }

    pub fn direction(&self, index: usize) -> Result<Direction> {
        Ok(self.slot(index)?.direction)
    }

    /// Whether the slot holds SQL NULL. Unset slots are not NULL.
    pub fn is_null(&self, index: usize) -> Result<bool> {
        Ok(matches!(self.slot(index)?.value, Some(ParamValue::Null)))
    }

    pub fn is_binary(&self, index: usize) -> Result<bool> {
        Ok(self.slot(index)?.format == FormatCode::Binary)
    }

    /// Slots whose value is sent to the server.
    pub fn in_parameter_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.direction != Direction::OUT)
            .count()
    }

    /// Slots returned by a function call. Every function has at least one.
    pub fn out_parameter_count(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.direction.is_out())
            .count()
            .max(1)
    }

    /// Fail if an in parameter was never bound.
    pub fn check_all_parameters_set(&self) -> Result<()> {
        match self
            .slots
            .iter()
            .position(|s| s.direction != Direction::OUT && s.value.is_none())
        {
            Some(i) => Err(Error::Config(format!(
                "No value specified for parameter {}.",
                i + 1
            ))),
            None => Ok(()),
        }
    }

    /// Give pure out parameters a void NULL so the call can be sent.
    pub fn convert_function_out_parameters(&mut self) {
        for slot in &mut self.slots {
            if slot.direction == Direction::OUT {
                slot.oid = oid::VOID;
                slot.value = Some(ParamValue::Null);
                slot.encoded = None;
            }
        }
    }

    /// Encoded bytes of the slot, `None` for NULL or unset.
    pub fn wire_value(&mut self, index: usize) -> Result<Option<&[u8]>> {
        let slot = self.slot_mut(index)?;
        if let Some(ParamValue::Display(display)) = &slot.value
            && slot.encoded.is_none()
        {
            slot.encoded = Some(display.to_string().into_bytes().into());
        }
        Ok(match &slot.value {
            None | Some(ParamValue::Null) => None,
            Some(ParamValue::Text(s)) => Some(s.as_bytes()),
            Some(ParamValue::Bytes(b)) => Some(&b[..]),
            Some(ParamValue::Display(_)) => slot.encoded.as_deref(),
        })
    }

    /// Encoded length of the slot, `None` for NULL or unset.
    pub fn wire_length(&mut self, index: usize) -> Result<Option<usize>> {
        Ok(self.wire_value(index)?.map(<[u8]>::len))
    }

    /// Append the slot as a Bind value: i32 length (-1 for NULL) then bytes.
    pub fn write_value(&mut self, index: usize, out: &mut Vec<u8>) -> Result<()> {
        match self.wire_value(index)? {
            Some(bytes) => {
                let len = i32::try_from(bytes.len()).map_err(|_| {
                    Error::InvalidUsage(format!("parameter {index} exceeds the wire size limit"))
                })?;
                out.extend_from_slice(&len.to_be_bytes());
                out.extend_from_slice(bytes);
            }
            None => out.extend_from_slice(&(-1_i32).to_be_bytes()),
        }
        Ok(())
    }

    /// SQL literal form of the slot for logging.
    pub fn render(&self, index: usize, standard_conforming_strings: bool) -> Result<String> {
        let slot = self.slot(index)?;
        Ok(render::render_value(
            slot.value.as_ref(),
            slot.oid,
            slot.format,
            standard_conforming_strings,
        ))
    }

    /// Independent copy of values, types and directions. Cached encodings
    /// are not carried over.
    pub fn copy(&self) -> Self {
        Self {
            slots: self
                .slots
                .iter()
                .map(|s| Slot {
                    encoded: None,
                    ..s.clone()
                })
                .collect(),
            pos: self.pos,
        }
    }

    /// Unset every slot.
    pub fn clear(&mut self) {
        self.slots.fill(Slot::default());
        self.pos = 0;
    }

    /// Copy the in parameters of `other` into the next free slots.
    pub fn append_all(&mut self, other: &ParameterList) -> Result<()> {
        let count = other.in_parameter_count();
        let end = self.pos + count;
        if end > self.slots.len() {
            return Err(Error::Config(format!(
                "Added parameters index out of range: {end}, number of columns: {}.",
                self.slots.len()
            )));
        }
        self.slots[self.pos..end].clone_from_slice(&other.slots[..count]);
        self.pos = end;
        Ok(())
    }
}

fn out_of_range(index: usize, count: usize) -> Error {
    Error::Config(format!(
        "The column index is out of range: {index}, number of columns: {count}."
    ))
}

impl fmt::Display for ParameterList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<[")?;
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(" ,")?;
            }
            let text = render::render_value(slot.value.as_ref(), slot.oid, slot.format, true);
            f.write_str(&text)?;
        }
        f.write_str("]>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_is_one_based_and_checked() {
        let mut params = ParameterList::new(2);
        assert!(params.set_int4(1, 1).is_ok());
        assert!(params.set_int4(2, 2).is_ok());
        let err = params.set_int4(3, 3).unwrap_err();
        assert!(err.to_string().contains("3, number of columns: 2"));
        assert!(params.set_int4(0, 0).is_err());
    }

    #[test]
    fn binary_numerics_render_as_decimal_text() {
        let mut params = ParameterList::new(5);
        params.set_int2(1, -7).unwrap();
        params.set_int4(2, 42).unwrap();
        params.set_int8(3, 9_000_000_000).unwrap();
        params.set_float4(4, 2.5).unwrap();
        params.set_float8(5, -0.125).unwrap();
        let rendered: Vec<String> = (1..=5).map(|i| params.render(i, true).unwrap()).collect();
        assert_eq!(
            rendered,
            [
                "('-7'::int2)",
                "('42'::int4)",
                "('9000000000'::int8)",
                "('2.5'::real)",
                "('-0.125'::double precision)",
            ]
        );
    }

    #[test]
    fn null_keeps_resolved_type() {
        let mut params = ParameterList::new(1);
        params.set_int4(1, 5).unwrap();
        params.set_null(1, oid::UNSPECIFIED).unwrap();
        assert_eq!(params.type_oid(1).unwrap(), oid::INT4);
        assert_eq!(params.render(1, true).unwrap(), "(NULL::int4)");

        params.set_null(1, oid::TEXT).unwrap();
        assert_eq!(params.type_oid(1).unwrap(), oid::TEXT);
    }

    #[test]
    fn resolved_type_only_upgrades() {
        let mut params = ParameterList::new(2);
        params.set_text(1, "x", oid::UNSPECIFIED).unwrap();
        assert!(params.has_unresolved_types());
        params.set_resolved_type(1, oid::TEXT).unwrap();
        params.set_resolved_type(2, oid::INT4).unwrap();
        assert!(!params.has_unresolved_types());
        params.set_resolved_type(1, oid::TEXT).unwrap();
        assert!(matches!(
            params.set_resolved_type(1, oid::INT4),
            Err(Error::InvalidUsage(_))
        ));
    }

    #[test]
    fn text_quoting_follows_escaping_mode() {
        let mut params = ParameterList::new(2);
        params.set_text(1, "O'Brien", oid::UNSPECIFIED).unwrap();
        params.set_text(2, "C:\\dir", oid::VARCHAR).unwrap();
        assert_eq!(params.render(1, true).unwrap(), "('O''Brien')");
        assert_eq!(params.render(2, true).unwrap(), "('C:\\dir'::varchar)");
        assert_eq!(params.render(2, false).unwrap(), "(E'C:\\\\dir'::varchar)");
    }

    #[test]
    fn display_values_are_encoded_once() {
        let mut params = ParameterList::new(2);
        params.set_literal(1, 12.5f64, oid::NUMERIC).unwrap();
        assert_eq!(params.wire_length(1).unwrap(), Some(4));
        assert_eq!(params.wire_value(1).unwrap(), Some(&b"12.5"[..]));
        assert_eq!(params.wire_length(2).unwrap(), None);

        let mut out = Vec::new();
        params.set_null(2, oid::INT4).unwrap();
        params.write_value(1, &mut out).unwrap();
        params.write_value(2, &mut out).unwrap();
        assert_eq!(out, [0, 0, 0, 4, b'1', b'2', b'.', b'5', 0xff, 0xff, 0xff, 0xff]);
    }

    #[test]
    fn copy_is_independent() {
        let mut params = ParameterList::new(1);
        params.set_int4(1, 1).unwrap();
        let copy = params.copy();
        params.set_text(1, "changed", oid::TEXT).unwrap();
        assert_eq!(copy.render(1, true).unwrap(), "('1'::int4)");
        assert_eq!(copy.type_oid(1).unwrap(), oid::INT4);
    }

    #[test]
    fn directions_and_counts() {
        let mut params = ParameterList::new(3);
        params.set_int4(1, 1).unwrap();
        params.register_out_parameter(2).unwrap();
        params.set_int4(3, 3).unwrap();
        params.register_out_parameter(3).unwrap();
        assert_eq!(params.direction(3).unwrap(), Direction::INOUT);
        assert_eq!(params.in_parameter_count(), 2);
        assert_eq!(params.out_parameter_count(), 2);
        params.check_all_parameters_set().unwrap();

        params.convert_function_out_parameters();
        assert_eq!(params.type_oid(2).unwrap(), oid::VOID);
        assert!(params.is_null(2).unwrap());

        let empty = ParameterList::new(1);
        assert_eq!(empty.out_parameter_count(), 1);
        assert!(empty.check_all_parameters_set().is_err());
    }

    #[test]
    fn append_all_continues_after_the_last_bound_slot() {
        let mut tail = ParameterList::new(1);
        tail.set_text(1, "t", oid::TEXT).unwrap();

        let mut all = ParameterList::new(3);
        all.set_int4(2, 2).unwrap();
        all.append_all(&tail).unwrap();
        assert_eq!(all.to_string(), "<[? ,('2'::int4) ,('t'::text)]>");
        assert!(all.append_all(&tail).is_err());

        // a NULL that keeps its earlier type leaves the position alone
        let mut all = ParameterList::new(3);
        all.set_int4(1, 1).unwrap();
        all.set_int4(2, 2).unwrap();
        all.set_null(1, oid::UNSPECIFIED).unwrap();
        all.append_all(&tail).unwrap();
        assert_eq!(all.to_string(), "<[(NULL::int4) ,('2'::int4) ,('t'::text)]>");
    }

    #[test]
    fn append_all_fills_from_the_front() {
        let mut a = ParameterList::new(1);
        a.set_int4(1, 10).unwrap();
        let mut b = ParameterList::new(1);
        b.set_text(1, "x", oid::TEXT).unwrap();

        let mut all = ParameterList::new(2);
        all.append_all(&a).unwrap();
        all.append_all(&b).unwrap();
        assert_eq!(all.to_string(), "<[('10'::int4) ,('x'::text)]>");
        assert!(all.append_all(&a).is_err());

        all.clear();
        assert_eq!(all.to_string(), "<[? ,?]>");
        all.append_all(&a).unwrap();
    }
}
