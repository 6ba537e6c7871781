//! SQL literal rendering of bound parameters, for logs and diagnostics.

use core::fmt::Write as _;

use crate::protocol::types::{FormatCode, Oid, oid};

use super::ParamValue;

// NUMERIC sign constants
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

/// Render one slot. `value` is `None` when nothing was bound.
pub(super) fn render_value(
    value: Option<&ParamValue>,
    type_oid: Oid,
    format: FormatCode,
    standard_conforming_strings: bool,
) -> String {
    let Some(value) = value else {
        return "?".to_string();
    };

    match value {
        ParamValue::Null => match oid::type_name(type_oid) {
            Some(name) if type_oid != oid::UNSPECIFIED => format!("(NULL::{name})"),
            _ => "(NULL)".to_string(),
        },
        ParamValue::Bytes(bytes) if type_oid == oid::BYTEA => {
            let mut text = String::with_capacity(2 + bytes.len() * 2);
            text.push_str("\\x");
            for b in bytes.iter() {
                let _ = write!(text, "{b:02x}");
            }
            quote(&text, Some("bytea"), standard_conforming_strings)
        }
        ParamValue::Bytes(bytes) if format == FormatCode::Binary => match render_binary(bytes, type_oid) {
            Some((text, type_name)) => quote(&text, Some(type_name), standard_conforming_strings),
            None => "?".to_string(),
        },
        ParamValue::Bytes(bytes) => {
            let text = String::from_utf8_lossy(bytes);
            quote(&text, cast_name(type_oid), standard_conforming_strings)
        }
        ParamValue::Text(text) => quote(text, cast_name(type_oid), standard_conforming_strings),
        ParamValue::Display(display) => quote(
            &display.to_string(),
            cast_name(type_oid),
            standard_conforming_strings,
        ),
    }
}

fn cast_name(type_oid: Oid) -> Option<&'static str> {
    match type_oid {
        oid::UNSPECIFIED => None,
        other => oid::type_name(other),
    }
}

/// Decode a binary-format value into its text and the type it is cast to.
/// `None` for types without a decoder or malformed input.
fn render_binary(bytes: &[u8], type_oid: Oid) -> Option<(String, &'static str)> {
    Some(match type_oid {
        oid::INT2 => (i16::from_be_bytes(bytes.try_into().ok()?).to_string(), "int2"),
        oid::INT4 => (i32::from_be_bytes(bytes.try_into().ok()?).to_string(), "int4"),
        oid::INT8 => (i64::from_be_bytes(bytes.try_into().ok()?).to_string(), "int8"),
        oid::FLOAT4 => {
            let v = f32::from_be_bytes(bytes.try_into().ok()?);
            (float_text(f64::from(v), v.to_string()), "real")
        }
        oid::FLOAT8 => {
            let v = f64::from_be_bytes(bytes.try_into().ok()?);
            (float_text(v, v.to_string()), "double precision")
        }
        oid::BOOL => match bytes {
            [0] => ("false".to_string(), "boolean"),
            [_] => ("true".to_string(), "boolean"),
            _ => return None,
        },
        oid::NUMERIC => (numeric_to_string(bytes)?, "numeric"),
        oid::UUID => {
            let b: [u8; 16] = bytes.try_into().ok()?;
            let mut text = String::with_capacity(36);
            for (i, byte) in b.iter().enumerate() {
                if matches!(i, 4 | 6 | 8 | 10) {
                    text.push('-');
                }
                let _ = write!(text, "{byte:02x}");
            }
            (text, "uuid")
        }
        _ => return None,
    })
}

// Server spelling of the non-finite values
fn float_text(value: f64, text: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "Infinity".to_string()
    } else if value == f64::NEG_INFINITY {
        "-Infinity".to_string()
    } else {
        text
    }
}

/// Quote `text` as a parenthesized string literal, with a cast when
/// `type_name` is given: `('1'::int4)`.
///
/// Without standard conforming strings, backslashes are doubled and the
/// literal carries the `E` prefix.
pub fn quote(text: &str, type_name: Option<&str>, standard_conforming_strings: bool) -> String {
    let mut literal = String::with_capacity(text.len() + 16);
    if !standard_conforming_strings && text.contains('\\') {
        literal.push('E');
    }
    literal.push('\'');
    for ch in text.chars() {
        match ch {
            '\'' => literal.push_str("''"),
            '\\' if !standard_conforming_strings => literal.push_str("\\\\"),
            _ => literal.push(ch),
        }
    }
    literal.push('\'');

    match type_name {
        Some(name) => format!("({literal}::{name})"),
        None => format!("({literal})"),
    }
}

/// Converts PostgreSQL NUMERIC binary encoding to its decimal text.
///
/// Binary format:
/// - 2 bytes: ndigits (number of base-10000 digits)
/// - 2 bytes: weight (position of first digit relative to decimal point)
/// - 2 bytes: sign (0x0000=positive, 0x4000=negative, 0xC000=NaN, 0xD000=+Inf, 0xF000=-Inf)
/// - 2 bytes: dscale (display scale)
/// - ndigits * 2 bytes: digits (each 0-9999 in base 10000)
pub fn numeric_to_string(bytes: &[u8]) -> Option<String> {
    let header = bytes.get(..8)?;
    let ndigits = usize::try_from(i16::from_be_bytes([header[0], header[1]])).ok()?;
    let weight = i32::from(i16::from_be_bytes([header[2], header[3]]));
    let sign = u16::from_be_bytes([header[4], header[5]]);
    let dscale = i32::from(u16::from_be_bytes([header[6], header[7]]));

    match sign {
        NUMERIC_NAN => return Some("NaN".to_string()),
        NUMERIC_PINF => return Some("Infinity".to_string()),
        NUMERIC_NINF => return Some("-Infinity".to_string()),
        _ => {}
    }

    if ndigits == 0 {
        let mut s = "0".to_string();
        if dscale > 0 {
            s.push('.');
            for _ in 0..dscale {
                s.push('0');
            }
        }
        return Some(s);
    }

    let digits: Vec<i16> = bytes
        .get(8..8 + ndigits * 2)?
        .chunks_exact(2)
        .map(|c| i16::from_be_bytes([c[0], c[1]]))
        .collect();

    let mut result = String::new();
    if sign == NUMERIC_NEG {
        result.push('-');
    }

    // Each base-10000 digit carries 4 decimal digits
    let int_digits = (weight + 1) * 4;
    let mut frac_written = 0;
    let push_frac = |result: &mut String, group: &str, written: &mut i32| {
        for c in group.chars() {
            if *written < dscale {
                result.push(c);
                *written += 1;
            }
        }
    };

    if int_digits <= 0 {
        if dscale == 0 {
            return Some("0".to_string());
        }
        result.push_str("0.");
        let leading = "0".repeat(usize::try_from(-int_digits).unwrap_or(0));
        push_frac(&mut result, &leading, &mut frac_written);
        for d in &digits {
            push_frac(&mut result, &format!("{d:04}"), &mut frac_written);
        }
    } else {
        let int_groups = usize::try_from(weight).unwrap_or(0);
        result.push_str(&digits[0].to_string());
        for idx in 1..=int_groups {
            match digits.get(idx) {
                Some(d) => {
                    let _ = write!(result, "{d:04}");
                }
                None => result.push_str("0000"),
            }
        }
        if dscale > 0 {
            result.push('.');
            for d in digits.iter().skip(int_groups + 1) {
                push_frac(&mut result, &format!("{d:04}"), &mut frac_written);
            }
        }
    }

    while frac_written < dscale {
        result.push('0');
        frac_written += 1;
    }

    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_numeric(ndigits: i16, weight: i16, sign: u16, dscale: u16, digits: &[i16]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&ndigits.to_be_bytes());
        buf.extend_from_slice(&weight.to_be_bytes());
        buf.extend_from_slice(&sign.to_be_bytes());
        buf.extend_from_slice(&dscale.to_be_bytes());
        for &d in digits {
            buf.extend_from_slice(&d.to_be_bytes());
        }
        buf
    }

    #[test]
    fn numeric_text() {
        let cases: &[(Vec<u8>, &str)] = &[
            (make_numeric(0, 0, 0, 0, &[]), "0"),
            (make_numeric(0, 0, 0, 2, &[]), "0.00"),
            (make_numeric(2, 1, 0, 0, &[1, 2345]), "12345"),
            (make_numeric(2, 0, 0, 2, &[123, 4500]), "123.45"),
            (make_numeric(2, 0, NUMERIC_NEG, 2, &[123, 4500]), "-123.45"),
            (make_numeric(1, -1, 0, 4, &[1]), "0.0001"),
            (make_numeric(1, 2, 0, 0, &[7]), "700000000"),
            (make_numeric(0, 0, NUMERIC_NAN, 0, &[]), "NaN"),
        ];
        for (bytes, expected) in cases {
            assert_eq!(numeric_to_string(bytes).as_deref(), Some(*expected));
        }
        assert_eq!(numeric_to_string(&[0, 1]), None);
        assert_eq!(numeric_to_string(&make_numeric(2, 0, 0, 0, &[1])), None);
    }

    #[test]
    fn quoting_modes() {
        assert_eq!(quote("it's", None, true), "('it''s')");
        assert_eq!(quote("a\\b", None, true), "('a\\b')");
        assert_eq!(quote("a\\b", None, false), "(E'a\\\\b')");
        assert_eq!(quote("plain", Some("text"), false), "('plain'::text)");
    }

    #[test]
    fn float_specials() {
        let render = |bytes: &[u8], type_oid| {
            render_value(
                Some(&ParamValue::Bytes(bytes.into())),
                type_oid,
                FormatCode::Binary,
                true,
            )
        };
        assert_eq!(render(&f32::NAN.to_be_bytes(), oid::FLOAT4), "('NaN'::real)");
        assert_eq!(
            render(&f64::NEG_INFINITY.to_be_bytes(), oid::FLOAT8),
            "('-Infinity'::double precision)"
        );
        assert_eq!(render(&1.5f32.to_be_bytes(), oid::FLOAT4), "('1.5'::real)");
        assert_eq!(render(&[1, 2, 3], oid::INT4), "?");
    }

    #[test]
    fn uuid_is_hyphenated() {
        let bytes: Vec<u8> = (0u8..16).collect();
        assert_eq!(
            render_binary(&bytes, oid::UUID),
            Some(("00010203-0405-0607-0809-0a0b0c0d0e0f".to_string(), "uuid"))
        );
    }
}
