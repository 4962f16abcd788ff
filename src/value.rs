//! Forward/reverse decoding between raw wire bytes and typed point values.

use crate::arithmetic;
use crate::constants::{MessageType, PointType};
use crate::error::TransformError;
use crate::repository::PointDef;
use byteorder::{BigEndian, ByteOrder};
use tracing::warn;

/// A decoded point value, ready to publish.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Numeric(f64),
    Text(String),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Numeric(n) => Some(*n),
            Value::Text(_) => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Numeric(n) => write!(f, "{n}"),
            Value::Text(s) => write!(f, "{s}"),
        }
    }
}

/// Interpret a structure (type-3) payload as text.
///
/// Bytes in `[0x20, 0x7E]` are kept as-is; `0x00`/`0xFF` render as a space
/// when the rest of the payload is printable. If any other byte appears,
/// fall back to a decimal-joined representation of the raw bytes rather
/// than guessing at an encoding.
fn decode_structure_text(payload: &[u8]) -> String {
    let printable_enough = payload
        .iter()
        .all(|&b| (0x20..=0x7E).contains(&b) || b == 0x00 || b == 0xFF);

    if printable_enough {
        let text: String = payload
            .iter()
            .map(|&b| match b {
                0x20..=0x7E => b as char,
                _ => ' ',
            })
            .collect();
        text.trim().to_string()
    } else {
        payload
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

fn decode_raw_integer(payload: &[u8], signed: bool) -> i64 {
    match payload.len() {
        1 => {
            if signed {
                payload[0] as i8 as i64
            } else {
                payload[0] as i64
            }
        }
        2 => {
            let u = BigEndian::read_u16(payload);
            if signed {
                u as i16 as i64
            } else {
                u as i64
            }
        }
        4 => {
            let u = BigEndian::read_u32(payload);
            if signed {
                u as i32 as i64
            } else {
                u as i64
            }
        }
        _ => {
            // Defensive: any other width is decoded as an unsigned big-endian
            // integer truncated to 64 bits.
            let mut acc: i64 = 0;
            for &b in payload {
                acc = (acc << 8) | b as i64;
            }
            acc
        }
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Forward-transform a raw payload into a published value, per §4.2.
pub fn forward(point: &PointDef, message_type: MessageType, payload: &[u8]) -> Value {
    if point.point_type == PointType::Str || message_type == MessageType::Structure {
        return Value::Text(decode_structure_text(payload));
    }

    let raw = decode_raw_integer(payload, point.signed);

    if point.enum_map.is_some() {
        let map = point.enum_map.as_ref().unwrap();
        return match map.get(&raw) {
            Some(label) => Value::Text(label.clone()),
            None => Value::Text(format!("Unknown enum value: {raw}")),
        };
    }

    match arithmetic::evaluate(&point.arithmetic, raw as f64) {
        Ok(v) => Value::Numeric(round3(v)),
        Err(err) => {
            warn!(point = %point.name, %err, "arithmetic evaluation failed, using raw value");
            Value::Numeric(raw as f64)
        }
    }
}

/// Reverse-transform a textual command value into the raw integer that
/// should be encoded onto the wire, per §4.2.
pub fn reverse(point: &PointDef, text: &str) -> Result<i64, TransformError> {
    if point.enum_map.is_some() {
        return point
            .enum_reverse_lookup(text)
            .ok_or_else(|| TransformError::UnknownEnumLabel {
                point: point.name.clone(),
                label: text.to_string(),
            });
    }

    let numeric: f64 = text
        .trim()
        .parse()
        .map_err(|_| TransformError::NotNumeric(text.to_string()))?;

    let evaluated = arithmetic::evaluate(&point.reverse_arithmetic, numeric)?;
    Ok(evaluated.trunc() as i64)
}

/// Encode a raw integer into a big-endian byte payload of the given width.
pub fn encode_raw(raw: i64, width: usize) -> Vec<u8> {
    match width {
        1 => vec![raw as i8 as u8],
        2 => (raw as i16).to_be_bytes().to_vec(),
        4 => (raw as i32).to_be_bytes().to_vec(),
        _ => (raw as i32).to_be_bytes().to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn point(arithmetic: &str, reverse_arithmetic: &str, signed: bool) -> PointDef {
        PointDef {
            name: "TEST".to_string(),
            address: 0x1234,
            point_type: PointType::Var,
            signed,
            unit: None,
            arithmetic: arithmetic.to_string(),
            reverse_arithmetic: reverse_arithmetic.to_string(),
            enum_map: None,
            hass_opts: None,
        }
    }

    #[test]
    fn s3_comp_temp_scales_by_ten() {
        let p = point("value/10", "value*10", true);
        let v = forward(&p, MessageType::Var, &[0x01, 0x2C]);
        assert_eq!(v, Value::Numeric(30.0));
    }

    #[test]
    fn numeric_roundtrip_is_stable() {
        let p = point("value/10", "value*10", true);
        for raw in [-500i64, 0, 42, 1234] {
            let bytes = encode_raw(raw, 2);
            let v = forward(&p, MessageType::Var, &bytes);
            let text = v.to_string();
            let back = reverse(&p, &text).unwrap();
            assert_eq!(back, raw);
        }
    }

    #[test]
    fn enum_bijection() {
        let mut map = HashMap::new();
        map.insert(0, "OFF".to_string());
        map.insert(1, "ON".to_string());
        let mut p = point("", "", false);
        p.enum_map = Some(map);
        for raw in [0i64, 1] {
            let v = forward(&p, MessageType::Enum, &[raw as u8]);
            let back = reverse(&p, &v.to_string()).unwrap();
            assert_eq!(back, raw);
        }
    }

    #[test]
    fn unknown_enum_value_yields_synthetic_text() {
        let mut map = HashMap::new();
        map.insert(0, "OFF".to_string());
        let mut p = point("", "", false);
        p.enum_map = Some(map);
        let v = forward(&p, MessageType::Enum, &[9]);
        assert_eq!(v, Value::Text("Unknown enum value: 9".to_string()));
    }

    #[test]
    fn arithmetic_failure_falls_back_to_raw() {
        let p = point("value / 0", "value", false);
        let v = forward(&p, MessageType::Var, &[0, 5]);
        assert_eq!(v, Value::Numeric(5.0));
    }

    #[test]
    fn structure_payload_renders_printable_bytes_as_text() {
        let p = point("", "", false);
        let mut p = p;
        p.point_type = PointType::Str;
        let v = forward(&p, MessageType::Structure, b"V4.12 ");
        assert_eq!(v, Value::Text("V4.12".to_string()));
    }

    #[test]
    fn structure_payload_falls_back_to_decimal_join_when_unprintable() {
        let p = {
            let mut p = point("", "", false);
            p.point_type = PointType::Str;
            p
        };
        let v = forward(&p, MessageType::Structure, &[0x01, 0x02]);
        assert_eq!(v, Value::Text("1,2".to_string()));
    }
}
