//! Telemetry decoding.
//!
//! [`decode`] runs one layout table over a frame. Anything that cannot be read
//! is left out of the record and reported alongside it, so a single bad field
//! never costs the rest of the frame.

use tracing::debug;

use crate::error::FrameError;
use crate::layout::{self, Endian, Field, FieldKind, Layout, SegmentLayout, Variant};
use crate::protocol::{daly, jk, Protocol};
use crate::record::{Record, Value};

/// A total voltage below this many volts is treated as a firmware glitch and
/// replaced by the sum of the cell voltages.
pub const TOTAL_VOLTAGE_PLAUSIBLE_MIN: f64 = 1.0;

/// The record decoded from one frame plus anything that was skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub command: u8,
    pub record: Record,
    pub issues: Vec<FrameError>,
}

/// Decode `frame` with the layout registered for `command`.
///
/// A frame without a layout still produces a record holding its raw bytes as
/// hex under `unknown.<code>`, along with [`FrameError::UnknownCommandCode`].
pub fn decode(protocol: Protocol, variant: Variant, command: u8, frame: &[u8]) -> Decoded {
    let mut decoded = Decoded { command, record: Record::new(), issues: Vec::new() };

    let Some(layout) = layout::lookup(protocol, variant, command) else {
        let code = format!("{command:02x}");
        let raw = Value::Text(hex::encode(frame));
        decoded.record.insert(&["unknown", code.as_str(), "raw_hex"], raw);
        decoded.issues.push(FrameError::UnknownCommandCode { command });
        return decoded;
    };

    apply(layout, variant, frame, &mut decoded.record, &mut decoded.issues);
    derive(protocol, command, &mut decoded.record);
    decoded
}

/// Decode one frame of a multi-frame table into its index and values.
pub fn decode_segment(
    segment: &SegmentLayout,
    frame: &[u8],
) -> Result<(u8, Vec<Value>), FrameError> {
    let index = *frame.get(segment.index_offset).ok_or(FrameError::FieldDecodeOverflow {
        field: format!("{}.index", segment.name),
        end: segment.index_offset + 1,
        frame_len: frame.len(),
    })?;
    match decode_field(&segment.values, segment.values.offset, frame)? {
        Value::List(values) => Ok((index, values)),
        value => Ok((index, vec![value])),
    }
}

/// Apply every entry of `layout` to `frame`, writing into `record`.
pub fn apply(
    layout: &Layout,
    variant: Variant,
    frame: &[u8],
    record: &mut Record,
    issues: &mut Vec<FrameError>,
) {
    for field in layout.fields {
        let offset =
            if layout.variant_shifted { variant.resolve(field.offset) } else { field.offset };
        match decode_field(field, offset, frame) {
            Ok(value) => record.insert(field.path, value),
            Err(err) => {
                debug!(layout = layout.name, %err, "field omitted");
                issues.push(err);
            }
        }
    }
}

fn decode_field(field: &Field, offset: usize, frame: &[u8]) -> Result<Value, FrameError> {
    let end = offset + field.span();
    if end > frame.len() {
        return Err(FrameError::FieldDecodeOverflow {
            field: field.name(),
            end,
            frame_len: frame.len(),
        });
    }

    match field.repeat {
        None => Ok(decode_one(field, &frame[offset..end])),
        Some(_) => {
            let values = frame[offset..end]
                .chunks(field.kind.width())
                .map(|bytes| decode_one(field, bytes))
                .collect();
            Ok(Value::List(values))
        }
    }
}

fn decode_one(field: &Field, bytes: &[u8]) -> Value {
    let raw: i64 = match field.kind {
        FieldKind::U8 => i64::from(bytes[0]),
        FieldKind::U16(endian) => {
            let b = [bytes[0], bytes[1]];
            i64::from(match endian {
                Endian::Big => u16::from_be_bytes(b),
                Endian::Little => u16::from_le_bytes(b),
            })
        }
        FieldKind::U32(endian) => {
            let b = [bytes[0], bytes[1], bytes[2], bytes[3]];
            i64::from(match endian {
                Endian::Big => u32::from_be_bytes(b),
                Endian::Little => u32::from_le_bytes(b),
            })
        }
        FieldKind::I32Le => i64::from(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])),
        FieldKind::Text(_) => return Value::Text(decode_text(bytes)),
        FieldKind::Bool => return Value::Bool(bytes[0] != 0),
        FieldKind::BitU16Le(bit) => {
            let word = u16::from_le_bytes([bytes[0], bytes[1]]);
            return Value::Bool(word & (1 << bit) != 0);
        }
        FieldKind::Hex(_) => return Value::Text(hex::encode(bytes)),
    };

    if field.zero_is_absent && raw == 0 {
        return Value::Null;
    }
    let biased = raw + field.bias;
    match field.scale {
        Some(scale) => Value::Float(round3(biased as f64 * scale)),
        None => Value::Int(biased),
    }
}

/// Best-effort UTF-8 with trailing padding trimmed. Undecodable text is empty.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.trim_end_matches([' ', '\t', '\n', '\r', '\0']).to_string(),
        Err(_) => String::new(),
    }
}

/// Convenience values computed from decoded fields.
fn derive(protocol: Protocol, command: u8, record: &mut Record) {
    match (protocol, command) {
        (Protocol::Jk, jk::RECORD_CELL_INFO) => {
            derive_power(record);
            compensate_total_voltage(record);
            derive_error_bitmask(record);
        }
        (Protocol::Daly, daly::CMD_CELL_MINMAX) => {
            let max = record.get_f64(&["cell_minmax", "cell_max_v"]);
            let min = record.get_f64(&["cell_minmax", "cell_min_v"]);
            if let (Some(max), Some(min)) = (max, min) {
                record.insert(&["cell_minmax", "cell_delta_v"], Value::Float(round3(max - min)));
            }
        }
        _ => {}
    }
}

fn derive_power(record: &mut Record) {
    let current = record.get_f64(&["cell_info", "current"]);
    let total = record.get_f64(&["cell_info", "total_voltage"]);
    if let (Some(current), Some(total)) = (current, total) {
        record.insert(&["cell_info", "power"], Value::Float(current * total));
    }
}

/// Some firmware reports a zero pack voltage while the cell voltages are fine.
pub fn compensate_total_voltage(record: &mut Record) {
    let sum: f64 = match record.get(&["cell_info", "voltages"]).and_then(Value::as_list) {
        Some(voltages) => voltages.iter().filter_map(Value::as_f64).filter(|v| *v > 0.0).sum(),
        None => return,
    };
    if sum <= 0.0 {
        return;
    }
    let total = record.get_f64(&["cell_info", "total_voltage"]).unwrap_or(0.0);
    if total < TOTAL_VOLTAGE_PLAUSIBLE_MIN {
        debug!(reported = total, derived = sum, "replacing implausible total voltage");
        record.insert(&["cell_info", "total_voltage"], Value::Float(round3(sum)));
    }
}

fn derive_error_bitmask(record: &mut Record) {
    if let Some(mask) = record.get(&["cell_info", "error_bitmask"]).and_then(Value::as_i64) {
        record.insert(&["cell_info", "error_bitmask_16"], Value::Text(format!("{mask:#x}")));
        record.insert(&["cell_info", "error_bitmask_2"], Value::Text(format!("{mask:016b}")));
    }
}

pub(crate) fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
