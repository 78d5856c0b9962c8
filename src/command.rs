//! Outbound command frames.
//!
//! Every frame is written to the BMS without requesting a response; replies
//! arrive on the notify characteristic.

use crate::checksum::checksum;
use crate::error::{Error, Result};
use crate::protocol::{daly, jk, Protocol};

/// A request frame with a zero payload.
pub fn build_request(protocol: Protocol, command: u8) -> Vec<u8> {
    let mut frame = header(protocol, command);
    seal(protocol, &mut frame);
    frame
}

/// A frame carrying `payload`. Unused payload bytes stay zero.
///
/// For JK the payload length is also written to byte 5.
pub fn build_frame(protocol: Protocol, command: u8, payload: &[u8]) -> Result<Vec<u8>> {
    let (offset, max) = match protocol {
        Protocol::Daly => (daly::PAYLOAD_OFFSET, daly::PAYLOAD_LEN),
        Protocol::Jk => (jk::REQUEST_PAYLOAD_OFFSET, jk::REQUEST_PAYLOAD_LEN),
    };
    if payload.len() > max {
        return Err(Error::PayloadTooLong { protocol, len: payload.len(), max });
    }

    let mut frame = header(protocol, command);
    if protocol == Protocol::Jk {
        frame[5] = payload.len() as u8;
    }
    frame[offset..offset + payload.len()].copy_from_slice(payload);
    seal(protocol, &mut frame);
    Ok(frame)
}

/// A JK register write of a physical value, e.g. a voltage in V with scale 1000.
pub fn build_write(register: u8, value: f64, scale: f64) -> Vec<u8> {
    let mut frame = header(Protocol::Jk, register);
    frame[5] = 4;
    let payload = jk::REQUEST_PAYLOAD_OFFSET..jk::REQUEST_PAYLOAD_OFFSET + 4;
    frame[payload].copy_from_slice(&encode_scaled(value, scale));
    seal(Protocol::Jk, &mut frame);
    frame
}

/// `value * scale`, rounded and clamped to the `u32` range, little-endian.
pub fn encode_scaled(value: f64, scale: f64) -> [u8; 4] {
    let scaled = (value * scale).round();
    let clamped = if scaled.is_nan() { 0.0 } else { scaled.clamp(0.0, f64::from(u32::MAX)) };
    (clamped as u32).to_le_bytes()
}

/// Set the cell over-voltage protection threshold in V.
pub fn set_cell_ovp(volts: f64) -> Vec<u8> {
    build_write(jk::REGISTER_CELL_OVP, volts, jk::VOLTAGE_WRITE_SCALE)
}

/// Set the cell over-voltage recovery threshold in V.
pub fn set_cell_ovpr(volts: f64) -> Vec<u8> {
    build_write(jk::REGISTER_CELL_OVPR, volts, jk::VOLTAGE_WRITE_SCALE)
}

/// Frames that force the BMS to recalibrate its state of charge to 100%.
///
/// Recovery is lowered to 100 mV and protection to 50 mV below the highest
/// cell, in that order. The caller restores the real thresholds afterwards.
pub fn soc_reset(max_cell_volts: f64) -> [Vec<u8>; 2] {
    let ovpr = round3(max_cell_volts - 0.10);
    let ovp = round3(max_cell_volts - 0.05);
    [set_cell_ovpr(ovpr), set_cell_ovp(ovp)]
}

/// Toggle the control switch registers. Experimental: the register meanings
/// are not documented by the vendor.
pub fn control_switches(on: bool) -> Vec<Vec<u8>> {
    let value: [u8; 4] = if on { [0x01, 0x00, 0x00, 0x00] } else { [0x00; 4] };
    jk::CONTROL_REGISTERS
        .iter()
        .map(|register| {
            let mut frame = header(Protocol::Jk, *register);
            frame[5] = 4;
            let payload = jk::REQUEST_PAYLOAD_OFFSET..jk::REQUEST_PAYLOAD_OFFSET + 4;
            frame[payload].copy_from_slice(&value);
            seal(Protocol::Jk, &mut frame);
            frame
        })
        .collect()
}

fn header(protocol: Protocol, command: u8) -> Vec<u8> {
    let mut frame = vec![0; protocol.request_len()];
    match protocol {
        Protocol::Daly => {
            frame[0] = daly::START_BYTE;
            frame[1] = daly::HOST_ADDRESS;
            frame[2] = command;
            frame[3] = daly::DATA_LENGTH;
        }
        Protocol::Jk => {
            frame[..4].copy_from_slice(&jk::REQUEST_MARKER);
            frame[4] = command;
        }
    }
    frame
}

fn seal(protocol: Protocol, frame: &mut [u8]) {
    let last = frame.len() - 1;
    frame[last] = checksum(protocol, &frame[..last]);
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
