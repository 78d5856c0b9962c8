//! The two BMS wire dialects and their constants.
//!
//! Daly frames are 13 bytes:
//!
//! Start Byte | End Byte | Meaning
//! 0          | 0        | Start byte `0xA5`
//! 1          | 1        | Address (`0x40` host, `0x01` BMS)
//! 2          | 2        | Command code
//! 3          | 3        | Data length, always `0x08`
//! 4          | 11       | Payload
//! 12         | 12       | Sum of bytes 0-11, modulo 256
//!
//! JK responses are at least 300 bytes and begin with `55 AA EB 90`, followed by
//! the record type at byte 4. Byte 299 holds the low byte of the sum of bytes
//! 0-298. JK requests are 20 bytes and begin with `AA 55 90 EB`.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A BMS wire dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Compact 13-byte frames with a single start byte.
    Daly,
    /// Extended 300-byte frames with a 4-byte marker.
    Jk,
}

impl Protocol {
    /// Fixed length of a frame received from the BMS.
    pub const fn frame_len(self) -> usize {
        match self {
            Protocol::Daly => daly::FRAME_LEN,
            Protocol::Jk => jk::FRAME_LEN,
        }
    }

    /// Fixed length of a frame sent to the BMS.
    pub const fn request_len(self) -> usize {
        match self {
            Protocol::Daly => daly::FRAME_LEN,
            Protocol::Jk => jk::REQUEST_LEN,
        }
    }

    /// Position of the command code inside a received frame.
    pub const fn command_offset(self) -> usize {
        match self {
            Protocol::Daly => 2,
            Protocol::Jk => 4,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Daly => f.write_str("daly"),
            Protocol::Jk => f.write_str("jk"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daly" | "a" => Ok(Protocol::Daly),
            "jk" | "jkbms" | "b" => Ok(Protocol::Jk),
            _ => Err(crate::Error::Config { key: "protocol", value: s.to_string() }),
        }
    }
}

pub mod daly {
    pub const START_BYTE: u8 = 0xA5;
    pub const HOST_ADDRESS: u8 = 0x40;
    pub const DATA_LENGTH: u8 = 0x08;
    pub const FRAME_LEN: usize = 13;
    pub const PAYLOAD_OFFSET: usize = 4;
    pub const PAYLOAD_LEN: usize = 8;

    /// Above this size the buffer keeps only the newest [`RETAINED_TAIL`] bytes.
    pub const BUFFER_CAP: usize = 4096;
    pub const RETAINED_TAIL: usize = 1024;

    pub const CMD_PACK: u8 = 0x90;
    pub const CMD_CELL_MINMAX: u8 = 0x91;
    pub const CMD_TEMP_MINMAX: u8 = 0x92;
    pub const CMD_MOS: u8 = 0x93;
    pub const CMD_PACK_INFO: u8 = 0x94;
    pub const CMD_CELL_VOLTAGES: u8 = 0x95;
    pub const CMD_TEMPERATURES: u8 = 0x96;
    pub const CMD_BALANCE: u8 = 0x97;
    pub const CMD_FAULTS: u8 = 0x98;

    /// Request order for one full read. Pack info goes first so the cell and
    /// temperature counts are known before the segment polls finish.
    pub const POLL_ORDER: [u8; 9] = [
        CMD_PACK_INFO,
        CMD_PACK,
        CMD_CELL_MINMAX,
        CMD_TEMP_MINMAX,
        CMD_MOS,
        CMD_CELL_VOLTAGES,
        CMD_TEMPERATURES,
        CMD_BALANCE,
        CMD_FAULTS,
    ];
}

pub mod jk {
    pub const RESPONSE_MARKER: [u8; 4] = [0x55, 0xAA, 0xEB, 0x90];
    pub const REQUEST_MARKER: [u8; 4] = [0xAA, 0x55, 0x90, 0xEB];
    pub const FRAME_LEN: usize = 300;
    /// A buffer larger than this without a valid frame is stale.
    pub const MAX_FRAME_LEN: usize = 320;
    pub const REQUEST_LEN: usize = 20;
    pub const REQUEST_PAYLOAD_OFFSET: usize = 6;
    pub const REQUEST_PAYLOAD_LEN: usize = 13;

    /// Non-zero at this offset marks the 32-cell layout.
    pub const VARIANT_FLAG_OFFSET: usize = 287;
    /// Bytes required before the variant flag can be trusted.
    pub const VARIANT_MIN_LEN: usize = 292;

    pub const CMD_CELL_INFO: u8 = 0x96;
    pub const CMD_DEVICE_INFO: u8 = 0x97;

    pub const RECORD_SETTINGS: u8 = 0x01;
    pub const RECORD_CELL_INFO: u8 = 0x02;
    pub const RECORD_DEVICE_INFO: u8 = 0x03;

    pub const REGISTER_CELL_OVP: u8 = 0x04;
    pub const REGISTER_CELL_OVPR: u8 = 0x05;
    pub const CONTROL_REGISTERS: [u8; 4] = [0x1D, 0x1E, 0x1F, 0x40];

    /// Volts are written as millivolts.
    pub const VOLTAGE_WRITE_SCALE: f64 = 1000.0;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_protocol_names() {
        assert_eq!("daly".parse::<Protocol>().unwrap(), Protocol::Daly);
        assert_eq!(" JK ".parse::<Protocol>().unwrap(), Protocol::Jk);
        assert!("modbus".parse::<Protocol>().is_err());
    }

    #[test]
    fn lengths() {
        assert_eq!(Protocol::Daly.frame_len(), 13);
        assert_eq!(Protocol::Jk.frame_len(), 300);
        assert_eq!(Protocol::Jk.request_len(), 20);
    }
}
