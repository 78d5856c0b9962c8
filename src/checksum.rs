//! Checksums and frame validation.

use crate::error::FrameError;
use crate::protocol::{daly, jk, Protocol};

/// Compute the checksum byte for `data`.
///
/// Both dialects use a plain byte sum. JK accumulates in 16 bits and keeps the
/// low byte, which is the same value as a wrapping 8-bit sum.
pub fn checksum(protocol: Protocol, data: &[u8]) -> u8 {
    match protocol {
        Protocol::Daly => data.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)),
        Protocol::Jk => {
            let sum = data.iter().fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
            sum.to_le_bytes()[0]
        }
    }
}

/// Check that `candidate` is a complete frame of `protocol`.
///
/// Daly frames must be exactly 13 bytes. JK buffers may carry trailing bytes up
/// to the maximum response size; only the first 300 are checked.
pub fn validate(protocol: Protocol, candidate: &[u8]) -> Result<(), FrameError> {
    let needed = protocol.frame_len();
    if candidate.len() < needed {
        return Err(FrameError::TooShort { needed, available: candidate.len() });
    }

    match protocol {
        Protocol::Daly => {
            if candidate[0] != daly::START_BYTE || candidate[3] != daly::DATA_LENGTH {
                return Err(FrameError::BadMarker);
            }
        }
        Protocol::Jk => {
            if candidate[..4] != jk::RESPONSE_MARKER {
                return Err(FrameError::BadMarker);
            }
        }
    }

    let calculated = checksum(protocol, &candidate[..needed - 1]);
    let received = candidate[needed - 1];
    if calculated != received {
        return Err(FrameError::ChecksumMismatch { calculated, received });
    }
    Ok(())
}

/// A validated frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    protocol: Protocol,
    bytes: Vec<u8>,
}

impl Frame {
    /// Validate `bytes` and wrap the frame-length prefix of them.
    pub fn parse(protocol: Protocol, bytes: &[u8]) -> Result<Self, FrameError> {
        validate(protocol, bytes)?;
        Ok(Self { protocol, bytes: bytes[..protocol.frame_len()].to_vec() })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn command(&self) -> u8 {
        self.bytes[self.protocol.command_offset()]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// The Daly data bytes, or everything after the JK header.
    pub fn payload(&self) -> &[u8] {
        match self.protocol {
            Protocol::Daly => {
                &self.bytes[daly::PAYLOAD_OFFSET..daly::PAYLOAD_OFFSET + daly::PAYLOAD_LEN]
            }
            Protocol::Jk => &self.bytes[5..self.bytes.len() - 1],
        }
    }
}
