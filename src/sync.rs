//! Frame synchronization.
//!
//! A scan pass walks the buffered bytes once and reports which frames it found
//! and how many leading bytes are no longer needed.

use tracing::{trace, warn};

use crate::checksum::{validate, Frame};
use crate::error::FrameError;
use crate::protocol::{daly, Protocol};

/// Outcome of one scan pass.
#[derive(Debug, Default)]
pub struct Scan {
    /// Valid frames in stream order.
    pub frames: Vec<Frame>,
    /// Leading bytes the buffer may drop.
    pub consumed: usize,
    /// Complete candidates that failed validation.
    pub rejected: Vec<FrameError>,
}

/// Scan `bytes` for frames of `protocol`.
pub fn scan(protocol: Protocol, bytes: &[u8]) -> Scan {
    match protocol {
        Protocol::Daly => scan_daly(bytes),
        Protocol::Jk => scan_jk(bytes),
    }
}

/// Daly frames have no length prefix, so every start byte is a possible frame.
/// A start byte whose 13-byte candidate fails validation is a false positive:
/// skip just that byte, so one corrupt frame cannot hide the frames after it.
fn scan_daly(bytes: &[u8]) -> Scan {
    let mut scan = Scan::default();
    let mut i = 0;
    loop {
        while i < bytes.len() && bytes[i] != daly::START_BYTE {
            i += 1;
        }
        if bytes.len() - i < daly::FRAME_LEN {
            break;
        }
        match Frame::parse(Protocol::Daly, &bytes[i..i + daly::FRAME_LEN]) {
            Ok(frame) => {
                scan.frames.push(frame);
                i += daly::FRAME_LEN;
            }
            Err(err) => {
                trace!(offset = i, %err, "skipping false start byte");
                scan.rejected.push(err);
                i += 1;
            }
        }
    }
    scan.consumed = i;
    scan
}

/// JK frames are reassembled by the buffer from a marker-led chunk onwards.
/// The frame is complete once enough bytes are present; there is no scanning.
fn scan_jk(bytes: &[u8]) -> Scan {
    let mut scan = Scan::default();
    if bytes.len() < Protocol::Jk.frame_len() {
        return scan;
    }
    match Frame::parse(Protocol::Jk, bytes) {
        Ok(frame) => {
            scan.frames.push(frame);
            scan.consumed = bytes.len();
        }
        Err(err) => {
            warn!(len = bytes.len(), %err, "complete JK buffer failed validation");
            scan.rejected.push(err);
        }
    }
    scan
}
