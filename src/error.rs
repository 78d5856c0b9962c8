//! Error types for the frame engine.
//!
//! Two families live here:
//!
//! - [`FrameError`] describes data that is incomplete or malformed. These are
//!   never fatal: a candidate frame is skipped, a field is omitted, or decoding is
//!   deferred until more bytes arrive.
//! - [`Error`] describes programmer or configuration mistakes (a broken layout
//!   table, an oversized payload). They surface when a session is created or a
//!   command is encoded, never while a stream is being consumed.

use thiserror::Error;

use crate::protocol::Protocol;

/// Result type alias for operations that can fail hard.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Soft conditions reported while recovering and decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    #[error("frame incomplete: need {needed} bytes, have {available}")]
    TooShort { needed: usize, available: usize },

    #[error("frame marker mismatch")]
    BadMarker,

    #[error("checksum mismatch: calculated {calculated:#04x}, received {received:#04x}")]
    ChecksumMismatch { calculated: u8, received: u8 },

    #[error("no layout registered for command {command:#04x}")]
    UnknownCommandCode { command: u8 },

    #[error("layout variant undetermined with {available} bytes")]
    VariantUndetermined { available: usize },

    #[error("field '{field}' reads {end} bytes past a {frame_len} byte frame")]
    FieldDecodeOverflow { field: String, end: usize, frame_len: usize },
}

impl FrameError {
    /// Whether feeding more bytes may turn this condition into a valid result.
    pub fn is_retryable(&self) -> bool {
        match self {
            FrameError::TooShort { .. } => true,
            FrameError::VariantUndetermined { .. } => true,
            FrameError::ChecksumMismatch { .. } => true,
            FrameError::BadMarker => false,
            FrameError::UnknownCommandCode { .. } => false,
            FrameError::FieldDecodeOverflow { .. } => false,
        }
    }
}

/// Hard failures. Raised at initialization or by encoder misuse.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid layout '{layout}' field '{field}': {reason}")]
    InvalidLayout { layout: &'static str, field: String, reason: String },

    #[error("{protocol} payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLong { protocol: Protocol, len: usize, max: usize },

    #[error("invalid configuration value for {key}: {value}")]
    Config { key: &'static str, value: String },
}
