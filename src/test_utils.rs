//! Helpers for building synthetic frames in tests.

use crate::checksum::checksum;
use crate::protocol::{jk, Protocol};

/// Builds a JK response frame field by field. The checksum is filled in by
/// [`build`](Self::build).
pub struct JkFrameBuilder {
    bytes: Vec<u8>,
}

impl JkFrameBuilder {
    pub fn new(record: u8) -> Self {
        let mut bytes = vec![0u8; jk::FRAME_LEN];
        bytes[..4].copy_from_slice(&jk::RESPONSE_MARKER);
        bytes[4] = record;
        Self { bytes }
    }

    pub fn byte(mut self, offset: usize, value: u8) -> Self {
        self.bytes[offset] = value;
        self
    }

    pub fn bytes(mut self, offset: usize, value: &[u8]) -> Self {
        self.bytes[offset..offset + value.len()].copy_from_slice(value);
        self
    }

    pub fn u16_le(self, offset: usize, value: u16) -> Self {
        self.bytes(offset, &value.to_le_bytes())
    }

    pub fn u32_le(self, offset: usize, value: u32) -> Self {
        self.bytes(offset, &value.to_le_bytes())
    }

    pub fn i32_le(self, offset: usize, value: i32) -> Self {
        self.bytes(offset, &value.to_le_bytes())
    }

    /// Mark the frame as the 32-cell layout.
    pub fn wide(self) -> Self {
        self.byte(jk::VARIANT_FLAG_OFFSET, 1)
    }

    pub fn build(mut self) -> Vec<u8> {
        let last = jk::FRAME_LEN - 1;
        self.bytes[last] = checksum(Protocol::Jk, &self.bytes[..last]);
        self.bytes
    }
}
