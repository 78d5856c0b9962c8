//! Accumulates notification chunks until they form frames.

use tracing::{debug, trace};

use crate::checksum::Frame;
use crate::error::FrameError;
use crate::protocol::{daly, jk, Protocol};
use crate::sync::scan;

/// Bytes received from one device connection that have not yet formed a frame.
#[derive(Debug)]
pub struct StreamBuffer {
    protocol: Protocol,
    bytes: Vec<u8>,
}

impl StreamBuffer {
    pub fn new(protocol: Protocol) -> Self {
        Self { protocol, bytes: Vec::with_capacity(jk::MAX_FRAME_LEN) }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// The bytes currently held.
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Add a chunk to the end of the buffer.
    ///
    /// For JK a chunk that starts with the response marker begins a new frame:
    /// anything buffered before it is dropped, even if it looked like a partial
    /// frame. A JK buffer that has grown past the largest possible response
    /// without producing a frame is dropped as stale.
    ///
    /// A Daly buffer that grows past [`daly::BUFFER_CAP`] keeps only its newest
    /// [`daly::RETAINED_TAIL`] bytes.
    pub fn append(&mut self, chunk: &[u8]) {
        if self.protocol == Protocol::Jk {
            if self.bytes.len() > jk::MAX_FRAME_LEN {
                debug!(len = self.bytes.len(), "dropping stale JK buffer");
                self.bytes.clear();
            }
            if chunk.starts_with(&jk::RESPONSE_MARKER) && !self.bytes.is_empty() {
                trace!(dropped = self.bytes.len(), "JK marker at chunk head, resynchronizing");
                self.bytes.clear();
            }
        }
        self.bytes.extend_from_slice(chunk);

        if self.protocol == Protocol::Daly && self.bytes.len() > daly::BUFFER_CAP {
            let excess = self.bytes.len() - daly::RETAINED_TAIL;
            debug!(dropped = excess, "Daly buffer over capacity, dropping oldest bytes");
            self.bytes.drain(..excess);
        }
    }

    /// Remove and return every frame that can be recovered from the buffer.
    ///
    /// Bytes that can never start a valid frame are dropped. Partial frames and
    /// invalid complete JK frames are kept for the next call.
    pub fn extract_frames(&mut self) -> Extracted {
        let found = scan(self.protocol, &self.bytes);
        self.bytes.drain(..found.consumed);

        let pending = if found.frames.is_empty() && found.rejected.is_empty() {
            let needed = self.protocol.frame_len();
            Some(FrameError::TooShort { needed, available: self.bytes.len() })
        } else {
            None
        };

        Extracted { frames: found.frames, rejected: found.rejected, pending }
    }
}

/// Result of [`StreamBuffer::extract_frames`].
#[derive(Debug, Default)]
pub struct Extracted {
    pub frames: Vec<Frame>,
    pub rejected: Vec<FrameError>,
    /// Set when nothing complete was found; more bytes are needed.
    pub pending: Option<FrameError>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::build_frame;

    fn jk_frame(record: u8) -> Vec<u8> {
        let mut frame = vec![0u8; jk::FRAME_LEN];
        frame[..4].copy_from_slice(&jk::RESPONSE_MARKER);
        frame[4] = record;
        let last = jk::FRAME_LEN - 1;
        frame[last] = crate::checksum::checksum(Protocol::Jk, &frame[..last]);
        frame
    }

    #[test]
    fn test_daly_frame_across_chunks() {
        let frame = build_frame(Protocol::Daly, 0x90, &[1, 2, 3, 4, 5, 6, 7, 8]).unwrap();
        let mut buffer = StreamBuffer::new(Protocol::Daly);

        buffer.append(&frame[..5]);
        let extracted = buffer.extract_frames();
        assert!(extracted.frames.is_empty());
        assert!(matches!(extracted.pending, Some(FrameError::TooShort { .. })));
        assert_eq!(buffer.len(), 5);

        buffer.append(&frame[5..]);
        let extracted = buffer.extract_frames();
        assert_eq!(extracted.frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_daly_oversized_chunk_keeps_newest_bytes() {
        let frame = build_frame(Protocol::Daly, daly::CMD_MOS, &[0, 1, 1, 0, 0, 0, 0, 9]).unwrap();
        let mut chunk = vec![0x00; daly::BUFFER_CAP + 500];
        chunk.extend_from_slice(&frame);

        let mut buffer = StreamBuffer::new(Protocol::Daly);
        buffer.append(&chunk);
        assert_eq!(buffer.len(), daly::RETAINED_TAIL);
        assert_eq!(&buffer.as_slice()[daly::RETAINED_TAIL - frame.len()..], &frame[..]);

        let extracted = buffer.extract_frames();
        assert_eq!(extracted.frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_daly_at_cap_is_untouched() {
        let mut buffer = StreamBuffer::new(Protocol::Daly);
        buffer.append(&vec![0x00; daly::BUFFER_CAP]);
        assert_eq!(buffer.len(), daly::BUFFER_CAP);
    }

    #[test]
    fn test_jk_marker_resynchronizes() {
        let frame = jk_frame(jk::RECORD_CELL_INFO);
        let mut buffer = StreamBuffer::new(Protocol::Jk);

        // A stale partial frame followed by a fresh one.
        buffer.append(&frame[..120]);
        for chunk in frame.chunks(20) {
            buffer.append(chunk);
        }
        let extracted = buffer.extract_frames();
        assert_eq!(extracted.frames.len(), 1);
        assert_eq!(extracted.frames[0].command(), jk::RECORD_CELL_INFO);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_jk_invalid_frame_is_retained() {
        let mut frame = jk_frame(jk::RECORD_DEVICE_INFO);
        frame[100] ^= 0x55;
        let mut buffer = StreamBuffer::new(Protocol::Jk);
        buffer.append(&frame);
        let extracted = buffer.extract_frames();
        assert!(extracted.frames.is_empty());
        assert_eq!(extracted.rejected.len(), 1);
        assert_eq!(buffer.len(), jk::FRAME_LEN);
    }

    #[test]
    fn test_jk_stale_buffer_dropped() {
        let mut buffer = StreamBuffer::new(Protocol::Jk);
        buffer.append(&[0x01; jk::MAX_FRAME_LEN + 1]);
        buffer.append(&[0x02; 4]);
        assert_eq!(buffer.as_slice(), &[0x02; 4]);
    }
}
