//! One device connection's worth of decoding state.
//!
//! A [`Session`] is fed notification chunks in arrival order. It owns the
//! stream buffer, the JK layout variant, the latest record per command code and
//! the segment aggregators. It never blocks and has no timers: callers pass in
//! the current time whenever a deadline matters.

use std::collections::BTreeMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::aggregate::{Rejected, SegmentAggregator};
use crate::buffer::StreamBuffer;
use crate::checksum::Frame;
use crate::decoder::{decode, decode_segment};
use crate::error::{FrameError, Result};
use crate::layout::{self, Variant};
use crate::protocol::{daly, Protocol};
use crate::record::{Record, TelemetryRecord, Value};

/// What a chunk produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// The record for `command` was replaced. `issues` lists skipped fields or
    /// an unknown command code.
    Record { command: u8, issues: Vec<FrameError> },
    /// A segment of a multi-frame table was stored.
    Segment { command: u8, index: u8 },
    /// A valid frame that could not be decoded yet.
    Deferred { command: u8, reason: FrameError },
}

/// Decoding state for one device connection.
#[derive(Debug)]
pub struct Session {
    protocol: Protocol,
    buffer: StreamBuffer,
    variant: Option<Variant>,
    records: BTreeMap<u8, TelemetryRecord>,
    cells: SegmentAggregator<Value>,
    temps: SegmentAggregator<Value>,
}

impl Session {
    /// Create a session. Fails if a built-in layout table is malformed.
    pub fn new(protocol: Protocol) -> Result<Self> {
        layout::validate_registry()?;
        Ok(Self {
            protocol,
            buffer: StreamBuffer::new(protocol),
            variant: None,
            records: BTreeMap::new(),
            cells: SegmentAggregator::new("cells"),
            temps: SegmentAggregator::new("temps"),
        })
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// The JK layout variant, once determined.
    pub fn variant(&self) -> Option<Variant> {
        self.variant
    }

    /// Bytes waiting for the rest of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed one notification chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Event> {
        self.buffer.append(chunk);

        let extracted = self.buffer.extract_frames();
        for err in &extracted.rejected {
            trace!(%err, "candidate frame rejected");
        }

        extracted.frames.into_iter().filter_map(|frame| self.handle(frame)).collect()
    }

    /// The latest record for `command`.
    pub fn record(&self, command: u8) -> Option<&TelemetryRecord> {
        self.records.get(&command)
    }

    pub fn has_record(&self, command: u8) -> bool {
        self.records.contains_key(&command)
    }

    /// Start a segment poll for `command`, discarding segments from earlier
    /// polls. Returns false if `command` is not a segmented command.
    pub fn begin_segments(&mut self, command: u8, deadline: Instant) -> bool {
        match self.aggregator(command) {
            Some(aggregator) => {
                aggregator.begin(deadline);
                true
            }
            None => false,
        }
    }

    /// Finalize the segment poll for `command` if it is complete or its
    /// deadline has passed. Returns the ordered values once finalized.
    pub fn poll_segments(&mut self, command: u8, now: Instant) -> Option<Vec<Value>> {
        let expected = match command {
            daly::CMD_CELL_VOLTAGES => self.pack_info_count("cell_count"),
            daly::CMD_TEMPERATURES => self.pack_info_count("temp_count"),
            _ => None,
        };
        let aggregator = self.aggregator(command)?;
        aggregator.set_expected(expected);
        aggregator.poll(now).map(<[Value]>::to_vec)
    }

    /// The last finalized values of a segmented command.
    pub fn segments(&self, command: u8) -> Option<&[Value]> {
        match (self.protocol, command) {
            (Protocol::Daly, daly::CMD_CELL_VOLTAGES) => self.cells.result(),
            (Protocol::Daly, daly::CMD_TEMPERATURES) => self.temps.result(),
            _ => None,
        }
    }

    /// Everything decoded so far, ready to publish.
    pub fn snapshot(&self) -> Snapshot {
        let mut status = Record::new();
        let mut got = BTreeMap::new();
        for (command, record) in &self.records {
            status.merge(record.fields.clone());
            got.insert(format!("{command:02x}"), true);
        }

        match self.protocol {
            Protocol::Daly => self.daly_segments(&mut status, &mut got),
            Protocol::Jk => trim_cell_arrays(&mut status),
        }

        Snapshot {
            protocol: self.protocol,
            variant: self.variant,
            got,
            status,
            last_update: self.records.values().map(|r| r.last_update).reduce(f64::max),
        }
    }

    fn handle(&mut self, frame: Frame) -> Option<Event> {
        let command = frame.command();

        if let Some(segment) = layout::segment(self.protocol, command) {
            let (index, mut values) = match decode_segment(segment, frame.as_bytes()) {
                Ok(decoded) => decoded,
                Err(reason) => return Some(Event::Deferred { command, reason }),
            };
            values.retain(|v| !v.is_null());
            let aggregator = self.aggregator(command)?;
            return match aggregator.accept(index, values) {
                Ok(()) => Some(Event::Segment { command, index }),
                Err(Rejected::NotCollecting) => {
                    trace!(command, index, "segment outside a poll ignored");
                    None
                }
                Err(rejected) => {
                    debug!(command, ?rejected, "segment dropped");
                    None
                }
            };
        }

        let variant = if layout::needs_variant(self.protocol, command) {
            match self.variant_for(frame.as_bytes()) {
                Ok(variant) => variant,
                Err(reason) => return Some(Event::Deferred { command, reason }),
            }
        } else {
            self.variant.unwrap_or_default()
        };

        let decoded = decode(self.protocol, variant, command, frame.as_bytes());
        if !decoded.issues.is_empty() {
            warn!(command, issues = decoded.issues.len(), "frame decoded with issues");
        }
        debug!(command, "record updated");
        self.records.insert(command, TelemetryRecord::new(command, decoded.record));
        Some(Event::Record { command, issues: decoded.issues })
    }

    /// The variant is read once from the first valid cell-info frame and then
    /// kept. `bytes` must already have passed checksum validation.
    fn variant_for(&mut self, bytes: &[u8]) -> std::result::Result<Variant, FrameError> {
        if let Some(variant) = self.variant {
            return Ok(variant);
        }
        let variant = Variant::detect(bytes)
            .ok_or(FrameError::VariantUndetermined { available: bytes.len() })?;
        debug!(?variant, "JK layout variant detected");
        self.variant = Some(variant);
        Ok(variant)
    }

    fn aggregator(&mut self, command: u8) -> Option<&mut SegmentAggregator<Value>> {
        match (self.protocol, command) {
            (Protocol::Daly, daly::CMD_CELL_VOLTAGES) => Some(&mut self.cells),
            (Protocol::Daly, daly::CMD_TEMPERATURES) => Some(&mut self.temps),
            _ => None,
        }
    }

    fn pack_info_count(&self, key: &str) -> Option<usize> {
        let count = self.records.get(&daly::CMD_PACK_INFO)?.fields.get(&["info", key])?.as_i64()?;
        usize::try_from(count).ok().filter(|c| *c > 0)
    }

    fn daly_segments(&self, status: &mut Record, got: &mut BTreeMap<String, bool>) {
        let tables = [
            (daly::CMD_CELL_VOLTAGES, self.cells.result(), "cells", "cells_v", "cell_count"),
            (daly::CMD_TEMPERATURES, self.temps.result(), "temps", "temps_c", "temp_count"),
        ];
        for (command, values, section, key, count_key) in tables {
            let Some(values) = values.filter(|v| !v.is_empty()) else {
                continue;
            };
            status.insert(&[section, key], Value::List(values.to_vec()));
            status.insert(&[section, count_key], Value::Int(values.len() as i64));
            got.insert(format!("{command:02x}"), true);
        }
    }
}

/// Cut JK cell arrays down to the real cell count: the settings value when
/// present, otherwise the number of cells reporting a voltage.
fn trim_cell_arrays(status: &mut Record) {
    let configured = status
        .get(&["settings", "cell_count"])
        .and_then(Value::as_i64)
        .and_then(|c| usize::try_from(c).ok())
        .filter(|c| *c > 0);

    let count = match configured {
        Some(count) => count,
        None => {
            let voltages = status.get(&["cell_info", "voltages"]).and_then(Value::as_list);
            let Some(voltages) = voltages else {
                return;
            };
            let inferred = voltages.iter().filter(|v| v.as_f64().is_some_and(|v| v > 0.0)).count();
            if inferred == 0 {
                return;
            }
            status.insert(&["cell_info", "cell_count_inferred"], Value::Int(inferred as i64));
            inferred
        }
    };

    for key in ["voltages", "resistances"] {
        if let Some(Value::List(values)) = status.get_mut(&["cell_info", key]) {
            values.truncate(count);
        }
    }
}

/// A serializable view of a session.
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub protocol: Protocol,
    pub variant: Option<Variant>,
    /// Hex command code to whether it was received.
    pub got: BTreeMap<String, bool>,
    pub status: Record,
    pub last_update: Option<f64>,
}
