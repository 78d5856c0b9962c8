//! Read telemetry from Daly and JK Battery Management Systems over Bluetooth Low Energy
//!
//! Both BMS families answer requests with fixed-length binary frames delivered as BLE
//! notifications. Notifications are small and carry no framing of their own, so a frame
//! may be split across several of them, and stray bytes or corrupted frames are common.
//!
//! The frame engine in this crate is transport independent:
//!
//! - [`Session`] accumulates chunks, finds and validates frames and decodes them into
//!   [`TelemetryRecord`]s using static per-command field layouts.
//! - Daly cell voltages and temperatures arrive as several indexed frames which are
//!   reassembled by a [`SegmentAggregator`].
//! - JK cell-info frames come in a 24-cell and a 32-cell layout. The [`Variant`] is
//!   detected from the first cell-info frame and kept for the session.
//! - [`command`] builds request frames and JK register writes.
//!
//! [`BmsClient`] drives a session over BLE using `bluest`.
//!
//! # Example
//!
//! ```no_run
//! # use std::time::Duration;
//! #
//! # #[tokio::main]
//! # pub async fn main(){
//!     let config = bmsread::ReaderConfig::from_env().unwrap();
//!     let mut client = bmsread::BmsClient::new(config).await.unwrap();
//!     loop {
//!         let snapshot = client.fetch_snapshot().await.unwrap();
//!         println!("{}", serde_json::to_string(&snapshot).unwrap());
//!         tokio::time::sleep(Duration::from_secs(5)).await;
//!     }
//! # }
//! ```
//!
//! Decoding without hardware:
//!
//! ```
//! use bmsread::{command, protocol::daly, Protocol, Session};
//!
//! let mut session = Session::new(Protocol::Daly).unwrap();
//! let payload = [0x02, 0x0D, 0, 0, 0x75, 0x30, 0x03, 0xE8];
//! let frame = command::build_frame(Protocol::Daly, daly::CMD_PACK, &payload).unwrap();
//! for chunk in frame.chunks(4) {
//!     session.feed(chunk);
//! }
//! let soc = session.snapshot().status.get_f64(&["pack", "soc_pct"]).unwrap();
//! assert!((soc - 100.0).abs() < 1e-9);
//! ```

pub mod aggregate;
mod bms_client;
pub mod buffer;
pub mod checksum;
pub mod command;
mod config;
pub mod decoder;
mod error;
pub mod layout;
pub mod protocol;
pub mod record;
mod session;
pub mod sync;
#[cfg(test)]
mod test_utils;

pub use aggregate::SegmentAggregator;
pub use bms_client::{pump, BmsClient};
pub use checksum::Frame;
pub use config::ReaderConfig;
pub use error::{Error, FrameError, Result};
pub use layout::Variant;
pub use protocol::Protocol;
pub use record::{Record, TelemetryRecord, Value};
pub use session::{Event, Session, Snapshot};
