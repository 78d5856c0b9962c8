use std::time::{Duration, Instant};

use anyhow::anyhow;
use bluest::Adapter;
use bluest::AdvertisingDevice;
use bluest::Characteristic;
use bluest::Device;
use bluest::Uuid;
use futures_util::Stream;
use futures_util::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, trace, warn};

use crate::command::build_request;
use crate::config::ReaderConfig;
use crate::protocol::{daly, jk, Protocol};
use crate::session::{Session, Snapshot};

/// GATT layout used by a BMS family.
struct GattIds {
    service: Uuid,
    notify: Uuid,
    write: Uuid,
}

const DALY_GATT: GattIds = GattIds {
    service: Uuid::from_u128(0x0000fff0_0000_1000_8000_00805f9b34fb),
    notify: Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb),
    write: Uuid::from_u128(0x0000fff2_0000_1000_8000_00805f9b34fb),
};

/// JK uses one characteristic for both directions.
const JK_GATT: GattIds = GattIds {
    service: Uuid::from_u128(0x0000ffe0_0000_1000_8000_00805f9b34fb),
    notify: Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb),
    write: Uuid::from_u128(0x0000ffe1_0000_1000_8000_00805f9b34fb),
};

/// How often the read loop wakes to check completion and deadlines.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A connection to one BMS.
pub struct BmsClient {
    config: ReaderConfig,
    adapter: Adapter,
    device: Device,
    write: Characteristic,
    notify: Characteristic,
    session: Session,
}

impl BmsClient {
    /// Disconnect from the BMS
    pub async fn stop(self) -> anyhow::Result<()> {
        self.adapter.disconnect_device(&self.device).await?;
        Ok(())
    }

    /// Create a new `BmsClient`, which includes attempting to discover the device.
    pub async fn new(config: ReaderConfig) -> anyhow::Result<Self> {
        let ids = gatt_ids(config.protocol);
        let session = Session::new(config.protocol)?;

        let adapter = bluest::Adapter::default()
            .await
            .ok_or(anyhow!("Default adapter not found"))?;
        adapter.wait_available().await?;

        let discovery = Self::discover_device(&config.device_name, ids.service, &adapter);
        let device = timeout(config.scan_timeout, discovery)
            .await
            .map_err(|_| anyhow!("Device not found"))??;

        adapter.connect_device(&device.device).await?;
        info!(name = %config.device_name, protocol = %config.protocol, "connected");

        let service = device
            .device
            .discover_services_with_uuid(ids.service)
            .await?
            .first()
            .ok_or(anyhow!(
                "The specified device does not expose the {} BMS service.",
                config.protocol
            ))?
            .clone();
        let write = service
            .discover_characteristics_with_uuid(ids.write)
            .await?
            .first()
            .ok_or(anyhow!("The specified device does not expose the BMS write characteristic."))?
            .clone();
        let notify = service
            .discover_characteristics_with_uuid(ids.notify)
            .await?
            .first()
            .ok_or(anyhow!("The specified device does not expose the BMS notify characteristic."))?
            .clone();

        Ok(Self { config, adapter, device: device.device, write, notify, session })
    }

    /// Read the current state from the BMS. Each call starts from an empty
    /// session, so the snapshot only holds data received during this read.
    pub async fn fetch_snapshot(&mut self) -> anyhow::Result<Snapshot> {
        self.try_connect().await?;
        self.session = Session::new(self.config.protocol)?;
        match self.config.protocol {
            Protocol::Daly => self.read_daly().await?,
            Protocol::Jk => self.read_jk().await?,
        }
        Ok(self.session.snapshot())
    }

    /// Send raw command frames, e.g. JK register writes.
    pub async fn send(&mut self, frames: &[Vec<u8>], spacing: Duration) -> anyhow::Result<()> {
        self.try_connect().await?;
        for frame in frames {
            trace!(tx = %hex::encode(frame), "BMS TX");
            self.write.write_without_response(frame).await?;
            tokio::time::sleep(spacing).await;
        }
        Ok(())
    }

    /// Request everything, wait for the core records, then poll the cell and
    /// temperature tables one after the other.
    async fn read_daly(&mut self) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.config.timeout;
        let mut reader = self.notify.notify().await?;

        for command in daly::POLL_ORDER {
            Self::write_request(&self.write, Protocol::Daly, command).await?;
            tokio::time::sleep(self.config.request_spacing).await;
        }

        let core = pump(&mut self.session, &mut reader, deadline, |session, _| {
            session.has_record(daly::CMD_PACK_INFO) && session.has_record(daly::CMD_PACK)
        })
        .await?;
        if !core {
            warn!("pack records incomplete at deadline");
        }

        for command in [daly::CMD_CELL_VOLTAGES, daly::CMD_TEMPERATURES] {
            let segment_deadline = Instant::now() + self.config.segment_timeout;
            self.session.begin_segments(command, segment_deadline);
            Self::write_request(&self.write, Protocol::Daly, command).await?;

            pump(&mut self.session, &mut reader, segment_deadline + POLL_INTERVAL, |session, now| {
                session.poll_segments(command, now).is_some()
            })
            .await?;
        }

        Ok(())
    }

    /// Ask for device info and cell info. Some firmware ignores single
    /// requests, so unanswered ones are repeated until the read times out.
    async fn read_jk(&mut self) -> anyhow::Result<()> {
        let deadline = Instant::now() + self.config.timeout;
        let mut reader = self.notify.notify().await?;

        Self::write_request(&self.write, Protocol::Jk, jk::CMD_DEVICE_INFO).await?;
        tokio::time::sleep(Duration::from_millis(200)).await;
        Self::write_request(&self.write, Protocol::Jk, jk::CMD_CELL_INFO).await?;

        let complete = |session: &mut Session, _: Instant| {
            session.has_record(jk::RECORD_DEVICE_INFO) && session.has_record(jk::RECORD_CELL_INFO)
        };

        loop {
            let retry_at = (Instant::now() + self.config.retry_interval).min(deadline);
            if pump(&mut self.session, &mut reader, retry_at, complete).await? {
                return Ok(());
            }
            if Instant::now() >= deadline {
                warn!("JK records incomplete at deadline");
                return Ok(());
            }
            if !self.session.has_record(jk::RECORD_DEVICE_INFO) {
                Self::write_request(&self.write, Protocol::Jk, jk::CMD_DEVICE_INFO).await?;
            }
            if !self.session.has_record(jk::RECORD_CELL_INFO) {
                Self::write_request(&self.write, Protocol::Jk, jk::CMD_CELL_INFO).await?;
            }
        }
    }

    async fn write_request(
        write: &Characteristic,
        protocol: Protocol,
        command: u8,
    ) -> anyhow::Result<()> {
        let frame = build_request(protocol, command);
        trace!(tx = %hex::encode(&frame), "BMS TX");
        write.write_without_response(&frame).await?;
        Ok(())
    }

    async fn discover_device(
        name: &str,
        service: Uuid,
        adapter: &Adapter,
    ) -> anyhow::Result<AdvertisingDevice> {
        let required_services = [service];
        let mut adapter_events = adapter.scan(&required_services).await?;
        while let Some(device) = adapter_events.next().await {
            let device_name = device.device.name_async().await?;
            debug!(%device_name, "found BMS candidate");
            if device_name == name {
                return Ok(device);
            }
        }

        Err(anyhow!("Device not found"))
    }

    async fn try_connect(&self) -> anyhow::Result<()> {
        if !self.device.is_connected().await {
            let mut retries = 2;
            loop {
                match self.adapter.connect_device(&self.device).await {
                    Ok(()) => return Ok(()),
                    Err(err) if retries > 0 => {
                        warn!(%err, "Failed to connect");
                        retries -= 1;
                    }
                    Err(err) => return Err(err.into()),
                }
            }
        }

        Ok(())
    }
}

fn gatt_ids(protocol: Protocol) -> &'static GattIds {
    match protocol {
        Protocol::Daly => &DALY_GATT,
        Protocol::Jk => &JK_GATT,
    }
}

/// Feed notifications into `session` until `done` holds or `deadline` passes.
///
/// Returns whether `done` was satisfied. Notifications arrive in small chunks
/// with no relation to frame boundaries; the session reassembles them. The
/// loop wakes at least every [`POLL_INTERVAL`] so `done` can observe deadlines
/// even when the link is silent.
pub async fn pump<S, E, F>(
    session: &mut Session,
    reader: &mut S,
    deadline: Instant,
    mut done: F,
) -> anyhow::Result<bool>
where
    S: Stream<Item = Result<Vec<u8>, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
    F: FnMut(&mut Session, Instant) -> bool,
{
    loop {
        let now = Instant::now();
        if done(session, now) {
            return Ok(true);
        }
        let remaining = deadline.saturating_duration_since(now);
        if remaining.is_zero() {
            return Ok(false);
        }

        match timeout(remaining.min(POLL_INTERVAL), reader.next()).await {
            Err(_) => continue,
            Ok(None) => {
                debug!("End of notification stream");
                return Err(anyhow!("end of notification stream"));
            }
            Ok(Some(Ok(chunk))) => {
                trace!(rx = %hex::encode(&chunk), "BMS RX notification");
                for event in session.feed(&chunk) {
                    trace!(?event, "session event");
                }
            }
            Ok(Some(Err(err))) => {
                warn!(%err, "Notification error");
                return Err(err.into());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::build_frame;
    use crate::record::Value;
    use futures_util::stream;

    type Chunk = Result<Vec<u8>, std::io::Error>;

    fn chunks(bytes: &[u8], size: usize) -> Vec<Chunk> {
        bytes.chunks(size).map(|c| Ok(c.to_vec())).collect()
    }

    #[tokio::test]
    async fn test_pump_until_records_arrive() {
        let mut session = Session::new(Protocol::Daly).unwrap();
        let bytes = [
            build_frame(Protocol::Daly, daly::CMD_PACK_INFO, &[8, 2, 1, 0, 0, 0, 3, 0]).unwrap(),
            build_frame(Protocol::Daly, daly::CMD_PACK, &[1, 0, 1, 0, 0x75, 0x30, 2, 0]).unwrap(),
        ]
        .concat();
        // More chunks follow the ones that matter; the stream never ends early.
        let mut reader = stream::iter(chunks(&bytes, 7)).chain(stream::pending());

        let done = pump(&mut session, &mut reader, Instant::now() + Duration::from_secs(5), |s, _| {
            s.has_record(daly::CMD_PACK_INFO) && s.has_record(daly::CMD_PACK)
        })
        .await
        .unwrap();
        assert!(done);
        assert_eq!(session.snapshot().status.get(&["info", "cell_count"]), Some(&Value::Int(8)));
    }

    #[tokio::test]
    async fn test_pump_times_out_on_partial_frames() {
        let mut session = Session::new(Protocol::Daly).unwrap();
        let frame = build_frame(Protocol::Daly, daly::CMD_PACK, &[0; 8]).unwrap();
        let mut reader = stream::iter(chunks(&frame[..9], 3)).chain(stream::pending());

        let deadline = Instant::now() + Duration::from_millis(200);
        let done = pump(&mut session, &mut reader, deadline, |s, _| s.has_record(daly::CMD_PACK))
        .await
        .unwrap();
        assert!(!done);
        assert_eq!(session.buffered(), 9);
    }

    #[tokio::test]
    async fn test_pump_segment_deadline() {
        let mut session = Session::new(Protocol::Daly).unwrap();
        let deadline = Instant::now() + Duration::from_millis(150);
        session.begin_segments(daly::CMD_TEMPERATURES, deadline);
        let payload = [1, 60, 61, 0, 0, 0, 0, 0];
        let frame = build_frame(Protocol::Daly, daly::CMD_TEMPERATURES, &payload).unwrap();
        let mut reader = stream::iter(chunks(&frame, 20)).chain(stream::pending());

        let done = pump(&mut session, &mut reader, deadline + POLL_INTERVAL, |s, now| {
            s.poll_segments(daly::CMD_TEMPERATURES, now).is_some()
        })
        .await
        .unwrap();
        assert!(done);
        assert_eq!(
            session.segments(daly::CMD_TEMPERATURES),
            Some(&[Value::Int(20), Value::Int(21)][..])
        );
    }

    #[tokio::test]
    async fn test_pump_reports_end_of_stream() {
        let mut session = Session::new(Protocol::Jk).unwrap();
        let mut reader = stream::iter(Vec::<Chunk>::new());
        let deadline = Instant::now() + Duration::from_secs(1);
        let result = pump(&mut session, &mut reader, deadline, |_, _| false).await;
        assert!(result.is_err());
    }
}
