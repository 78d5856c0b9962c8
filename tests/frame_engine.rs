use std::time::{Duration, Instant};

use bmsread::checksum::{checksum, validate};
use bmsread::command;
use bmsread::protocol::{daly, jk};
use bmsread::sync::scan;
use bmsread::{Event, FrameError, Protocol, Session, Value, Variant};

fn daly_frame(command: u8, payload: &[u8]) -> Vec<u8> {
    command::build_frame(Protocol::Daly, command, payload).unwrap()
}

/// A JK response frame with `fields` written at their offsets.
fn jk_frame(record: u8, fields: &[(usize, &[u8])]) -> Vec<u8> {
    let mut frame = vec![0u8; jk::FRAME_LEN];
    frame[..4].copy_from_slice(&jk::RESPONSE_MARKER);
    frame[4] = record;
    for (offset, bytes) in fields {
        frame[*offset..*offset + bytes.len()].copy_from_slice(bytes);
    }
    let last = jk::FRAME_LEN - 1;
    frame[last] = checksum(Protocol::Jk, &frame[..last]);
    frame
}

#[test]
fn daly_read_survives_noise_and_corruption() {
    let mut corrupted = daly_frame(daly::CMD_MOS, &[1, 1, 1, 0, 0, 0, 0x30, 0x39]);
    corrupted[7] ^= 0x55;

    let stream = [
        vec![0x00, 0xA5, 0x13],
        daly_frame(daly::CMD_PACK_INFO, &[4, 2, 1, 0, 0, 0, 12, 0]),
        corrupted,
        daly_frame(daly::CMD_PACK, &[0x02, 0x0D, 0x02, 0x0C, 0x75, 0x94, 0x02, 0xEE]),
        daly_frame(daly::CMD_CELL_MINMAX, &[0x0C, 0xE8, 3, 0x0C, 0xE0, 1, 0, 0]),
    ]
    .concat();

    let mut session = Session::new(Protocol::Daly).unwrap();
    let mut records = Vec::new();
    for chunk in stream.chunks(3) {
        for event in session.feed(chunk) {
            if let Event::Record { command, issues } = event {
                assert!(issues.is_empty());
                records.push(command);
            }
        }
    }
    assert_eq!(records, vec![daly::CMD_PACK_INFO, daly::CMD_PACK, daly::CMD_CELL_MINMAX]);
    assert!(!session.has_record(daly::CMD_MOS));

    let status = session.snapshot().status;
    assert!((status.get_f64(&["pack", "voltage_total_v"]).unwrap() - 52.5).abs() < 1e-9);
    assert!((status.get_f64(&["pack", "current_a"]).unwrap() - 10.0).abs() < 1e-9);
    assert!((status.get_f64(&["pack", "soc_pct"]).unwrap() - 75.0).abs() < 1e-9);
    assert!((status.get_f64(&["cell_minmax", "cell_delta_v"]).unwrap() - 0.008).abs() < 1e-9);
    assert_eq!(status.get(&["info", "charge_cycles"]), Some(&Value::Int(12)));
}

#[test]
fn daly_segment_polls_fill_the_snapshot() {
    let start = Instant::now();
    let mut session = Session::new(Protocol::Daly).unwrap();
    session.feed(&daly_frame(daly::CMD_PACK_INFO, &[5, 3, 0, 0, 0, 0, 0, 0]));

    session.begin_segments(daly::CMD_CELL_VOLTAGES, start + Duration::from_millis(2500));
    // Numbering starts at 0 here, and frame 0 is delivered twice.
    let frames = [
        daly_frame(daly::CMD_CELL_VOLTAGES, &[0, 0x0C, 0xE0, 0x0C, 0xE1, 0x0C, 0xE2, 0]),
        daly_frame(daly::CMD_CELL_VOLTAGES, &[1, 0x0C, 0xE7, 0x0C, 0xE8, 0, 0, 0]),
        daly_frame(daly::CMD_CELL_VOLTAGES, &[0, 0x0C, 0xE4, 0x0C, 0xE5, 0x0C, 0xE6, 0]),
    ]
    .concat();
    session.feed(&frames);
    let cells = session.poll_segments(daly::CMD_CELL_VOLTAGES, start).unwrap();
    let cells: Vec<f64> = cells.iter().filter_map(Value::as_f64).collect();
    let expected = [3.300, 3.301, 3.302, 3.303, 3.304];
    assert_eq!(cells.len(), expected.len());
    for (cell, expected) in cells.iter().zip(expected) {
        assert!((cell - expected).abs() < 1e-9, "{cell} != {expected}");
    }

    session.begin_segments(daly::CMD_TEMPERATURES, start + Duration::from_millis(2500));
    session.feed(&daly_frame(daly::CMD_TEMPERATURES, &[1, 65, 0, 64, 63, 0, 0, 0]));
    let temps = session.poll_segments(daly::CMD_TEMPERATURES, start).unwrap();
    assert_eq!(temps, vec![Value::Int(25), Value::Int(24), Value::Int(23)]);

    let snapshot = session.snapshot();
    assert_eq!(snapshot.status.get(&["cells", "cell_count"]), Some(&Value::Int(5)));
    assert_eq!(snapshot.status.get(&["temps", "temp_count"]), Some(&Value::Int(3)));
    let json: serde_json::Value = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["protocol"], "daly");
    assert_eq!(json["got"]["95"], true);
    assert_eq!(json["got"]["96"], true);
    assert_eq!(json["status"]["temps"]["temps_c"], serde_json::json!([25, 24, 23]));
}

#[test]
fn jk_wide_frame_across_notifications() {
    let cells = jk_frame(
        jk::RECORD_CELL_INFO,
        &[
            (6, &3_300u16.to_le_bytes()[..]),
            (8, &3_300u16.to_le_bytes()[..]),
            (10, &3_300u16.to_le_bytes()[..]),
            (158, &(-2_000i32).to_le_bytes()[..]),
            (173, &[80u8][..]),
            (jk::VARIANT_FLAG_OFFSET, &[1u8][..]),
        ],
    );
    let settings = jk_frame(jk::RECORD_SETTINGS, &[(114, &3u32.to_le_bytes()[..])]);
    let device = jk_frame(jk::RECORD_DEVICE_INFO, &[(6, &b"JK_B2A24S15P\0\0\0\0"[..])]);

    let mut session = Session::new(Protocol::Jk).unwrap();
    for frame in [&device, &cells, &settings] {
        for chunk in frame.chunks(20) {
            session.feed(chunk);
        }
    }
    assert_eq!(session.variant(), Some(Variant::Wide));

    let status = session.snapshot().status;
    assert_eq!(status.get_f64(&["cell_info", "total_voltage"]), Some(9.9));
    assert!((status.get_f64(&["cell_info", "current"]).unwrap() + 2.0).abs() < 1e-9);
    assert_eq!(status.get(&["cell_info", "battery_soc"]), Some(&Value::Int(80)));
    let voltages = status.get(&["cell_info", "voltages"]).and_then(Value::as_list);
    assert_eq!(voltages.map(<[Value]>::len), Some(3));
    let vendor = status.get(&["device_info", "vendor_id"]).and_then(Value::as_str);
    assert_eq!(vendor, Some("JK_B2A24S15P"));
}

#[test]
fn jk_marker_resynchronizes_after_a_dropped_notification() {
    let cells = jk_frame(jk::RECORD_CELL_INFO, &[(6, &3_310u16.to_le_bytes()[..])]);
    let mut session = Session::new(Protocol::Jk).unwrap();

    // The tail of the first frame is lost; the next frame starts a fresh buffer.
    session.feed(&cells[..140]);
    let events: Vec<Event> = cells.chunks(150).flat_map(|chunk| session.feed(chunk)).collect();
    assert!(matches!(events.as_slice(), [Event::Record { command: jk::RECORD_CELL_INFO, .. }]));
}

#[test]
fn scan_keeps_frames_around_a_broken_one() {
    let a = daly_frame(daly::CMD_PACK, &[0; 8]);
    let b = daly_frame(daly::CMD_MOS, &[0; 8]);
    let mut broken = daly_frame(daly::CMD_CELL_MINMAX, &[0; 8]);
    broken[12] = broken[12].wrapping_add(1);

    let stream = [vec![0xFF, 0x00, 0xA5], a, broken, b].concat();
    let found = scan(Protocol::Daly, &stream);
    let commands: Vec<u8> = found.frames.iter().map(|f| f.command()).collect();
    assert_eq!(commands, vec![daly::CMD_PACK, daly::CMD_MOS]);
    assert!(found
        .rejected
        .iter()
        .any(|err| matches!(err, FrameError::ChecksumMismatch { .. })));
}

#[test]
fn jk_writes_are_valid_requests() {
    let [ovpr, ovp] = command::soc_reset(3.45);
    assert_eq!(&ovpr[..4], &jk::REQUEST_MARKER);
    assert_eq!(ovpr[4], jk::REGISTER_CELL_OVPR);
    assert_eq!(&ovpr[6..10], &3_350u32.to_le_bytes());
    assert_eq!(ovp[4], jk::REGISTER_CELL_OVP);
    assert_eq!(&ovp[6..10], &3_400u32.to_le_bytes());
    for frame in [&ovpr, &ovp] {
        assert_eq!(frame.len(), jk::REQUEST_LEN);
        assert_eq!(frame[19], checksum(Protocol::Jk, &frame[..19]));
    }

    let switches = command::control_switches(true);
    assert_eq!(switches.len(), jk::CONTROL_REGISTERS.len());
    assert!(switches.iter().all(|frame| frame[6] == 1));

    let request = command::build_request(Protocol::Daly, daly::CMD_PACK_INFO);
    assert!(validate(Protocol::Daly, &request).is_ok());
}
