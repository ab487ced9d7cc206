//! Wire-format round-trips, including a property test over arbitrary event
//! sequences, and the JSON inspection surface.

use proptest::prelude::*;

use dgtrace::trace::records::{BBFrame, BBWindow, CanonicalBBRecord, TraceEvent};
use dgtrace::trace::stream::{RecordReader, RecordWriter, TRACE_MAGIC, UID_MAGIC};

fn frame_strategy() -> impl Strategy<Value = BBFrame> {
    (any::<u64>(), any::<u64>(), any::<bool>()).prop_map(|(bb_id, num_retired, is_call)| BBFrame {
        bb_id,
        num_retired,
        is_call,
    })
}

fn event_strategy() -> impl Strategy<Value = TraceEvent> {
    prop_oneof![
        prop::collection::vec(frame_strategy(), 0..8)
            .prop_map(|frames| TraceEvent::CallStack { frames }),
        (frame_strategy(), any::<u64>(), prop::option::of(frame_strategy())).prop_map(
            |(top_frame, num_popped, new_frame)| TraceEvent::StackAdjustment {
                top_frame,
                num_popped,
                new_frame,
            }
        ),
        any::<u64>().prop_map(|bb_id| TraceEvent::BBEnter { bb_id }),
        any::<u64>().prop_map(|inst_id| TraceEvent::Call { inst_id }),
        (any::<u64>(), any::<u64>())
            .prop_map(|(inst_id, address)| TraceEvent::Memory { inst_id, address }),
    ]
}

proptest! {
    #[test]
    fn framed_event_stream_roundtrips(events in prop::collection::vec(event_strategy(), 0..64)) {
        let mut buf = Vec::new();
        {
            let mut writer = RecordWriter::new(&mut buf, TRACE_MAGIC).unwrap();
            for event in &events {
                writer.write_record(&event.to_bytes()).unwrap();
            }
            writer.flush().unwrap();
        }

        let mut reader = RecordReader::new(&buf[..], TRACE_MAGIC).unwrap();
        let mut decoded = Vec::new();
        while let Some(payload) = reader.next_record().unwrap() {
            decoded.push(TraceEvent::from_bytes(&payload).unwrap());
        }
        prop_assert_eq!(decoded, events);
    }
}

#[test]
fn window_payload_rejects_trailing_bytes() {
    let window = BBWindow {
        inst_start: 0,
        inst_end: 63,
        freq: [(1u64, 2u64)].into_iter().collect(),
    };
    let mut bytes = window.to_bytes();
    bytes.push(0);
    assert!(BBWindow::from_bytes(&bytes).is_err());
}

#[test]
fn sidecar_dump_renders_json_lines() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("m.uid");
    {
        let mut writer = RecordWriter::create(&path, UID_MAGIC).unwrap();
        let records = [
            CanonicalBBRecord {
                function_name: "main".into(),
                bb_name: "entry".into(),
                bb_id: 1,
                first_inst_id: 1,
            },
            CanonicalBBRecord {
                function_name: "main".into(),
                bb_name: "exit".into(),
                bb_id: 2,
                first_inst_id: 5,
            },
        ];
        for rec in &records {
            writer.write_record(&rec.to_bytes()).unwrap();
        }
        writer.flush().unwrap();
    }

    let mut out = Vec::new();
    let count = dgtrace::trace::inspect::dump_sidecar(&path, &mut out).unwrap();
    assert_eq!(count, 2);

    let text = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first["function_name"], "main");
    assert_eq!(first["bb_id"], 1);
}
