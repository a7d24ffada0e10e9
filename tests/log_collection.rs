//! Driver log and stream-error collection through the process-wide
//! collector.

use gazelink::device::{DriverLogEvent, StreamErrorEvent};
use gazelink::{
    get_log, start_logging, stop_logging, LogEntry, LogLevel, LogSource, SimTracker, StreamKind,
    Tracker,
};

#[test]
fn driver_log_and_stream_errors_are_tagged_and_drained() {
    let sim = SimTracker::new("LOG-1");
    let session = Tracker::from_device(sim.device()).unwrap();

    assert!(start_logging(&*sim.driver(), Some(64)).unwrap());
    // second start is a no-op
    assert!(!start_logging(&*sim.driver(), None).unwrap());

    sim.inject_driver_log(DriverLogEvent {
        system_ts: 10,
        source: LogSource::StreamEngine,
        level: LogLevel::Warning,
        text: "clock drift detected".into(),
    });
    sim.inject_stream_error(StreamErrorEvent {
        system_ts: 20,
        stream: StreamKind::Gaze,
        source: "stream pump".into(),
        text: "packet lost".into(),
    });

    let entries = get_log(false);
    assert_eq!(entries.len(), 2);
    match &entries[0] {
        LogEntry::DriverLog { level, text, .. } => {
            assert_eq!(*level, LogLevel::Warning);
            assert_eq!(text, "clock drift detected");
        }
        other => panic!("expected a driver log entry, got {other:?}"),
    }
    match &entries[1] {
        LogEntry::StreamError { serial, stream, .. } => {
            assert_eq!(serial, "LOG-1");
            assert_eq!(*stream, StreamKind::Gaze);
        }
        other => panic!("expected a stream error entry, got {other:?}"),
    }

    // draining get empties the buffer
    assert_eq!(get_log(true).len(), 2);
    assert!(get_log(false).is_empty());

    assert!(stop_logging(&*sim.driver()).unwrap());
    sim.inject_driver_log(DriverLogEvent {
        system_ts: 30,
        source: LogSource::Sdk,
        level: LogLevel::Information,
        text: "ignored".into(),
    });
    assert!(get_log(false).is_empty());
    drop(session);
}
