//! Stream publication
//!
//! Maps a stream kind to one published outlet per session and serializes
//! buffered records into the fixed per-kind channel layouts. Sample
//! timestamps on the bus are the record's system timestamp converted from
//! microseconds to seconds.

use crate::bus::{BusSample, OutletHandle, SampleData, SampleFormat, StreamBus, StreamMeta, IRREGULAR_RATE};
use crate::error::TrackerError;
use crate::types::{
    EyeData, EyeImage, ExtSignal, GazeRecord, Positioning, StreamKind, TimeSync, TrackerInfo,
};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub const GAZE_CHANNELS: usize = 42;
pub const EXT_SIGNAL_CHANNELS: usize = 2;
pub const TIME_SYNC_CHANNELS: usize = 3;
pub const POSITIONING_CHANNELS: usize = 8;

const MICROS_PER_SECOND: f64 = 1_000_000.0;

/// Declare the outlet for one stream of one tracker.
pub fn outlet_meta(
    info: &TrackerInfo,
    stream: StreamKind,
    as_gif: bool,
) -> Result<StreamMeta, TrackerError> {
    let (content_type, channel_count, format) = match stream {
        StreamKind::Gaze | StreamKind::EyeOpenness => {
            ("Gaze".to_string(), GAZE_CHANNELS, SampleFormat::F32)
        }
        StreamKind::EyeImage => {
            let content_type = if as_gif { "VideoCompressed" } else { "VideoRaw" };
            (content_type.to_string(), 0, SampleFormat::Bytes)
        }
        StreamKind::ExtSignal => ("TTL".to_string(), EXT_SIGNAL_CHANNELS, SampleFormat::I64),
        StreamKind::TimeSync => ("TimeSync".to_string(), TIME_SYNC_CHANNELS, SampleFormat::I64),
        StreamKind::Positioning => (
            "Positioning".to_string(),
            POSITIONING_CHANNELS,
            SampleFormat::F32,
        ),
        StreamKind::Notification => {
            return Err(TrackerError::InvalidOperation(
                "opening an outlet for the notification stream is not supported".into(),
            ))
        }
    };

    let has_rate = matches!(stream, StreamKind::Gaze | StreamKind::EyeOpenness);
    let name = format!("Tracker_{}", stream.name());
    Ok(StreamMeta {
        source_id: format!("{name}@{}", info.serial),
        name,
        kind: stream.buffer_kind(),
        content_type,
        channel_count,
        format,
        nominal_rate: if has_rate {
            info.frequency as f64
        } else {
            IRREGULAR_RATE
        },
        metadata: vec![
            ("manufacturer".to_string(), "Tobii".to_string()),
            ("model".to_string(), info.model.clone()),
            ("serial_number".to_string(), info.serial.clone()),
            ("firmware_version".to_string(), info.firmware_version.clone()),
            ("tracking_mode".to_string(), info.tracking_mode.clone()),
        ],
    })
}

fn push_eye(channels: &mut Vec<f32>, eye: &EyeData) {
    channels.extend_from_slice(&eye.gaze_point.on_display_area);
    channels.extend_from_slice(&eye.gaze_point.in_user_coords);
    channels.push(eye.gaze_point.validity.flag());
    channels.push(eye.gaze_point.available as u8 as f32);
    channels.push(eye.pupil.diameter);
    channels.push(eye.pupil.validity.flag());
    channels.push(eye.pupil.available as u8 as f32);
    channels.extend_from_slice(&eye.gaze_origin.in_user_coords);
    channels.extend_from_slice(&eye.gaze_origin.in_track_box_coords);
    channels.push(eye.gaze_origin.validity.flag());
    channels.push(eye.gaze_origin.available as u8 as f32);
    channels.push(eye.openness.diameter);
    channels.push(eye.openness.validity.flag());
    channels.push(eye.openness.available as u8 as f32);
}

/// 42 × f32: 21 channels per eye, left first.
pub fn serialize_gaze(record: &GazeRecord) -> BusSample {
    let mut channels = Vec::with_capacity(GAZE_CHANNELS);
    push_eye(&mut channels, &record.left);
    push_eye(&mut channels, &record.right);
    BusSample {
        data: SampleData::F32(channels),
        timestamp: Some(record.system_ts as f64 / MICROS_PER_SECOND),
    }
}

pub fn serialize_ext_signal(record: &ExtSignal) -> BusSample {
    BusSample {
        data: SampleData::I64(vec![record.device_ts, record.value]),
        timestamp: Some(record.system_ts as f64 / MICROS_PER_SECOND),
    }
}

pub fn serialize_time_sync(record: &TimeSync) -> BusSample {
    BusSample {
        data: SampleData::I64(vec![
            record.system_request_ts,
            record.device_ts,
            record.system_response_ts,
        ]),
        timestamp: Some(record.system_request_ts as f64 / MICROS_PER_SECOND),
    }
}

/// 8 × f32: `{x, y, z, valid}` per eye. Positioning carries no timestamp.
pub fn serialize_positioning(record: &Positioning) -> BusSample {
    let mut channels = Vec::with_capacity(POSITIONING_CHANNELS);
    for eye in [&record.left, &record.right] {
        channels.extend_from_slice(&eye.user_position);
        channels.push(eye.validity.flag());
    }
    BusSample {
        data: SampleData::F32(channels),
        timestamp: None,
    }
}

pub fn serialize_eye_image(record: &EyeImage) -> BusSample {
    BusSample {
        data: SampleData::Bytes(record.payload.clone()),
        timestamp: Some(record.system_ts as f64 / MICROS_PER_SECOND),
    }
}

/// The session's open outlets, keyed by the buffer the published records
/// come from (gaze and openness share one).
pub(crate) struct OutletSet {
    bus: Option<Arc<dyn StreamBus>>,
    outlets: RwLock<HashMap<StreamKind, Box<dyn OutletHandle>>>,
}

impl OutletSet {
    pub fn new(bus: Option<Arc<dyn StreamBus>>) -> Self {
        Self {
            bus,
            outlets: RwLock::new(HashMap::new()),
        }
    }

    /// Open the outlet for `stream`. `Ok(false)` when it is already open.
    pub fn open(
        &self,
        info: &TrackerInfo,
        stream: StreamKind,
        as_gif: bool,
    ) -> Result<bool, TrackerError> {
        let bus = self.bus.as_ref().ok_or_else(|| {
            TrackerError::InvalidOperation("no stream bus attached to this session".into())
        })?;
        let key = stream.buffer_kind();
        if self.outlets.read().contains_key(&key) {
            return Ok(false);
        }
        let meta = outlet_meta(info, stream, as_gif)?;
        log::info!("opening outlet {} ({})", meta.name, meta.content_type);
        let outlet = bus.create_outlet(meta)?;
        self.outlets.write().insert(key, outlet);
        Ok(true)
    }

    /// Release the outlet. Returns whether one was open.
    pub fn close(&self, stream: StreamKind) -> bool {
        self.outlets.write().remove(&stream.buffer_kind()).is_some()
    }

    pub fn is_open(&self, stream: StreamKind) -> bool {
        self.outlets.read().contains_key(&stream.buffer_kind())
    }

    pub fn close_all(&self) {
        self.outlets.write().clear();
    }

    /// Forward one serialized record to the stream's outlet, if open.
    pub fn publish(&self, stream: StreamKind, sample: BusSample) {
        let outlets = self.outlets.read();
        if let Some(outlet) = outlets.get(&stream.buffer_kind()) {
            outlet.push(sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EyeOpenness, GazeOrigin, GazePoint, Pupil, Validity};

    fn eye(base: f32) -> EyeData {
        EyeData {
            gaze_point: GazePoint {
                on_display_area: [base, base + 0.01],
                in_user_coords: [base + 0.1, base + 0.11, base + 0.12],
                validity: Validity::Valid,
                available: true,
            },
            pupil: Pupil {
                diameter: base + 0.2,
                validity: Validity::Invalid,
                available: true,
            },
            gaze_origin: GazeOrigin {
                in_user_coords: [base + 0.3, base + 0.31, base + 0.32],
                in_track_box_coords: [base + 0.4, base + 0.41, base + 0.42],
                validity: Validity::Valid,
                available: true,
            },
            openness: EyeOpenness {
                diameter: base + 0.5,
                validity: Validity::Valid,
                available: true,
            },
        }
    }

    #[test]
    fn gaze_layout_is_42_channels_left_eye_first() {
        let record = GazeRecord {
            device_ts: 1,
            system_ts: 2_000_000,
            left: eye(1.0),
            right: eye(2.0),
        };
        let sample = serialize_gaze(&record);
        let SampleData::F32(channels) = sample.data else {
            panic!("gaze must serialize as f32");
        };
        assert_eq!(channels.len(), GAZE_CHANNELS);
        // left eye block, normative order
        assert_eq!(&channels[0..2], &[1.0, 1.01]);
        assert_eq!(&channels[2..5], &[1.1, 1.11, 1.12]);
        assert_eq!(channels[5], 1.0); // gaze point valid
        assert_eq!(channels[6], 1.0); // gaze point available
        assert_eq!(channels[7], 1.2); // pupil diameter
        assert_eq!(channels[8], 0.0); // pupil invalid
        assert_eq!(channels[9], 1.0); // pupil available
        assert_eq!(&channels[10..13], &[1.3, 1.31, 1.32]);
        assert_eq!(&channels[13..16], &[1.4, 1.41, 1.42]);
        assert_eq!(channels[16], 1.0);
        assert_eq!(channels[17], 1.0);
        assert_eq!(channels[18], 1.5); // openness diameter
        assert_eq!(channels[19], 1.0);
        assert_eq!(channels[20], 1.0);
        // right eye starts at 21
        assert_eq!(&channels[21..23], &[2.0, 2.01]);
        assert_eq!(sample.timestamp, Some(2.0));
    }

    #[test]
    fn unavailable_gaze_serializes_nan_values_and_zero_flags() {
        let sample = serialize_gaze(&GazeRecord::default());
        let SampleData::F32(channels) = sample.data else {
            panic!("gaze must serialize as f32");
        };
        assert!(channels[0].is_nan());
        assert_eq!(channels[5], 0.0);
        assert_eq!(channels[6], 0.0);
    }

    #[test]
    fn time_sync_layout_and_timestamp() {
        let sample = serialize_time_sync(&TimeSync {
            system_request_ts: 1_000_000,
            device_ts: 2000,
            system_response_ts: 1_000_050,
        });
        assert_eq!(
            sample.data,
            SampleData::I64(vec![1_000_000, 2000, 1_000_050])
        );
        assert_eq!(sample.timestamp, Some(1.0));
    }

    #[test]
    fn ext_signal_layout() {
        let sample = serialize_ext_signal(&ExtSignal {
            device_ts: 77,
            system_ts: 500_000,
            value: 3,
            change_type: crate::types::ExtSignalChange::ValueChanged,
        });
        assert_eq!(sample.data, SampleData::I64(vec![77, 3]));
        assert_eq!(sample.timestamp, Some(0.5));
    }

    #[test]
    fn positioning_layout_has_no_timestamp() {
        let sample = serialize_positioning(&Positioning::default());
        let SampleData::F32(channels) = sample.data else {
            panic!("positioning must serialize as f32");
        };
        assert_eq!(channels.len(), POSITIONING_CHANNELS);
        assert!(sample.timestamp.is_none());
    }

    #[test]
    fn outlet_meta_names_and_rates() {
        let info = crate::sim::SimTracker::new("TX300-42").info();
        let meta = outlet_meta(&info, StreamKind::Gaze, false).unwrap();
        assert_eq!(meta.name, "Tracker_gaze");
        assert_eq!(meta.source_id, format!("Tracker_gaze@{}", info.serial));
        assert_eq!(meta.channel_count, GAZE_CHANNELS);
        assert!(meta.nominal_rate > 0.0);
        assert_eq!(meta.metadata_value("manufacturer"), Some("Tobii"));

        let sync = outlet_meta(&info, StreamKind::TimeSync, false).unwrap();
        assert_eq!(sync.nominal_rate, IRREGULAR_RATE);
        assert_eq!(sync.format, SampleFormat::I64);

        assert!(outlet_meta(&info, StreamKind::Notification, false).is_err());
    }
}
