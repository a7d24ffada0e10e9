//! Vendor SDK surface
//!
//! The device SDK is an external collaborator: it invokes registered
//! callbacks on threads it owns and exposes blocking subscribe/unsubscribe
//! and calibration entry points. These traits model that surface as typed
//! handler registration so no `user_data` pointers or global mutable state
//! are needed; the session registers one [`StreamSink`] per subscription and
//! the device calls the matching method for every sample.

use crate::error::DeviceResult;
use crate::types::{
    CalibrationPoint, DisplayArea, Eye, EyeImage, ExtSignal, LicenseResult, LogLevel, LogSource,
    Notification, Positioning, RawEyeOpenness, RawGaze, StreamKind, TimeSync, TrackBox,
    TrackerInfo,
};
use std::sync::Arc;

/// Receives records delivered by the device on its own threads.
///
/// Implementations must be cheap and non-blocking apart from briefly taking
/// the target buffer's writer lock.
pub trait StreamSink: Send + Sync {
    fn on_gaze(&self, _raw: RawGaze) {}
    fn on_eye_openness(&self, _raw: RawEyeOpenness) {}
    fn on_eye_image(&self, _image: EyeImage) {}
    fn on_ext_signal(&self, _signal: ExtSignal) {}
    fn on_time_sync(&self, _sync: TimeSync) {}
    fn on_positioning(&self, _positioning: Positioning) {}
    fn on_notification(&self, _notification: Notification) {}
}

/// Error reported by the device for one of its streams.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamErrorEvent {
    pub system_ts: i64,
    pub stream: StreamKind,
    pub source: String,
    pub text: String,
}

pub type StreamErrorSink = Arc<dyn Fn(StreamErrorEvent) + Send + Sync>;

/// Log line emitted by the driver itself (not tied to one tracker).
#[derive(Debug, Clone, PartialEq)]
pub struct DriverLogEvent {
    pub system_ts: i64,
    pub source: LogSource,
    pub level: LogLevel,
    pub text: String,
}

pub type DriverLogSink = Arc<dyn Fn(DriverLogEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SubscribeOptions {
    /// Deliver eye images gif-compressed instead of raw.
    pub eye_image_as_gif: bool,
}

/// One connected eye tracker.
///
/// `subscribe`/`unsubscribe` may block in vendor code. `unsubscribe` is
/// synchronous: once it returns, no further callback for that stream will be
/// invoked, with in-flight callbacks drained before returning. The
/// calibration calls block for the duration of the device operation and are
/// meant to be issued from the calibration worker thread only.
pub trait TrackerDevice: Send + Sync {
    fn identity(&self) -> DeviceResult<TrackerInfo>;
    fn track_box(&self) -> DeviceResult<TrackBox>;
    fn display_area(&self) -> DeviceResult<DisplayArea>;

    fn set_device_name(&self, name: &str) -> DeviceResult<()>;
    fn set_gaze_frequency(&self, hz: f32) -> DeviceResult<()>;
    fn set_tracking_mode(&self, mode: &str) -> DeviceResult<()>;
    fn apply_licenses(&self, licenses: &[Vec<u8>]) -> DeviceResult<Vec<LicenseResult>>;
    fn clear_licenses(&self) -> DeviceResult<()>;

    fn subscribe(
        &self,
        stream: StreamKind,
        options: SubscribeOptions,
        sink: Arc<dyn StreamSink>,
    ) -> DeviceResult<()>;
    fn unsubscribe(&self, stream: StreamKind) -> DeviceResult<()>;
    fn subscribe_stream_errors(&self, sink: StreamErrorSink) -> DeviceResult<()>;
    fn unsubscribe_stream_errors(&self) -> DeviceResult<()>;

    fn calibration_enter(&self) -> DeviceResult<()>;
    fn calibration_leave(&self) -> DeviceResult<()>;
    fn calibration_collect(&self, point: [f32; 2], eye: Option<Eye>) -> DeviceResult<()>;
    fn calibration_discard(&self, point: [f32; 2], eye: Option<Eye>) -> DeviceResult<()>;
    fn calibration_compute_apply(&self) -> DeviceResult<Vec<CalibrationPoint>>;
    fn calibration_data(&self) -> DeviceResult<Vec<u8>>;
    fn calibration_apply_data(&self, data: &[u8]) -> DeviceResult<()>;
}

/// Driver-level entry points: device discovery and the driver log stream.
pub trait TrackerDriver: Send + Sync {
    fn find_all(&self) -> DeviceResult<Vec<TrackerInfo>>;
    fn open(&self, address: &str) -> DeviceResult<Arc<dyn TrackerDevice>>;
    /// Host clock in microseconds, as the driver stamps records with.
    fn system_timestamp(&self) -> i64;
    fn subscribe_log(&self, sink: DriverLogSink) -> DeviceResult<()>;
    fn unsubscribe_log(&self) -> DeviceResult<()>;
}
