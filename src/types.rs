use crate::error::TrackerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Data streams a tracker can deliver.
///
/// `EyeOpenness` is a device-side stream but shares the gaze buffer: openness
/// samples are always materialized inside [`GazeRecord`]s, so buffer
/// operations addressed to `EyeOpenness` operate on the gaze buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Gaze,
    EyeOpenness,
    EyeImage,
    ExtSignal,
    TimeSync,
    Positioning,
    Notification,
}

impl StreamKind {
    pub const ALL: [StreamKind; 7] = [
        StreamKind::Gaze,
        StreamKind::EyeOpenness,
        StreamKind::EyeImage,
        StreamKind::ExtSignal,
        StreamKind::TimeSync,
        StreamKind::Positioning,
        StreamKind::Notification,
    ];

    /// Canonical camelCase name, as used in outlet names.
    pub fn name(self) -> &'static str {
        match self {
            StreamKind::Gaze => "gaze",
            StreamKind::EyeOpenness => "eyeOpenness",
            StreamKind::EyeImage => "eyeImage",
            StreamKind::ExtSignal => "externalSignal",
            StreamKind::TimeSync => "timeSync",
            StreamKind::Positioning => "positioning",
            StreamKind::Notification => "notification",
        }
    }

    pub fn snake_name(self) -> &'static str {
        match self {
            StreamKind::Gaze => "gaze",
            StreamKind::EyeOpenness => "eye_openness",
            StreamKind::EyeImage => "eye_image",
            StreamKind::ExtSignal => "external_signal",
            StreamKind::TimeSync => "time_sync",
            StreamKind::Positioning => "positioning",
            StreamKind::Notification => "notification",
        }
    }

    /// The buffer this stream's records land in. Openness samples are merged
    /// into gaze records, so both map to the gaze buffer.
    pub fn buffer_kind(self) -> StreamKind {
        match self {
            StreamKind::EyeOpenness => StreamKind::Gaze,
            other => other,
        }
    }

    /// Positioning records carry no timestamps and support no time-range
    /// operations.
    pub fn has_time_key(self) -> bool {
        !matches!(self, StreamKind::Positioning)
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StreamKind {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StreamKind::ALL
            .into_iter()
            .find(|kind| s == kind.name() || s == kind.snake_name())
            .ok_or_else(|| {
                TrackerError::InvalidArgument(format!(
                    "unknown stream \"{s}\", expected one of: gaze, eyeOpenness, eyeImage, \
                     externalSignal, timeSync, positioning, notification"
                ))
            })
    }
}

/// End of the buffer count-based extractions are taken from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BufferSide {
    Start,
    End,
}

impl fmt::Display for BufferSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BufferSide::Start => f.write_str("start"),
            BufferSide::End => f.write_str("end"),
        }
    }
}

impl FromStr for BufferSide {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(BufferSide::Start),
            "end" => Ok(BufferSide::End),
            other => Err(TrackerError::InvalidArgument(format!(
                "unknown buffer side \"{other}\", expected \"start\" or \"end\""
            ))),
        }
    }
}

/// Which timestamp keys a time-range operation on an inlet buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampSource {
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Eye {
    Left,
    Right,
}

impl fmt::Display for Eye {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Eye::Left => f.write_str("left"),
            Eye::Right => f.write_str("right"),
        }
    }
}

impl FromStr for Eye {
    type Err = TrackerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(Eye::Left),
            "right" => Ok(Eye::Right),
            other => Err(TrackerError::InvalidArgument(format!(
                "unknown eye \"{other}\", expected \"left\" or \"right\""
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Validity {
    Valid,
    Invalid,
}

impl Validity {
    pub fn flag(self) -> f32 {
        match self {
            Validity::Valid => 1.0,
            Validity::Invalid => 0.0,
        }
    }

    pub fn from_flag(valid: bool) -> Self {
        if valid {
            Validity::Valid
        } else {
            Validity::Invalid
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazePoint {
    /// Normalized position on the display area.
    pub on_display_area: [f32; 2],
    /// Position in user coordinates (mm).
    pub in_user_coords: [f32; 3],
    pub validity: Validity,
    pub available: bool,
}

impl Default for GazePoint {
    fn default() -> Self {
        Self {
            on_display_area: [f32::NAN; 2],
            in_user_coords: [f32::NAN; 3],
            validity: Validity::Invalid,
            available: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pupil {
    /// Diameter in mm.
    pub diameter: f32,
    pub validity: Validity,
    pub available: bool,
}

impl Default for Pupil {
    fn default() -> Self {
        Self {
            diameter: f32::NAN,
            validity: Validity::Invalid,
            available: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GazeOrigin {
    pub in_user_coords: [f32; 3],
    pub in_track_box_coords: [f32; 3],
    pub validity: Validity,
    pub available: bool,
}

impl Default for GazeOrigin {
    fn default() -> Self {
        Self {
            in_user_coords: [f32::NAN; 3],
            in_track_box_coords: [f32::NAN; 3],
            validity: Validity::Invalid,
            available: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeOpenness {
    /// Openness in mm.
    pub diameter: f32,
    pub validity: Validity,
    pub available: bool,
}

impl Default for EyeOpenness {
    fn default() -> Self {
        Self {
            diameter: f32::NAN,
            validity: Validity::Invalid,
            available: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EyeData {
    pub gaze_point: GazePoint,
    pub pupil: Pupil,
    pub gaze_origin: GazeOrigin,
    pub openness: EyeOpenness,
}

/// One gaze sample, possibly merged from separate gaze and eye-openness
/// device callbacks. Sub-records that never arrived stay unavailable with
/// NaN values.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GazeRecord {
    /// Microsecond timestamp from the tracker's internal clock.
    pub device_ts: i64,
    /// Microsecond timestamp from the host clock at record production.
    pub system_ts: i64,
    pub left: EyeData,
    pub right: EyeData,
}

impl GazeRecord {
    /// Whether the gaze side of this record has been populated.
    pub fn has_gaze(&self) -> bool {
        self.left.gaze_origin.available
    }

    /// Whether the openness side of this record has been populated.
    pub fn has_openness(&self) -> bool {
        self.left.openness.available
    }

    /// Fill the gaze side from a raw device sample.
    pub fn apply_gaze(&mut self, raw: &RawGaze) {
        self.left.gaze_point = convert_gaze_point(&raw.left);
        self.left.pupil = convert_pupil(&raw.left);
        self.left.gaze_origin = convert_gaze_origin(&raw.left);
        self.right.gaze_point = convert_gaze_point(&raw.right);
        self.right.pupil = convert_pupil(&raw.right);
        self.right.gaze_origin = convert_gaze_origin(&raw.right);
    }

    /// Fill the openness side from a raw device sample.
    pub fn apply_openness(&mut self, raw: &RawEyeOpenness) {
        self.left.openness = EyeOpenness {
            diameter: raw.left_value,
            validity: Validity::from_flag(raw.left_valid),
            available: true,
        };
        self.right.openness = EyeOpenness {
            diameter: raw.right_value,
            validity: Validity::from_flag(raw.right_valid),
            available: true,
        };
    }

    pub fn from_gaze(raw: &RawGaze) -> Self {
        let mut record = GazeRecord {
            device_ts: raw.device_ts,
            system_ts: raw.system_ts,
            ..Default::default()
        };
        record.apply_gaze(raw);
        record
    }

    pub fn from_openness(raw: &RawEyeOpenness) -> Self {
        let mut record = GazeRecord {
            device_ts: raw.device_ts,
            system_ts: raw.system_ts,
            ..Default::default()
        };
        record.apply_openness(raw);
        record
    }
}

fn convert_gaze_point(raw: &RawGazeEye) -> GazePoint {
    GazePoint {
        on_display_area: raw.gaze_point_on_display,
        in_user_coords: raw.gaze_point_in_user,
        validity: Validity::from_flag(raw.gaze_point_valid),
        available: true,
    }
}

fn convert_pupil(raw: &RawGazeEye) -> Pupil {
    Pupil {
        diameter: raw.pupil_diameter,
        validity: Validity::from_flag(raw.pupil_valid),
        available: true,
    }
}

fn convert_gaze_origin(raw: &RawGazeEye) -> GazeOrigin {
    GazeOrigin {
        in_user_coords: raw.origin_in_user,
        in_track_box_coords: raw.origin_in_track_box,
        validity: Validity::from_flag(raw.origin_valid),
        available: true,
    }
}

/// Per-eye gaze data as delivered by the device callback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawGazeEye {
    pub gaze_point_on_display: [f32; 2],
    pub gaze_point_in_user: [f32; 3],
    pub gaze_point_valid: bool,
    pub pupil_diameter: f32,
    pub pupil_valid: bool,
    pub origin_in_user: [f32; 3],
    pub origin_in_track_box: [f32; 3],
    pub origin_valid: bool,
}

impl Default for RawGazeEye {
    fn default() -> Self {
        Self {
            gaze_point_on_display: [f32::NAN; 2],
            gaze_point_in_user: [f32::NAN; 3],
            gaze_point_valid: false,
            pupil_diameter: f32::NAN,
            pupil_valid: false,
            origin_in_user: [f32::NAN; 3],
            origin_in_track_box: [f32::NAN; 3],
            origin_valid: false,
        }
    }
}

/// Gaze sample as delivered by the device callback.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawGaze {
    pub device_ts: i64,
    pub system_ts: i64,
    pub left: RawGazeEye,
    pub right: RawGazeEye,
}

/// Eye-openness sample as delivered by the device callback.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RawEyeOpenness {
    pub device_ts: i64,
    pub system_ts: i64,
    pub left_value: f32,
    pub left_valid: bool,
    pub right_value: f32,
    pub right_valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EyeImageKind {
    FullImage,
    Cropped,
    MultiRoi,
    Unknown,
}

/// One eye camera frame. The record exclusively owns its payload bytes;
/// moves transfer ownership, clones are explicit and expensive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EyeImage {
    pub device_ts: i64,
    pub system_ts: i64,
    pub region_id: u32,
    pub region_top: u32,
    pub region_left: u32,
    pub bits_per_pixel: u32,
    pub padding_per_pixel: u32,
    pub width: u32,
    pub height: u32,
    pub kind: EyeImageKind,
    pub camera_id: u32,
    pub is_gif: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExtSignalChange {
    ValueChanged,
    InitialValue,
    ConnectionRestored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtSignal {
    pub device_ts: i64,
    pub system_ts: i64,
    pub value: i64,
    pub change_type: ExtSignalChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSync {
    /// Host clock when the sync request was sent; the time key for this
    /// stream.
    pub system_request_ts: i64,
    pub device_ts: i64,
    pub system_response_ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyePosition {
    /// Normalized position in the track box.
    pub user_position: [f32; 3],
    pub validity: Validity,
}

impl Default for EyePosition {
    fn default() -> Self {
        Self {
            user_position: [f32::NAN; 3],
            validity: Validity::Invalid,
        }
    }
}

/// User position guide sample. Carries no timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Positioning {
    pub left: EyePosition,
    pub right: EyePosition,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub system_ts: i64,
    pub kind: String,
    pub value: Option<f64>,
}

/// Selects the key field time-range operations search on.
pub trait TimeKeyed {
    fn time_key(&self) -> i64;
}

impl TimeKeyed for GazeRecord {
    fn time_key(&self) -> i64 {
        self.system_ts
    }
}

impl TimeKeyed for EyeImage {
    fn time_key(&self) -> i64 {
        self.system_ts
    }
}

impl TimeKeyed for ExtSignal {
    fn time_key(&self) -> i64 {
        self.system_ts
    }
}

impl TimeKeyed for TimeSync {
    fn time_key(&self) -> i64 {
        self.system_request_ts
    }
}

impl TimeKeyed for Notification {
    fn time_key(&self) -> i64 {
        self.system_ts
    }
}

/// Records extracted from one stream's buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StreamData {
    Gaze(Vec<GazeRecord>),
    EyeImage(Vec<EyeImage>),
    ExtSignal(Vec<ExtSignal>),
    TimeSync(Vec<TimeSync>),
    Positioning(Vec<Positioning>),
    Notification(Vec<Notification>),
}

impl StreamData {
    pub fn len(&self) -> usize {
        match self {
            StreamData::Gaze(v) => v.len(),
            StreamData::EyeImage(v) => v.len(),
            StreamData::ExtSignal(v) => v.len(),
            StreamData::TimeSync(v) => v.len(),
            StreamData::Positioning(v) => v.len(),
            StreamData::Notification(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_gaze(self) -> Result<Vec<GazeRecord>, TrackerError> {
        match self {
            StreamData::Gaze(v) => Ok(v),
            other => Err(TrackerError::InvalidOperation(format!(
                "expected gaze records, got {other:?}"
            ))),
        }
    }

    pub fn into_time_sync(self) -> Result<Vec<TimeSync>, TrackerError> {
        match self {
            StreamData::TimeSync(v) => Ok(v),
            other => Err(TrackerError::InvalidOperation(format!(
                "expected time sync records, got {other:?}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogSource {
    StreamEngine,
    Sdk,
    Firmware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Error,
    Warning,
    Information,
    Debug,
    Trace,
}

/// One entry of the process-wide log collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    DriverLog {
        system_ts: i64,
        source: LogSource,
        level: LogLevel,
        text: String,
    },
    StreamError {
        serial: String,
        system_ts: i64,
        stream: StreamKind,
        source: String,
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalibrationRequest {
    Enter,
    CollectData {
        point: [f32; 2],
        eye: Option<Eye>,
    },
    DiscardData {
        point: [f32; 2],
        eye: Option<Eye>,
    },
    Compute,
    GetData,
    ApplyData(Vec<u8>),
    Exit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CalibrationState {
    NotEntered = 0,
    AwaitingPoint = 1,
    CollectingData = 2,
    DiscardingData = 3,
    Computing = 4,
    GettingData = 5,
    ApplyingData = 6,
    Left = 7,
}

impl CalibrationState {
    pub(crate) fn from_u8(raw: u8) -> CalibrationState {
        match raw {
            1 => CalibrationState::AwaitingPoint,
            2 => CalibrationState::CollectingData,
            3 => CalibrationState::DiscardingData,
            4 => CalibrationState::Computing,
            5 => CalibrationState::GettingData,
            6 => CalibrationState::ApplyingData,
            7 => CalibrationState::Left,
            _ => CalibrationState::NotEntered,
        }
    }
}

/// Status of one completed calibration request, wrapping the device status
/// verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CalibrationStatus {
    Ok,
    Failed { code: i32, explanation: String },
}

impl CalibrationStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, CalibrationStatus::Ok)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub position_on_display: [f32; 2],
    pub validity: Validity,
}

/// Per-point result of compute-and-apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub position: [f32; 2],
    pub samples_left: Vec<CalibrationSample>,
    pub samples_right: Vec<CalibrationSample>,
}

/// Result published by the calibration worker for one completed request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationOutcome {
    pub request: CalibrationRequest,
    pub status: CalibrationStatus,
    /// Populated for `Compute`.
    pub points: Option<Vec<CalibrationPoint>>,
    /// Populated for `GetData`.
    pub data: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LicenseResult {
    Ok,
    Tampered,
    UnsignedApplication,
    Expired,
    Premature,
    InvalidProcess,
    InvalidSerial,
    InvalidModel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    CanSetDisplayArea,
    HasExternalSignal,
    HasEyeImages,
    HasGazeData,
    HasEyeOpennessData,
    CanDoScreenBasedCalibration,
    CanDoMonocularCalibration,
}

/// Device identity and capability info, re-read whenever a setter changes
/// device state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerInfo {
    pub address: String,
    pub serial: String,
    pub model: String,
    pub device_name: String,
    pub firmware_version: String,
    pub runtime_version: String,
    pub tracking_mode: String,
    pub frequency: f32,
    pub supported_frequencies: Vec<f32>,
    pub supported_tracking_modes: Vec<String>,
    pub capabilities: Vec<Capability>,
}

impl TrackerInfo {
    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// Which streams this device can deliver.
    pub fn has_stream(&self, stream: StreamKind) -> bool {
        match stream {
            StreamKind::Gaze => self.has_capability(Capability::HasGazeData),
            StreamKind::EyeOpenness => self.has_capability(Capability::HasEyeOpennessData),
            StreamKind::EyeImage => self.has_capability(Capability::HasEyeImages),
            StreamKind::ExtSignal => self.has_capability(Capability::HasExternalSignal),
            // every tracker provides these
            StreamKind::TimeSync | StreamKind::Positioning | StreamKind::Notification => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayArea {
    pub top_left: [f32; 3],
    pub top_right: [f32; 3],
    pub bottom_left: [f32; 3],
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackBox {
    pub back_lower_left: [f32; 3],
    pub back_lower_right: [f32; 3],
    pub back_upper_left: [f32; 3],
    pub back_upper_right: [f32; 3],
    pub front_lower_left: [f32; 3],
    pub front_lower_right: [f32; 3],
    pub front_upper_left: [f32; 3],
    pub front_upper_right: [f32; 3],
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_names_round_trip() {
        for kind in StreamKind::ALL {
            assert_eq!(kind.name().parse::<StreamKind>().unwrap(), kind);
            assert_eq!(kind.snake_name().parse::<StreamKind>().unwrap(), kind);
        }
    }

    #[test]
    fn unknown_stream_name_is_invalid_argument() {
        let err = "blink".parse::<StreamKind>().unwrap_err();
        assert!(matches!(err, TrackerError::InvalidArgument(_)));
    }

    #[test]
    fn openness_shares_gaze_buffer() {
        assert_eq!(StreamKind::EyeOpenness.buffer_kind(), StreamKind::Gaze);
        assert_eq!(StreamKind::TimeSync.buffer_kind(), StreamKind::TimeSync);
    }

    #[test]
    fn default_gaze_record_is_unavailable_nan() {
        let record = GazeRecord::default();
        assert!(!record.has_gaze());
        assert!(!record.has_openness());
        assert!(record.left.pupil.diameter.is_nan());
        assert!(record.right.gaze_point.on_display_area[0].is_nan());
    }

    #[test]
    fn raw_gaze_fills_gaze_side_only() {
        let raw = RawGaze {
            device_ts: 1000,
            system_ts: 2000,
            ..Default::default()
        };
        let record = GazeRecord::from_gaze(&raw);
        assert!(record.has_gaze());
        assert!(!record.has_openness());
        assert_eq!(record.device_ts, 1000);
        assert_eq!(record.system_ts, 2000);
    }

    #[test]
    fn time_sync_keys_on_request_timestamp() {
        let sync = TimeSync {
            system_request_ts: 10,
            device_ts: 20,
            system_response_ts: 30,
        };
        assert_eq!(sync.time_key(), 10);
    }

    #[test]
    fn buffer_side_parse() {
        assert_eq!("start".parse::<BufferSide>().unwrap(), BufferSide::Start);
        assert!("middle".parse::<BufferSide>().is_err());
    }

    #[test]
    fn records_serialize_for_downstream_consumers() {
        let record = GazeRecord {
            device_ts: 1000,
            system_ts: 2000,
            ..Default::default()
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("\"device_ts\":1000"));

        let entry = LogEntry::StreamError {
            serial: "TX300".into(),
            system_ts: 5,
            stream: StreamKind::Gaze,
            source: "stream pump".into(),
            text: "dropped".into(),
        };
        let json = serde_json::to_string(&entry).unwrap();
        let back: LogEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
    }
}
