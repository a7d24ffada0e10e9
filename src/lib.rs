pub mod buffer;
pub mod bus;
pub mod calibration;
pub mod config;
pub mod device;
mod dispatch;
pub mod error;
pub mod inlet;
pub mod logging;
pub mod merge;
pub mod outlet;
pub mod session;
pub mod sim;
pub mod types;

pub use buffer::TimeBuffer;
pub use bus::{
    BusSample, InletHandle, OutletHandle, SampleData, SampleFormat, StreamBus, StreamMeta,
    IRREGULAR_RATE,
};
pub use calibration::CalibrationWorker;
pub use config::{load_config, load_config_or_default, AppConfig, BufferConfig, TrackerConfig};
pub use device::{
    DriverLogEvent, DriverLogSink, StreamErrorEvent, StreamErrorSink, StreamSink,
    SubscribeOptions, TrackerDevice, TrackerDriver,
};
pub use error::{DeviceFailure, DeviceResult, TrackerError};
pub use inlet::{InletData, InletId, InletManager, InletSample};
pub use logging::{collector, get_log, start_logging, stop_logging, LogCollector};
pub use merge::GazeMerger;
pub use session::{connected_serials, find_all_trackers, system_timestamp, Tracker, TrackerBuilder};
pub use sim::{LoopbackBus, SimTracker};
pub use types::{
    BufferSide, CalibrationOutcome, CalibrationPoint, CalibrationRequest, CalibrationSample,
    CalibrationState, CalibrationStatus, Capability, DisplayArea, Eye, EyeData, EyeImage,
    EyeImageKind, EyeOpenness, EyePosition, ExtSignal, ExtSignalChange, GazeOrigin, GazePoint,
    GazeRecord, LicenseResult, LogEntry, LogLevel, LogSource, Notification, Positioning, Pupil,
    RawEyeOpenness, RawGaze, RawGazeEye, StreamData, StreamKind, TimeKeyed, TimeSync,
    TimestampSource, TrackBox, TrackerInfo, Validity,
};
