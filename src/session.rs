//! Tracker session
//!
//! One [`Tracker`] per connected eye tracker: it owns the device handle, the
//! per-stream buffers, subscription and merge-policy state, the open
//! outlets and the calibration worker, and tears everything down
//! deterministically on drop. Stream addressing is by [`StreamKind`]; the
//! buffer surface returns the [`StreamData`] tagged variant.

use crate::buffer::TimeBuffer;
use crate::bus::StreamBus;
use crate::calibration::CalibrationWorker;
use crate::config::BufferConfig;
use crate::device::{StreamErrorEvent, SubscribeOptions, TrackerDevice, TrackerDriver};
use crate::error::TrackerError;
use crate::logging;
use crate::merge::GazeMerger;
use crate::outlet::OutletSet;
use crate::types::{
    BufferSide, CalibrationOutcome, CalibrationRequest, CalibrationState, Capability, DisplayArea,
    Eye, EyeImage, ExtSignal, GazeRecord, LicenseResult, LogEntry, Notification, Positioning,
    StreamData, StreamKind, TimeSync, TrackBox, TrackerInfo,
};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct Buffers {
    pub gaze: TimeBuffer<GazeRecord>,
    pub eye_image: TimeBuffer<EyeImage>,
    pub ext_signal: TimeBuffer<ExtSignal>,
    pub time_sync: TimeBuffer<TimeSync>,
    pub positioning: TimeBuffer<Positioning>,
    pub notification: TimeBuffer<Notification>,
}

impl Buffers {
    fn new() -> Self {
        Self {
            gaze: TimeBuffer::new(),
            eye_image: TimeBuffer::new(),
            ext_signal: TimeBuffer::new(),
            time_sync: TimeBuffer::new(),
            positioning: TimeBuffer::new(),
            notification: TimeBuffer::new(),
        }
    }

    fn reserve(&self, stream: StreamKind, hint: usize) {
        match stream.buffer_kind() {
            StreamKind::Gaze => self.gaze.reserve(hint),
            StreamKind::EyeImage => self.eye_image.reserve(hint),
            StreamKind::ExtSignal => self.ext_signal.reserve(hint),
            StreamKind::TimeSync => self.time_sync.reserve(hint),
            StreamKind::Positioning => self.positioning.reserve(hint),
            StreamKind::Notification => self.notification.reserve(hint),
            StreamKind::EyeOpenness => unreachable!("openness maps to the gaze buffer"),
        }
    }

    fn clear(&self, stream: StreamKind) {
        match stream.buffer_kind() {
            StreamKind::Gaze => self.gaze.clear(),
            StreamKind::EyeImage => self.eye_image.clear(),
            StreamKind::ExtSignal => self.ext_signal.clear(),
            StreamKind::TimeSync => self.time_sync.clear(),
            StreamKind::Positioning => self.positioning.clear(),
            StreamKind::Notification => self.notification.clear(),
            StreamKind::EyeOpenness => unreachable!("openness maps to the gaze buffer"),
        }
    }
}

pub(crate) struct Recording {
    pub gaze: AtomicBool,
    pub eye_openness: AtomicBool,
    pub eye_image: AtomicBool,
    pub ext_signal: AtomicBool,
    pub time_sync: AtomicBool,
    pub positioning: AtomicBool,
    pub notification: AtomicBool,
    /// The merge-openness-into-gaze policy flag.
    pub merge_openness: AtomicBool,
}

impl Recording {
    fn new() -> Self {
        Self {
            gaze: AtomicBool::new(false),
            eye_openness: AtomicBool::new(false),
            eye_image: AtomicBool::new(false),
            ext_signal: AtomicBool::new(false),
            time_sync: AtomicBool::new(false),
            positioning: AtomicBool::new(false),
            notification: AtomicBool::new(false),
            merge_openness: AtomicBool::new(false),
        }
    }

    fn flag(&self, stream: StreamKind) -> &AtomicBool {
        match stream {
            StreamKind::Gaze => &self.gaze,
            StreamKind::EyeOpenness => &self.eye_openness,
            StreamKind::EyeImage => &self.eye_image,
            StreamKind::ExtSignal => &self.ext_signal,
            StreamKind::TimeSync => &self.time_sync,
            StreamKind::Positioning => &self.positioning,
            StreamKind::Notification => &self.notification,
        }
    }
}

pub(crate) struct TrackerShared {
    pub device: Arc<dyn TrackerDevice>,
    pub info: RwLock<TrackerInfo>,
    pub buffers: Buffers,
    pub recording: Recording,
    pub staging: Mutex<GazeMerger>,
    pub staging_empty: AtomicBool,
    pub outlets: OutletSet,
    pub eye_image_as_gif: AtomicBool,
}

/// Session handle for one eye tracker.
pub struct Tracker {
    shared: Arc<TrackerShared>,
    buffers_config: BufferConfig,
    calibration: Mutex<Option<CalibrationWorker>>,
    calibration_monocular: AtomicBool,
}

pub struct TrackerBuilder {
    source: TrackerSource,
    bus: Option<Arc<dyn StreamBus>>,
    buffers: BufferConfig,
}

enum TrackerSource {
    Address(Arc<dyn TrackerDriver>, String),
    Device(Arc<dyn TrackerDevice>),
}

impl TrackerBuilder {
    /// Attach a stream bus so outlets can be opened.
    pub fn bus(mut self, bus: Arc<dyn StreamBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Override the default buffer reservations.
    pub fn buffers(mut self, buffers: BufferConfig) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn build(self) -> Result<Tracker, TrackerError> {
        let device = match self.source {
            TrackerSource::Address(driver, address) => driver.open(&address)?,
            TrackerSource::Device(device) => device,
        };
        Tracker::init(device, self.bus, self.buffers)
    }
}

impl Tracker {
    /// Connect by device network address.
    pub fn connect(driver: Arc<dyn TrackerDriver>, address: &str) -> Result<Self, TrackerError> {
        Self::builder_for_address(driver, address).build()
    }

    /// Wrap an already-opened device handle.
    pub fn from_device(device: Arc<dyn TrackerDevice>) -> Result<Self, TrackerError> {
        Self::builder_for_device(device).build()
    }

    pub fn builder_for_address(driver: Arc<dyn TrackerDriver>, address: &str) -> TrackerBuilder {
        TrackerBuilder {
            source: TrackerSource::Address(driver, address.to_string()),
            bus: None,
            buffers: BufferConfig::default(),
        }
    }

    pub fn builder_for_device(device: Arc<dyn TrackerDevice>) -> TrackerBuilder {
        TrackerBuilder {
            source: TrackerSource::Device(device),
            bus: None,
            buffers: BufferConfig::default(),
        }
    }

    fn init(
        device: Arc<dyn TrackerDevice>,
        bus: Option<Arc<dyn StreamBus>>,
        buffers_config: BufferConfig,
    ) -> Result<Self, TrackerError> {
        let info = device.identity()?;
        log::info!(
            "connected to {} ({}, serial {})",
            info.model,
            info.address,
            info.serial
        );

        let shared = Arc::new(TrackerShared {
            device,
            info: RwLock::new(info),
            buffers: Buffers::new(),
            recording: Recording::new(),
            staging: Mutex::new(GazeMerger::new()),
            staging_empty: AtomicBool::new(true),
            outlets: OutletSet::new(bus),
            eye_image_as_gif: AtomicBool::new(false),
        });

        let session = Self {
            shared,
            buffers_config,
            calibration: Mutex::new(None),
            calibration_monocular: AtomicBool::new(false),
        };

        // stream errors become log entries tagged with this device's serial
        let serial = session.serial();
        session
            .shared
            .device
            .subscribe_stream_errors(Arc::new(move |event: StreamErrorEvent| {
                logging::collector().push(LogEntry::StreamError {
                    serial: serial.clone(),
                    system_ts: event.system_ts,
                    stream: event.stream,
                    source: event.source,
                    text: event.text,
                });
            }))?;

        registry::register(&session.shared);
        session.start(StreamKind::Notification)?;
        Ok(session)
    }

    pub fn info(&self) -> TrackerInfo {
        self.shared.info.read().clone()
    }

    pub fn serial(&self) -> String {
        self.shared.info.read().serial.clone()
    }

    /// Re-read identity and capability info from the device.
    pub fn refresh_info(&self) -> Result<TrackerInfo, TrackerError> {
        let info = self.shared.device.identity()?;
        *self.shared.info.write() = info.clone();
        Ok(info)
    }

    pub fn track_box(&self) -> Result<TrackBox, TrackerError> {
        Ok(self.shared.device.track_box()?)
    }

    pub fn display_area(&self) -> Result<DisplayArea, TrackerError> {
        Ok(self.shared.device.display_area()?)
    }

    pub fn set_device_name(&self, name: &str) -> Result<(), TrackerError> {
        self.shared.device.set_device_name(name)?;
        self.refresh_info()?;
        Ok(())
    }

    pub fn set_gaze_frequency(&self, hz: f32) -> Result<(), TrackerError> {
        self.shared.device.set_gaze_frequency(hz)?;
        self.refresh_info()?;
        Ok(())
    }

    pub fn set_tracking_mode(&self, mode: &str) -> Result<(), TrackerError> {
        self.shared.device.set_tracking_mode(mode)?;
        self.refresh_info()?;
        Ok(())
    }

    pub fn apply_licenses(&self, licenses: &[Vec<u8>]) -> Result<Vec<LicenseResult>, TrackerError> {
        let results = self.shared.device.apply_licenses(licenses)?;
        self.refresh_info()?;
        Ok(results)
    }

    pub fn clear_licenses(&self) -> Result<(), TrackerError> {
        self.shared.device.clear_licenses()?;
        self.refresh_info()?;
        Ok(())
    }

    pub fn has_stream(&self, stream: StreamKind) -> bool {
        self.shared.info.read().has_stream(stream)
    }

    pub fn is_recording(&self, stream: StreamKind) -> bool {
        self.shared.recording.flag(stream).load(Ordering::SeqCst)
    }

    /// Whether openness samples are being merged into gaze records.
    pub fn include_eye_openness_in_gaze(&self) -> bool {
        self.shared.recording.merge_openness.load(Ordering::SeqCst)
    }

    /// Turn the merge policy on or off. Returns the previous flag.
    ///
    /// Requires the eye-openness capability when turning on. While gaze is
    /// recording, the openness stream is started or stopped to match;
    /// turning the policy off flushes staging to the gaze buffer.
    pub fn set_include_eye_openness_in_gaze(&self, include: bool) -> Result<bool, TrackerError> {
        if include && !self.has_stream(StreamKind::EyeOpenness) {
            return Err(TrackerError::CapabilityUnavailable(
                "this tracker does not provide the eyeOpenness stream".into(),
            ));
        }

        let previous = self
            .shared
            .recording
            .merge_openness
            .swap(include, Ordering::SeqCst);

        let recording_gaze = self.is_recording(StreamKind::Gaze);
        let recording_openness = self.is_recording(StreamKind::EyeOpenness);
        if recording_gaze && !include && recording_openness {
            self.stop(StreamKind::EyeOpenness)?;
        } else if recording_gaze && include && !recording_openness {
            self.start(StreamKind::EyeOpenness)?;
        }

        if !include {
            self.shared.flush_staging();
        }
        Ok(previous)
    }

    /// Start a stream with default options.
    pub fn start(&self, stream: StreamKind) -> Result<(), TrackerError> {
        self.start_with(stream, None, None)
    }

    /// Start a stream. `buffer_hint` grows the buffer reservation (never
    /// shrinks); `as_gif` selects gif-compressed eye images. Starting an
    /// already-recording stream is a no-op; under the merge policy starting
    /// gaze or openness also starts the other.
    pub fn start_with(
        &self,
        stream: StreamKind,
        buffer_hint: Option<usize>,
        as_gif: Option<bool>,
    ) -> Result<(), TrackerError> {
        let merge = self.include_eye_openness_in_gaze();

        if self.is_recording(stream) {
            // eye image restarts may still switch between gif and raw
            if stream != StreamKind::EyeImage
                || as_gif.unwrap_or(false) == self.shared.eye_image_as_gif.load(Ordering::SeqCst)
            {
                return Ok(());
            }
            self.shared.device.unsubscribe(StreamKind::EyeImage)?;
            self.shared
                .recording
                .flag(StreamKind::EyeImage)
                .store(false, Ordering::SeqCst);
        }

        let hint = buffer_hint.unwrap_or_else(|| self.buffers_config.reservation(stream));
        self.shared.buffers.reserve(stream, hint);

        let as_gif = as_gif.unwrap_or(false);
        let options = SubscribeOptions {
            eye_image_as_gif: as_gif,
        };
        let sink = Arc::new(crate::dispatch::Dispatcher::new(self.shared.clone()));
        self.shared.device.subscribe(stream, options, sink)?;
        self.shared
            .recording
            .flag(stream)
            .store(true, Ordering::SeqCst);
        if stream == StreamKind::EyeImage {
            self.shared.eye_image_as_gif.store(as_gif, Ordering::SeqCst);
        }
        log::debug!("started {stream} stream");

        // under the merge policy the two gaze-path streams run together
        if merge {
            if stream == StreamKind::Gaze && !self.is_recording(StreamKind::EyeOpenness) {
                self.start_with(StreamKind::EyeOpenness, buffer_hint, None)?;
            } else if stream == StreamKind::EyeOpenness && !self.is_recording(StreamKind::Gaze) {
                self.start_with(StreamKind::Gaze, buffer_hint, None)?;
            }
        }
        Ok(())
    }

    /// Stop a stream, optionally clearing its buffer (default: the
    /// configured stop policy). Idempotent; under the merge policy stopping
    /// gaze or openness also stops the other.
    pub fn stop_with(&self, stream: StreamKind, clear: Option<bool>) -> Result<(), TrackerError> {
        let clear = clear.unwrap_or(self.buffers_config.stop_clears_buffer);

        if self.is_recording(stream) {
            self.shared.device.unsubscribe(stream)?;
            self.shared
                .recording
                .flag(stream)
                .store(false, Ordering::SeqCst);
            log::debug!("stopped {stream} stream");
        }

        if matches!(stream, StreamKind::Gaze | StreamKind::EyeOpenness) {
            // merged records that will never complete are flushed now that
            // one of their feeds is gone
            self.shared.flush_staging();
        }
        if clear {
            self.shared.buffers.clear(stream);
        }

        let merge = self.include_eye_openness_in_gaze();
        if merge && stream == StreamKind::EyeOpenness && self.is_recording(StreamKind::Gaze) {
            self.stop_with(StreamKind::Gaze, Some(clear))?;
        } else if merge && stream == StreamKind::Gaze && self.is_recording(StreamKind::EyeOpenness)
        {
            self.stop_with(StreamKind::EyeOpenness, Some(clear))?;
        }
        Ok(())
    }

    pub fn stop(&self, stream: StreamKind) -> Result<(), TrackerError> {
        self.stop_with(stream, None)
    }

    /// Copy up to `count` records (default: the newest one).
    pub fn peek_n(
        &self,
        stream: StreamKind,
        count: Option<usize>,
        side: Option<BufferSide>,
    ) -> Result<StreamData, TrackerError> {
        let count = count.unwrap_or(1);
        let side = side.unwrap_or(BufferSide::End);
        let buffers = &self.shared.buffers;
        Ok(match stream.buffer_kind() {
            StreamKind::Gaze => StreamData::Gaze(buffers.gaze.peek_n(count, side)),
            StreamKind::EyeImage => StreamData::EyeImage(buffers.eye_image.peek_n(count, side)),
            StreamKind::ExtSignal => StreamData::ExtSignal(buffers.ext_signal.peek_n(count, side)),
            StreamKind::TimeSync => StreamData::TimeSync(buffers.time_sync.peek_n(count, side)),
            StreamKind::Positioning => {
                StreamData::Positioning(buffers.positioning.peek_n(count, side))
            }
            StreamKind::Notification => {
                StreamData::Notification(buffers.notification.peek_n(count, side))
            }
            StreamKind::EyeOpenness => unreachable!("openness maps to the gaze buffer"),
        })
    }

    /// Move out up to `count` records (default: everything, oldest first).
    pub fn consume_n(
        &self,
        stream: StreamKind,
        count: Option<usize>,
        side: Option<BufferSide>,
    ) -> Result<StreamData, TrackerError> {
        let count = count.unwrap_or(usize::MAX);
        let side = side.unwrap_or(BufferSide::Start);
        let buffers = &self.shared.buffers;
        Ok(match stream.buffer_kind() {
            StreamKind::Gaze => StreamData::Gaze(buffers.gaze.consume_n(count, side)),
            StreamKind::EyeImage => StreamData::EyeImage(buffers.eye_image.consume_n(count, side)),
            StreamKind::ExtSignal => {
                StreamData::ExtSignal(buffers.ext_signal.consume_n(count, side))
            }
            StreamKind::TimeSync => StreamData::TimeSync(buffers.time_sync.consume_n(count, side)),
            StreamKind::Positioning => {
                StreamData::Positioning(buffers.positioning.consume_n(count, side))
            }
            StreamKind::Notification => {
                StreamData::Notification(buffers.notification.consume_n(count, side))
            }
            StreamKind::EyeOpenness => unreachable!("openness maps to the gaze buffer"),
        })
    }

    /// Copy all records in `[t_lo, t_hi]` (defaults: the whole buffer).
    /// The key is `system_request_ts` for time sync, `system_ts` otherwise.
    pub fn peek_time_range(
        &self,
        stream: StreamKind,
        t_lo: Option<i64>,
        t_hi: Option<i64>,
    ) -> Result<StreamData, TrackerError> {
        let (t_lo, t_hi) = (t_lo.unwrap_or(i64::MIN), t_hi.unwrap_or(i64::MAX));
        let buffers = &self.shared.buffers;
        Ok(match self.timed_buffer_kind(stream)? {
            StreamKind::Gaze => StreamData::Gaze(buffers.gaze.peek_time_range(t_lo, t_hi)),
            StreamKind::EyeImage => {
                StreamData::EyeImage(buffers.eye_image.peek_time_range(t_lo, t_hi))
            }
            StreamKind::ExtSignal => {
                StreamData::ExtSignal(buffers.ext_signal.peek_time_range(t_lo, t_hi))
            }
            StreamKind::TimeSync => {
                StreamData::TimeSync(buffers.time_sync.peek_time_range(t_lo, t_hi))
            }
            StreamKind::Notification => {
                StreamData::Notification(buffers.notification.peek_time_range(t_lo, t_hi))
            }
            _ => unreachable!("rejected by timed_buffer_kind"),
        })
    }

    /// Move out all records in `[t_lo, t_hi]` (defaults: the whole buffer).
    pub fn consume_time_range(
        &self,
        stream: StreamKind,
        t_lo: Option<i64>,
        t_hi: Option<i64>,
    ) -> Result<StreamData, TrackerError> {
        let (t_lo, t_hi) = (t_lo.unwrap_or(i64::MIN), t_hi.unwrap_or(i64::MAX));
        let buffers = &self.shared.buffers;
        Ok(match self.timed_buffer_kind(stream)? {
            StreamKind::Gaze => StreamData::Gaze(buffers.gaze.consume_time_range(t_lo, t_hi)),
            StreamKind::EyeImage => {
                StreamData::EyeImage(buffers.eye_image.consume_time_range(t_lo, t_hi))
            }
            StreamKind::ExtSignal => {
                StreamData::ExtSignal(buffers.ext_signal.consume_time_range(t_lo, t_hi))
            }
            StreamKind::TimeSync => {
                StreamData::TimeSync(buffers.time_sync.consume_time_range(t_lo, t_hi))
            }
            StreamKind::Notification => {
                StreamData::Notification(buffers.notification.consume_time_range(t_lo, t_hi))
            }
            _ => unreachable!("rejected by timed_buffer_kind"),
        })
    }

    pub fn clear(&self, stream: StreamKind) {
        self.shared.buffers.clear(stream);
    }

    pub fn clear_time_range(
        &self,
        stream: StreamKind,
        t_lo: Option<i64>,
        t_hi: Option<i64>,
    ) -> Result<(), TrackerError> {
        let (t_lo, t_hi) = (t_lo.unwrap_or(i64::MIN), t_hi.unwrap_or(i64::MAX));
        let buffers = &self.shared.buffers;
        match self.timed_buffer_kind(stream)? {
            StreamKind::Gaze => buffers.gaze.clear_time_range(t_lo, t_hi),
            StreamKind::EyeImage => buffers.eye_image.clear_time_range(t_lo, t_hi),
            StreamKind::ExtSignal => buffers.ext_signal.clear_time_range(t_lo, t_hi),
            StreamKind::TimeSync => buffers.time_sync.clear_time_range(t_lo, t_hi),
            StreamKind::Notification => buffers.notification.clear_time_range(t_lo, t_hi),
            _ => unreachable!("rejected by timed_buffer_kind"),
        }
        Ok(())
    }

    fn timed_buffer_kind(&self, stream: StreamKind) -> Result<StreamKind, TrackerError> {
        if !stream.has_time_key() {
            return Err(TrackerError::InvalidOperation(format!(
                "{stream} records carry no timestamps"
            )));
        }
        Ok(stream.buffer_kind())
    }

    /// Publish a stream on the attached bus. Also starts the underlying
    /// device stream. `Ok(false)` when the outlet is already open.
    pub fn start_outlet(
        &self,
        stream: StreamKind,
        as_gif: Option<bool>,
    ) -> Result<bool, TrackerError> {
        let info = self.info();
        let opened = self
            .shared
            .outlets
            .open(&info, stream, as_gif.unwrap_or(false))?;
        if opened {
            if let Err(error) = self.start_with(stream, None, as_gif) {
                self.shared.outlets.close(stream);
                return Err(error);
            }
        }
        Ok(opened)
    }

    /// Stop publishing: stops the device stream and releases the outlet.
    pub fn stop_outlet(&self, stream: StreamKind) -> Result<(), TrackerError> {
        if self.shared.outlets.close(stream) {
            self.stop(stream)?;
        }
        Ok(())
    }

    pub fn is_streaming(&self, stream: StreamKind) -> bool {
        self.shared.outlets.is_open(stream)
    }

    /// Spawn the calibration worker and enter calibration mode. `Ok(false)`
    /// when already entered.
    pub fn enter_calibration_mode(&self, monocular: bool) -> Result<bool, TrackerError> {
        if monocular && !self.info().has_capability(Capability::CanDoMonocularCalibration) {
            return Err(TrackerError::CapabilityUnavailable(
                "this tracker does not support monocular calibration".into(),
            ));
        }

        let mut worker = self.calibration.lock();
        if let Some(active) = worker.as_ref() {
            if !matches!(
                active.state(),
                CalibrationState::NotEntered | CalibrationState::Left
            ) {
                return Ok(false);
            }
        }
        let spawned = CalibrationWorker::spawn(self.shared.device.clone(), monocular);
        spawned.submit(CalibrationRequest::Enter)?;
        self.calibration_monocular
            .store(monocular, Ordering::SeqCst);
        *worker = Some(spawned);
        Ok(true)
    }

    pub fn is_in_calibration_mode(&self) -> bool {
        !matches!(
            self.calibration_get_status(),
            CalibrationState::NotEntered | CalibrationState::Left
        )
    }

    /// Exit calibration mode. With `force` the device leave call is issued
    /// directly, bypassing the worker, for recovery after a crashed session
    /// left the device in calibration mode; worker state is unchanged.
    /// `Ok(false)` when there was nothing to leave.
    pub fn leave_calibration_mode(&self, force: bool) -> Result<bool, TrackerError> {
        if force {
            self.shared.device.calibration_leave()?;
            return Ok(true);
        }
        let mut worker = self.calibration.lock();
        match worker.as_mut() {
            Some(active) if !matches!(active.state(), CalibrationState::Left) => {
                active.exit_and_join();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn calibration_collect_data(
        &self,
        point: [f32; 2],
        eye: Option<Eye>,
    ) -> Result<(), TrackerError> {
        self.submit_calibration(CalibrationRequest::CollectData { point, eye })
    }

    pub fn calibration_discard_data(
        &self,
        point: [f32; 2],
        eye: Option<Eye>,
    ) -> Result<(), TrackerError> {
        self.submit_calibration(CalibrationRequest::DiscardData { point, eye })
    }

    pub fn calibration_compute_and_apply(&self) -> Result<(), TrackerError> {
        self.submit_calibration(CalibrationRequest::Compute)
    }

    pub fn calibration_get_data(&self) -> Result<(), TrackerError> {
        self.submit_calibration(CalibrationRequest::GetData)
    }

    pub fn calibration_apply_data(&self, data: Vec<u8>) -> Result<(), TrackerError> {
        self.submit_calibration(CalibrationRequest::ApplyData(data))
    }

    pub fn calibration_get_status(&self) -> CalibrationState {
        self.calibration
            .lock()
            .as_ref()
            .map(|worker| worker.state())
            .unwrap_or(CalibrationState::NotEntered)
    }

    /// Non-blocking retrieval of the next completed calibration result.
    pub fn calibration_retrieve_result(&self) -> Option<CalibrationOutcome> {
        self.calibration
            .lock()
            .as_ref()
            .and_then(|worker| worker.try_result())
    }

    fn submit_calibration(&self, request: CalibrationRequest) -> Result<(), TrackerError> {
        if let CalibrationRequest::CollectData { eye: Some(_), .. }
        | CalibrationRequest::DiscardData { eye: Some(_), .. } = &request
        {
            if !self.calibration_monocular.load(Ordering::SeqCst) {
                return Err(TrackerError::InvalidArgument(
                    "eye selection requires monocular calibration mode".into(),
                ));
            }
        }
        let worker = self.calibration.lock();
        match worker.as_ref() {
            Some(active)
                if !matches!(
                    active.state(),
                    CalibrationState::NotEntered | CalibrationState::Left
                ) =>
            {
                active.submit(request)
            }
            _ => Err(TrackerError::NotInCalibrationMode),
        }
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        for stream in [
            StreamKind::Gaze,
            StreamKind::EyeOpenness,
            StreamKind::EyeImage,
            StreamKind::ExtSignal,
            StreamKind::TimeSync,
            StreamKind::Positioning,
            StreamKind::Notification,
        ] {
            if let Err(error) = self.stop_with(stream, Some(true)) {
                log::warn!("stopping {stream} during teardown failed: {error}");
            }
        }
        if let Some(worker) = self.calibration.lock().as_mut() {
            worker.exit_and_join();
        }
        self.shared.outlets.close_all();
        if let Err(failure) = self.shared.device.unsubscribe_stream_errors() {
            log::warn!("unsubscribing stream errors during teardown failed: {failure}");
        }
        registry::deregister(&self.shared);
        log::info!("session for {} closed", self.shared.info.read().serial);
    }
}

pub(crate) mod registry {
    //! Process-wide session registry, touched only at session
    //! construction and destruction.

    use super::TrackerShared;
    use parking_lot::Mutex;
    use std::sync::{Arc, Weak};

    static SESSIONS: Mutex<Vec<Weak<TrackerShared>>> = Mutex::new(Vec::new());

    pub(super) fn register(shared: &Arc<TrackerShared>) {
        let mut sessions = SESSIONS.lock();
        sessions.retain(|session| session.strong_count() > 0);
        sessions.push(Arc::downgrade(shared));
    }

    pub(super) fn deregister(shared: &Arc<TrackerShared>) {
        let mut sessions = SESSIONS.lock();
        sessions.retain(|session| {
            session
                .upgrade()
                .map(|alive| !Arc::ptr_eq(&alive, shared))
                .unwrap_or(false)
        });
    }

    /// Serials of the sessions currently alive.
    pub fn connected_serials() -> Vec<String> {
        SESSIONS
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .map(|session| session.info.read().serial.clone())
            .collect()
    }
}

/// Serials of all live sessions in this process.
pub fn connected_serials() -> Vec<String> {
    registry::connected_serials()
}

/// All trackers the driver can see.
pub fn find_all_trackers(
    driver: &Arc<dyn TrackerDriver>,
) -> Result<Vec<TrackerInfo>, TrackerError> {
    Ok(driver.find_all()?)
}

/// The driver's host clock, microseconds.
pub fn system_timestamp(driver: &Arc<dyn TrackerDriver>) -> i64 {
    driver.system_timestamp()
}

impl TrackerShared {
    /// Drain staging into the gaze buffer, preserving emit order. Staging
    /// lock before gaze writer lock, the one place two buffer locks meet.
    pub(crate) fn flush_staging(&self) {
        if self.staging_empty.load(Ordering::SeqCst) {
            return;
        }
        let mut staging = self.staging.lock();
        let drained = staging.drain();
        self.staging_empty.store(true, Ordering::SeqCst);
        self.append_gaze(&drained);
    }

    pub(crate) fn append_gaze(&self, records: &[GazeRecord]) {
        if records.is_empty() {
            return;
        }
        self.buffers.gaze.extend(records.iter().copied());
        for record in records {
            self.outlets
                .publish(StreamKind::Gaze, crate::outlet::serialize_gaze(record));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimTracker;
    use crate::types::{RawEyeOpenness, RawGaze};

    fn session(serial: &str) -> (SimTracker, Tracker) {
        let sim = SimTracker::new(serial);
        let session = Tracker::from_device(sim.device()).unwrap();
        (sim, session)
    }

    #[test]
    fn construction_starts_notifications_and_registers() {
        let (sim, session) = session("REG-1");
        assert!(session.is_recording(StreamKind::Notification));
        assert!(sim.is_subscribed(StreamKind::Notification));
        assert!(connected_serials().contains(&"REG-1".to_string()));
        drop(session);
        assert!(!connected_serials().contains(&"REG-1".to_string()));
    }

    #[test]
    fn start_is_idempotent_and_stop_twice_succeeds() {
        let (sim, session) = session("IDEM-1");
        session.start(StreamKind::Gaze).unwrap();
        session.start(StreamKind::Gaze).unwrap();
        assert!(session.is_recording(StreamKind::Gaze));
        session.stop(StreamKind::Gaze).unwrap();
        session.stop(StreamKind::Gaze).unwrap();
        assert!(!session.is_recording(StreamKind::Gaze));
        assert!(!sim.is_subscribed(StreamKind::Gaze));
    }

    #[test]
    fn gaze_records_land_in_the_buffer() {
        let (sim, session) = session("BUF-1");
        session.start(StreamKind::Gaze).unwrap();
        sim.inject_gaze(RawGaze {
            device_ts: 1000,
            system_ts: 1_000_000,
            ..Default::default()
        });
        let peeked = session
            .peek_n(StreamKind::Gaze, None, None)
            .unwrap()
            .into_gaze()
            .unwrap();
        assert_eq!(peeked.len(), 1);
        assert_eq!(peeked[0].device_ts, 1000);
        // peek left the record in place
        let consumed = session
            .consume_n(StreamKind::Gaze, None, None)
            .unwrap()
            .into_gaze()
            .unwrap();
        assert_eq!(consumed.len(), 1);
        assert!(session
            .peek_n(StreamKind::Gaze, None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn merge_policy_couples_the_two_streams() {
        let (sim, session) = session("MERGE-1");
        assert!(!session.set_include_eye_openness_in_gaze(true).unwrap());
        session.start(StreamKind::Gaze).unwrap();
        assert!(session.is_recording(StreamKind::EyeOpenness));
        assert!(sim.is_subscribed(StreamKind::EyeOpenness));

        session.stop(StreamKind::EyeOpenness).unwrap();
        assert!(!session.is_recording(StreamKind::Gaze));
        assert!(!session.is_recording(StreamKind::EyeOpenness));
    }

    #[test]
    fn merge_flag_requires_the_capability() {
        let sim = SimTracker::new("CAP-1");
        sim.remove_capability(Capability::HasEyeOpennessData);
        let session = Tracker::from_device(sim.device()).unwrap();
        let err = session.set_include_eye_openness_in_gaze(true).unwrap_err();
        assert!(matches!(err, TrackerError::CapabilityUnavailable(_)));
    }

    #[test]
    fn merged_records_pair_by_device_timestamp() {
        let (sim, session) = session("MERGE-2");
        session.set_include_eye_openness_in_gaze(true).unwrap();
        session.start(StreamKind::Gaze).unwrap();

        sim.inject_gaze(RawGaze {
            device_ts: 100,
            system_ts: 1_000,
            ..Default::default()
        });
        sim.inject_eye_openness(RawEyeOpenness {
            device_ts: 100,
            system_ts: 1_000,
            left_value: 10.0,
            left_valid: true,
            right_value: 10.0,
            right_valid: true,
        });
        sim.inject_eye_openness(RawEyeOpenness {
            device_ts: 200,
            system_ts: 2_000,
            left_value: 9.0,
            left_valid: true,
            right_value: 9.0,
            right_valid: true,
        });
        sim.inject_gaze(RawGaze {
            device_ts: 200,
            system_ts: 2_000,
            ..Default::default()
        });

        let records = session
            .consume_n(StreamKind::Gaze, None, None)
            .unwrap()
            .into_gaze()
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].device_ts, 100);
        assert_eq!(records[1].device_ts, 200);
        assert!(records.iter().all(|r| r.has_gaze() && r.has_openness()));
    }

    #[test]
    fn openness_without_merge_appends_directly() {
        let (sim, session) = session("PLAIN-O");
        session.start(StreamKind::EyeOpenness).unwrap();
        assert!(!session.is_recording(StreamKind::Gaze));
        sim.inject_eye_openness(RawEyeOpenness {
            device_ts: 5,
            system_ts: 50,
            left_value: 8.0,
            left_valid: true,
            right_value: 8.0,
            right_valid: true,
        });
        let records = session
            .peek_n(StreamKind::EyeOpenness, None, None)
            .unwrap()
            .into_gaze()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].has_openness() && !records[0].has_gaze());
    }

    #[test]
    fn time_range_on_positioning_is_rejected() {
        let (_sim, session) = session("POS-1");
        let err = session
            .peek_time_range(StreamKind::Positioning, Some(0), Some(10))
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidOperation(_)));
    }

    #[test]
    fn setters_refresh_identity() {
        let (_sim, session) = session("SET-1");
        session.set_device_name("rig-left").unwrap();
        assert_eq!(session.info().device_name, "rig-left");
        session.set_gaze_frequency(250.0).unwrap();
        assert_eq!(session.info().frequency, 250.0);
        assert!(session.set_gaze_frequency(42.0).is_err());
    }

    #[test]
    fn calibration_requests_need_enter_first() {
        let (_sim, session) = session("CAL-1");
        let err = session
            .calibration_collect_data([0.5, 0.5], None)
            .unwrap_err();
        assert!(matches!(err, TrackerError::NotInCalibrationMode));
    }

    #[test]
    fn binocular_calibration_rejects_eye_selection() {
        let (_sim, session) = session("CAL-2");
        session.enter_calibration_mode(false).unwrap();
        let err = session
            .calibration_collect_data([0.5, 0.5], Some(Eye::Left))
            .unwrap_err();
        assert!(matches!(err, TrackerError::InvalidArgument(_)));
        session.leave_calibration_mode(false).unwrap();
    }

    #[test]
    fn force_leave_bypasses_the_worker() {
        let (_sim, session) = session("CAL-3");
        assert!(session.leave_calibration_mode(true).is_ok());
        assert_eq!(session.calibration_get_status(), CalibrationState::NotEntered);
    }

    #[test]
    fn driver_discovery_lists_the_tracker() {
        let sim = SimTracker::new("DISC-1");
        let driver = sim.driver();
        let found = find_all_trackers(&driver).unwrap();
        assert!(found.iter().any(|info| info.serial == "DISC-1"));
        assert!(system_timestamp(&driver) > 0);
    }

    #[test]
    fn eye_image_payloads_move_through_the_buffer() {
        let (sim, session) = session("IMG-1");
        session.start(StreamKind::EyeImage).unwrap();
        sim.inject_eye_image(crate::types::EyeImage {
            device_ts: 1,
            system_ts: 10,
            region_id: 0,
            region_top: 0,
            region_left: 0,
            bits_per_pixel: 8,
            padding_per_pixel: 0,
            width: 2,
            height: 2,
            kind: crate::types::EyeImageKind::FullImage,
            camera_id: 0,
            is_gif: false,
            payload: vec![1, 2, 3, 4],
        });
        let images = match session.consume_n(StreamKind::EyeImage, None, None).unwrap() {
            StreamData::EyeImage(images) => images,
            other => panic!("expected eye images, got {other:?}"),
        };
        assert_eq!(images[0].payload, vec![1, 2, 3, 4]);
        assert!(session
            .peek_n(StreamKind::EyeImage, None, None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn eye_image_gif_switch_resubscribes() {
        let (sim, session) = session("IMG-2");
        session.start(StreamKind::EyeImage).unwrap();
        assert!(sim.is_subscribed(StreamKind::EyeImage));
        // same mode: no-op
        session
            .start_with(StreamKind::EyeImage, None, Some(false))
            .unwrap();
        // switching to gif resubscribes and stays recording
        session
            .start_with(StreamKind::EyeImage, None, Some(true))
            .unwrap();
        assert!(session.is_recording(StreamKind::EyeImage));
        assert!(sim.is_subscribed(StreamKind::EyeImage));
    }

    #[test]
    fn ext_signal_and_positioning_buffer_by_count() {
        let (sim, session) = session("MISC-1");
        session.start(StreamKind::ExtSignal).unwrap();
        session.start(StreamKind::Positioning).unwrap();
        for value in 0..3_i64 {
            sim.inject_ext_signal(crate::types::ExtSignal {
                device_ts: value * 10,
                system_ts: value * 100,
                value,
                change_type: crate::types::ExtSignalChange::ValueChanged,
            });
        }
        sim.inject_positioning(Positioning::default());

        let newest = match session
            .peek_n(StreamKind::ExtSignal, Some(1), Some(BufferSide::End))
            .unwrap()
        {
            StreamData::ExtSignal(signals) => signals,
            other => panic!("expected ext signals, got {other:?}"),
        };
        assert_eq!(newest[0].value, 2);

        assert_eq!(
            session
                .peek_n(StreamKind::Positioning, Some(10), Some(BufferSide::Start))
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn stop_with_clear_empties_the_buffer() {
        let (sim, session) = session("CLR-1");
        session.start(StreamKind::TimeSync).unwrap();
        sim.inject_time_sync(TimeSync {
            system_request_ts: 1,
            device_ts: 2,
            system_response_ts: 3,
        });
        session.stop_with(StreamKind::TimeSync, Some(true)).unwrap();
        assert!(session
            .peek_n(StreamKind::TimeSync, None, None)
            .unwrap()
            .is_empty());
    }
}
