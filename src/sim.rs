//! In-memory device and bus
//!
//! The vendor SDK and the network transport are external collaborators;
//! `SimTracker` and `LoopbackBus` implement their trait surfaces in-memory
//! so the rest of the crate can be driven end to end without hardware or a
//! transport library. Injected records are delivered synchronously on the
//! caller's thread, which stands in for the SDK's callback threads.

use crate::bus::{BusSample, InletHandle, OutletHandle, StreamBus, StreamMeta};
use crate::device::{
    DriverLogEvent, DriverLogSink, StreamErrorEvent, StreamErrorSink, StreamSink,
    SubscribeOptions, TrackerDevice, TrackerDriver,
};
use crate::error::{DeviceFailure, DeviceResult, TrackerError};
use crate::types::{
    CalibrationPoint, CalibrationSample, Capability, DisplayArea, Eye, EyeImage, ExtSignal,
    LicenseResult, Notification, Positioning, RawEyeOpenness, RawGaze, StreamKind, TimeSync,
    TrackBox, TrackerInfo, Validity,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const NOT_SUBSCRIBED: i32 = 1;
const STREAM_UNSUPPORTED: i32 = 2;
const NOT_IN_CALIBRATION: i32 = 3;
const BAD_ARGUMENT: i32 = 4;

struct SimState {
    info: RwLock<TrackerInfo>,
    sinks: Mutex<HashMap<StreamKind, Arc<dyn StreamSink>>>,
    error_sink: Mutex<Option<StreamErrorSink>>,
    log_sink: Mutex<Option<DriverLogSink>>,
    in_calibration: AtomicBool,
    collected_points: Mutex<Vec<[f32; 2]>>,
    calibration_store: Mutex<Vec<u8>>,
    calibration_latency: Mutex<Duration>,
}

/// Simulated eye tracker: implements both the driver and the device
/// surfaces and exposes `inject_*` methods standing in for the hardware.
#[derive(Clone)]
pub struct SimTracker {
    state: Arc<SimState>,
}

impl SimTracker {
    pub fn new(serial: &str) -> Self {
        let info = TrackerInfo {
            address: format!("tet-tcp://{serial}"),
            serial: serial.to_string(),
            model: "Tobii Pro Fusion".to_string(),
            device_name: String::new(),
            firmware_version: "2.6.1".to_string(),
            runtime_version: "1.11.2".to_string(),
            tracking_mode: "human".to_string(),
            frequency: 120.0,
            supported_frequencies: vec![60.0, 120.0, 250.0],
            supported_tracking_modes: vec!["human".to_string()],
            capabilities: vec![
                Capability::CanSetDisplayArea,
                Capability::HasExternalSignal,
                Capability::HasEyeImages,
                Capability::HasGazeData,
                Capability::HasEyeOpennessData,
                Capability::CanDoScreenBasedCalibration,
                Capability::CanDoMonocularCalibration,
            ],
        };
        Self {
            state: Arc::new(SimState {
                info: RwLock::new(info),
                sinks: Mutex::new(HashMap::new()),
                error_sink: Mutex::new(None),
                log_sink: Mutex::new(None),
                in_calibration: AtomicBool::new(false),
                collected_points: Mutex::new(Vec::new()),
                calibration_store: Mutex::new(vec![0x43, 0x41, 0x4c, 0x31]),
                calibration_latency: Mutex::new(Duration::ZERO),
            }),
        }
    }

    pub fn device(&self) -> Arc<dyn TrackerDevice> {
        Arc::new(self.clone())
    }

    pub fn driver(&self) -> Arc<dyn TrackerDriver> {
        Arc::new(self.clone())
    }

    pub fn info(&self) -> TrackerInfo {
        self.state.info.read().clone()
    }

    /// Drop one capability, e.g. to model a tracker without eye openness.
    pub fn remove_capability(&self, capability: Capability) {
        self.state
            .info
            .write()
            .capabilities
            .retain(|have| *have != capability);
    }

    /// How long each blocking calibration call takes.
    pub fn set_calibration_latency(&self, latency: Duration) {
        *self.state.calibration_latency.lock() = latency;
    }

    pub fn is_subscribed(&self, stream: StreamKind) -> bool {
        self.state.sinks.lock().contains_key(&stream)
    }

    // deliveries run under the sink map lock so that `unsubscribe` blocks
    // until in-flight callbacks have drained, like the real SDK

    pub fn inject_gaze(&self, raw: RawGaze) {
        let sinks = self.state.sinks.lock();
        if let Some(sink) = sinks.get(&StreamKind::Gaze) {
            sink.on_gaze(raw);
        }
    }

    pub fn inject_eye_openness(&self, raw: RawEyeOpenness) {
        let sinks = self.state.sinks.lock();
        if let Some(sink) = sinks.get(&StreamKind::EyeOpenness) {
            sink.on_eye_openness(raw);
        }
    }

    pub fn inject_eye_image(&self, image: EyeImage) {
        let sinks = self.state.sinks.lock();
        if let Some(sink) = sinks.get(&StreamKind::EyeImage) {
            sink.on_eye_image(image);
        }
    }

    pub fn inject_ext_signal(&self, signal: ExtSignal) {
        let sinks = self.state.sinks.lock();
        if let Some(sink) = sinks.get(&StreamKind::ExtSignal) {
            sink.on_ext_signal(signal);
        }
    }

    pub fn inject_time_sync(&self, sync: TimeSync) {
        let sinks = self.state.sinks.lock();
        if let Some(sink) = sinks.get(&StreamKind::TimeSync) {
            sink.on_time_sync(sync);
        }
    }

    pub fn inject_positioning(&self, positioning: Positioning) {
        let sinks = self.state.sinks.lock();
        if let Some(sink) = sinks.get(&StreamKind::Positioning) {
            sink.on_positioning(positioning);
        }
    }

    pub fn inject_notification(&self, notification: Notification) {
        let sinks = self.state.sinks.lock();
        if let Some(sink) = sinks.get(&StreamKind::Notification) {
            sink.on_notification(notification);
        }
    }

    pub fn inject_stream_error(&self, event: StreamErrorEvent) {
        let sink = self.state.error_sink.lock().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    pub fn inject_driver_log(&self, event: DriverLogEvent) {
        let sink = self.state.log_sink.lock().clone();
        if let Some(sink) = sink {
            sink(event);
        }
    }

    fn calibration_call(&self) -> DeviceResult<()> {
        let latency = *self.state.calibration_latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        if !self.state.in_calibration.load(Ordering::SeqCst) {
            return Err(DeviceFailure::new(
                NOT_IN_CALIBRATION,
                "tracker is not in calibration mode",
            ));
        }
        Ok(())
    }
}

impl TrackerDevice for SimTracker {
    fn identity(&self) -> DeviceResult<TrackerInfo> {
        Ok(self.info())
    }

    fn track_box(&self) -> DeviceResult<TrackBox> {
        Ok(TrackBox {
            back_lower_left: [-150.0, -121.0, 750.0],
            back_lower_right: [150.0, -121.0, 750.0],
            back_upper_left: [-150.0, 121.0, 750.0],
            back_upper_right: [150.0, 121.0, 750.0],
            front_lower_left: [-150.0, -121.0, 450.0],
            front_lower_right: [150.0, -121.0, 450.0],
            front_upper_left: [-150.0, 121.0, 450.0],
            front_upper_right: [150.0, 121.0, 450.0],
        })
    }

    fn display_area(&self) -> DeviceResult<DisplayArea> {
        Ok(DisplayArea {
            top_left: [-260.0, 170.0, 0.0],
            top_right: [260.0, 170.0, 0.0],
            bottom_left: [-260.0, -120.0, 0.0],
        })
    }

    fn set_device_name(&self, name: &str) -> DeviceResult<()> {
        self.state.info.write().device_name = name.to_string();
        Ok(())
    }

    fn set_gaze_frequency(&self, hz: f32) -> DeviceResult<()> {
        let mut info = self.state.info.write();
        if !info.supported_frequencies.contains(&hz) {
            return Err(DeviceFailure::new(
                BAD_ARGUMENT,
                format!("unsupported gaze frequency {hz}"),
            ));
        }
        info.frequency = hz;
        Ok(())
    }

    fn set_tracking_mode(&self, mode: &str) -> DeviceResult<()> {
        let mut info = self.state.info.write();
        if !info.supported_tracking_modes.iter().any(|have| have == mode) {
            return Err(DeviceFailure::new(
                BAD_ARGUMENT,
                format!("unsupported tracking mode {mode}"),
            ));
        }
        info.tracking_mode = mode.to_string();
        Ok(())
    }

    fn apply_licenses(&self, licenses: &[Vec<u8>]) -> DeviceResult<Vec<LicenseResult>> {
        Ok(licenses
            .iter()
            .map(|license| {
                if license.is_empty() {
                    LicenseResult::Tampered
                } else {
                    LicenseResult::Ok
                }
            })
            .collect())
    }

    fn clear_licenses(&self) -> DeviceResult<()> {
        Ok(())
    }

    fn subscribe(
        &self,
        stream: StreamKind,
        _options: SubscribeOptions,
        sink: Arc<dyn StreamSink>,
    ) -> DeviceResult<()> {
        if !self.info().has_stream(stream) {
            return Err(DeviceFailure::new(
                STREAM_UNSUPPORTED,
                format!("this tracker does not provide the {stream} stream"),
            ));
        }
        self.state.sinks.lock().insert(stream, sink);
        Ok(())
    }

    fn unsubscribe(&self, stream: StreamKind) -> DeviceResult<()> {
        // taking the sink map lock drains in-flight deliveries, so no
        // callback for this stream can run after we return
        match self.state.sinks.lock().remove(&stream) {
            Some(_) => Ok(()),
            None => Err(DeviceFailure::new(
                NOT_SUBSCRIBED,
                format!("not subscribed to the {stream} stream"),
            )),
        }
    }

    fn subscribe_stream_errors(&self, sink: StreamErrorSink) -> DeviceResult<()> {
        *self.state.error_sink.lock() = Some(sink);
        Ok(())
    }

    fn unsubscribe_stream_errors(&self) -> DeviceResult<()> {
        *self.state.error_sink.lock() = None;
        Ok(())
    }

    fn calibration_enter(&self) -> DeviceResult<()> {
        let latency = *self.state.calibration_latency.lock();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        self.state.in_calibration.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn calibration_leave(&self) -> DeviceResult<()> {
        self.state.in_calibration.store(false, Ordering::SeqCst);
        self.state.collected_points.lock().clear();
        Ok(())
    }

    fn calibration_collect(&self, point: [f32; 2], _eye: Option<Eye>) -> DeviceResult<()> {
        self.calibration_call()?;
        self.state.collected_points.lock().push(point);
        Ok(())
    }

    fn calibration_discard(&self, point: [f32; 2], _eye: Option<Eye>) -> DeviceResult<()> {
        self.calibration_call()?;
        self.state
            .collected_points
            .lock()
            .retain(|collected| *collected != point);
        Ok(())
    }

    fn calibration_compute_apply(&self) -> DeviceResult<Vec<CalibrationPoint>> {
        self.calibration_call()?;
        let sample = |point: [f32; 2]| CalibrationSample {
            position_on_display: point,
            validity: Validity::Valid,
        };
        Ok(self
            .state
            .collected_points
            .lock()
            .iter()
            .map(|&point| CalibrationPoint {
                position: point,
                samples_left: vec![sample(point)],
                samples_right: vec![sample(point)],
            })
            .collect())
    }

    fn calibration_data(&self) -> DeviceResult<Vec<u8>> {
        Ok(self.state.calibration_store.lock().clone())
    }

    fn calibration_apply_data(&self, data: &[u8]) -> DeviceResult<()> {
        if data.is_empty() {
            return Err(DeviceFailure::new(BAD_ARGUMENT, "empty calibration data"));
        }
        *self.state.calibration_store.lock() = data.to_vec();
        Ok(())
    }
}

impl TrackerDriver for SimTracker {
    fn find_all(&self) -> DeviceResult<Vec<TrackerInfo>> {
        Ok(vec![self.info()])
    }

    fn open(&self, address: &str) -> DeviceResult<Arc<dyn TrackerDevice>> {
        if !address.is_empty() {
            self.state.info.write().address = address.to_string();
        }
        Ok(self.device())
    }

    fn system_timestamp(&self) -> i64 {
        chrono::Utc::now().timestamp_micros()
    }

    fn subscribe_log(&self, sink: DriverLogSink) -> DeviceResult<()> {
        *self.state.log_sink.lock() = Some(sink);
        Ok(())
    }

    fn unsubscribe_log(&self) -> DeviceResult<()> {
        *self.state.log_sink.lock() = None;
        Ok(())
    }
}

struct BusOutlet {
    meta: StreamMeta,
    subscribers: Arc<Mutex<Vec<Sender<BusSample>>>>,
    alive: Arc<AtomicBool>,
}

struct LoopbackOutlet {
    subscribers: Arc<Mutex<Vec<Sender<BusSample>>>>,
    alive: Arc<AtomicBool>,
}

impl OutletHandle for LoopbackOutlet {
    fn push(&self, sample: BusSample) {
        self.subscribers
            .lock()
            .retain(|subscriber| subscriber.send(sample.clone()).is_ok());
    }
}

impl Drop for LoopbackOutlet {
    fn drop(&mut self) {
        self.alive.store(false, Ordering::SeqCst);
        self.subscribers.lock().clear();
    }
}

struct LoopbackInlet {
    meta: StreamMeta,
    receiver: Receiver<BusSample>,
}

impl InletHandle for LoopbackInlet {
    fn meta(&self) -> &StreamMeta {
        &self.meta
    }

    fn pull(&mut self, timeout: Duration) -> Option<BusSample> {
        self.receiver.recv_timeout(timeout).ok()
    }
}

/// In-process bus: outlets broadcast to every inlet opened on the same
/// source id. Discovery lists the outlets still alive.
#[derive(Default)]
pub struct LoopbackBus {
    outlets: Mutex<Vec<BusOutlet>>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StreamBus for LoopbackBus {
    fn create_outlet(&self, meta: StreamMeta) -> Result<Box<dyn OutletHandle>, TrackerError> {
        let mut outlets = self.outlets.lock();
        outlets.retain(|outlet| outlet.alive.load(Ordering::SeqCst));
        if outlets.iter().any(|outlet| outlet.meta.source_id == meta.source_id) {
            return Err(TrackerError::InvalidOperation(format!(
                "an outlet named {} already exists on this bus",
                meta.source_id
            )));
        }
        let subscribers = Arc::new(Mutex::new(Vec::new()));
        let alive = Arc::new(AtomicBool::new(true));
        outlets.push(BusOutlet {
            meta,
            subscribers: subscribers.clone(),
            alive: alive.clone(),
        });
        Ok(Box::new(LoopbackOutlet { subscribers, alive }))
    }

    fn resolve(&self, filter: Option<StreamKind>) -> Vec<StreamMeta> {
        self.outlets
            .lock()
            .iter()
            .filter(|outlet| outlet.alive.load(Ordering::SeqCst))
            .filter(|outlet| filter.map_or(true, |kind| outlet.meta.kind == kind.buffer_kind()))
            .map(|outlet| outlet.meta.clone())
            .collect()
    }

    fn open_inlet(&self, meta: &StreamMeta) -> Result<Box<dyn InletHandle>, TrackerError> {
        let outlets = self.outlets.lock();
        let outlet = outlets
            .iter()
            .find(|outlet| {
                outlet.meta.source_id == meta.source_id && outlet.alive.load(Ordering::SeqCst)
            })
            .ok_or_else(|| {
                TrackerError::InvalidOperation(format!(
                    "no outlet named {} is visible on this bus",
                    meta.source_id
                ))
            })?;
        let (sender, receiver) = unbounded();
        outlet.subscribers.lock().push(sender);
        Ok(Box::new(LoopbackInlet {
            meta: outlet.meta.clone(),
            receiver,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{SampleData, SampleFormat};

    fn meta(name: &str, kind: StreamKind) -> StreamMeta {
        StreamMeta {
            name: name.to_string(),
            kind,
            content_type: "Test".to_string(),
            channel_count: 1,
            format: SampleFormat::I64,
            nominal_rate: 0.0,
            source_id: format!("{name}@SIM"),
            metadata: Vec::new(),
        }
    }

    #[test]
    fn loopback_broadcasts_to_all_inlets() {
        let bus = LoopbackBus::new();
        let outlet = bus.create_outlet(meta("a", StreamKind::TimeSync)).unwrap();
        let mut first = bus.open_inlet(&meta("a", StreamKind::TimeSync)).unwrap();
        let mut second = bus.open_inlet(&meta("a", StreamKind::TimeSync)).unwrap();

        outlet.push(BusSample {
            data: SampleData::I64(vec![7]),
            timestamp: Some(1.0),
        });

        for inlet in [&mut first, &mut second] {
            let sample = inlet.pull(Duration::from_millis(200)).unwrap();
            assert_eq!(sample.data, SampleData::I64(vec![7]));
        }
    }

    #[test]
    fn dropped_outlets_disappear_from_discovery() {
        let bus = LoopbackBus::new();
        let outlet = bus.create_outlet(meta("a", StreamKind::Gaze)).unwrap();
        assert_eq!(bus.resolve(None).len(), 1);
        assert_eq!(bus.resolve(Some(StreamKind::TimeSync)).len(), 0);
        drop(outlet);
        assert_eq!(bus.resolve(None).len(), 0);
    }

    #[test]
    fn unsubscribed_injection_is_dropped() {
        let tracker = SimTracker::new("SIM-X");
        tracker.inject_time_sync(TimeSync {
            system_request_ts: 1,
            device_ts: 2,
            system_response_ts: 3,
        });
        // no sink registered: nothing to observe, nothing panics
        assert!(!tracker.is_subscribed(StreamKind::TimeSync));
    }

    #[test]
    fn gaze_frequency_is_validated() {
        let tracker = SimTracker::new("SIM-F");
        assert!(tracker.set_gaze_frequency(250.0).is_ok());
        assert!(tracker.set_gaze_frequency(33.0).is_err());
        assert_eq!(tracker.info().frequency, 250.0);
    }
}
