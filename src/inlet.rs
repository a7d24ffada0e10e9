//! Remote stream ingestion
//!
//! Inlets subscribe to published outlets and feed their samples back into
//! the same buffer engine the local streams use. Every received record is
//! augmented with two host timestamps: `remote_ts`, the record's own time
//! key as produced at the outlet, and `local_ts`, measured here at
//! ingestion; time-range operations may key on either.

use crate::buffer::TimeBuffer;
use crate::bus::{BusSample, InletHandle, SampleData, StreamBus, StreamMeta};
use crate::config::BufferConfig;
use crate::error::TrackerError;
use crate::types::{
    BufferSide, EyeData, EyeImage, EyeImageKind, EyeOpenness, ExtSignal, ExtSignalChange,
    GazeOrigin, GazePoint, GazeRecord, Positioning, Pupil, StreamKind, TimeKeyed, TimeSync,
    TimestampSource, Validity,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub type InletId = u32;

/// Ids are allocated from one process-wide counter, so they stay unique
/// across managers.
static NEXT_INLET_ID: AtomicU32 = AtomicU32::new(1);

const PULL_TIMEOUT: Duration = Duration::from_millis(100);

/// One buffered record on the inlet side.
#[derive(Debug, Clone, PartialEq)]
pub struct InletSample<T> {
    /// Host clock at ingestion, microseconds.
    pub local_ts: i64,
    /// The record's own time key as stamped at the remote outlet.
    pub remote_ts: i64,
    pub record: T,
}

impl<T> InletSample<T> {
    fn key(&self, source: TimestampSource) -> i64 {
        match source {
            TimestampSource::Local => self.local_ts,
            TimestampSource::Remote => self.remote_ts,
        }
    }
}

/// Records extracted from one inlet's buffer.
#[derive(Debug, Clone, PartialEq)]
pub enum InletData {
    Gaze(Vec<InletSample<GazeRecord>>),
    EyeImage(Vec<InletSample<EyeImage>>),
    ExtSignal(Vec<InletSample<ExtSignal>>),
    TimeSync(Vec<InletSample<TimeSync>>),
    Positioning(Vec<InletSample<Positioning>>),
}

impl InletData {
    pub fn len(&self) -> usize {
        match self {
            InletData::Gaze(v) => v.len(),
            InletData::EyeImage(v) => v.len(),
            InletData::ExtSignal(v) => v.len(),
            InletData::TimeSync(v) => v.len(),
            InletData::Positioning(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn into_gaze(self) -> Result<Vec<InletSample<GazeRecord>>, TrackerError> {
        match self {
            InletData::Gaze(v) => Ok(v),
            other => Err(TrackerError::InvalidOperation(format!(
                "expected gaze records, got {other:?}"
            ))),
        }
    }

    pub fn into_time_sync(self) -> Result<Vec<InletSample<TimeSync>>, TrackerError> {
        match self {
            InletData::TimeSync(v) => Ok(v),
            other => Err(TrackerError::InvalidOperation(format!(
                "expected time sync records, got {other:?}"
            ))),
        }
    }
}

#[derive(Clone)]
enum InletStore {
    Gaze(Arc<TimeBuffer<InletSample<GazeRecord>>>),
    EyeImage(Arc<TimeBuffer<InletSample<EyeImage>>>),
    ExtSignal(Arc<TimeBuffer<InletSample<ExtSignal>>>),
    TimeSync(Arc<TimeBuffer<InletSample<TimeSync>>>),
    Positioning(Arc<TimeBuffer<InletSample<Positioning>>>),
}

impl InletStore {
    fn for_kind(kind: StreamKind, hint: usize) -> Result<Self, TrackerError> {
        Ok(match kind.buffer_kind() {
            StreamKind::Gaze => InletStore::Gaze(Arc::new(TimeBuffer::with_capacity(hint))),
            StreamKind::EyeImage => InletStore::EyeImage(Arc::new(TimeBuffer::with_capacity(hint))),
            StreamKind::ExtSignal => {
                InletStore::ExtSignal(Arc::new(TimeBuffer::with_capacity(hint)))
            }
            StreamKind::TimeSync => InletStore::TimeSync(Arc::new(TimeBuffer::with_capacity(hint))),
            StreamKind::Positioning => {
                InletStore::Positioning(Arc::new(TimeBuffer::with_capacity(hint)))
            }
            other => {
                return Err(TrackerError::InvalidOperation(format!(
                    "cannot open an inlet for a {other} stream"
                )))
            }
        })
    }

    fn ingest(&self, sample: BusSample, local_ts: i64) {
        match self {
            InletStore::Gaze(buffer) => {
                if let Some(record) = decode_gaze(&sample) {
                    buffer.append(InletSample {
                        local_ts,
                        remote_ts: record.time_key(),
                        record,
                    });
                }
            }
            InletStore::EyeImage(buffer) => {
                if let Some(record) = decode_eye_image(sample) {
                    buffer.append(InletSample {
                        local_ts,
                        remote_ts: record.time_key(),
                        record,
                    });
                }
            }
            InletStore::ExtSignal(buffer) => {
                if let Some(record) = decode_ext_signal(&sample) {
                    buffer.append(InletSample {
                        local_ts,
                        remote_ts: record.time_key(),
                        record,
                    });
                }
            }
            InletStore::TimeSync(buffer) => {
                if let Some(record) = decode_time_sync(&sample) {
                    buffer.append(InletSample {
                        local_ts,
                        remote_ts: record.time_key(),
                        record,
                    });
                }
            }
            InletStore::Positioning(buffer) => {
                if let Some(record) = decode_positioning(&sample) {
                    buffer.append(InletSample {
                        local_ts,
                        remote_ts: 0,
                        record,
                    });
                }
            }
        }
    }

    fn supports_time_range(&self) -> bool {
        !matches!(self, InletStore::Positioning(_))
    }
}

struct InletEntry {
    meta: StreamMeta,
    store: InletStore,
    listening: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl InletEntry {
    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }

    fn stop(&mut self) {
        self.listening.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                log::error!("inlet listener for {} panicked", self.meta.name);
            }
        }
    }
}

/// Subscriptions to remote outlets, addressed by opaque integer ids.
pub struct InletManager {
    bus: Arc<dyn StreamBus>,
    inlets: Mutex<HashMap<InletId, InletEntry>>,
    buffers: BufferConfig,
}

impl InletManager {
    pub fn new(bus: Arc<dyn StreamBus>) -> Self {
        Self::with_buffers(bus, BufferConfig::default())
    }

    pub fn with_buffers(bus: Arc<dyn StreamBus>, buffers: BufferConfig) -> Self {
        Self {
            bus,
            inlets: Mutex::new(HashMap::new()),
            buffers,
        }
    }

    /// Visible remote outlets, optionally filtered by stream kind.
    pub fn discover(&self, filter: Option<StreamKind>) -> Vec<StreamMeta> {
        self.bus.resolve(filter)
    }

    /// Create an inlet for a discovered outlet. The buffer type follows the
    /// remote's declared kind; the default reservation is the local-buffer
    /// default for that kind.
    pub fn open(
        &self,
        meta: &StreamMeta,
        buffer_hint: Option<usize>,
        start_listening: bool,
    ) -> Result<InletId, TrackerError> {
        let hint = buffer_hint.unwrap_or_else(|| self.buffers.reservation(meta.kind));
        let store = InletStore::for_kind(meta.kind, hint)?;
        let id = NEXT_INLET_ID.fetch_add(1, Ordering::Relaxed);

        self.inlets.lock().insert(
            id,
            InletEntry {
                meta: meta.clone(),
                store,
                listening: Arc::new(AtomicBool::new(false)),
                thread: None,
            },
        );
        log::info!("opened inlet {id} for {}", meta.name);

        if start_listening {
            self.start_listening(id)?;
        }
        Ok(id)
    }

    /// Begin receiving into the inlet's buffer on a dedicated thread.
    pub fn start_listening(&self, id: InletId) -> Result<(), TrackerError> {
        let mut inlets = self.inlets.lock();
        let entry = inlets.get_mut(&id).ok_or(TrackerError::UnknownInlet(id))?;
        if entry.is_listening() {
            return Ok(());
        }

        let mut handle = self.bus.open_inlet(&entry.meta)?;
        let listening = entry.listening.clone();
        let store = entry.store.clone();
        listening.store(true, Ordering::SeqCst);
        let shutdown = listening.clone();
        entry.thread = Some(std::thread::spawn(move || {
            while shutdown.load(Ordering::SeqCst) {
                if let Some(sample) = handle.pull(PULL_TIMEOUT) {
                    let local_ts = chrono::Utc::now().timestamp_micros();
                    store.ingest(sample, local_ts);
                }
            }
        }));
        Ok(())
    }

    /// Stop receiving. Joins the listener thread; optionally clears the
    /// buffer.
    pub fn stop_listening(&self, id: InletId, clear: Option<bool>) -> Result<(), TrackerError> {
        let mut inlets = self.inlets.lock();
        let entry = inlets.get_mut(&id).ok_or(TrackerError::UnknownInlet(id))?;
        entry.stop();
        if clear.unwrap_or(self.buffers.stop_clears_buffer) {
            clear_store(&entry.store);
        }
        Ok(())
    }

    pub fn is_listening(&self, id: InletId) -> Result<bool, TrackerError> {
        let inlets = self.inlets.lock();
        let entry = inlets.get(&id).ok_or(TrackerError::UnknownInlet(id))?;
        Ok(entry.is_listening())
    }

    pub fn info(&self, id: InletId) -> Result<StreamMeta, TrackerError> {
        let inlets = self.inlets.lock();
        let entry = inlets.get(&id).ok_or(TrackerError::UnknownInlet(id))?;
        Ok(entry.meta.clone())
    }

    /// Stop listening and drop the inlet with its buffer.
    pub fn delete(&self, id: InletId) -> Result<(), TrackerError> {
        let mut inlets = self.inlets.lock();
        let mut entry = inlets.remove(&id).ok_or(TrackerError::UnknownInlet(id))?;
        entry.stop();
        Ok(())
    }

    /// Copy up to `count` records (default: the newest one).
    pub fn peek_n(
        &self,
        id: InletId,
        count: Option<usize>,
        side: Option<BufferSide>,
    ) -> Result<InletData, TrackerError> {
        let count = count.unwrap_or(1);
        let side = side.unwrap_or(BufferSide::End);
        self.with_store(id, |store| {
            Ok(match store {
                InletStore::Gaze(buffer) => InletData::Gaze(buffer.peek_n(count, side)),
                InletStore::EyeImage(buffer) => InletData::EyeImage(buffer.peek_n(count, side)),
                InletStore::ExtSignal(buffer) => InletData::ExtSignal(buffer.peek_n(count, side)),
                InletStore::TimeSync(buffer) => InletData::TimeSync(buffer.peek_n(count, side)),
                InletStore::Positioning(buffer) => {
                    InletData::Positioning(buffer.peek_n(count, side))
                }
            })
        })
    }

    /// Move out up to `count` records (default: everything, oldest first).
    pub fn consume_n(
        &self,
        id: InletId,
        count: Option<usize>,
        side: Option<BufferSide>,
    ) -> Result<InletData, TrackerError> {
        let count = count.unwrap_or(usize::MAX);
        let side = side.unwrap_or(BufferSide::Start);
        self.with_store(id, |store| {
            Ok(match store {
                InletStore::Gaze(buffer) => InletData::Gaze(buffer.consume_n(count, side)),
                InletStore::EyeImage(buffer) => InletData::EyeImage(buffer.consume_n(count, side)),
                InletStore::ExtSignal(buffer) => {
                    InletData::ExtSignal(buffer.consume_n(count, side))
                }
                InletStore::TimeSync(buffer) => InletData::TimeSync(buffer.consume_n(count, side)),
                InletStore::Positioning(buffer) => {
                    InletData::Positioning(buffer.consume_n(count, side))
                }
            })
        })
    }

    pub fn peek_time_range(
        &self,
        id: InletId,
        t_lo: i64,
        t_hi: i64,
        source: TimestampSource,
    ) -> Result<InletData, TrackerError> {
        self.with_timed_store(id, |store| {
            Ok(match store {
                InletStore::Gaze(buffer) => {
                    InletData::Gaze(buffer.peek_time_range_by(t_lo, t_hi, |s| s.key(source)))
                }
                InletStore::EyeImage(buffer) => {
                    InletData::EyeImage(buffer.peek_time_range_by(t_lo, t_hi, |s| s.key(source)))
                }
                InletStore::ExtSignal(buffer) => {
                    InletData::ExtSignal(buffer.peek_time_range_by(t_lo, t_hi, |s| s.key(source)))
                }
                InletStore::TimeSync(buffer) => {
                    InletData::TimeSync(buffer.peek_time_range_by(t_lo, t_hi, |s| s.key(source)))
                }
                InletStore::Positioning(_) => unreachable!("rejected by with_timed_store"),
            })
        })
    }

    pub fn consume_time_range(
        &self,
        id: InletId,
        t_lo: i64,
        t_hi: i64,
        source: TimestampSource,
    ) -> Result<InletData, TrackerError> {
        self.with_timed_store(id, |store| {
            Ok(match store {
                InletStore::Gaze(buffer) => {
                    InletData::Gaze(buffer.consume_time_range_by(t_lo, t_hi, |s| s.key(source)))
                }
                InletStore::EyeImage(buffer) => {
                    InletData::EyeImage(buffer.consume_time_range_by(t_lo, t_hi, |s| s.key(source)))
                }
                InletStore::ExtSignal(buffer) => InletData::ExtSignal(
                    buffer.consume_time_range_by(t_lo, t_hi, |s| s.key(source)),
                ),
                InletStore::TimeSync(buffer) => {
                    InletData::TimeSync(buffer.consume_time_range_by(t_lo, t_hi, |s| s.key(source)))
                }
                InletStore::Positioning(_) => unreachable!("rejected by with_timed_store"),
            })
        })
    }

    pub fn clear(&self, id: InletId) -> Result<(), TrackerError> {
        self.with_store(id, |store| {
            clear_store(store);
            Ok(())
        })
    }

    pub fn clear_time_range(
        &self,
        id: InletId,
        t_lo: i64,
        t_hi: i64,
        source: TimestampSource,
    ) -> Result<(), TrackerError> {
        self.with_timed_store(id, |store| {
            match store {
                InletStore::Gaze(buffer) => {
                    buffer.clear_time_range_by(t_lo, t_hi, |s| s.key(source))
                }
                InletStore::EyeImage(buffer) => {
                    buffer.clear_time_range_by(t_lo, t_hi, |s| s.key(source))
                }
                InletStore::ExtSignal(buffer) => {
                    buffer.clear_time_range_by(t_lo, t_hi, |s| s.key(source))
                }
                InletStore::TimeSync(buffer) => {
                    buffer.clear_time_range_by(t_lo, t_hi, |s| s.key(source))
                }
                InletStore::Positioning(_) => unreachable!("rejected by with_timed_store"),
            }
            Ok(())
        })
    }

    fn with_store<R>(
        &self,
        id: InletId,
        operation: impl FnOnce(&InletStore) -> Result<R, TrackerError>,
    ) -> Result<R, TrackerError> {
        let inlets = self.inlets.lock();
        let entry = inlets.get(&id).ok_or(TrackerError::UnknownInlet(id))?;
        operation(&entry.store)
    }

    fn with_timed_store<R>(
        &self,
        id: InletId,
        operation: impl FnOnce(&InletStore) -> Result<R, TrackerError>,
    ) -> Result<R, TrackerError> {
        self.with_store(id, |store| {
            if !store.supports_time_range() {
                return Err(TrackerError::InvalidOperation(
                    "positioning records carry no timestamps".into(),
                ));
            }
            operation(store)
        })
    }
}

impl Drop for InletManager {
    fn drop(&mut self) {
        for (_, entry) in self.inlets.lock().iter_mut() {
            entry.stop();
        }
    }
}

fn clear_store(store: &InletStore) {
    match store {
        InletStore::Gaze(buffer) => buffer.clear(),
        InletStore::EyeImage(buffer) => buffer.clear(),
        InletStore::ExtSignal(buffer) => buffer.clear(),
        InletStore::TimeSync(buffer) => buffer.clear(),
        InletStore::Positioning(buffer) => buffer.clear(),
    }
}

fn micros_of(timestamp: Option<f64>) -> i64 {
    (timestamp.unwrap_or(0.0) * 1_000_000.0).round() as i64
}

fn decode_eye(channels: &[f32]) -> EyeData {
    EyeData {
        gaze_point: GazePoint {
            on_display_area: [channels[0], channels[1]],
            in_user_coords: [channels[2], channels[3], channels[4]],
            validity: Validity::from_flag(channels[5] == 1.0),
            available: channels[6] == 1.0,
        },
        pupil: Pupil {
            diameter: channels[7],
            validity: Validity::from_flag(channels[8] == 1.0),
            available: channels[9] == 1.0,
        },
        gaze_origin: GazeOrigin {
            in_user_coords: [channels[10], channels[11], channels[12]],
            in_track_box_coords: [channels[13], channels[14], channels[15]],
            validity: Validity::from_flag(channels[16] == 1.0),
            available: channels[17] == 1.0,
        },
        openness: EyeOpenness {
            diameter: channels[18],
            validity: Validity::from_flag(channels[19] == 1.0),
            available: channels[20] == 1.0,
        },
    }
}

/// The 42-channel layout carries no device timestamp; the record keeps the
/// outlet-side sample timestamp as its `system_ts`.
fn decode_gaze(sample: &BusSample) -> Option<GazeRecord> {
    let SampleData::F32(channels) = &sample.data else {
        return None;
    };
    if channels.len() != crate::outlet::GAZE_CHANNELS {
        log::warn!("gaze sample with {} channels dropped", channels.len());
        return None;
    }
    Some(GazeRecord {
        device_ts: 0,
        system_ts: micros_of(sample.timestamp),
        left: decode_eye(&channels[..21]),
        right: decode_eye(&channels[21..]),
    })
}

fn decode_ext_signal(sample: &BusSample) -> Option<ExtSignal> {
    let SampleData::I64(channels) = &sample.data else {
        return None;
    };
    if channels.len() != crate::outlet::EXT_SIGNAL_CHANNELS {
        return None;
    }
    Some(ExtSignal {
        device_ts: channels[0],
        system_ts: micros_of(sample.timestamp),
        value: channels[1],
        change_type: ExtSignalChange::ValueChanged,
    })
}

fn decode_time_sync(sample: &BusSample) -> Option<TimeSync> {
    let SampleData::I64(channels) = &sample.data else {
        return None;
    };
    if channels.len() != crate::outlet::TIME_SYNC_CHANNELS {
        return None;
    }
    Some(TimeSync {
        system_request_ts: channels[0],
        device_ts: channels[1],
        system_response_ts: channels[2],
    })
}

fn decode_positioning(sample: &BusSample) -> Option<Positioning> {
    let SampleData::F32(channels) = &sample.data else {
        return None;
    };
    if channels.len() != crate::outlet::POSITIONING_CHANNELS {
        return None;
    }
    let eye = |chunk: &[f32]| crate::types::EyePosition {
        user_position: [chunk[0], chunk[1], chunk[2]],
        validity: Validity::from_flag(chunk[3] == 1.0),
    };
    Some(Positioning {
        left: eye(&channels[..4]),
        right: eye(&channels[4..]),
    })
}

fn decode_eye_image(sample: BusSample) -> Option<EyeImage> {
    let system_ts = micros_of(sample.timestamp);
    let SampleData::Bytes(payload) = sample.data else {
        return None;
    };
    Some(EyeImage {
        device_ts: 0,
        system_ts,
        region_id: 0,
        region_top: 0,
        region_left: 0,
        bits_per_pixel: 8,
        padding_per_pixel: 0,
        width: 0,
        height: 0,
        kind: EyeImageKind::Unknown,
        camera_id: 0,
        is_gif: false,
        payload,
    })
}
