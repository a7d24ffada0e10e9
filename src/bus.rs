//! Network stream bus surface
//!
//! The transport is an external collaborator providing named multi-channel
//! outlets and inlets with per-sample timestamps, LSL style. Outlets are
//! declared once with a fixed channel layout and metadata; inlets pull
//! timestamped samples from a resolved remote outlet on a transport-owned
//! or caller-owned thread.

use crate::error::TrackerError;
use crate::types::StreamKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Sample rate announced by outlets without a fixed rate.
pub const IRREGULAR_RATE: f64 = 0.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SampleFormat {
    F32,
    I64,
    Bytes,
}

/// One multiplexed sample's channel values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleData {
    F32(Vec<f32>),
    I64(Vec<i64>),
    Bytes(Vec<u8>),
}

impl SampleData {
    pub fn format(&self) -> SampleFormat {
        match self {
            SampleData::F32(_) => SampleFormat::F32,
            SampleData::I64(_) => SampleFormat::I64,
            SampleData::Bytes(_) => SampleFormat::Bytes,
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            SampleData::F32(values) => values.len(),
            SampleData::I64(values) => values.len(),
            SampleData::Bytes(bytes) => bytes.len(),
        }
    }
}

/// Sample plus the outlet-side timestamp in seconds, when the stream has
/// one (positioning samples are pushed without).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusSample {
    pub data: SampleData,
    pub timestamp: Option<f64>,
}

/// Declared identity of a published stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMeta {
    /// Logical stream name, e.g. `Tracker_gaze`.
    pub name: String,
    pub kind: StreamKind,
    /// Content type announced on the bus (`Gaze`, `TTL`, `TimeSync`, ...).
    pub content_type: String,
    pub channel_count: usize,
    pub format: SampleFormat,
    /// Samples per second, or [`IRREGULAR_RATE`].
    pub nominal_rate: f64,
    /// Unique source identifier, e.g. `Tracker_gaze@<serial>`.
    pub source_id: String,
    pub metadata: Vec<(String, String)>,
}

impl StreamMeta {
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }
}

/// Publishing side of one stream. Pushing never blocks the caller beyond
/// transport buffering; transport failures are the implementation's to log.
pub trait OutletHandle: Send + Sync {
    fn push(&self, sample: BusSample);
}

/// Subscription to one remote stream.
pub trait InletHandle: Send {
    fn meta(&self) -> &StreamMeta;
    /// Pull the next sample, waiting at most `timeout`.
    fn pull(&mut self, timeout: Duration) -> Option<BusSample>;
}

/// The bus itself: outlet creation, discovery, and inlet resolution.
pub trait StreamBus: Send + Sync {
    fn create_outlet(&self, meta: StreamMeta) -> Result<Box<dyn OutletHandle>, TrackerError>;
    /// Visible remote outlets, optionally filtered by stream kind.
    fn resolve(&self, filter: Option<StreamKind>) -> Vec<StreamMeta>;
    fn open_inlet(&self, meta: &StreamMeta) -> Result<Box<dyn InletHandle>, TrackerError>;
}
