//! Callback routing
//!
//! One [`Dispatcher`] per device subscription: it receives the vendor
//! callbacks, converts each record to its internal type and appends it to
//! the session's buffer for that stream, forwarding the same record to the
//! open outlet afterwards so publication order matches append order. Gaze
//! and eye-openness arrivals go through merge staging while both streams
//! record under the merge policy.

use crate::device::StreamSink;
use crate::outlet;
use crate::session::TrackerShared;
use crate::types::{
    EyeImage, ExtSignal, GazeRecord, Notification, Positioning, RawEyeOpenness, RawGaze,
    StreamKind, TimeSync,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;

pub(crate) struct Dispatcher {
    shared: Arc<TrackerShared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<TrackerShared>) -> Self {
        Self { shared }
    }

    fn receive_gaze_path(&self, gaze: Option<&RawGaze>, openness: Option<&RawEyeOpenness>) {
        let shared = &self.shared;
        let need_stage = shared.recording.gaze.load(Ordering::SeqCst)
            && shared.recording.eye_openness.load(Ordering::SeqCst)
            && shared.recording.merge_openness.load(Ordering::SeqCst);

        // leftover staged entries with no merge to wait for drain first
        if !need_stage {
            shared.flush_staging();
        }

        // staging lock before gaze writer lock; holding it through the
        // append keeps emit order identical to buffer order
        let mut staging = shared.staging.lock();
        let emitted: Vec<GazeRecord> = match (gaze, openness) {
            (Some(raw), _) => staging.ingest_gaze(raw, need_stage),
            (_, Some(raw)) => staging.ingest_openness(raw, need_stage),
            (None, None) => Vec::new(),
        };
        shared
            .staging_empty
            .store(staging.is_empty(), Ordering::SeqCst);
        shared.append_gaze(&emitted);
    }
}

impl StreamSink for Dispatcher {
    fn on_gaze(&self, raw: RawGaze) {
        self.receive_gaze_path(Some(&raw), None);
    }

    fn on_eye_openness(&self, raw: RawEyeOpenness) {
        self.receive_gaze_path(None, Some(&raw));
    }

    fn on_eye_image(&self, image: EyeImage) {
        let sample = outlet::serialize_eye_image(&image);
        self.shared.buffers.eye_image.append(image);
        self.shared.outlets.publish(StreamKind::EyeImage, sample);
    }

    fn on_ext_signal(&self, signal: ExtSignal) {
        self.shared.buffers.ext_signal.append(signal);
        self.shared
            .outlets
            .publish(StreamKind::ExtSignal, outlet::serialize_ext_signal(&signal));
    }

    fn on_time_sync(&self, sync: TimeSync) {
        self.shared.buffers.time_sync.append(sync);
        self.shared
            .outlets
            .publish(StreamKind::TimeSync, outlet::serialize_time_sync(&sync));
    }

    fn on_positioning(&self, positioning: Positioning) {
        self.shared.buffers.positioning.append(positioning);
        self.shared.outlets.publish(
            StreamKind::Positioning,
            outlet::serialize_positioning(&positioning),
        );
    }

    fn on_notification(&self, notification: Notification) {
        self.shared.buffers.notification.append(notification);
    }
}
