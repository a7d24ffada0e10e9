//! Gaze / eye-openness merge staging
//!
//! Gaze and eye-openness samples arrive on independent device callbacks but
//! describe the same moments: samples of the two streams share device
//! timestamps. While both streams record and the merge policy is on, arrivals
//! pass through a small staging deque of partially built [`GazeRecord`]s
//! keyed by `device_ts`. Samples on each stream arrive in device-timestamp
//! order, which the pairing walk relies on: an entry strictly older than an
//! incoming sample whose opposite side is already filled can never complete
//! and is emitted as-is.

use crate::types::{GazeRecord, RawEyeOpenness, RawGaze};
use std::collections::VecDeque;

enum Arrival<'a> {
    Gaze(&'a RawGaze),
    Openness(&'a RawEyeOpenness),
}

impl Arrival<'_> {
    fn device_ts(&self) -> i64 {
        match self {
            Arrival::Gaze(raw) => raw.device_ts,
            Arrival::Openness(raw) => raw.device_ts,
        }
    }

    fn system_ts(&self) -> i64 {
        match self {
            Arrival::Gaze(raw) => raw.system_ts,
            Arrival::Openness(raw) => raw.system_ts,
        }
    }

    fn apply(&self, record: &mut GazeRecord) {
        match self {
            Arrival::Gaze(raw) => record.apply_gaze(raw),
            Arrival::Openness(raw) => record.apply_openness(raw),
        }
    }

    /// An entry older than this arrival whose opposite side is already
    /// populated can no longer be completed: the side this arrival belongs
    /// to has moved past the entry's timestamp.
    fn abandons(&self, entry: &GazeRecord) -> bool {
        match self {
            Arrival::Gaze(raw) => entry.device_ts < raw.device_ts && entry.has_openness(),
            Arrival::Openness(raw) => entry.device_ts < raw.device_ts && entry.has_gaze(),
        }
    }
}

/// Staging area pairing gaze and openness arrivals into merged records.
///
/// Not internally synchronized; the dispatcher guards it with the staging
/// lock and flushes whatever [`ingest_gaze`](GazeMerger::ingest_gaze) /
/// [`ingest_openness`](GazeMerger::ingest_openness) return to the gaze
/// buffer, in order.
#[derive(Default)]
pub struct GazeMerger {
    staging: VecDeque<GazeRecord>,
}

impl GazeMerger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.staging.is_empty()
    }

    pub fn len(&self) -> usize {
        self.staging.len()
    }

    /// Feed a gaze arrival. Returns the records that became emittable, in
    /// emit order. With `stage` off the arrival is packaged and returned
    /// immediately.
    pub fn ingest_gaze(&mut self, raw: &RawGaze, stage: bool) -> Vec<GazeRecord> {
        self.ingest(Arrival::Gaze(raw), stage)
    }

    /// Feed an eye-openness arrival; see [`ingest_gaze`](Self::ingest_gaze).
    pub fn ingest_openness(&mut self, raw: &RawEyeOpenness, stage: bool) -> Vec<GazeRecord> {
        self.ingest(Arrival::Openness(raw), stage)
    }

    /// Flush staging as-is, oldest first. Used when the merge policy turns
    /// off, when either stream stops, and at teardown.
    pub fn drain(&mut self) -> Vec<GazeRecord> {
        self.staging.drain(..).collect()
    }

    fn ingest(&mut self, arrival: Arrival<'_>, stage: bool) -> Vec<GazeRecord> {
        let mut emitted = Vec::new();
        let mut matched = false;

        if stage {
            let mut index = 0;
            while index < self.staging.len() {
                let entry = &self.staging[index];
                if arrival.abandons(entry) {
                    // complete-in-order, emit and keep walking
                    if let Some(entry) = self.staging.remove(index) {
                        emitted.push(entry);
                    }
                } else if entry.device_ts == arrival.device_ts() {
                    if let Some(mut entry) = self.staging.remove(index) {
                        arrival.apply(&mut entry);
                        emitted.push(entry);
                    }
                    matched = true;
                    break;
                } else {
                    break;
                }
            }
        }

        if !matched {
            let mut record = GazeRecord {
                device_ts: arrival.device_ts(),
                system_ts: arrival.system_ts(),
                ..Default::default()
            };
            arrival.apply(&mut record);
            if stage {
                self.staging.push_back(record);
            } else {
                emitted.push(record);
            }
        }

        emitted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaze(device_ts: i64) -> RawGaze {
        RawGaze {
            device_ts,
            system_ts: device_ts * 10,
            ..Default::default()
        }
    }

    fn openness(device_ts: i64) -> RawEyeOpenness {
        RawEyeOpenness {
            device_ts,
            system_ts: device_ts * 10,
            left_value: 9.0,
            left_valid: true,
            right_value: 9.0,
            right_valid: true,
        }
    }

    fn device_keys(records: &[GazeRecord]) -> Vec<i64> {
        records.iter().map(|record| record.device_ts).collect()
    }

    #[test]
    fn pairs_in_lockstep() {
        let mut merger = GazeMerger::new();
        let mut out = Vec::new();
        out.extend(merger.ingest_gaze(&gaze(100), true));
        out.extend(merger.ingest_openness(&openness(100), true));
        out.extend(merger.ingest_openness(&openness(200), true));
        out.extend(merger.ingest_gaze(&gaze(200), true));
        assert_eq!(device_keys(&out), vec![100, 200]);
        assert!(out.iter().all(|record| record.has_gaze() && record.has_openness()));
        assert!(merger.is_empty());
    }

    #[test]
    fn pairs_under_any_interleaving() {
        // all sides delivered: every interleaving pairs fully, in order
        let orders: &[&[(bool, i64)]] = &[
            &[(true, 1), (false, 1), (true, 2), (false, 2), (true, 3), (false, 3), (true, 4), (false, 4)],
            &[(true, 1), (true, 2), (false, 1), (false, 2), (true, 3), (true, 4), (false, 3), (false, 4)],
            &[(false, 1), (false, 2), (true, 1), (true, 2), (false, 3), (false, 4), (true, 3), (true, 4)],
            &[(true, 1), (true, 2), (true, 3), (true, 4), (false, 1), (false, 2), (false, 3), (false, 4)],
        ];
        for order in orders {
            let mut merger = GazeMerger::new();
            let mut out = Vec::new();
            for &(is_gaze, at) in *order {
                if is_gaze {
                    out.extend(merger.ingest_gaze(&gaze(at), true));
                } else {
                    out.extend(merger.ingest_openness(&openness(at), true));
                }
            }
            out.extend(merger.drain());
            assert_eq!(device_keys(&out), vec![1, 2, 3, 4]);
            assert!(
                out.iter().all(|record| record.has_gaze() && record.has_openness()),
                "partial record leaked for order {order:?}"
            );
        }
    }

    #[test]
    fn abandons_entry_when_missing_side_moves_past_it() {
        // openness@3 never arrives; the later openness@4 proves it never will
        let mut merger = GazeMerger::new();
        let mut out = Vec::new();
        out.extend(merger.ingest_gaze(&gaze(3), true));
        out.extend(merger.ingest_gaze(&gaze(4), true));
        assert!(out.is_empty());
        out.extend(merger.ingest_openness(&openness(4), true));
        // 3 flushed partial before 4 is emitted complete
        assert_eq!(device_keys(&out), vec![3, 4]);
        assert!(!out[0].has_openness());
        assert!(out[0].has_gaze());
        assert!(out[1].has_gaze() && out[1].has_openness());
        assert!(merger.is_empty());
    }

    #[test]
    fn abandonment_is_symmetric() {
        let mut merger = GazeMerger::new();
        let mut out = Vec::new();
        out.extend(merger.ingest_openness(&openness(3), true));
        out.extend(merger.ingest_gaze(&gaze(4), true));
        assert_eq!(device_keys(&out), vec![3]);
        assert!(out[0].has_openness() && !out[0].has_gaze());
    }

    #[test]
    fn same_side_progress_does_not_abandon() {
        // gaze@1 still awaits openness@1; a later gaze must not flush it
        let mut merger = GazeMerger::new();
        assert!(merger.ingest_gaze(&gaze(1), true).is_empty());
        assert!(merger.ingest_gaze(&gaze(2), true).is_empty());
        let out = merger.ingest_openness(&openness(1), true);
        assert_eq!(device_keys(&out), vec![1]);
        assert!(out[0].has_gaze() && out[0].has_openness());
        assert_eq!(merger.len(), 1);
    }

    #[test]
    fn unstaged_arrival_passes_through() {
        let mut merger = GazeMerger::new();
        let out = merger.ingest_openness(&openness(7), false);
        assert_eq!(out.len(), 1);
        assert!(out[0].has_openness() && !out[0].has_gaze());
        assert!(merger.is_empty());
    }

    #[test]
    fn drain_preserves_order_and_partial_sides() {
        let mut merger = GazeMerger::new();
        merger.ingest_gaze(&gaze(10), true);
        merger.ingest_gaze(&gaze(20), true);
        let out = merger.drain();
        assert_eq!(device_keys(&out), vec![10, 20]);
        assert!(out.iter().all(|record| !record.has_openness()));
        assert!(merger.is_empty());
    }

    #[test]
    fn merged_record_keeps_first_arrival_timestamps() {
        let mut merger = GazeMerger::new();
        merger.ingest_gaze(&gaze(100), true);
        let out = merger.ingest_openness(&openness(100), true);
        assert_eq!(out[0].system_ts, 1000);
    }
}
