//! Time-indexed sample buffer
//!
//! One `TimeBuffer` per stream holds records in arrival order behind a
//! single-writer/multi-reader lock. Device callbacks append on the writer
//! side while consumers peek (non-destructive copy) or consume (move out)
//! either by count from one end of the buffer or by an inclusive timestamp
//! range. For streams in steady state arrival order equals non-decreasing
//! time-key order, which lets range lookups binary search.

use crate::types::{BufferSide, TimeKeyed};
use parking_lot::RwLock;

pub struct TimeBuffer<T> {
    inner: RwLock<Vec<T>>,
}

impl<T> Default for TimeBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TimeBuffer<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Vec::new()),
        }
    }

    pub fn with_capacity(hint: usize) -> Self {
        Self {
            inner: RwLock::new(Vec::with_capacity(hint)),
        }
    }

    /// Grow the reservation to at least `hint` records. Never shrinks.
    pub fn reserve(&self, hint: usize) {
        let mut buf = self.inner.write();
        if hint > buf.capacity() {
            let additional = hint - buf.len();
            buf.reserve(additional);
        }
    }

    pub fn append(&self, record: T) {
        self.inner.write().push(record);
    }

    pub fn extend(&self, records: impl IntoIterator<Item = T>) {
        self.inner.write().extend(records);
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

impl<T: Clone> TimeBuffer<T> {
    /// Copy up to `count` records from the given end of the buffer.
    ///
    /// Records come back in buffer (chronological) order regardless of side.
    /// Holds the read lock only while cloning.
    pub fn peek_n(&self, count: usize, side: BufferSide) -> Vec<T> {
        let buf = self.inner.read();
        let (start, end) = count_range(buf.len(), count, side);
        buf[start..end].to_vec()
    }

    /// Move out up to `count` records from the given end, shrinking the
    /// buffer.
    pub fn consume_n(&self, count: usize, side: BufferSide) -> Vec<T> {
        let mut buf = self.inner.write();
        if count >= buf.len() {
            return std::mem::take(&mut *buf);
        }
        let (start, end) = count_range(buf.len(), count, side);
        buf.drain(start..end).collect()
    }

    /// Copy all records whose key (as selected by `key`) lies in
    /// `[t_lo, t_hi]`, both bounds inclusive.
    pub fn peek_time_range_by(&self, t_lo: i64, t_hi: i64, key: impl Fn(&T) -> i64) -> Vec<T> {
        let buf = self.inner.read();
        let (start, end, _) = time_range(&buf, t_lo, t_hi, &key);
        buf[start..end].to_vec()
    }

    /// Move out all records whose key lies in `[t_lo, t_hi]`.
    pub fn consume_time_range_by(&self, t_lo: i64, t_hi: i64, key: impl Fn(&T) -> i64) -> Vec<T> {
        let mut buf = self.inner.write();
        let (start, end, whole) = time_range(&buf, t_lo, t_hi, &key);
        if whole {
            return std::mem::take(&mut *buf);
        }
        buf.drain(start..end).collect()
    }

    pub fn clear_time_range_by(&self, t_lo: i64, t_hi: i64, key: impl Fn(&T) -> i64) {
        let mut buf = self.inner.write();
        let (start, end, whole) = time_range(&buf, t_lo, t_hi, &key);
        if whole {
            buf.clear();
        } else {
            buf.drain(start..end);
        }
    }
}

impl<T: Clone + TimeKeyed> TimeBuffer<T> {
    pub fn peek_time_range(&self, t_lo: i64, t_hi: i64) -> Vec<T> {
        self.peek_time_range_by(t_lo, t_hi, T::time_key)
    }

    pub fn consume_time_range(&self, t_lo: i64, t_hi: i64) -> Vec<T> {
        self.consume_time_range_by(t_lo, t_hi, T::time_key)
    }

    pub fn clear_time_range(&self, t_lo: i64, t_hi: i64) {
        self.clear_time_range_by(t_lo, t_hi, T::time_key)
    }
}

fn count_range(len: usize, count: usize, side: BufferSide) -> (usize, usize) {
    let count = count.min(len);
    match side {
        BufferSide::Start => (0, count),
        BufferSide::End => (len - count, len),
    }
}

/// Locate `[t_lo, t_hi]` in a buffer ordered by non-decreasing key.
///
/// Returns `(start, end, whole)` where `whole` reports that the range spans
/// the entire buffer (also for an empty buffer), letting consume/clear
/// short-circuit.
fn time_range<T>(buf: &[T], t_lo: i64, t_hi: i64, key: &impl Fn(&T) -> i64) -> (usize, usize, bool) {
    if buf.is_empty() {
        return (0, 0, true);
    }

    let incl_first = t_lo <= key(&buf[0]);
    let incl_last = t_hi >= key(&buf[buf.len() - 1]);

    let start = if incl_first {
        0
    } else {
        buf.partition_point(|record| key(record) < t_lo)
    };
    let end = if incl_last {
        buf.len()
    } else {
        buf.partition_point(|record| key(record) <= t_hi)
    };

    (start, end.max(start), incl_first && incl_last)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TimeSync;

    fn sync(at: i64) -> TimeSync {
        TimeSync {
            system_request_ts: at,
            device_ts: at * 2,
            system_response_ts: at + 50,
        }
    }

    fn filled(keys: &[i64]) -> TimeBuffer<TimeSync> {
        let buffer = TimeBuffer::new();
        for &at in keys {
            buffer.append(sync(at));
        }
        buffer
    }

    #[test]
    fn peek_time_range_is_inclusive_both_sides() {
        let buffer = filled(&[1000, 2000, 2500, 3000, 4000]);
        let hit = buffer.peek_time_range(2000, 3000);
        let keys: Vec<i64> = hit.iter().map(|record| record.system_request_ts).collect();
        assert_eq!(keys, vec![2000, 2500, 3000]);
        // peek leaves the buffer untouched
        assert_eq!(buffer.len(), 5);
    }

    #[test]
    fn peek_time_range_excludes_everything_outside() {
        let buffer = filled(&[1000, 2000, 3000]);
        assert!(buffer.peek_time_range(4000, 9000).is_empty());
        assert!(buffer.peek_time_range(0, 500).is_empty());
        assert_eq!(buffer.peek_time_range(0, 9000).len(), 3);
    }

    #[test]
    fn empty_buffer_reports_whole_range() {
        let buffer: TimeBuffer<TimeSync> = TimeBuffer::new();
        assert!(buffer.peek_time_range(0, 100).is_empty());
        assert!(buffer.consume_time_range(0, 100).is_empty());
        buffer.clear_time_range(0, 100);
    }

    #[test]
    fn consume_from_start_keeps_tail() {
        let buffer = filled(&[1, 2, 3, 4, 5]);
        let taken = buffer.consume_n(2, BufferSide::Start);
        assert_eq!(taken.len(), 2);
        assert_eq!(taken[0].system_request_ts, 1);
        let rest = buffer.peek_n(usize::MAX, BufferSide::Start);
        let keys: Vec<i64> = rest.iter().map(|record| record.system_request_ts).collect();
        assert_eq!(keys, vec![3, 4, 5]);
    }

    #[test]
    fn consume_from_end_keeps_head() {
        let buffer = filled(&[1, 2, 3, 4, 5]);
        let taken = buffer.consume_n(2, BufferSide::End);
        let keys: Vec<i64> = taken.iter().map(|record| record.system_request_ts).collect();
        assert_eq!(keys, vec![4, 5]);
        let rest = buffer.peek_n(usize::MAX, BufferSide::Start);
        let keys: Vec<i64> = rest.iter().map(|record| record.system_request_ts).collect();
        assert_eq!(keys, vec![1, 2, 3]);
    }

    #[test]
    fn consume_more_than_present_drains_all() {
        let buffer = filled(&[1, 2]);
        assert_eq!(buffer.consume_n(usize::MAX, BufferSide::Start).len(), 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn peek_end_returns_newest_in_order() {
        let buffer = filled(&[1, 2, 3]);
        let newest = buffer.peek_n(2, BufferSide::End);
        let keys: Vec<i64> = newest.iter().map(|record| record.system_request_ts).collect();
        assert_eq!(keys, vec![2, 3]);
    }

    #[test]
    fn consume_time_range_removes_only_the_range() {
        let buffer = filled(&[10, 20, 30, 40]);
        let taken = buffer.consume_time_range(20, 30);
        assert_eq!(taken.len(), 2);
        let rest = buffer.peek_n(usize::MAX, BufferSide::Start);
        let keys: Vec<i64> = rest.iter().map(|record| record.system_request_ts).collect();
        assert_eq!(keys, vec![10, 40]);
    }

    #[test]
    fn clear_time_range_whole_span_empties() {
        let buffer = filled(&[10, 20, 30]);
        buffer.clear_time_range(i64::MIN, i64::MAX);
        assert!(buffer.is_empty());
    }

    #[test]
    fn inverted_range_is_empty() {
        let buffer = filled(&[10, 20, 30]);
        assert!(buffer.peek_time_range(25, 15).is_empty());
        assert_eq!(buffer.len(), 3);
    }

    #[test]
    fn range_by_custom_key() {
        let buffer = filled(&[10, 20, 30]);
        // key by device_ts (2x the request timestamp)
        let hit = buffer.peek_time_range_by(40, 60, |record| record.device_ts);
        assert_eq!(hit.len(), 2);
    }
}
