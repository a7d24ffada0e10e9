//! Process-wide log collection
//!
//! One append-only buffer for everything the vendor stack reports outside
//! the data streams: driver log lines and per-tracker stream errors. The
//! collector is process-global because the driver log itself is not tied to
//! any one tracker. Callbacks hold the buffer lock only to push.

use crate::config::BufferConfig;
use crate::device::{DriverLogEvent, TrackerDriver};
use crate::error::TrackerError;
use crate::types::LogEntry;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

pub struct LogCollector {
    enabled: AtomicBool,
    entries: Mutex<Vec<LogEntry>>,
}

static COLLECTOR: OnceLock<LogCollector> = OnceLock::new();

/// The process-wide collector instance.
pub fn collector() -> &'static LogCollector {
    COLLECTOR.get_or_init(|| LogCollector {
        enabled: AtomicBool::new(false),
        entries: Mutex::new(Vec::new()),
    })
}

impl LogCollector {
    /// Register with the driver log and start collecting. Returns `false`
    /// when collection was already running.
    pub fn start(
        &'static self,
        driver: &dyn TrackerDriver,
        reserve_hint: Option<usize>,
    ) -> Result<bool, TrackerError> {
        if self.enabled.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        {
            let mut entries = self.entries.lock();
            let hint = reserve_hint.unwrap_or(BufferConfig::default().driver_log);
            if hint > entries.capacity() {
                let additional = hint - entries.len();
                entries.reserve(additional);
            }
        }

        driver
            .subscribe_log(Arc::new(move |event: DriverLogEvent| {
                collector().push(LogEntry::DriverLog {
                    system_ts: event.system_ts,
                    source: event.source,
                    level: event.level,
                    text: event.text,
                });
            }))
            .map_err(|failure| {
                self.enabled.store(false, Ordering::SeqCst);
                TrackerError::from(failure)
            })?;

        log::info!("driver log collection started");
        Ok(true)
    }

    /// Unregister and stop collecting. Always clears the buffer. Returns
    /// `false` when collection was not running.
    pub fn stop(&self, driver: &dyn TrackerDriver) -> Result<bool, TrackerError> {
        if !self.enabled.swap(false, Ordering::SeqCst) {
            return Ok(false);
        }
        driver.unsubscribe_log()?;
        self.entries.lock().clear();
        log::info!("driver log collection stopped");
        Ok(true)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Snapshot the collected entries, optionally draining them.
    pub fn get(&self, clear: bool) -> Vec<LogEntry> {
        let mut entries = self.entries.lock();
        if clear {
            std::mem::take(&mut *entries)
        } else {
            entries.clone()
        }
    }

    /// Append one entry. Dropped silently while collection is off.
    pub(crate) fn push(&self, entry: LogEntry) {
        if !self.enabled.load(Ordering::Relaxed) {
            return;
        }
        self.entries.lock().push(entry);
    }
}

/// Start collecting driver log lines and stream errors process-wide.
pub fn start_logging(
    driver: &dyn TrackerDriver,
    reserve_hint: Option<usize>,
) -> Result<bool, TrackerError> {
    collector().start(driver, reserve_hint)
}

/// Snapshot (and optionally drain) the collected entries.
pub fn get_log(clear: bool) -> Vec<LogEntry> {
    collector().get(clear)
}

/// Stop collecting. Always clears the buffer.
pub fn stop_logging(driver: &dyn TrackerDriver) -> Result<bool, TrackerError> {
    collector().stop(driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{LogLevel, LogSource, StreamKind};

    // the collector is process-global, so exercise it in one test to avoid
    // cross-test interference
    #[test]
    fn collects_only_while_enabled() {
        let collector = collector();

        collector.push(LogEntry::StreamError {
            serial: "TX300-1".into(),
            system_ts: 1,
            stream: StreamKind::Gaze,
            source: "user".into(),
            text: "dropped".into(),
        });
        assert!(collector.get(false).is_empty());

        collector.enabled.store(true, Ordering::SeqCst);
        collector.push(LogEntry::DriverLog {
            system_ts: 2,
            source: LogSource::Sdk,
            level: LogLevel::Warning,
            text: "late wakeup".into(),
        });
        collector.push(LogEntry::StreamError {
            serial: "TX300-1".into(),
            system_ts: 3,
            stream: StreamKind::EyeImage,
            source: "stream".into(),
            text: "frame lost".into(),
        });

        let snapshot = collector.get(false);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(collector.get(true).len(), 2);
        assert!(collector.get(false).is_empty());
        collector.enabled.store(false, Ordering::SeqCst);
    }
}
