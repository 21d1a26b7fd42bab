// SPDX-License-Identifier: Apache-2.0 OR MIT
// Logger handle and sinks

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use super::{Facility, Severity};

/// A single log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub severity: Severity,
    pub facility: Facility,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:7} [{}] {}", self.severity, self.facility, self.message)
    }
}

/// Destination for log entries
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &LogEntry);
}

/// Sink that writes formatted entries to stderr
pub struct StderrSink;

impl LogSink for StderrSink {
    fn write(&self, entry: &LogEntry) {
        eprintln!("{}", entry);
    }
}

/// Sink that discards all entries
pub struct NullSink;

impl LogSink for NullSink {
    fn write(&self, _entry: &LogEntry) {}
}

/// Sink that captures entries in memory, for tests
#[derive(Default)]
pub struct MemorySink {
    entries: Mutex<Vec<LogEntry>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.entries.lock().unwrap().clear();
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &LogEntry) {
        self.entries.lock().unwrap().push(entry.clone());
    }
}

struct LoggerShared {
    sink: Box<dyn LogSink>,
    min_severity: AtomicU8,
}

/// Logger handle for writing log entries
///
/// A lightweight handle that can be cloned and passed to every component of
/// the stack; all clones share one sink and one severity threshold.
#[derive(Clone)]
pub struct Logger {
    shared: Arc<LoggerShared>,
}

impl Logger {
    pub fn new(sink: Box<dyn LogSink>, min_severity: Severity) -> Self {
        Self {
            shared: Arc::new(LoggerShared {
                sink,
                min_severity: AtomicU8::new(min_severity as u8),
            }),
        }
    }

    /// Logger that discards everything
    pub fn null() -> Self {
        Self::new(Box::new(NullSink), Severity::Error)
    }

    /// Logger sharing a memory sink, for tests
    pub fn with_memory_sink() -> (Self, Arc<MemorySink>) {
        let sink = Arc::new(MemorySink::new());
        let logger = Self {
            shared: Arc::new(LoggerShared {
                sink: Box::new(SharedSink(Arc::clone(&sink))),
                min_severity: AtomicU8::new(Severity::Debug as u8),
            }),
        };
        (logger, sink)
    }

    /// Change the minimum severity written to the sink
    pub fn set_min_severity(&self, severity: Severity) {
        self.shared
            .min_severity
            .store(severity as u8, Ordering::Relaxed);
    }

    /// Write a log entry
    #[inline]
    pub fn log(&self, severity: Severity, facility: Facility, message: &str) {
        if severity as u8 > self.shared.min_severity.load(Ordering::Relaxed) {
            return;
        }
        self.shared.sink.write(&LogEntry {
            severity,
            facility,
            message: message.to_string(),
        });
    }

    #[inline]
    pub fn error(&self, facility: Facility, message: &str) {
        self.log(Severity::Error, facility, message);
    }

    #[inline]
    pub fn warning(&self, facility: Facility, message: &str) {
        self.log(Severity::Warning, facility, message);
    }

    #[inline]
    pub fn notice(&self, facility: Facility, message: &str) {
        self.log(Severity::Notice, facility, message);
    }

    #[inline]
    pub fn info(&self, facility: Facility, message: &str) {
        self.log(Severity::Info, facility, message);
    }

    #[inline]
    pub fn debug(&self, facility: Facility, message: &str) {
        self.log(Severity::Debug, facility, message);
    }
}

struct SharedSink(Arc<MemorySink>);

impl LogSink for SharedSink {
    fn write(&self, entry: &LogEntry) {
        self.0.write(entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_captures_entries() {
        let (logger, sink) = Logger::with_memory_sink();

        logger.info(Facility::Test, "first");
        logger.error(Facility::Test, "second");

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].severity, Severity::Info);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].severity, Severity::Error);
    }

    #[test]
    fn test_severity_filtering() {
        let (logger, sink) = Logger::with_memory_sink();
        logger.set_min_severity(Severity::Warning);

        logger.debug(Facility::Test, "dropped");
        logger.info(Facility::Test, "dropped");
        logger.warning(Facility::Test, "kept");
        logger.error(Facility::Test, "kept");

        assert_eq!(sink.entries().len(), 2);
    }

    #[test]
    fn test_clones_share_sink_and_level() {
        let (logger, sink) = Logger::with_memory_sink();
        let clone = logger.clone();

        clone.set_min_severity(Severity::Error);
        logger.warning(Facility::Test, "dropped");
        clone.error(Facility::Test, "kept");

        assert_eq!(sink.entries().len(), 1);
    }

    #[test]
    fn test_entry_format() {
        let entry = LogEntry {
            severity: Severity::Notice,
            facility: Facility::Igmp,
            message: "joined group 239.1.2.3".to_string(),
        };
        assert_eq!(format!("{}", entry), "NOTICE  [Igmp] joined group 239.1.2.3");
    }

    #[test]
    fn test_null_logger() {
        let logger = Logger::null();
        logger.error(Facility::Test, "nowhere");
    }
}
