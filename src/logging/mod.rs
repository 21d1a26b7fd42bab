// Structured logging for the network stack.
//
// Follows the severity/facility split of syslog: every entry names the
// component that produced it, and the minimum severity can be changed at
// runtime. Sinks are pluggable so the demo writes to stderr while tests
// capture entries in memory.

mod facility;
mod logger;
#[macro_use]
mod macros;
mod severity;

pub use facility::Facility;
pub use logger::{LogEntry, LogSink, Logger, MemorySink, NullSink, StderrSink};
pub use severity::Severity;
