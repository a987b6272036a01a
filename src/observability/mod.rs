//! Observability subsystem
//!
//! Structured JSON logging with typed events.
//!
//! ```ignore
//! use replichat::observability::{Event, Logger};
//!
//! Logger::info(Event::LogAppend, &[("node", "1"), ("sequence", "42")]);
//! ```

mod events;
mod logger;

pub use events::Event;
pub use logger::{Logger, Severity};

/// Log an event at INFO, or FATAL for fatal events.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    let severity = if event.is_fatal() {
        Severity::Fatal
    } else {
        Severity::Info
    };
    Logger::log(severity, event, fields);
}
