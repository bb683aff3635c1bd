//! Observability for index operations
//!
//! - Structured JSON logging, one synchronous line per event
//! - Per-index counters
//! - Begin/complete bracketing of bulk loads
//!
//! Observability is read-only: it never changes the outcome of an index
//! operation, and a failing log write is ignored.

mod events;
mod logger;
mod metrics;
mod scope;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{IndexMetrics, IndexMetricsSnapshot};
pub use scope::ObservationScope;

/// Log a lifecycle event at its own severity.
pub fn log_event(event: Event, fields: &[(&str, &str)]) {
    Logger::log(event.severity(), event.as_str(), fields);
}
