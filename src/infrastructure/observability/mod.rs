//! Push-based observability.
//!
//! Outbound data only: a prometheus registry holds the platform counters
//! and gauges, and a periodic reporter renders them to the structured log
//! stream. No HTTP server, no incoming requests.

pub mod metrics;
pub mod reporter;

pub use metrics::Metrics;
pub use reporter::MetricsReporter;
