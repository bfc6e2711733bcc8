// Performance measurement domain
pub mod fitness;
pub mod metrics;

pub use metrics::{BacktestMetrics, ClosedTrade, EquityPoint, ExitReason};
