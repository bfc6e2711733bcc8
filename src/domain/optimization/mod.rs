// Continuous-learning domain
pub mod run;
pub mod trade_counter;

pub use run::{OptimizationRun, OptimizationStatus, TriggerReason};
pub use trade_counter::{DEFAULT_TRIGGER_THRESHOLD, TradeCounter};
