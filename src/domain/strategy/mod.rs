// Strategy configuration domain
pub mod history;
pub mod signal_config;

pub use history::{ConfigStatus, StrategyConfigHistory};
pub use signal_config::SignalConfig;
