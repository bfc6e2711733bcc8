// Scanning pipeline
pub mod router;
pub mod scanner;

// Strategy configuration registry
pub mod registry;

// Simulated execution
pub mod paper_trading;

// Strategy evaluation suite
pub mod backtest;
pub mod ml_tuning;
pub mod monte_carlo;
pub mod walk_forward;

// Continuous learning
pub mod learning;

// Background execution
pub mod watchdog;
pub mod worker;

// Operational health
pub mod health;
