pub mod config_history_repository;
pub mod optimization_run_repository;
pub mod paper_trade_repository;
pub mod run_repositories;
pub mod signal_repository;
pub mod trade_counter_repository;

pub use config_history_repository::SqliteConfigHistoryRepository;
pub use optimization_run_repository::SqliteOptimizationRunRepository;
pub use paper_trade_repository::SqlitePaperTradeRepository;
pub use run_repositories::{
    SqliteBacktestRunRepository, SqliteMlTuningJobRepository, SqliteMonteCarloRunRepository,
    SqliteWalkForwardRunRepository,
};
pub use signal_repository::SqliteSignalRepository;
pub use trade_counter_repository::SqliteTradeCounterRepository;
