//! Repository traits separating the platform's business logic from the
//! SQLite implementations in `infrastructure::persistence`.

use crate::domain::evaluation::{
    BacktestRun, MlTuningJob, MonteCarloRun, RunStatus, SimulationOutcome, TuningSample,
    WalkForwardRun,
};
use crate::domain::market::MarketType;
use crate::domain::optimization::{OptimizationRun, TradeCounter};
use crate::domain::paper_trade::PaperTrade;
use crate::domain::signal::{Direction, Signal, SignalStatus};
use crate::domain::strategy::StrategyConfigHistory;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait SignalRepository: Send + Sync {
    /// Insert a new signal. Returns `StoreError::DuplicateEntity` (inside
    /// anyhow) when an ACTIVE signal already exists for the same
    /// (symbol, timeframe, direction).
    async fn insert(&self, signal: &Signal) -> Result<()>;

    async fn find_active(
        &self,
        symbol: &str,
        direction: Direction,
    ) -> Result<Vec<Signal>>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Signal>>;

    async fn list_active(&self, market_type: Option<MarketType>) -> Result<Vec<Signal>>;

    async fn update_status(&self, id: Uuid, status: SignalStatus) -> Result<()>;
}

#[async_trait]
pub trait PaperTradeRepository: Send + Sync {
    /// Insert a new trade. Duplicate (owner, signal) with an OPEN trade is
    /// `StoreError::DuplicateEntity`.
    async fn insert(&self, trade: &PaperTrade) -> Result<()>;

    async fn list_open(&self) -> Result<Vec<PaperTrade>>;

    async fn list_by_owner(&self, owner: Option<Uuid>) -> Result<Vec<PaperTrade>>;

    async fn close(&self, trade: &PaperTrade) -> Result<()>;
}

#[async_trait]
pub trait ConfigHistoryRepository: Send + Sync {
    /// Append a new row; versions are monotone per market type.
    async fn append(&self, row: &StrategyConfigHistory) -> Result<i64>;

    async fn active_for(&self, market_type: MarketType) -> Result<Option<StrategyConfigHistory>>;

    async fn next_version(&self, market_type: MarketType) -> Result<i64>;

    /// Archive the current ACTIVE row and mark `id` ACTIVE, atomically.
    async fn promote(&self, market_type: MarketType, id: i64) -> Result<()>;

    async fn set_status(&self, id: i64, status: crate::domain::strategy::ConfigStatus)
        -> Result<()>;

    async fn history_for(
        &self,
        market_type: MarketType,
        limit: usize,
    ) -> Result<Vec<StrategyConfigHistory>>;
}

#[async_trait]
pub trait BacktestRunRepository: Send + Sync {
    async fn insert(&self, run: &BacktestRun) -> Result<()>;
    async fn update(&self, run: &BacktestRun) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<BacktestRun>>;
    async fn status_of(&self, id: Uuid) -> Result<Option<RunStatus>>;
    async fn heartbeat(&self, id: Uuid, progress: u64) -> Result<()>;
    /// RUNNING rows whose heartbeat is older than `stale_before`.
    async fn find_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<BacktestRun>>;
}

#[async_trait]
pub trait WalkForwardRunRepository: Send + Sync {
    async fn insert(&self, run: &WalkForwardRun) -> Result<()>;
    async fn update(&self, run: &WalkForwardRun) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<WalkForwardRun>>;
    async fn status_of(&self, id: Uuid) -> Result<Option<RunStatus>>;
    async fn heartbeat(&self, id: Uuid, progress: u64) -> Result<()>;
    async fn find_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<WalkForwardRun>>;
}

#[async_trait]
pub trait MonteCarloRunRepository: Send + Sync {
    async fn insert(&self, run: &MonteCarloRun) -> Result<()>;
    async fn update(&self, run: &MonteCarloRun) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<MonteCarloRun>>;
    async fn status_of(&self, id: Uuid) -> Result<Option<RunStatus>>;
    async fn heartbeat(&self, id: Uuid, progress: u64) -> Result<()>;
    async fn find_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<MonteCarloRun>>;

    /// Child rows: one per finished simulation.
    async fn insert_outcomes(&self, run_id: Uuid, outcomes: &[SimulationOutcome]) -> Result<()>;
    async fn outcomes_for(&self, run_id: Uuid) -> Result<Vec<SimulationOutcome>>;
}

#[async_trait]
pub trait MlTuningJobRepository: Send + Sync {
    async fn insert(&self, job: &MlTuningJob) -> Result<()>;
    async fn update(&self, job: &MlTuningJob) -> Result<()>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<MlTuningJob>>;
    async fn status_of(&self, id: Uuid) -> Result<Option<RunStatus>>;
    async fn heartbeat(&self, id: Uuid, progress: u64) -> Result<()>;
    async fn find_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<MlTuningJob>>;

    async fn insert_samples(&self, job_id: Uuid, samples: &[TuningSample]) -> Result<()>;
    async fn samples_for(&self, job_id: Uuid) -> Result<Vec<TuningSample>>;
}

#[async_trait]
pub trait OptimizationRunRepository: Send + Sync {
    async fn insert(&self, run: &OptimizationRun) -> Result<()>;
    async fn update(&self, run: &OptimizationRun) -> Result<()>;
    async fn recent(&self, market_type: Option<MarketType>, limit: usize)
        -> Result<Vec<OptimizationRun>>;
}

#[async_trait]
pub trait TradeCounterRepository: Send + Sync {
    async fn load(&self, market_type: MarketType) -> Result<Option<TradeCounter>>;
    async fn save(&self, counter: &TradeCounter) -> Result<()>;
    async fn load_all(&self) -> Result<Vec<TradeCounter>>;
}
