use crate::domain::market::MarketType;
use crate::domain::strategy::SignalConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Why a continuous-learning cycle was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerReason {
    /// Closed-trade counter for the bucket crossed its threshold
    TradeVolume,
    /// Weekly schedule
    Scheduled,
    /// Realized performance dropped past the tolerance
    PerformanceDrop,
    /// Operator forced a run
    Manual,
}

impl fmt::Display for TriggerReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TriggerReason::TradeVolume => write!(f, "TRADE_VOLUME"),
            TriggerReason::Scheduled => write!(f, "SCHEDULED"),
            TriggerReason::PerformanceDrop => write!(f, "PERFORMANCE_DROP"),
            TriggerReason::Manual => write!(f, "MANUAL"),
        }
    }
}

impl std::str::FromStr for TriggerReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TRADE_VOLUME" => Ok(TriggerReason::TradeVolume),
            "SCHEDULED" => Ok(TriggerReason::Scheduled),
            "PERFORMANCE_DROP" => Ok(TriggerReason::PerformanceDrop),
            "MANUAL" => Ok(TriggerReason::Manual),
            _ => Err(format!("unknown trigger reason: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for OptimizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Running => write!(f, "RUNNING"),
            OptimizationStatus::Completed => write!(f, "COMPLETED"),
            OptimizationStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for OptimizationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "RUNNING" => Ok(OptimizationStatus::Running),
            "COMPLETED" => Ok(OptimizationStatus::Completed),
            "FAILED" => Ok(OptimizationStatus::Failed),
            _ => Err(format!("unknown optimization status: {s}")),
        }
    }
}

/// Audit record of one continuous-learning cycle. The ACTIVE config is
/// only ever mutated by a cycle that found a confirmed improvement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRun {
    pub id: Uuid,
    pub market_type: MarketType,
    pub trigger: TriggerReason,
    pub baseline_version: i64,
    pub baseline_fitness: Option<f64>,
    pub candidates_evaluated: usize,
    pub winning_config: Option<SignalConfig>,
    pub improvement_pct: Option<f64>,
    pub improvement_found: bool,
    pub status: OptimizationStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub diagnostic: Option<String>,
}

impl OptimizationRun {
    pub fn started(market_type: MarketType, trigger: TriggerReason, baseline_version: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            market_type,
            trigger,
            baseline_version,
            baseline_fitness: None,
            candidates_evaluated: 0,
            winning_config: None,
            improvement_pct: None,
            improvement_found: false,
            status: OptimizationStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            diagnostic: None,
        }
    }

    pub fn duration_secs(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_seconds())
    }
}
