//! Persisted records for the strategy-evaluation harnesses: backtests,
//! walk-forward runs, Monte-Carlo simulations, and ML tuning jobs. Each
//! parent row carries its full specification so every run is reproducible
//! from the row alone.

use crate::domain::errors::ConfigError;
use crate::domain::market::Timeframe;
use crate::domain::performance::{BacktestMetrics, ClosedTrade, EquityPoint};
use crate::domain::strategy::SignalConfig;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Lifecycle of a queued evaluation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Queued => write!(f, "QUEUED"),
            RunStatus::Running => write!(f, "RUNNING"),
            RunStatus::Completed => write!(f, "COMPLETED"),
            RunStatus::Failed => write!(f, "FAILED"),
            RunStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "QUEUED" => Ok(RunStatus::Queued),
            "RUNNING" => Ok(RunStatus::Running),
            "COMPLETED" => Ok(RunStatus::Completed),
            "FAILED" => Ok(RunStatus::Failed),
            "CANCELLED" => Ok(RunStatus::Cancelled),
            _ => Err(format!("unknown run status: {s}")),
        }
    }
}

// ── Backtest ────────────────────────────────────────────────────────────

/// Everything a deterministic backtest needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestSpec {
    pub symbols: Vec<String>,
    pub timeframe: Timeframe,
    pub start_ms: i64,
    pub end_ms: i64,
    pub config: SignalConfig,
    pub initial_capital: Decimal,
    pub position_size: Decimal,
    pub max_concurrent_positions: usize,
}

impl BacktestSpec {
    /// Refuses invalid strategy parameters before anything is simulated.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.config.validate()
    }
}

/// Output of a completed backtest: ledger, curve, and derived metrics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestReport {
    pub trades: Vec<ClosedTrade>,
    pub equity_curve: Vec<EquityPoint>,
    pub metrics: BacktestMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRun {
    pub id: Uuid,
    pub spec: BacktestSpec,
    pub status: RunStatus,
    /// Bars processed so far, for observability on long replays
    pub progress: u64,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub report: Option<BacktestReport>,
    pub error: Option<String>,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl BacktestRun {
    pub fn queued(spec: BacktestSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            status: RunStatus::Queued,
            progress: 0,
            heartbeat_at: None,
            report: None,
            error: None,
            retries: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ── Walk-forward ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardSpec {
    pub backtest: BacktestSpec,
    pub train_days: i64,
    pub test_days: i64,
    pub step_days: i64,
    /// Upper bound on in-sample search candidates per window
    pub search_budget: usize,
    pub seed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowResult {
    pub index: usize,
    pub train_start_ms: i64,
    pub train_end_ms: i64,
    pub test_start_ms: i64,
    pub test_end_ms: i64,
    pub chosen_config: Option<SignalConfig>,
    pub in_sample_roi: Option<f64>,
    pub out_of_sample_roi: Option<f64>,
    pub status: RunStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub windows: Vec<WindowResult>,
    pub mean_in_sample_roi: f64,
    pub mean_out_of_sample_roi: f64,
    /// (IS − OOS) / |IS|; 0 when in-sample equals out-of-sample
    pub degradation: f64,
    /// Fraction of windows with positive OOS ROI
    pub consistency: f64,
    pub robust: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardRun {
    pub id: Uuid,
    pub spec: WalkForwardSpec,
    pub status: RunStatus,
    pub progress: u64,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub report: Option<WalkForwardReport>,
    pub error: Option<String>,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl WalkForwardRun {
    pub fn queued(spec: WalkForwardSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            status: RunStatus::Queued,
            progress: 0,
            heartbeat_at: None,
            report: None,
            error: None,
            retries: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ── Monte-Carlo ─────────────────────────────────────────────────────────

/// Distribution a parameter is drawn from, per simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParameterDistribution {
    Uniform { min: f64, max: f64 },
    Normal { mean: f64, std_dev: f64 },
    Discrete { values: Vec<f64> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloSpec {
    pub backtest: BacktestSpec,
    pub num_simulations: usize,
    pub seed: u64,
    /// BTreeMap keeps draw order stable, which keeps runs reproducible
    pub distributions: BTreeMap<String, ParameterDistribution>,
    pub histogram_bins: usize,
}

/// One simulation's parameter draw and headline metrics; persisted as a
/// child row of the simulation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub index: usize,
    pub parameters: BTreeMap<String, f64>,
    pub roi_pct: f64,
    pub max_drawdown_pct: f64,
    pub win_rate: f64,
    pub sharpe: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
}

/// Distribution summary of one metric across all simulations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDistribution {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub p5: f64,
    pub p95: f64,
    pub p99: f64,
    pub ci_95: (f64, f64),
    pub ci_99: (f64, f64),
    pub best: f64,
    pub worst: f64,
    pub histogram: Vec<HistogramBin>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RobustnessLabel {
    Robust,
    ModeratelyRobust,
    NotRobust,
}

impl fmt::Display for RobustnessLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RobustnessLabel::Robust => write!(f, "ROBUST"),
            RobustnessLabel::ModeratelyRobust => write!(f, "MODERATELY_ROBUST"),
            RobustnessLabel::NotRobust => write!(f, "NOT_ROBUST"),
        }
    }
}

/// Five-criterion robustness assessment, 0–100.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobustnessScore {
    pub expected_return_points: f64,
    pub probability_points: f64,
    pub risk_adjusted_points: f64,
    pub var_points: f64,
    pub variation_points: f64,
    pub total: f64,
    pub label: RobustnessLabel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloReport {
    pub roi: MetricDistribution,
    pub drawdown: MetricDistribution,
    pub win_rate: MetricDistribution,
    pub sharpe: MetricDistribution,
    pub probability_of_profit: f64,
    /// Left-tail ROI loss thresholds, worst-case direction: var_99 <= var_95
    pub var_95: f64,
    pub var_99: f64,
    pub robustness: RobustnessScore,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloRun {
    pub id: Uuid,
    pub spec: MonteCarloSpec,
    pub status: RunStatus,
    /// Simulations finished so far; updated at least every 50
    pub progress: u64,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub report: Option<MonteCarloReport>,
    pub error: Option<String>,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MonteCarloRun {
    pub fn queued(spec: MonteCarloSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            status: RunStatus::Queued,
            progress: 0,
            heartbeat_at: None,
            report: None,
            error: None,
            retries: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

// ── ML tuning ───────────────────────────────────────────────────────────

/// Sampling range for one tunable parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamRange {
    Continuous { min: f64, max: f64 },
    Integer { min: i64, max: i64 },
    Discrete { values: Vec<f64> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegressorKind {
    RandomForest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMetric {
    Roi,
    Sharpe,
    WinRate,
    ProfitFactor,
}

impl TargetMetric {
    pub fn extract(&self, metrics: &BacktestMetrics) -> f64 {
        match self {
            TargetMetric::Roi => metrics.roi_pct,
            TargetMetric::Sharpe => metrics.sharpe,
            TargetMetric::WinRate => metrics.win_rate,
            TargetMetric::ProfitFactor => {
                if metrics.profit_factor.is_finite() {
                    metrics.profit_factor
                } else {
                    5.0
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlTuningSpec {
    pub backtest: BacktestSpec,
    pub num_samples: usize,
    pub seed: u64,
    pub ranges: BTreeMap<String, ParamRange>,
    pub regressor: RegressorKind,
    pub target: TargetMetric,
}

/// One Latin-hypercube sample: the drawn parameters, the engineered feature
/// vector, and the realized target metric from its training backtest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TuningSample {
    pub index: usize,
    pub parameters: BTreeMap<String, f64>,
    pub features: Vec<f64>,
    pub target: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelScores {
    pub train_r2: f64,
    pub val_r2: f64,
    pub test_r2: f64,
    pub overfitting_gap: f64,
    pub production_ready: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlTuningReport {
    pub samples_evaluated: usize,
    pub feature_names: Vec<String>,
    pub scores: ModelScores,
    pub feature_importance: Vec<(String, f64)>,
    pub best_observed: Option<TuningSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlTuningJob {
    pub id: Uuid,
    pub spec: MlTuningSpec,
    pub status: RunStatus,
    pub progress: u64,
    pub heartbeat_at: Option<DateTime<Utc>>,
    pub report: Option<MlTuningReport>,
    pub error: Option<String>,
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl MlTuningJob {
    pub fn queued(spec: MlTuningSpec) -> Self {
        Self {
            id: Uuid::new_v4(),
            spec,
            status: RunStatus::Queued,
            progress: 0,
            heartbeat_at: None,
            report: None,
            error: None,
            retries: 0,
            created_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_run_status_terminality() {
        assert!(!RunStatus::Queued.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Completed.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_spec_validation_rejects_bad_config() {
        let mut spec = BacktestSpec {
            symbols: vec!["BTCUSDT".to_string()],
            timeframe: Timeframe::FourHour,
            start_ms: 0,
            end_ms: 1,
            config: SignalConfig::default(),
            initial_capital: dec!(10000),
            position_size: dec!(100),
            max_concurrent_positions: 3,
        };
        assert!(spec.validate().is_ok());
        spec.config.min_confidence = 2.0;
        assert!(spec.validate().is_err());
    }

    #[test]
    fn test_distribution_serde_tagging() {
        let dist = ParameterDistribution::Uniform {
            min: 20.0,
            max: 30.0,
        };
        let json = serde_json::to_string(&dist).unwrap();
        assert!(json.contains("\"kind\":\"uniform\""));
        let back: ParameterDistribution = serde_json::from_str(&json).unwrap();
        assert_eq!(back, dist);
    }

    #[test]
    fn test_target_metric_extraction() {
        let mut metrics = BacktestMetrics::empty();
        metrics.roi_pct = 12.5;
        metrics.profit_factor = f64::INFINITY;
        assert_eq!(TargetMetric::Roi.extract(&metrics), 12.5);
        assert_eq!(TargetMetric::ProfitFactor.extract(&metrics), 5.0);
    }
}
