//! Continuous-learning loop.
//!
//! A trigger (trade-volume counter, weekly schedule, realized performance
//! drop, or operator) starts a cycle: backtest the ACTIVE baseline on a
//! recent lookback, generate a small local perturbation grid around it,
//! score every candidate by fitness, and promote only on a clear
//! improvement. A failed or inconclusive cycle never touches the ACTIVE
//! config. Every cycle is recorded for audit.

use crate::application::backtest::{BacktestEngine, BacktestError};
use crate::application::registry::ConfigRegistry;
use crate::domain::evaluation::BacktestSpec;
use crate::domain::market::{CandleSeries, MarketType, Timeframe};
use crate::domain::optimization::{OptimizationRun, OptimizationStatus, TriggerReason};
use crate::domain::paper_trade::TradeStatus;
use crate::domain::performance::fitness::{fitness, improvement};
use crate::domain::ports::ExchangeClient;
use crate::domain::repositories::{
    OptimizationRunRepository, PaperTradeRepository, TradeCounterRepository,
};
use crate::domain::strategy::SignalConfig;
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

/// Minimum relative fitness improvement before a candidate is promoted.
pub const PROMOTION_THRESHOLD: f64 = 0.05;

/// Relative drop in recent realized win rate that arms the
/// performance-drop trigger.
pub const PERFORMANCE_DROP_THRESHOLD: f64 = 0.15;

/// Closed trades per comparison window for the performance-drop check.
const PERFORMANCE_WINDOW: usize = 30;

const COUNTER_POLL: Duration = Duration::from_secs(60);
const WEEKLY: Duration = Duration::from_secs(7 * 24 * 3600);

/// Lookback bars fetched per symbol for cycle backtests.
const LOOKBACK_BARS: usize = 500;

pub struct LearningLoop {
    registry: Arc<ConfigRegistry>,
    runs: Arc<dyn OptimizationRunRepository>,
    counters: Arc<dyn TradeCounterRepository>,
    trades: Arc<dyn PaperTradeRepository>,
    exchange: Arc<dyn ExchangeClient>,
    engine: BacktestEngine,
    /// Representative symbols per bucket for cycle evaluation
    evaluation_symbols: HashMap<MarketType, Vec<String>>,
    evaluation_timeframe: Timeframe,
    metrics: Option<Metrics>,
}

impl LearningLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ConfigRegistry>,
        runs: Arc<dyn OptimizationRunRepository>,
        counters: Arc<dyn TradeCounterRepository>,
        trades: Arc<dyn PaperTradeRepository>,
        exchange: Arc<dyn ExchangeClient>,
        engine: BacktestEngine,
        evaluation_symbols: HashMap<MarketType, Vec<String>>,
        evaluation_timeframe: Timeframe,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            registry,
            runs,
            counters,
            trades,
            exchange,
            engine,
            evaluation_symbols,
            evaluation_timeframe,
            metrics,
        }
    }

    /// One full optimization cycle for a bucket. Returns the audit record;
    /// the ACTIVE config changes only when a candidate clears the
    /// promotion threshold.
    pub async fn run_cycle(
        &self,
        market_type: MarketType,
        trigger: TriggerReason,
    ) -> Result<OptimizationRun> {
        let Some((baseline_config, baseline_version)) =
            self.registry.get_for_market(market_type).await
        else {
            anyhow::bail!("no active config for {market_type}");
        };

        let mut run = OptimizationRun::started(market_type, trigger, baseline_version);
        self.runs.insert(&run).await?;
        info!(%market_type, %trigger, baseline_version, "optimization cycle started");

        match self.evaluate_cycle(market_type, &baseline_config, &mut run).await {
            Ok(()) => {
                run.status = OptimizationStatus::Completed;
            }
            Err(e) => {
                // The baseline stays ACTIVE on any failure
                error!(%market_type, error = %e, "optimization cycle failed");
                run.status = OptimizationStatus::Failed;
                run.diagnostic = Some(e.to_string());
            }
        }
        run.finished_at = Some(chrono::Utc::now());
        self.runs.update(&run).await?;

        if let Some(m) = &self.metrics {
            let outcome = if run.improvement_found {
                "promoted"
            } else if run.status == OptimizationStatus::Failed {
                "failed"
            } else {
                "kept_baseline"
            };
            m.learning_cycles_total.with_label_values(&[outcome]).inc();
        }
        Ok(run)
    }

    async fn evaluate_cycle(
        &self,
        market_type: MarketType,
        baseline_config: &SignalConfig,
        run: &mut OptimizationRun,
    ) -> Result<()> {
        let data = self.fetch_lookback(market_type).await?;
        if data.is_empty() {
            anyhow::bail!("no lookback data for {market_type}");
        }

        let baseline_fitness = self
            .score(baseline_config, &data)
            .context("baseline backtest failed")?;
        run.baseline_fitness = Some(baseline_fitness);

        let candidates = perturbation_grid(baseline_config);
        run.candidates_evaluated = candidates.len();

        let mut best: Option<(SignalConfig, f64)> = None;
        for candidate in candidates {
            match self.score(&candidate, &data) {
                Ok(score) => {
                    if best.as_ref().is_none_or(|(_, b)| score > *b) {
                        best = Some((candidate, score));
                    }
                }
                Err(e) => warn!(error = %e, "candidate backtest failed"),
            }
        }

        let Some((best_config, best_fitness)) = best else {
            anyhow::bail!("every candidate failed to evaluate");
        };

        let gain = improvement(baseline_fitness, best_fitness);
        run.improvement_pct = Some(gain * 100.0);

        if gain >= PROMOTION_THRESHOLD {
            let prior = self
                .registry
                .set_active(market_type, best_config.clone())
                .await?;
            run.improvement_found = true;
            run.winning_config = Some(best_config);
            info!(
                %market_type,
                ?prior,
                baseline_fitness,
                best_fitness,
                gain_pct = gain * 100.0,
                "improved config promoted"
            );
        } else {
            self.registry
                .archive_candidate(market_type, best_config, best_fitness)
                .await?;
            info!(
                %market_type,
                baseline_fitness,
                best_fitness,
                gain_pct = gain * 100.0,
                "baseline kept, candidate archived"
            );
        }
        Ok(())
    }

    fn score(
        &self,
        config: &SignalConfig,
        data: &HashMap<String, CandleSeries>,
    ) -> Result<f64, BacktestError> {
        let spec = BacktestSpec {
            symbols: data.keys().cloned().collect(),
            timeframe: self.evaluation_timeframe,
            start_ms: 0,
            end_ms: i64::MAX,
            config: config.clone(),
            initial_capital: dec!(10000),
            position_size: dec!(100),
            max_concurrent_positions: 5,
        };
        let report = self.engine.run(&spec, data, &mut |_| true)?;
        Ok(fitness(&report.metrics))
    }

    async fn fetch_lookback(
        &self,
        market_type: MarketType,
    ) -> Result<HashMap<String, CandleSeries>> {
        let symbols = self
            .evaluation_symbols
            .get(&market_type)
            .cloned()
            .unwrap_or_default();

        let mut data = HashMap::new();
        for symbol in symbols {
            match self
                .exchange
                .latest_candles(&symbol, self.evaluation_timeframe, LOOKBACK_BARS)
                .await
            {
                Ok(candles) => {
                    match CandleSeries::new(&symbol, self.evaluation_timeframe, candles) {
                        Ok(series) if series.len() >= crate::domain::indicators::WARMUP_BARS => {
                            data.insert(symbol, series);
                        }
                        Ok(_) => warn!(symbol, "lookback too short, symbol skipped"),
                        Err(e) => warn!(symbol, error = %e, "lookback rejected"),
                    }
                }
                Err(e) => warn!(symbol, error = %e, "lookback fetch failed"),
            }
        }
        Ok(data)
    }

    /// True when the realized win rate of the newest closed-trade window
    /// dropped more than the threshold below the preceding window.
    pub async fn performance_dropped(&self) -> Result<bool> {
        let trades = self.trades.list_by_owner(None).await?;
        let mut closed: Vec<_> = trades
            .into_iter()
            .filter(|t| t.status != TradeStatus::Open)
            .collect();
        // list_by_owner returns newest first
        if closed.len() < 2 * PERFORMANCE_WINDOW {
            return Ok(false);
        }
        closed.truncate(2 * PERFORMANCE_WINDOW);

        let win_rate = |slice: &[crate::domain::paper_trade::PaperTrade]| {
            let wins = slice
                .iter()
                .filter(|t| t.realized_pnl.unwrap_or(Decimal::ZERO) > Decimal::ZERO)
                .count();
            wins as f64 / slice.len() as f64
        };

        let recent = win_rate(&closed[..PERFORMANCE_WINDOW]);
        let previous = win_rate(&closed[PERFORMANCE_WINDOW..]);
        if previous <= 0.0 {
            return Ok(false);
        }
        Ok((previous - recent) / previous > PERFORMANCE_DROP_THRESHOLD)
    }

    /// Trigger loop: polls armed trade counters, runs the weekly pass,
    /// and checks for realized performance drops.
    pub async fn run_forever(self: Arc<Self>) {
        let mut counter_ticker = time::interval(COUNTER_POLL);
        counter_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut weekly_ticker = time::interval(WEEKLY);
        weekly_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        weekly_ticker.tick().await; // consume the immediate tick

        let mut drop_ticker = time::interval(Duration::from_secs(3600));
        drop_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        drop_ticker.tick().await;

        info!("continuous-learning loop started");

        loop {
            tokio::select! {
                _ = counter_ticker.tick() => {
                    self.handle_armed_counters().await;
                }
                _ = weekly_ticker.tick() => {
                    for market_type in self.evaluation_symbols.keys().copied().collect::<Vec<_>>() {
                        if let Err(e) = self.run_cycle(market_type, TriggerReason::Scheduled).await {
                            error!(%market_type, error = %e, "scheduled cycle failed");
                        }
                    }
                }
                _ = drop_ticker.tick() => {
                    match self.performance_dropped().await {
                        Ok(true) => {
                            warn!("realized performance drop detected");
                            for market_type in self.evaluation_symbols.keys().copied().collect::<Vec<_>>() {
                                if let Err(e) = self
                                    .run_cycle(market_type, TriggerReason::PerformanceDrop)
                                    .await
                                {
                                    error!(%market_type, error = %e, "performance-drop cycle failed");
                                }
                            }
                        }
                        Ok(false) => {}
                        Err(e) => warn!(error = %e, "performance-drop check failed"),
                    }
                }
            }
        }
    }

    async fn handle_armed_counters(&self) {
        let counters = match self.counters.load_all().await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "counter poll failed");
                return;
            }
        };

        for mut counter in counters.into_iter().filter(|c| c.armed) {
            let market_type = counter.market_type;
            match self.run_cycle(market_type, TriggerReason::TradeVolume).await {
                Ok(_) => {
                    counter.reset();
                    if let Err(e) = self.counters.save(&counter).await {
                        warn!(%market_type, error = %e, "counter reset failed");
                    }
                }
                Err(e) => error!(%market_type, error = %e, "trade-volume cycle failed"),
            }
        }
    }
}

/// Local perturbation grid around the baseline: single-axis nudges on the
/// RSI windows, ADX minimums, and SL/TP multipliers. At most 8 candidates,
/// each individually validated.
pub fn perturbation_grid(baseline: &SignalConfig) -> Vec<SignalConfig> {
    let mut candidates = Vec::with_capacity(8);

    let mut push = |config: SignalConfig| {
        if config.validate().is_ok() && &config != baseline {
            candidates.push(config);
        }
    };

    for delta in [-5.0, 5.0] {
        let mut c = baseline.clone();
        c.long_rsi_min = (baseline.long_rsi_min + delta).clamp(0.0, 100.0);
        c.long_rsi_max = (baseline.long_rsi_max + delta).clamp(0.0, 100.0);
        c.short_rsi_min = (baseline.short_rsi_min + delta).clamp(0.0, 100.0);
        c.short_rsi_max = (baseline.short_rsi_max + delta).clamp(0.0, 100.0);
        push(c);
    }
    for delta in [-2.0, 2.0] {
        let mut c = baseline.clone();
        c.long_adx_min = (baseline.long_adx_min + delta).max(0.0);
        c.short_adx_min = (baseline.short_adx_min + delta).max(0.0);
        push(c);
    }
    for delta in [-0.2, 0.2] {
        let mut c = baseline.clone();
        c.sl_atr_multiplier = (baseline.sl_atr_multiplier + delta).max(0.1);
        push(c);
    }
    for delta in [-0.3, 0.3] {
        let mut c = baseline.clone();
        c.tp_atr_multiplier = (baseline.tp_atr_multiplier + delta).max(0.2);
        push(c);
    }

    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_has_at_most_eight_valid_candidates() {
        let grid = perturbation_grid(&SignalConfig::default());
        assert!(grid.len() <= 8);
        assert!(!grid.is_empty());
        for candidate in &grid {
            assert!(candidate.validate().is_ok());
            assert_ne!(candidate, &SignalConfig::default());
        }
    }

    #[test]
    fn test_grid_drops_invalid_perturbations() {
        // An SL already close to TP: the +0.2 SL nudge would invalidate
        // the sl < tp invariant and must be filtered out
        let tight = SignalConfig {
            sl_atr_multiplier: 2.0,
            tp_atr_multiplier: 2.1,
            ..Default::default()
        };
        let grid = perturbation_grid(&tight);
        for candidate in &grid {
            assert!(candidate.sl_atr_multiplier < candidate.tp_atr_multiplier);
        }
    }
}
