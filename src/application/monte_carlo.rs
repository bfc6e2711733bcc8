//! Monte-Carlo harness: repeated backtests under randomized parameters.
//!
//! Parameter draws come from a seeded RNG in `BTreeMap` key order, so a
//! (seed, spec) pair reproduces the exact sample sequence. Draws happen
//! up front and sequentially; only the backtests fan out across cores,
//! which keeps parallelism away from determinism.

use crate::application::backtest::{BacktestEngine, BacktestError};
use crate::domain::evaluation::{
    BacktestSpec, HistogramBin, MetricDistribution, MonteCarloReport, MonteCarloSpec,
    ParameterDistribution, RobustnessLabel, RobustnessScore, SimulationOutcome,
};
use crate::domain::market::CandleSeries;
use crate::domain::strategy::SignalConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use statrs::distribution::{ContinuousCDF, Normal};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::warn;

pub const MIN_SIMULATIONS: usize = 10;
pub const MAX_SIMULATIONS: usize = 10_000;

/// Simulations between progress checkpoints.
pub const PROGRESS_CHUNK: usize = 50;

const REDRAW_LIMIT: usize = 10;

#[derive(Debug, Error)]
pub enum MonteCarloError {
    #[error("num_simulations {got} outside [{MIN_SIMULATIONS}, {MAX_SIMULATIONS}]")]
    BadSimulationCount { got: usize },

    #[error("no parameter distributions configured")]
    NoDistributions,

    #[error("distribution for '{name}' is degenerate: {reason}")]
    BadDistribution { name: String, reason: String },

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error("cancelled after {completed} simulations")]
    Cancelled { completed: usize },
}

pub struct MonteCarloHarness {
    engine: BacktestEngine,
}

impl MonteCarloHarness {
    pub fn new(engine: BacktestEngine) -> Self {
        Self { engine }
    }

    /// Run the full simulation set. `progress` receives the completed
    /// count at least every `PROGRESS_CHUNK` simulations; returning false
    /// cancels cleanly.
    pub fn run(
        &self,
        spec: &MonteCarloSpec,
        data: &HashMap<String, CandleSeries>,
        progress: &mut dyn FnMut(u64) -> bool,
    ) -> Result<(Vec<SimulationOutcome>, MonteCarloReport), MonteCarloError> {
        validate_spec(spec)?;
        spec.backtest.validate().map_err(BacktestError::from)?;

        // 1. Draw every parameter set up front, sequentially and seeded
        let draws = draw_parameter_sets(spec)?;

        // 2. Fan the backtests out, chunked for progress + cancellation
        let mut outcomes: Vec<SimulationOutcome> = Vec::with_capacity(draws.len());
        for chunk in draws.chunks(PROGRESS_CHUNK) {
            let chunk_outcomes: Vec<Option<SimulationOutcome>> = chunk
                .par_iter()
                .map(|(index, parameters, config)| {
                    let sim_spec = BacktestSpec {
                        config: config.clone(),
                        ..spec.backtest.clone()
                    };
                    match self.engine.run(&sim_spec, data, &mut |_| true) {
                        Ok(report) => Some(SimulationOutcome {
                            index: *index,
                            parameters: parameters.clone(),
                            roi_pct: report.metrics.roi_pct,
                            max_drawdown_pct: report.metrics.max_drawdown_pct,
                            win_rate: report.metrics.win_rate,
                            sharpe: report.metrics.sharpe,
                        }),
                        Err(e) => {
                            warn!(simulation = index, error = %e, "simulation failed");
                            None
                        }
                    }
                })
                .collect();

            outcomes.extend(chunk_outcomes.into_iter().flatten());
            if !progress(outcomes.len() as u64) {
                return Err(MonteCarloError::Cancelled {
                    completed: outcomes.len(),
                });
            }
        }

        if outcomes.is_empty() {
            return Err(BacktestError::NoData.into());
        }

        let report = aggregate(&outcomes, spec.histogram_bins);
        Ok((outcomes, report))
    }
}

impl Default for MonteCarloHarness {
    fn default() -> Self {
        Self::new(BacktestEngine::default())
    }
}

fn validate_spec(spec: &MonteCarloSpec) -> Result<(), MonteCarloError> {
    if !(MIN_SIMULATIONS..=MAX_SIMULATIONS).contains(&spec.num_simulations) {
        return Err(MonteCarloError::BadSimulationCount {
            got: spec.num_simulations,
        });
    }
    if spec.distributions.is_empty() {
        return Err(MonteCarloError::NoDistributions);
    }
    for (name, dist) in &spec.distributions {
        match dist {
            ParameterDistribution::Uniform { min, max } if min >= max => {
                return Err(MonteCarloError::BadDistribution {
                    name: name.clone(),
                    reason: format!("uniform bounds [{min}, {max}]"),
                });
            }
            ParameterDistribution::Normal { std_dev, .. } if *std_dev <= 0.0 => {
                return Err(MonteCarloError::BadDistribution {
                    name: name.clone(),
                    reason: format!("non-positive std dev {std_dev}"),
                });
            }
            ParameterDistribution::Discrete { values } if values.is_empty() => {
                return Err(MonteCarloError::BadDistribution {
                    name: name.clone(),
                    reason: "empty discrete set".to_string(),
                });
            }
            _ => {}
        }
    }
    Ok(())
}

type ParameterDraw = (usize, BTreeMap<String, f64>, SignalConfig);

fn draw_parameter_sets(spec: &MonteCarloSpec) -> Result<Vec<ParameterDraw>, MonteCarloError> {
    let mut rng = StdRng::seed_from_u64(spec.seed);
    let mut draws = Vec::with_capacity(spec.num_simulations);

    for index in 0..spec.num_simulations {
        let mut accepted = None;
        for _ in 0..REDRAW_LIMIT {
            let mut parameters = BTreeMap::new();
            let mut config = spec.backtest.config.clone();
            for (name, dist) in &spec.distributions {
                let value = sample(dist, &mut rng);
                parameters.insert(name.clone(), value);
                config = config.with_parameter(name, value);
            }
            if config.validate().is_ok() {
                accepted = Some((index, parameters, config));
                break;
            }
        }
        match accepted {
            Some(draw) => draws.push(draw),
            // Jointly-invalid draws (e.g. SL pushed past TP repeatedly)
            // are dropped; the report reflects the reduced count
            None => warn!(simulation = index, "no valid draw within redraw limit"),
        }
    }
    Ok(draws)
}

fn sample(dist: &ParameterDistribution, rng: &mut StdRng) -> f64 {
    match dist {
        ParameterDistribution::Uniform { min, max } => rng.random_range(*min..=*max),
        ParameterDistribution::Normal { mean, std_dev } => {
            // Inverse-CDF on a uniform draw keeps the sequence reproducible
            // from the single RNG stream
            let u: f64 = rng.random::<f64>().clamp(1e-12, 1.0 - 1e-12);
            match Normal::new(*mean, *std_dev) {
                Ok(normal) => normal.inverse_cdf(u),
                Err(_) => *mean,
            }
        }
        ParameterDistribution::Discrete { values } => values[rng.random_range(0..values.len())],
    }
}

fn aggregate(outcomes: &[SimulationOutcome], histogram_bins: usize) -> MonteCarloReport {
    let rois: Vec<f64> = outcomes.iter().map(|o| o.roi_pct).collect();
    let drawdowns: Vec<f64> = outcomes.iter().map(|o| o.max_drawdown_pct).collect();
    let win_rates: Vec<f64> = outcomes.iter().map(|o| o.win_rate).collect();
    let sharpes: Vec<f64> = outcomes.iter().map(|o| o.sharpe).collect();

    let probability_of_profit =
        rois.iter().filter(|&&r| r > 0.0).count() as f64 / rois.len() as f64;

    // Left-tail loss magnitudes: VaR99 digs deeper into the tail than
    // VaR95, so var_95 <= var_99 always holds
    let var_95 = (-percentile(&rois, 5.0)).max(0.0);
    let var_99 = (-percentile(&rois, 1.0)).max(0.0);

    let roi = distribution(&rois, histogram_bins, true);
    let drawdown = distribution(&drawdowns, histogram_bins, false);
    let win_rate = distribution(&win_rates, histogram_bins, true);
    let sharpe = distribution(&sharpes, histogram_bins, true);

    let robustness = robustness_score(&roi, &sharpe, probability_of_profit, var_95);

    MonteCarloReport {
        roi,
        drawdown,
        win_rate,
        sharpe,
        probability_of_profit,
        var_95,
        var_99,
        robustness,
    }
}

fn distribution(values: &[f64], bins: usize, higher_is_better: bool) -> MetricDistribution {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let n = sorted.len() as f64;
    let mean = sorted.iter().sum::<f64>() / n;
    let variance = if sorted.len() > 1 {
        sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };

    let (best, worst) = if higher_is_better {
        (sorted[sorted.len() - 1], sorted[0])
    } else {
        (sorted[0], sorted[sorted.len() - 1])
    };

    MetricDistribution {
        mean,
        median: percentile_sorted(&sorted, 50.0),
        std_dev: variance.sqrt(),
        p5: percentile_sorted(&sorted, 5.0),
        p95: percentile_sorted(&sorted, 95.0),
        p99: percentile_sorted(&sorted, 99.0),
        ci_95: (
            percentile_sorted(&sorted, 2.5),
            percentile_sorted(&sorted, 97.5),
        ),
        ci_99: (
            percentile_sorted(&sorted, 0.5),
            percentile_sorted(&sorted, 99.5),
        ),
        best,
        worst,
        histogram: histogram(&sorted, bins),
    }
}

fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    percentile_sorted(&sorted, p)
}

/// Nearest-rank percentile over a sorted slice.
fn percentile_sorted(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let idx = ((p / 100.0) * (sorted.len() - 1) as f64).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn histogram(sorted: &[f64], bins: usize) -> Vec<HistogramBin> {
    let bins = bins.max(1);
    let lo = sorted[0];
    let hi = sorted[sorted.len() - 1];

    if (hi - lo).abs() < f64::EPSILON {
        return vec![HistogramBin {
            lower: lo,
            upper: hi,
            count: sorted.len(),
        }];
    }

    let width = (hi - lo) / bins as f64;
    let mut result: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: lo + i as f64 * width,
            upper: lo + (i + 1) as f64 * width,
            count: 0,
        })
        .collect();

    for &value in sorted {
        let bin = (((value - lo) / width) as usize).min(bins - 1);
        result[bin].count += 1;
    }
    result
}

/// Five-criterion robustness score, clamped to [0, 100]:
/// positive expected return, probability of profit, mean Sharpe, VaR
/// bound, and coefficient of variation, each tiered.
fn robustness_score(
    roi: &MetricDistribution,
    sharpe: &MetricDistribution,
    probability_of_profit: f64,
    var_95: f64,
) -> RobustnessScore {
    let expected_return_points: f64 = if roi.mean > 0.0 { 30.0 } else { 0.0 };

    let probability_points = if probability_of_profit >= 0.7 {
        25.0
    } else if probability_of_profit >= 0.6 {
        20.0
    } else if probability_of_profit >= 0.5 {
        12.0
    } else {
        0.0
    };

    let risk_adjusted_points = if sharpe.mean >= 1.5 {
        25.0
    } else if sharpe.mean >= 1.0 {
        18.0
    } else if sharpe.mean >= 0.5 {
        10.0
    } else {
        0.0
    };

    let var_points = if var_95 <= 5.0 {
        20.0
    } else if var_95 <= 10.0 {
        12.0
    } else if var_95 <= 20.0 {
        6.0
    } else {
        0.0
    };

    let cv = if roi.mean.abs() > f64::EPSILON {
        roi.std_dev / roi.mean.abs()
    } else {
        f64::INFINITY
    };
    let variation_points = if cv <= 0.5 {
        20.0
    } else if cv <= 1.0 {
        12.0
    } else if cv <= 2.0 {
        6.0
    } else {
        0.0
    };

    let total: f64 = (expected_return_points
        + probability_points
        + risk_adjusted_points
        + var_points
        + variation_points)
        .clamp(0.0, 100.0);

    let label = if total >= 80.0 {
        RobustnessLabel::Robust
    } else if total >= 60.0 {
        RobustnessLabel::ModeratelyRobust
    } else {
        RobustnessLabel::NotRobust
    };

    RobustnessScore {
        expected_return_points,
        probability_points,
        risk_adjusted_points,
        var_points,
        variation_points,
        total,
        label,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use crate::domain::market::candle::test_support::series_from_closes;
    use rust_decimal_macros::dec;

    fn mc_spec(num_simulations: usize, seed: u64) -> MonteCarloSpec {
        let mut distributions = BTreeMap::new();
        distributions.insert(
            "long_rsi_max".to_string(),
            ParameterDistribution::Uniform {
                min: 35.0,
                max: 49.0,
            },
        );
        distributions.insert(
            "long_adx_min".to_string(),
            ParameterDistribution::Normal {
                mean: 5.0,
                std_dev: 2.0,
            },
        );

        MonteCarloSpec {
            backtest: BacktestSpec {
                symbols: vec!["BTCUSDT".to_string()],
                timeframe: Timeframe::FourHour,
                start_ms: 0,
                end_ms: i64::MAX,
                config: crate::domain::strategy::SignalConfig {
                    long_rsi_min: 0.0,
                    long_adx_min: 5.0,
                    long_volume_multiplier: 0.1,
                    min_confidence: 0.0,
                    ..Default::default()
                },
                initial_capital: dec!(10000),
                position_size: dec!(100),
                max_concurrent_positions: 3,
            },
            num_simulations,
            seed,
            distributions,
            histogram_bins: 10,
        }
    }

    fn wavy_data() -> HashMap<String, CandleSeries> {
        let closes: Vec<f64> = (0..220)
            .map(|i| 100.0 + (i as f64 * 0.23).sin() * 8.0 + i as f64 * 0.02)
            .collect();
        let mut data = HashMap::new();
        data.insert(
            "BTCUSDT".to_string(),
            series_from_closes("BTCUSDT", Timeframe::FourHour, 1_700_000_000_000, &closes),
        );
        data
    }

    #[test]
    fn test_simulation_count_bounds() {
        let harness = MonteCarloHarness::default();
        let data = wavy_data();
        assert!(matches!(
            harness.run(&mc_spec(5, 1), &data, &mut |_| true),
            Err(MonteCarloError::BadSimulationCount { got: 5 })
        ));
        assert!(matches!(
            harness.run(&mc_spec(10_001, 1), &data, &mut |_| true),
            Err(MonteCarloError::BadSimulationCount { .. })
        ));
    }

    #[test]
    fn test_histogram_counts_sum_to_simulations() {
        let harness = MonteCarloHarness::default();
        let data = wavy_data();
        let (outcomes, report) = harness.run(&mc_spec(100, 42), &data, &mut |_| true).unwrap();

        let total: usize = report.roi.histogram.iter().map(|b| b.count).sum();
        assert_eq!(total, outcomes.len());
        assert!(outcomes.len() <= 100);
    }

    #[test]
    fn test_ci_brackets_median_and_var_ordering() {
        let harness = MonteCarloHarness::default();
        let data = wavy_data();
        let (_, report) = harness.run(&mc_spec(100, 42), &data, &mut |_| true).unwrap();

        assert!(report.roi.ci_95.0 <= report.roi.median);
        assert!(report.roi.median <= report.roi.ci_95.1);
        assert!(report.roi.ci_99.0 <= report.roi.ci_95.0);
        assert!(report.roi.ci_95.1 <= report.roi.ci_99.1);
        // VaR99 digs deeper into the loss tail
        assert!(report.var_95 <= report.var_99);
        assert!((0.0..=100.0).contains(&report.robustness.total));
        assert!((0.0..=1.0).contains(&report.probability_of_profit));
    }

    #[test]
    fn test_seeded_runs_reproduce() {
        let harness = MonteCarloHarness::default();
        let data = wavy_data();
        let (a, _) = harness.run(&mc_spec(20, 7), &data, &mut |_| true).unwrap();
        let (b, _) = harness.run(&mc_spec(20, 7), &data, &mut |_| true).unwrap();

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.parameters, y.parameters);
            assert_eq!(x.roi_pct, y.roi_pct);
        }
    }

    #[test]
    fn test_cancellation() {
        let harness = MonteCarloHarness::default();
        let data = wavy_data();
        let result = harness.run(&mc_spec(200, 3), &data, &mut |_| false);
        assert!(matches!(result, Err(MonteCarloError::Cancelled { .. })));
    }

    #[test]
    fn test_discrete_sampling_stays_in_set() {
        let mut rng = StdRng::seed_from_u64(5);
        let dist = ParameterDistribution::Discrete {
            values: vec![1.0, 2.0, 4.0],
        };
        for _ in 0..50 {
            let v = sample(&dist, &mut rng);
            assert!([1.0, 2.0, 4.0].contains(&v));
        }
    }

    #[test]
    fn test_robustness_labels() {
        let strong = RobustnessScore {
            expected_return_points: 30.0,
            probability_points: 25.0,
            risk_adjusted_points: 25.0,
            var_points: 20.0,
            variation_points: 20.0,
            total: 100.0,
            label: RobustnessLabel::Robust,
        };
        assert_eq!(strong.label, RobustnessLabel::Robust);

        // Exercise the scoring path end-to-end
        let dist = |mean: f64, std: f64| MetricDistribution {
            mean,
            median: mean,
            std_dev: std,
            p5: mean - std,
            p95: mean + std,
            p99: mean + std,
            ci_95: (mean - std, mean + std),
            ci_99: (mean - std, mean + std),
            best: mean + std,
            worst: mean - std,
            histogram: vec![],
        };
        let score = robustness_score(&dist(20.0, 4.0), &dist(1.6, 0.1), 0.8, 2.0);
        assert_eq!(score.label, RobustnessLabel::Robust);

        let weak = robustness_score(&dist(-5.0, 30.0), &dist(-0.2, 0.1), 0.3, 40.0);
        assert_eq!(weak.label, RobustnessLabel::NotRobust);
        assert_eq!(weak.total, 0.0);
    }
}
