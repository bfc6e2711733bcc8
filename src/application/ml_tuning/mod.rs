//! ML tuning harness.
//!
//! Latin-hypercube sampling over parameter ranges, one training-period
//! backtest per sample, a regressor fitted on the engineered features, and
//! search/sensitivity utilities over the trained surrogate. The date range
//! is split 85/15 in time: samples train on the head, the production-ready
//! check backtests the best predicted config on the held-out tail.

pub mod features;
pub mod model;
pub mod sampler;

use crate::application::backtest::{BacktestEngine, BacktestError};
use crate::application::walk_forward::slice_data;
use crate::domain::evaluation::{
    BacktestSpec, MlTuningReport, MlTuningSpec, ParamRange, TuningSample,
};
use crate::domain::market::CandleSeries;
use crate::domain::strategy::SignalConfig;
use model::TunedModel;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::{debug, warn};

pub const MIN_SAMPLES: usize = 20;

/// Fraction of the date range held out for the production-ready check.
const HOLDOUT_FRACTION: f64 = 0.15;

#[derive(Debug, Error)]
pub enum MlTuningError {
    #[error("num_samples {got} below minimum {MIN_SAMPLES}")]
    TooFewSamples { got: usize },

    #[error("no parameter ranges configured")]
    NoRanges,

    #[error(transparent)]
    Backtest(#[from] BacktestError),

    #[error("model fit failed: {0}")]
    Fit(String),

    #[error("cancelled after {completed} samples")]
    Cancelled { completed: usize },
}

pub struct MlTuningHarness {
    engine: BacktestEngine,
}

pub struct TuningOutput {
    pub samples: Vec<TuningSample>,
    pub report: MlTuningReport,
    pub model: TunedModel,
}

impl MlTuningHarness {
    pub fn new(engine: BacktestEngine) -> Self {
        Self { engine }
    }

    pub fn run(
        &self,
        spec: &MlTuningSpec,
        data: &HashMap<String, CandleSeries>,
        progress: &mut dyn FnMut(u64) -> bool,
    ) -> Result<TuningOutput, MlTuningError> {
        if spec.num_samples < MIN_SAMPLES {
            return Err(MlTuningError::TooFewSamples {
                got: spec.num_samples,
            });
        }
        if spec.ranges.is_empty() {
            return Err(MlTuningError::NoRanges);
        }
        spec.backtest.validate().map_err(BacktestError::from)?;

        let holdout_ms = ((spec.backtest.end_ms - spec.backtest.start_ms) as f64
            * HOLDOUT_FRACTION) as i64;
        let train_end_ms = spec.backtest.end_ms - holdout_ms;
        let train_data = slice_data(data, spec.backtest.start_ms, train_end_ms);
        let holdout_data = slice_data(data, train_end_ms, spec.backtest.end_ms);

        // 1. Sample and backtest
        let draws = sampler::latin_hypercube(&spec.ranges, spec.num_samples, spec.seed);
        let mut samples: Vec<TuningSample> = Vec::with_capacity(draws.len());

        for (index, parameters) in draws.into_iter().enumerate() {
            let config = resolve_config(&spec.backtest.config, &parameters);
            if config.validate().is_err() {
                debug!(sample = index, "drawn config invalid, sample skipped");
                continue;
            }

            let sample_spec = BacktestSpec {
                config: config.clone(),
                end_ms: train_end_ms,
                ..spec.backtest.clone()
            };
            match self.engine.run(&sample_spec, &train_data, &mut |_| true) {
                Ok(report) => {
                    samples.push(TuningSample {
                        index,
                        features: features::feature_row(&parameters, &config),
                        parameters,
                        target: spec.target.extract(&report.metrics),
                    });
                }
                Err(e) => warn!(sample = index, error = %e, "sample backtest failed"),
            }

            if (index + 1) % 10 == 0 && !progress(samples.len() as u64) {
                return Err(MlTuningError::Cancelled {
                    completed: samples.len(),
                });
            }
        }

        if samples.len() < MIN_SAMPLES {
            return Err(MlTuningError::TooFewSamples {
                got: samples.len(),
            });
        }

        // 2. Fit the surrogate
        let feature_names = features::feature_names(&spec.ranges);
        let rows: Vec<Vec<f64>> = samples.iter().map(|s| s.features.clone()).collect();
        let targets: Vec<f64> = samples.iter().map(|s| s.target).collect();

        let mut model = TunedModel::fit(
            spec.regressor,
            &rows,
            &targets,
            feature_names.clone(),
            spec.seed,
        )
        .map_err(|e| MlTuningError::Fit(e.to_string()))?;

        // 3. Production-ready: statistical quality plus a positive
        //    out-of-sample run of the best observed config on the holdout
        let best_observed = samples
            .iter()
            .max_by(|a, b| a.target.partial_cmp(&b.target).unwrap_or(std::cmp::Ordering::Equal))
            .cloned();

        let oos_positive = match &best_observed {
            Some(best) if !holdout_data.is_empty() => {
                let config = resolve_config(&spec.backtest.config, &best.parameters);
                let oos_spec = BacktestSpec {
                    config,
                    start_ms: train_end_ms,
                    ..spec.backtest.clone()
                };
                match self.engine.run(&oos_spec, &holdout_data, &mut |_| true) {
                    Ok(report) => report.metrics.roi_pct > 0.0,
                    Err(e) => {
                        warn!(error = %e, "holdout backtest failed");
                        false
                    }
                }
            }
            _ => false,
        };

        model.scores.production_ready = model.scores.val_r2 > 0.5
            && model.scores.overfitting_gap < 0.2
            && model.scores.train_r2 > 0.6
            && oos_positive;

        let feature_importance = model
            .permutation_importance(spec.seed)
            .map_err(|e| MlTuningError::Fit(e.to_string()))?;

        let report = MlTuningReport {
            samples_evaluated: samples.len(),
            feature_names,
            scores: model.scores.clone(),
            feature_importance,
            best_observed,
        };

        Ok(TuningOutput {
            samples,
            report,
            model,
        })
    }

    /// Score one parameter vector with the surrogate. The confidence is
    /// the validation R², floored at zero: a model that cannot explain
    /// held-out variance should not pretend to certainty.
    pub fn predict(
        &self,
        model: &TunedModel,
        spec: &MlTuningSpec,
        parameters: &BTreeMap<String, f64>,
    ) -> Result<(f64, f64), MlTuningError> {
        let config = resolve_config(&spec.backtest.config, parameters);
        let row = features::feature_row(parameters, &config);
        let value = model
            .predict_one(&row)
            .map_err(|e| MlTuningError::Fit(e.to_string()))?;
        Ok((value, model.scores.val_r2.clamp(0.0, 1.0)))
    }

    /// Draw `num_candidates` fresh vectors, score them all with the
    /// surrogate, and return the top `top_k` by predicted target.
    pub fn find_optimal(
        &self,
        model: &TunedModel,
        spec: &MlTuningSpec,
        num_candidates: usize,
        top_k: usize,
        seed: u64,
    ) -> Result<Vec<(BTreeMap<String, f64>, f64)>, MlTuningError> {
        let candidates = sampler::latin_hypercube(&spec.ranges, num_candidates.max(1), seed);

        let mut scored: Vec<(BTreeMap<String, f64>, f64)> = Vec::with_capacity(candidates.len());
        for parameters in candidates {
            let config = resolve_config(&spec.backtest.config, &parameters);
            if config.validate().is_err() {
                continue;
            }
            let row = features::feature_row(&parameters, &config);
            let value = model
                .predict_one(&row)
                .map_err(|e| MlTuningError::Fit(e.to_string()))?;
            scored.push((parameters, value));
        }

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// 1-D sensitivity sweep: vary one parameter across its range with
    /// every other parameter pinned at its range midpoint.
    pub fn sensitivity(
        &self,
        model: &TunedModel,
        spec: &MlTuningSpec,
        parameter: &str,
        steps: usize,
    ) -> Result<Vec<(f64, f64)>, MlTuningError> {
        let Some(range) = spec.ranges.get(parameter) else {
            return Err(MlTuningError::NoRanges);
        };

        let midpoints: BTreeMap<String, f64> = spec
            .ranges
            .iter()
            .map(|(name, r)| (name.clone(), midpoint(r)))
            .collect();

        let steps = steps.max(2);
        let mut sweep = Vec::with_capacity(steps);
        for i in 0..steps {
            let position = i as f64 / (steps - 1) as f64;
            let value = value_in_range(range, position);

            let mut parameters = midpoints.clone();
            parameters.insert(parameter.to_string(), value);
            let config = resolve_config(&spec.backtest.config, &parameters);
            let row = features::feature_row(&parameters, &config);
            let predicted = model
                .predict_one(&row)
                .map_err(|e| MlTuningError::Fit(e.to_string()))?;
            sweep.push((value, predicted));
        }
        Ok(sweep)
    }
}

impl Default for MlTuningHarness {
    fn default() -> Self {
        Self::new(BacktestEngine::default())
    }
}

fn resolve_config(base: &SignalConfig, parameters: &BTreeMap<String, f64>) -> SignalConfig {
    let mut config = base.clone();
    for (name, &value) in parameters {
        config = config.with_parameter(name, value);
    }
    config
}

fn midpoint(range: &ParamRange) -> f64 {
    value_in_range(range, 0.5)
}

fn value_in_range(range: &ParamRange, position: f64) -> f64 {
    match range {
        ParamRange::Continuous { min, max } => min + position * (max - min),
        ParamRange::Integer { min, max } => {
            let span = (max - min) as f64;
            *min as f64 + (position * span).round()
        }
        ParamRange::Discrete { values } => {
            if values.is_empty() {
                0.0
            } else {
                let idx =
                    ((position * values.len() as f64).floor() as usize).min(values.len() - 1);
                values[idx]
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::evaluation::{RegressorKind, TargetMetric};
    use crate::domain::market::Timeframe;
    use crate::domain::market::candle::test_support::series_from_closes;
    use rust_decimal_macros::dec;

    fn tuning_spec(num_samples: usize) -> MlTuningSpec {
        let mut ranges = BTreeMap::new();
        ranges.insert(
            "long_rsi_max".to_string(),
            ParamRange::Continuous {
                min: 30.0,
                max: 49.0,
            },
        );
        ranges.insert(
            "tp_atr_multiplier".to_string(),
            ParamRange::Continuous { min: 3.0, max: 6.0 },
        );

        MlTuningSpec {
            backtest: BacktestSpec {
                symbols: vec!["BTCUSDT".to_string()],
                timeframe: Timeframe::FourHour,
                start_ms: 1_700_000_000_000,
                end_ms: 1_700_000_000_000 + 300 * Timeframe::FourHour.to_millis(),
                config: SignalConfig {
                    long_rsi_min: 0.0,
                    long_adx_min: 0.0,
                    long_volume_multiplier: 0.1,
                    min_confidence: 0.0,
                    ..Default::default()
                },
                initial_capital: dec!(10000),
                position_size: dec!(100),
                max_concurrent_positions: 3,
            },
            num_samples,
            seed: 21,
            ranges,
            regressor: RegressorKind::RandomForest,
            target: TargetMetric::Roi,
        }
    }

    fn market_data() -> HashMap<String, CandleSeries> {
        let closes: Vec<f64> = (0..300)
            .map(|i| 100.0 + (i as f64 * 0.19).sin() * 7.0 + i as f64 * 0.015)
            .collect();
        let mut data = HashMap::new();
        data.insert(
            "BTCUSDT".to_string(),
            series_from_closes("BTCUSDT", Timeframe::FourHour, 1_700_000_000_000, &closes),
        );
        data
    }

    #[test]
    fn test_end_to_end_tuning_run() {
        let harness = MlTuningHarness::default();
        let spec = tuning_spec(40);
        let output = harness.run(&spec, &market_data(), &mut |_| true).unwrap();

        assert!(output.samples.len() >= MIN_SAMPLES);
        assert_eq!(
            output.report.feature_names.len(),
            output.samples[0].features.len()
        );
        assert!(output.report.scores.train_r2 <= 1.0);
        assert_eq!(
            output.report.feature_importance.len(),
            output.report.feature_names.len()
        );
        assert!(output.report.best_observed.is_some());
    }

    #[test]
    fn test_predict_and_find_optimal() {
        let harness = MlTuningHarness::default();
        let spec = tuning_spec(40);
        let output = harness.run(&spec, &market_data(), &mut |_| true).unwrap();

        let mut parameters = BTreeMap::new();
        parameters.insert("long_rsi_max".to_string(), 40.0);
        parameters.insert("tp_atr_multiplier".to_string(), 4.0);
        let (value, confidence) = harness.predict(&output.model, &spec, &parameters).unwrap();
        assert!(value.is_finite());
        assert!((0.0..=1.0).contains(&confidence));

        let top = harness
            .find_optimal(&output.model, &spec, 50, 5, 77)
            .unwrap();
        assert!(top.len() <= 5);
        for pair in top.windows(2) {
            assert!(pair[0].1 >= pair[1].1);
        }
    }

    #[test]
    fn test_sensitivity_sweep_spans_range() {
        let harness = MlTuningHarness::default();
        let spec = tuning_spec(40);
        let output = harness.run(&spec, &market_data(), &mut |_| true).unwrap();

        let sweep = harness
            .sensitivity(&output.model, &spec, "long_rsi_max", 7)
            .unwrap();
        assert_eq!(sweep.len(), 7);
        assert!((sweep[0].0 - 30.0).abs() < 1e-9);
        assert!((sweep[6].0 - 49.0).abs() < 1e-9);
    }

    #[test]
    fn test_too_few_samples() {
        let harness = MlTuningHarness::default();
        let spec = tuning_spec(5);
        assert!(matches!(
            harness.run(&spec, &market_data(), &mut |_| true),
            Err(MlTuningError::TooFewSamples { got: 5 })
        ));
    }
}
