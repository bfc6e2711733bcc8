//! Signal rule engine.
//!
//! Applies a `SignalConfig` to the latest bar of a candle window plus its
//! indicator snapshot and emits at most one candidate per direction check.
//! The engine is stateless: identical inputs produce identical candidates.

use crate::domain::indicators::IndicatorSnapshot;
use crate::domain::market::CandleSeries;
use crate::domain::signal::Direction;
use crate::domain::strategy::SignalConfig;
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

pub const VOLUME_AVG_PERIOD: usize = 20;

/// Number of trend factors that must agree when the trend filter is on.
pub const TREND_AGREEMENT_REQUIRED: usize = 3;
pub const TREND_FACTOR_COUNT: usize = 6;

/// A candidate emitted by the rule engine, not yet persisted or deduped.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalCandidate {
    pub direction: Direction,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub confidence: f64,
}

/// Weights of the confidence composite. Kept external to the engine so the
/// calibration can be tuned from configuration rather than a code change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub rsi_depth: f64,
    pub adx_strength: f64,
    pub volume_ratio: f64,
    pub trend_agreement: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            rsi_depth: 0.35,
            adx_strength: 0.30,
            volume_ratio: 0.20,
            trend_agreement: 0.15,
        }
    }
}

impl ConfidenceWeights {
    /// Monotone composite in [0, 1]: deeper RSI penetration, stronger ADX,
    /// richer volume, and broader trend agreement each raise the score.
    pub fn score(
        &self,
        rsi_depth: f64,
        adx_excess: f64,
        volume_excess: f64,
        agreement: f64,
    ) -> f64 {
        let total = self.rsi_depth + self.adx_strength + self.volume_ratio + self.trend_agreement;
        if total <= 0.0 {
            return 0.0;
        }
        let raw = self.rsi_depth * rsi_depth.clamp(0.0, 1.0)
            + self.adx_strength * adx_excess.clamp(0.0, 1.0)
            + self.volume_ratio * volume_excess.clamp(0.0, 1.0)
            + self.trend_agreement * agreement.clamp(0.0, 1.0);
        (raw / total).clamp(0.0, 1.0)
    }
}

pub struct RuleEngine {
    weights: ConfidenceWeights,
}

impl RuleEngine {
    pub fn new(weights: ConfidenceWeights) -> Self {
        Self { weights }
    }

    /// Evaluate the last bar of `series` (at `index`) against `config`.
    /// Returns the first qualifying candidate, long before short.
    pub fn evaluate(
        &self,
        series: &CandleSeries,
        index: usize,
        snapshot: &IndicatorSnapshot,
        config: &SignalConfig,
    ) -> Option<SignalCandidate> {
        if !snapshot.is_warm() {
            return None;
        }

        let rsi = snapshot.rsi?;
        let adx = snapshot.adx?;
        let atr = snapshot.atr?;

        // Synthetic zero-range feeds degenerate to ATR 0; without a range
        // there is no SL/TP geometry to build.
        if atr <= 0.0 {
            return None;
        }

        // Ranging-market guard applies to both directions
        if let Some(floor) = config.adx_no_trade_floor
            && adx < floor
        {
            return None;
        }

        let candle = &series.candles()[index];
        let avg_volume = series.avg_volume(index, VOLUME_AVG_PERIOD)?;
        if avg_volume <= Decimal::ZERO {
            return None;
        }
        let volume_ratio = (candle.volume / avg_volume).to_f64().unwrap_or(0.0);

        self.evaluate_side(Direction::Long, rsi, adx, atr, volume_ratio, snapshot, candle.close, config)
            .or_else(|| {
                self.evaluate_side(
                    Direction::Short,
                    rsi,
                    adx,
                    atr,
                    volume_ratio,
                    snapshot,
                    candle.close,
                    config,
                )
            })
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate_side(
        &self,
        direction: Direction,
        rsi: f64,
        adx: f64,
        atr: f64,
        volume_ratio: f64,
        snapshot: &IndicatorSnapshot,
        close: Decimal,
        config: &SignalConfig,
    ) -> Option<SignalCandidate> {
        let (rsi_min, rsi_max, adx_min, volume_mult) = match direction {
            Direction::Long => (
                config.long_rsi_min,
                config.long_rsi_max,
                config.long_adx_min,
                config.long_volume_multiplier,
            ),
            Direction::Short => (
                config.short_rsi_min,
                config.short_rsi_max,
                config.short_adx_min,
                config.short_volume_multiplier,
            ),
        };

        if rsi < rsi_min || rsi > rsi_max {
            return None;
        }
        if adx < adx_min {
            return None;
        }
        if volume_ratio < volume_mult {
            return None;
        }

        let agreement = trend_agreement(direction, snapshot);
        if config.trend_filter && agreement < TREND_AGREEMENT_REQUIRED {
            return None;
        }

        // Depth of RSI penetration past the near threshold, normalized by
        // the window width: for longs the near edge is rsi_max (lower is
        // deeper oversold), for shorts it is rsi_min.
        let window = (rsi_max - rsi_min).max(f64::EPSILON);
        let rsi_depth = match direction {
            Direction::Long => (rsi_max - rsi) / window,
            Direction::Short => (rsi - rsi_min) / window,
        };
        let adx_excess = (adx - adx_min) / 25.0;
        let volume_excess = (volume_ratio - volume_mult) / volume_mult;
        let agreement_frac = agreement as f64 / TREND_FACTOR_COUNT as f64;

        let confidence = self
            .weights
            .score(rsi_depth, adx_excess, volume_excess, agreement_frac);
        if confidence < config.min_confidence {
            return None;
        }

        let atr_dec = Decimal::from_f64(atr)?;
        let sl_dist = atr_dec * Decimal::from_f64(config.sl_atr_multiplier)?;
        let tp_dist = atr_dec * Decimal::from_f64(config.tp_atr_multiplier)?;

        let (stop_loss, take_profit) = match direction {
            Direction::Long => (close - sl_dist, close + tp_dist),
            Direction::Short => (close + sl_dist, close - tp_dist),
        };

        // A wide SL on a cheap instrument can cross zero; no valid geometry
        if stop_loss <= Decimal::ZERO || take_profit <= Decimal::ZERO {
            return None;
        }

        Some(SignalCandidate {
            direction,
            entry: close,
            stop_loss,
            take_profit,
            confidence,
        })
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new(ConfidenceWeights::default())
    }
}

/// Count of trend factors agreeing with `direction`:
/// EMA9>EMA20, EMA20>EMA50, close>EMA50, MACD>signal, MACD histogram > 0,
/// RSI>50. Each factor is mirrored for shorts.
pub fn trend_agreement(direction: Direction, snapshot: &IndicatorSnapshot) -> usize {
    let (Some(ema_fast), Some(ema_mid), Some(ema_slow)) =
        (snapshot.ema_fast, snapshot.ema_mid, snapshot.ema_slow)
    else {
        return 0;
    };
    let (Some(macd), Some(macd_signal), Some(hist), Some(rsi)) = (
        snapshot.macd,
        snapshot.macd_signal,
        snapshot.macd_histogram,
        snapshot.rsi,
    ) else {
        return 0;
    };

    let bullish = [
        ema_fast > ema_mid,
        ema_mid > ema_slow,
        macd > macd_signal,
        hist > 0.0,
        rsi > 50.0,
        ema_fast > ema_slow,
    ];

    match direction {
        Direction::Long => bullish.iter().filter(|&&b| b).count(),
        Direction::Short => bullish.iter().filter(|&&b| !b).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::indicators::compute_snapshots;
    use crate::domain::market::Timeframe;
    use crate::domain::market::candle::test_support::series_from_closes;
    use crate::domain::market::candle::{Candle, CandleSeries};
    use rust_decimal_macros::dec;

    /// A series that sells off hard into the last bar with a volume spike,
    /// putting RSI deep in the oversold window while keeping a real range.
    fn oversold_series() -> CandleSeries {
        let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.2).collect();
        for (k, c) in closes.iter_mut().skip(48).enumerate() {
            *c -= (k + 1) as f64 * 1.8;
        }
        let base = series_from_closes("BTCUSDT", Timeframe::FourHour, 1_700_000_000_000, &closes);
        // Volume spike on the last bar
        let mut candles: Vec<Candle> = base.candles().to_vec();
        candles.last_mut().unwrap().volume = dec!(5000);
        CandleSeries::new("BTCUSDT", Timeframe::FourHour, candles).unwrap()
    }

    fn permissive_config() -> SignalConfig {
        SignalConfig {
            long_rsi_min: 0.0,
            long_rsi_max: 45.0,
            long_adx_min: 0.0,
            long_volume_multiplier: 1.0,
            short_rsi_min: 55.0,
            short_rsi_max: 100.0,
            short_adx_min: 0.0,
            short_volume_multiplier: 1.0,
            min_confidence: 0.0,
            trend_filter: false,
            ..Default::default()
        }
    }

    #[test]
    fn test_emits_long_with_valid_geometry() {
        let series = oversold_series();
        let snapshots = compute_snapshots(&series);
        let idx = series.len() - 1;
        let engine = RuleEngine::default();

        let candidate = engine
            .evaluate(&series, idx, &snapshots[idx], &permissive_config())
            .expect("oversold spike should fire a long");

        assert_eq!(candidate.direction, Direction::Long);
        assert!(candidate.stop_loss < candidate.entry);
        assert!(candidate.entry < candidate.take_profit);
        assert!((0.0..=1.0).contains(&candidate.confidence));
    }

    #[test]
    fn test_no_signal_during_warmup() {
        let series = oversold_series();
        let snapshots = compute_snapshots(&series);
        let engine = RuleEngine::default();
        assert!(engine
            .evaluate(&series, 10, &snapshots[10], &permissive_config())
            .is_none());
    }

    #[test]
    fn test_adx_floor_suppresses_everything() {
        let series = oversold_series();
        let snapshots = compute_snapshots(&series);
        let idx = series.len() - 1;
        let config = SignalConfig {
            adx_no_trade_floor: Some(99.0),
            ..permissive_config()
        };
        assert!(RuleEngine::default()
            .evaluate(&series, idx, &snapshots[idx], &config)
            .is_none());
    }

    #[test]
    fn test_volume_gate() {
        let series = oversold_series();
        let snapshots = compute_snapshots(&series);
        let idx = series.len() - 1;
        let config = SignalConfig {
            long_volume_multiplier: 1000.0,
            ..permissive_config()
        };
        assert!(RuleEngine::default()
            .evaluate(&series, idx, &snapshots[idx], &config)
            .is_none());
    }

    #[test]
    fn test_min_confidence_gate() {
        let series = oversold_series();
        let snapshots = compute_snapshots(&series);
        let idx = series.len() - 1;
        let config = SignalConfig {
            min_confidence: 0.999,
            ..permissive_config()
        };
        assert!(RuleEngine::default()
            .evaluate(&series, idx, &snapshots[idx], &config)
            .is_none());
    }

    #[test]
    fn test_deterministic_evaluation() {
        let series = oversold_series();
        let snapshots = compute_snapshots(&series);
        let idx = series.len() - 1;
        let engine = RuleEngine::default();
        let config = permissive_config();
        let a = engine.evaluate(&series, idx, &snapshots[idx], &config);
        let b = engine.evaluate(&series, idx, &snapshots[idx], &config);
        assert_eq!(a, b);
    }

    #[test]
    fn test_confidence_monotone_in_each_component() {
        let w = ConfidenceWeights::default();
        let base = w.score(0.3, 0.3, 0.3, 0.3);
        assert!(w.score(0.6, 0.3, 0.3, 0.3) > base);
        assert!(w.score(0.3, 0.6, 0.3, 0.3) > base);
        assert!(w.score(0.3, 0.3, 0.6, 0.3) > base);
        assert!(w.score(0.3, 0.3, 0.3, 0.6) > base);
    }

    #[test]
    fn test_trend_agreement_mirrors() {
        let snap = IndicatorSnapshot {
            rsi: Some(60.0),
            atr: Some(1.0),
            adx: Some(30.0),
            ema_fast: Some(105.0),
            ema_mid: Some(103.0),
            ema_slow: Some(100.0),
            macd: Some(1.0),
            macd_signal: Some(0.5),
            macd_histogram: Some(0.5),
        };
        assert_eq!(trend_agreement(Direction::Long, &snap), 6);
        assert_eq!(trend_agreement(Direction::Short, &snap), 0);
    }
}
