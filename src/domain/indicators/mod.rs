//! Indicator engine: rolling-window technical indicators over a candle
//! series, exposed as one snapshot per bar.

pub mod kernels;

use crate::domain::market::CandleSeries;
use rust_decimal::prelude::ToPrimitive;

pub const RSI_PERIOD: usize = 14;
pub const ATR_PERIOD: usize = 14;
pub const ADX_PERIOD: usize = 14;
pub const EMA_FAST: usize = 9;
pub const EMA_MID: usize = 20;
pub const EMA_SLOW: usize = 50;
pub const MACD_FAST: usize = 12;
pub const MACD_SLOW: usize = 26;
pub const MACD_SIGNAL: usize = 9;

/// Minimum bars before every indicator in the set is defined. The slow EMA
/// dominates; ADX needs 2×14 - 1 = 27.
pub const WARMUP_BARS: usize = EMA_SLOW;

/// All indicator values for a single bar. Fields are `None` during warm-up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorSnapshot {
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
    pub adx: Option<f64>,
    pub ema_fast: Option<f64>,
    pub ema_mid: Option<f64>,
    pub ema_slow: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
}

impl IndicatorSnapshot {
    /// True once every indicator the rule engine consults is defined.
    pub fn is_warm(&self) -> bool {
        self.rsi.is_some()
            && self.atr.is_some()
            && self.adx.is_some()
            && self.ema_fast.is_some()
            && self.ema_mid.is_some()
            && self.ema_slow.is_some()
            && self.macd.is_some()
            && self.macd_signal.is_some()
    }
}

/// Compute one snapshot per bar for the whole series.
///
/// Pure: identical input produces bit-identical output, and values for any
/// prefix are unaffected by bars that come after it.
pub fn compute_snapshots(series: &CandleSeries) -> Vec<IndicatorSnapshot> {
    let candles = series.candles();
    let closes: Vec<f64> = candles
        .iter()
        .map(|c| c.close.to_f64().unwrap_or(0.0))
        .collect();
    let highs: Vec<f64> = candles
        .iter()
        .map(|c| c.high.to_f64().unwrap_or(0.0))
        .collect();
    let lows: Vec<f64> = candles
        .iter()
        .map(|c| c.low.to_f64().unwrap_or(0.0))
        .collect();

    let rsi = kernels::rsi(&closes, RSI_PERIOD);
    let atr = kernels::atr(&highs, &lows, &closes, ATR_PERIOD);
    let adx = kernels::adx(&highs, &lows, &closes, ADX_PERIOD);
    let ema_fast = kernels::ema(&closes, EMA_FAST);
    let ema_mid = kernels::ema(&closes, EMA_MID);
    let ema_slow = kernels::ema(&closes, EMA_SLOW);
    let macd = kernels::macd(&closes, MACD_FAST, MACD_SLOW, MACD_SIGNAL);

    (0..candles.len())
        .map(|i| IndicatorSnapshot {
            rsi: rsi[i],
            atr: atr[i],
            adx: adx[i],
            ema_fast: ema_fast[i],
            ema_mid: ema_mid[i],
            ema_slow: ema_slow[i],
            macd: macd.macd[i],
            macd_signal: macd.signal[i],
            macd_histogram: macd.histogram[i],
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::candle::test_support::series_from_closes;
    use crate::domain::market::Timeframe;

    fn sample_series(n: usize) -> CandleSeries {
        let closes: Vec<f64> = (0..n)
            .map(|i| 100.0 + (i as f64 * 0.4).sin() * 4.0 + i as f64 * 0.05)
            .collect();
        series_from_closes("BTCUSDT", Timeframe::OneHour, 1_700_000_000_000, &closes)
    }

    #[test]
    fn test_warmup_bars_never_warm() {
        let series = sample_series(120);
        let snapshots = compute_snapshots(&series);
        for snap in snapshots.iter().take(WARMUP_BARS - 1) {
            assert!(!snap.is_warm());
        }
        assert!(snapshots.last().unwrap().is_warm());
    }

    #[test]
    fn test_snapshot_count_matches_bars() {
        let series = sample_series(80);
        assert_eq!(compute_snapshots(&series).len(), 80);
    }

    #[test]
    fn test_deterministic_across_runs() {
        let series = sample_series(100);
        let a = compute_snapshots(&series);
        let b = compute_snapshots(&series);
        assert_eq!(a, b);
    }
}
