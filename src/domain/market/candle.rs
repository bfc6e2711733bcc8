use crate::domain::errors::DataError;
use crate::domain::market::timeframe::Timeframe;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV bar on one timeframe for one symbol. Times are UTC millis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

impl Candle {
    /// Synthetic bar for venues that only quote a spot price (O=H=L=C).
    /// Downstream indicators must tolerate the zero range.
    pub fn synthetic(price: Decimal, open_time: i64, timeframe: Timeframe) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            close_time: open_time + timeframe.to_millis() - 1,
        }
    }

    pub fn is_zero_range(&self) -> bool {
        self.high == self.low
    }
}

/// A validated, strictly-ordered candle window for one (symbol, timeframe).
///
/// Construction rejects empty input, non-monotonic timestamps, non-positive
/// prices, and gaps wider than one interval. Gap *filling* is the caller's
/// responsibility; this type only refuses data it cannot trust.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    symbol: String,
    timeframe: Timeframe,
    candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) -> Result<Self, DataError> {
        let symbol = symbol.into();
        let malformed = |reason: String| DataError::MalformedCandles {
            symbol: symbol.clone(),
            timeframe: timeframe.to_string(),
            reason,
        };

        if candles.is_empty() {
            return Err(malformed("empty candle set".to_string()));
        }

        let interval = timeframe.to_millis();
        for (i, c) in candles.iter().enumerate() {
            if c.open <= Decimal::ZERO
                || c.high <= Decimal::ZERO
                || c.low <= Decimal::ZERO
                || c.close <= Decimal::ZERO
            {
                return Err(malformed(format!("non-positive price at index {i}")));
            }
            if c.high < c.low {
                return Err(malformed(format!("high < low at index {i}")));
            }
            if c.close_time <= c.open_time {
                return Err(malformed(format!("close_time <= open_time at index {i}")));
            }
            if i > 0 {
                let prev = &candles[i - 1];
                let delta = c.open_time - prev.open_time;
                if delta <= 0 {
                    return Err(malformed(format!(
                        "non-monotonic open_time at index {i}"
                    )));
                }
                // Tolerate at most one missing bar between neighbours
                if delta > 2 * interval {
                    return Err(malformed(format!(
                        "gap of {delta}ms at index {i} exceeds tolerance"
                    )));
                }
            }
        }

        Ok(Self {
            symbol,
            timeframe,
            candles,
        })
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn last(&self) -> &Candle {
        // Non-empty by construction
        self.candles.last().expect("series is never empty")
    }

    /// Average volume over the trailing `period` bars ending at `index`
    /// (inclusive). Returns None until enough bars exist.
    pub fn avg_volume(&self, index: usize, period: usize) -> Option<Decimal> {
        if period == 0 || index + 1 < period || index >= self.candles.len() {
            return None;
        }
        let window = &self.candles[index + 1 - period..=index];
        let sum: Decimal = window.iter().map(|c| c.volume).sum();
        Some(sum / Decimal::from(period))
    }

    /// A view of the first `len` bars, for prefix-based replay.
    pub fn prefix(&self, len: usize) -> &[Candle] {
        &self.candles[..len.min(self.candles.len())]
    }
}
