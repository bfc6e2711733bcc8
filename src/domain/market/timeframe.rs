use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Chart timeframes the scanner operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    FifteenMin,
    OneHour,
    FourHour,
    OneDay,
}

#[derive(Debug, Error)]
#[error("invalid timeframe: '{0}'. Valid options: 15m, 1h, 4h, 1d")]
pub struct ParseTimeframeError(String);

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::FifteenMin => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    pub fn to_millis(&self) -> i64 {
        self.to_minutes() * 60_000
    }

    /// Binance kline interval string.
    pub fn to_binance_string(&self) -> &'static str {
        match self {
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        }
    }

    /// How often the scanner re-scans this timeframe. Higher timeframes are
    /// scanned less often than their bar length: a 4h bar does not need a
    /// fresh scan every 4 hours to catch the close, and 1d even less so.
    pub fn scan_cadence(&self) -> Duration {
        match self {
            Timeframe::FifteenMin => Duration::from_secs(15 * 60),
            Timeframe::OneHour => Duration::from_secs(60 * 60),
            Timeframe::FourHour => Duration::from_secs(2 * 60 * 60),
            Timeframe::OneDay => Duration::from_secs(6 * 60 * 60),
        }
    }

    /// Dedup priority: a signal on a higher timeframe supersedes one on a
    /// lower timeframe for the same (symbol, direction).
    pub fn priority(&self) -> u8 {
        match self {
            Timeframe::FifteenMin => 1,
            Timeframe::OneHour => 2,
            Timeframe::FourHour => 3,
            Timeframe::OneDay => 4,
        }
    }

    /// Bars per year for Sharpe annualization.
    pub fn bars_per_year(&self) -> f64 {
        match self {
            Timeframe::FifteenMin => 35_040.0,
            Timeframe::OneHour => 8_760.0,
            Timeframe::FourHour => 2_190.0,
            Timeframe::OneDay => 365.0,
        }
    }

    /// Start of the period containing `timestamp_ms`.
    pub fn period_start(&self, timestamp_ms: i64) -> i64 {
        let period_ms = self.to_millis();
        timestamp_ms - timestamp_ms.rem_euclid(period_ms)
    }

    /// All timeframes in ascending priority order.
    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::FifteenMin,
            Timeframe::OneHour,
            Timeframe::FourHour,
            Timeframe::OneDay,
        ]
    }
}

impl FromStr for Timeframe {
    type Err = ParseTimeframeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "1h" | "1hour" => Ok(Timeframe::OneHour),
            "4h" | "4hour" => Ok(Timeframe::FourHour),
            "1d" | "1day" => Ok(Timeframe::OneDay),
            _ => Err(ParseTimeframeError(s.to_string())),
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_binance_string())
    }
}
