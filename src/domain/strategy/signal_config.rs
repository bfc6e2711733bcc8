use crate::domain::errors::ConfigError;
use crate::domain::market::Timeframe;
use serde::{Deserialize, Serialize};

/// Immutable parameter bundle driving the signal rule engine for one market
/// type. Validated before activation; an invalid bundle never reaches the
/// scanner or any simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    // Long side
    pub long_rsi_min: f64,
    pub long_rsi_max: f64,
    pub long_adx_min: f64,
    pub long_volume_multiplier: f64,

    // Short side
    pub short_rsi_min: f64,
    pub short_rsi_max: f64,
    pub short_adx_min: f64,
    pub short_volume_multiplier: f64,

    // Exit geometry, in ATR multiples
    pub sl_atr_multiplier: f64,
    pub tp_atr_multiplier: f64,

    pub min_confidence: f64,
    pub timeframes: Vec<Timeframe>,

    /// Ranging-market guard: below this ADX no signal fires at all.
    #[serde(default)]
    pub adx_no_trade_floor: Option<f64>,

    /// Require 3-of-6 trend-factor agreement before emitting.
    #[serde(default)]
    pub trend_filter: bool,
}

impl SignalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (min, max) in [
            (self.long_rsi_min, self.long_rsi_max),
            (self.short_rsi_min, self.short_rsi_max),
        ] {
            if !(0.0..=100.0).contains(&min) || !(0.0..=100.0).contains(&max) || min >= max {
                return Err(ConfigError::InvalidRsiWindow { min, max });
            }
        }
        for adx in [self.long_adx_min, self.short_adx_min] {
            if adx < 0.0 {
                return Err(ConfigError::InvalidAdxMin { value: adx });
            }
        }
        for vol in [self.long_volume_multiplier, self.short_volume_multiplier] {
            if vol <= 0.0 {
                return Err(ConfigError::InvalidVolumeMultiplier { value: vol });
            }
        }
        if self.sl_atr_multiplier <= 0.0 || self.tp_atr_multiplier <= self.sl_atr_multiplier {
            return Err(ConfigError::InvalidStopMultipliers {
                sl: self.sl_atr_multiplier,
                tp: self.tp_atr_multiplier,
            });
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConfigError::InvalidMinConfidence {
                value: self.min_confidence,
            });
        }
        if self.timeframes.is_empty() {
            return Err(ConfigError::NoTimeframes);
        }
        Ok(())
    }
}

/// Names of the numeric parameters the evaluation harnesses may vary.
pub const TUNABLE_PARAMETERS: &[&str] = &[
    "long_rsi_min",
    "long_rsi_max",
    "long_adx_min",
    "long_volume_multiplier",
    "short_rsi_min",
    "short_rsi_max",
    "short_adx_min",
    "short_volume_multiplier",
    "sl_atr_multiplier",
    "tp_atr_multiplier",
    "min_confidence",
];

impl SignalConfig {
    /// Read a tunable parameter by name.
    pub fn parameter(&self, name: &str) -> Option<f64> {
        match name {
            "long_rsi_min" => Some(self.long_rsi_min),
            "long_rsi_max" => Some(self.long_rsi_max),
            "long_adx_min" => Some(self.long_adx_min),
            "long_volume_multiplier" => Some(self.long_volume_multiplier),
            "short_rsi_min" => Some(self.short_rsi_min),
            "short_rsi_max" => Some(self.short_rsi_max),
            "short_adx_min" => Some(self.short_adx_min),
            "short_volume_multiplier" => Some(self.short_volume_multiplier),
            "sl_atr_multiplier" => Some(self.sl_atr_multiplier),
            "tp_atr_multiplier" => Some(self.tp_atr_multiplier),
            "min_confidence" => Some(self.min_confidence),
            _ => None,
        }
    }

    /// Return a copy with one tunable parameter replaced. Unknown names are
    /// ignored so harnesses can carry venue-specific extras harmlessly.
    pub fn with_parameter(&self, name: &str, value: f64) -> Self {
        let mut next = self.clone();
        match name {
            "long_rsi_min" => next.long_rsi_min = value,
            "long_rsi_max" => next.long_rsi_max = value,
            "long_adx_min" => next.long_adx_min = value,
            "long_volume_multiplier" => next.long_volume_multiplier = value,
            "short_rsi_min" => next.short_rsi_min = value,
            "short_rsi_max" => next.short_rsi_max = value,
            "short_adx_min" => next.short_adx_min = value,
            "short_volume_multiplier" => next.short_volume_multiplier = value,
            "sl_atr_multiplier" => next.sl_atr_multiplier = value,
            "tp_atr_multiplier" => next.tp_atr_multiplier = value,
            "min_confidence" => next.min_confidence = value,
            _ => {}
        }
        next
    }
}

impl Default for SignalConfig {
    /// Conservative crypto-spot defaults. Per-market-type values come from
    /// markets.toml; this exists for tests and as a last-resort fallback.
    fn default() -> Self {
        Self {
            long_rsi_min: 25.0,
            long_rsi_max: 35.0,
            long_adx_min: 20.0,
            long_volume_multiplier: 1.2,
            short_rsi_min: 65.0,
            short_rsi_max: 75.0,
            short_adx_min: 20.0,
            short_volume_multiplier: 1.2,
            sl_atr_multiplier: 1.5,
            tp_atr_multiplier: 4.5,
            min_confidence: 0.5,
            timeframes: vec![Timeframe::OneHour, Timeframe::FourHour, Timeframe::OneDay],
            adx_no_trade_floor: None,
            trend_filter: false,
        }
    }
}
