//! Configuration loading.
//!
//! Environment variables carry secrets and endpoints; `markets.toml`
//! carries the per-market-type default strategy parameters and the
//! confidence calibration. Invalid strategy parameters are refused here,
//! before anything is scanned or simulated.

use crate::domain::market::{MarketType, Timeframe};
use crate::domain::rules::ConfidenceWeights;
use crate::domain::strategy::SignalConfig;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Process configuration from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub binance_base_url: String,
    pub spot_feed_base_url: String,
    pub spot_feed_api_key: String,
    pub websocket_bind: String,
    pub markets_file: String,
    pub crypto_top_n: usize,
    pub worker_count: usize,
    pub auto_trade: HashSet<MarketType>,
    pub paper_account_balance: Decimal,
    pub scan_timeframes: Vec<Timeframe>,
    pub observability_enabled: bool,
    pub observability_interval_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://data/signalforge.db".to_string());
        let binance_base_url = env::var("BINANCE_BASE_URL")
            .unwrap_or_else(|_| "https://api.binance.com".to_string());
        let spot_feed_base_url =
            env::var("SPOT_FEED_BASE_URL").unwrap_or_else(|_| "https://quotes.local".to_string());
        let spot_feed_api_key = env::var("SPOT_FEED_API_KEY").unwrap_or_default();
        let websocket_bind =
            env::var("WS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9300".to_string());
        let markets_file =
            env::var("MARKETS_FILE").unwrap_or_else(|_| "config/markets.toml".to_string());

        let crypto_top_n = parse_env("CRYPTO_TOP_N", 50)?;
        let worker_count = parse_env("WORKER_COUNT", 2)?;

        let auto_trade = env::var("AUTO_TRADE_MARKETS")
            .unwrap_or_else(|_| "CRYPTO_SPOT".to_string())
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| MarketType::from_str(s.trim()).map_err(anyhow::Error::msg))
            .collect::<Result<HashSet<_>>>()
            .context("Failed to parse AUTO_TRADE_MARKETS")?;

        let paper_account_balance = env::var("PAPER_ACCOUNT_BALANCE")
            .unwrap_or_else(|_| "10000".to_string())
            .parse::<Decimal>()
            .context("Failed to parse PAPER_ACCOUNT_BALANCE")?;

        let scan_timeframes = env::var("SCAN_TIMEFRAMES")
            .unwrap_or_else(|_| "15m,1h,4h,1d".to_string())
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(|s| s.trim().parse::<Timeframe>().map_err(anyhow::Error::from))
            .collect::<Result<Vec<_>>>()
            .context("Failed to parse SCAN_TIMEFRAMES")?;

        let observability_enabled = env::var("OBSERVABILITY_ENABLED")
            .map(|v| v != "false" && v != "0")
            .unwrap_or(true);
        let observability_interval_secs = parse_env("OBSERVABILITY_INTERVAL", 60)?;

        Ok(Self {
            database_url,
            binance_base_url,
            spot_feed_base_url,
            spot_feed_api_key,
            websocket_bind,
            markets_file,
            crypto_top_n,
            worker_count,
            auto_trade,
            paper_account_balance,
            scan_timeframes,
            observability_enabled,
            observability_interval_secs,
        })
    }
}

fn parse_env<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("Failed to parse {key}")),
        Err(_) => Ok(default),
    }
}

/// Source-controlled per-market defaults, `config/markets.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketsFile {
    #[serde(default)]
    pub confidence: Option<ConfidenceWeights>,
    pub markets: HashMap<String, SignalConfig>,
}

impl MarketsFile {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let file: MarketsFile = toml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", path.display()))?;

        for (name, config) in &file.markets {
            MarketType::from_str(name)
                .map_err(anyhow::Error::msg)
                .with_context(|| format!("unknown market type '{name}' in {}", path.display()))?;
            config
                .validate()
                .with_context(|| format!("invalid config for '{name}' in {}", path.display()))?;
        }
        Ok(file)
    }

    /// Typed view of the per-market defaults.
    pub fn defaults(&self) -> HashMap<MarketType, SignalConfig> {
        self.markets
            .iter()
            .filter_map(|(name, config)| {
                MarketType::from_str(name).ok().map(|mt| (mt, config.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [confidence]
        rsi_depth = 0.4
        adx_strength = 0.3
        volume_ratio = 0.2
        trend_agreement = 0.1

        [markets.CRYPTO_SPOT]
        long_rsi_min = 25.0
        long_rsi_max = 35.0
        long_adx_min = 20.0
        long_volume_multiplier = 1.2
        short_rsi_min = 65.0
        short_rsi_max = 75.0
        short_adx_min = 20.0
        short_volume_multiplier = 1.2
        sl_atr_multiplier = 1.5
        tp_atr_multiplier = 4.5
        min_confidence = 0.5
        timeframes = ["OneHour", "FourHour", "OneDay"]

        [markets.FOREX]
        long_rsi_min = 28.0
        long_rsi_max = 38.0
        long_adx_min = 22.0
        long_volume_multiplier = 1.0
        short_rsi_min = 62.0
        short_rsi_max = 72.0
        short_adx_min = 22.0
        short_volume_multiplier = 1.0
        sl_atr_multiplier = 1.2
        tp_atr_multiplier = 3.6
        min_confidence = 0.55
        timeframes = ["OneHour", "OneDay"]
    "#;

    #[test]
    fn test_parse_markets_toml() {
        let file: MarketsFile = toml::from_str(SAMPLE).unwrap();
        let defaults = file.defaults();
        assert_eq!(defaults.len(), 2);

        let crypto = &defaults[&MarketType::CryptoSpot];
        assert_eq!(crypto.long_rsi_min, 25.0);
        assert_eq!(crypto.timeframes.len(), 3);
        assert!(crypto.validate().is_ok());

        let weights = file.confidence.unwrap();
        assert_eq!(weights.rsi_depth, 0.4);
    }

    #[test]
    fn test_unknown_market_key_is_skipped_in_defaults() {
        let raw = r#"
            [markets.STONKS]
            long_rsi_min = 25.0
            long_rsi_max = 35.0
            long_adx_min = 20.0
            long_volume_multiplier = 1.2
            short_rsi_min = 65.0
            short_rsi_max = 75.0
            short_adx_min = 20.0
            short_volume_multiplier = 1.2
            sl_atr_multiplier = 1.5
            tp_atr_multiplier = 4.5
            min_confidence = 0.5
            timeframes = ["OneHour"]
        "#;
        let file: MarketsFile = toml::from_str(raw).unwrap();
        assert!(file.defaults().is_empty());
    }
}
