//! Shared fixtures for the end-to-end suites: a scripted exchange client
//! and candle-series builders.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use signalforge::domain::errors::ExchangeError;
use signalforge::domain::market::{Candle, Timeframe};
use signalforge::domain::ports::ExchangeClient;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

/// Candles from close prices, one interval apart, 1% high/low spread.
pub fn candles_from_closes(timeframe: Timeframe, start_ms: i64, closes: &[f64]) -> Vec<Candle> {
    let interval = timeframe.to_millis();
    closes
        .iter()
        .enumerate()
        .map(|(i, &c)| {
            let close = Decimal::from_f64(c).unwrap();
            let spread = close * Decimal::new(1, 2);
            Candle {
                open_time: start_ms + i as i64 * interval,
                open: close,
                high: close + spread,
                low: close - spread,
                close,
                volume: Decimal::from(1000),
                close_time: start_ms + (i as i64 + 1) * interval - 1,
            }
        })
        .collect()
}

/// A window that sells off hard into a volume spike on the final bar:
/// fires a LONG candidate under a permissive config.
pub fn oversold_window(timeframe: Timeframe, start_ms: i64) -> Vec<Candle> {
    let mut closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64 * 0.2).collect();
    for (k, c) in closes.iter_mut().skip(48).enumerate() {
        *c -= (k + 1) as f64 * 1.8;
    }
    let mut candles = candles_from_closes(timeframe, start_ms, &closes);
    candles.last_mut().unwrap().volume = Decimal::from(5000);
    candles
}

/// Scripted venue: fixed candle windows per (symbol, timeframe) and a
/// queue of price maps consumed one per `fetch_prices` call (the last map
/// repeats once the queue drains).
pub struct ScriptedExchange {
    pub windows: HashMap<(String, Timeframe), Vec<Candle>>,
    pub price_script: Mutex<VecDeque<HashMap<String, Decimal>>>,
    pub top_symbols: Vec<String>,
}

impl ScriptedExchange {
    pub fn new() -> Self {
        Self {
            windows: HashMap::new(),
            price_script: Mutex::new(VecDeque::new()),
            top_symbols: Vec::new(),
        }
    }

    pub fn with_window(
        mut self,
        symbol: &str,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) -> Self {
        self.windows
            .insert((symbol.to_string(), timeframe), candles);
        self
    }

    pub fn with_top_symbols(mut self, symbols: &[&str]) -> Self {
        self.top_symbols = symbols.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn push_prices(&self, prices: &[(&str, Decimal)]) {
        let map: HashMap<String, Decimal> = prices
            .iter()
            .map(|(s, p)| (s.to_string(), *p))
            .collect();
        self.price_script.lock().unwrap().push_back(map);
    }
}

#[async_trait]
impl ExchangeClient for ScriptedExchange {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let window = self
            .windows
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(|| ExchangeError::UnknownSymbol {
                symbol: symbol.to_string(),
            })?;
        Ok(window
            .iter()
            .filter(|c| c.open_time >= start_ms && c.open_time < end_ms)
            .cloned()
            .collect())
    }

    async fn latest_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let window = self
            .windows
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(|| ExchangeError::UnknownSymbol {
                symbol: symbol.to_string(),
            })?;
        let start = window.len().saturating_sub(limit);
        Ok(window[start..].to_vec())
    }

    async fn fetch_prices(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let mut script = self.price_script.lock().unwrap();
        let map = if script.len() > 1 {
            script.pop_front().unwrap_or_default()
        } else {
            script.front().cloned().unwrap_or_default()
        };
        Ok(map
            .into_iter()
            .filter(|(s, _)| symbols.contains(s))
            .collect())
    }

    async fn top_symbols_by_volume(&self, n: usize) -> Result<Vec<String>, ExchangeError> {
        Ok(self.top_symbols.iter().take(n).cloned().collect())
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
}
