//! OHLCV CSV candle source, interchangeable with a live exchange client.
//!
//! Row format: `open_time,open,high,low,close,volume,close_time` with
//! open/close times in UTC milliseconds. A header row is accepted and
//! skipped automatically.

use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::ports::ExchangeClient;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CsvRow {
    open_time: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
    close_time: i64,
}

/// Candle source backed by per-(symbol, timeframe) CSV files loaded up
/// front. Used by the backtest CLI and the test suites.
pub struct CsvCandleSource {
    data: HashMap<(String, Timeframe), Vec<Candle>>,
}

impl CsvCandleSource {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
        }
    }

    pub fn load_file(
        &mut self,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        path: impl AsRef<Path>,
    ) -> Result<usize> {
        let path = path.as_ref();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_path(path)
            .with_context(|| format!("failed to open candle CSV {}", path.display()))?;

        let mut candles = Vec::new();
        for record in reader.deserialize::<CsvRow>() {
            let row = record.with_context(|| format!("bad row in {}", path.display()))?;
            candles.push(Candle {
                open_time: row.open_time,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
                close_time: row.close_time,
            });
        }
        candles.sort_by_key(|c| c.open_time);

        let count = candles.len();
        self.data.insert((symbol.into().to_uppercase(), timeframe), candles);
        Ok(count)
    }

    /// Seed candles directly, for tests.
    pub fn insert_series(
        &mut self,
        symbol: impl Into<String>,
        timeframe: Timeframe,
        candles: Vec<Candle>,
    ) {
        self.data
            .insert((symbol.into().to_uppercase(), timeframe), candles);
    }

    fn series(&self, symbol: &str, timeframe: Timeframe) -> Result<&Vec<Candle>, ExchangeError> {
        self.data
            .get(&(symbol.to_uppercase(), timeframe))
            .ok_or_else(|| ExchangeError::UnknownSymbol {
                symbol: symbol.to_string(),
            })
    }
}

impl Default for CsvCandleSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ExchangeClient for CsvCandleSource {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let series = self.series(symbol, timeframe)?;
        Ok(series
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
        let series = self.series(symbol, timeframe)?;
        let start = series.len().saturating_sub(limit);
        Ok(series[start..].to_vec())
    }

    async fn fetch_prices(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            for ((sym, _), series) in &self.data {
                if sym == &symbol.to_uppercase()
                    && let Some(last) = series.last()
                {
                    prices.insert(symbol.clone(), last.close);
                    break;
                }
            }
        }
        Ok(prices)
    }

    async fn top_symbols_by_volume(&self, n: usize) -> Result<Vec<String>, ExchangeError> {
        let mut symbols: Vec<String> =
            self.data.keys().map(|(s, _)| s.clone()).collect();
        symbols.sort();
        symbols.dedup();
        symbols.truncate(n);
        Ok(symbols)
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_fixture() -> tempfile_path::TempCsv {
        tempfile_path::TempCsv::new(
            "open_time,open,high,low,close,volume,close_time\n\
             1704067200000,42283.58,42554.57,42261.02,42475.23,1271.68,1704081599999\n\
             1704081600000,42475.23,42754.10,42471.00,42700.00,1400.02,1704095999999\n",
        )
    }

    /// Minimal temp-file helper scoped to this test module.
    mod tempfile_path {
        use std::path::PathBuf;

        pub struct TempCsv {
            pub path: PathBuf,
        }

        impl TempCsv {
            pub fn new(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("signalforge-candles-{}.csv", uuid::Uuid::new_v4()));
                std::fs::write(&path, contents).unwrap();
                Self { path }
            }
        }

        impl Drop for TempCsv {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    #[tokio::test]
    async fn test_load_and_range_query() {
        let fixture = write_fixture();
        let mut source = CsvCandleSource::new();
        let count = source
            .load_file("BTCUSDT", Timeframe::FourHour, &fixture.path)
            .unwrap();
        assert_eq!(count, 2);

        let candles = source
            .fetch_candles("btcusdt", Timeframe::FourHour, 1704067200000, 1704081600000)
            .await
            .unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open_time, 1704067200000);
    }

    #[tokio::test]
    async fn test_latest_candles_tail() {
        let fixture = write_fixture();
        let mut source = CsvCandleSource::new();
        source
            .load_file("BTCUSDT", Timeframe::FourHour, &fixture.path)
            .unwrap();

        let candles = source
            .latest_candles("BTCUSDT", Timeframe::FourHour, 1)
            .await
            .unwrap();
        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].open_time, 1704081600000);
    }

    #[tokio::test]
    async fn test_unknown_symbol_is_typed() {
        let source = CsvCandleSource::new();
        let err = source
            .latest_candles("NOPEUSDT", Timeframe::OneHour, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, ExchangeError::UnknownSymbol { .. }));
    }
}
