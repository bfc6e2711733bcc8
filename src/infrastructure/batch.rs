//! Best-effort batched candle fetching.
//!
//! Bounded concurrency (5 in-flight requests), a fixed delay between
//! batches, and a hard per-batch timeout. Per-symbol failures are returned
//! alongside successes and never abort the batch.

use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::ports::ExchangeClient;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::warn;

pub const BATCH_WIDTH: usize = 5;
pub const INTER_BATCH_DELAY: Duration = Duration::from_millis(1500);
pub const BATCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Fetch the latest `limit` candles for every symbol, `BATCH_WIDTH` at a
/// time. The result maps each symbol to its own outcome.
pub async fn batch_latest_candles(
    client: Arc<dyn ExchangeClient>,
    symbols: &[String],
    timeframe: Timeframe,
    limit: usize,
) -> HashMap<String, Result<Vec<Candle>, ExchangeError>> {
    let mut results: HashMap<String, Result<Vec<Candle>, ExchangeError>> = HashMap::new();
    let semaphore = Arc::new(Semaphore::new(BATCH_WIDTH));

    for (batch_index, batch) in symbols.chunks(BATCH_WIDTH).enumerate() {
        if batch_index > 0 {
            tokio::time::sleep(INTER_BATCH_DELAY).await;
        }

        let mut handles = Vec::with_capacity(batch.len());
        for symbol in batch {
            let client = client.clone();
            let symbol = symbol.clone();
            let semaphore = semaphore.clone();
            handles.push(tokio::spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let outcome = client.latest_candles(&symbol, timeframe, limit).await;
                (symbol, outcome)
            }));
        }

        let batch_result = tokio::time::timeout(BATCH_TIMEOUT, async {
            let mut out = Vec::with_capacity(handles.len());
            for handle in handles {
                match handle.await {
                    Ok(pair) => out.push(pair),
                    Err(e) => warn!(error = %e, "batch fetch task panicked"),
                }
            }
            out
        })
        .await;

        match batch_result {
            Ok(pairs) => {
                for (symbol, outcome) in pairs {
                    results.insert(symbol, outcome);
                }
            }
            Err(_) => {
                warn!(batch_index, "candle batch timed out");
                for symbol in batch {
                    results.entry(symbol.clone()).or_insert_with(|| {
                        Err(ExchangeError::Timeout {
                            duration_ms: BATCH_TIMEOUT.as_millis() as u64,
                        })
                    });
                }
            }
        }
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct ScriptedClient {
        failing: Vec<String>,
    }

    #[async_trait]
    impl ExchangeClient for ScriptedClient {
        async fn fetch_candles(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            _start_ms: i64,
            _end_ms: i64,
        ) -> Result<Vec<Candle>, ExchangeError> {
            self.latest_candles(symbol, timeframe, 1).await
        }

        async fn latest_candles(
            &self,
            symbol: &str,
            timeframe: Timeframe,
            limit: usize,
        ) -> Result<Vec<Candle>, ExchangeError> {
            if self.failing.iter().any(|s| s == symbol) {
                return Err(ExchangeError::UnknownSymbol {
                    symbol: symbol.to_string(),
                });
            }
            Ok((0..limit as i64)
                .map(|i| Candle {
                    open_time: i * timeframe.to_millis(),
                    open: dec!(1),
                    high: dec!(2),
                    low: dec!(1),
                    close: dec!(1.5),
                    volume: dec!(10),
                    close_time: (i + 1) * timeframe.to_millis() - 1,
                })
                .collect())
        }

        async fn fetch_prices(
            &self,
            _symbols: &[String],
        ) -> Result<std::collections::HashMap<String, Decimal>, ExchangeError> {
            Ok(HashMap::new())
        }

        async fn top_symbols_by_volume(&self, _n: usize) -> Result<Vec<String>, ExchangeError> {
            Ok(vec![])
        }

        async fn ping(&self) -> Result<(), ExchangeError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_batch_is_best_effort() {
        let client = Arc::new(ScriptedClient {
            failing: vec!["BADUSDT".to_string()],
        });
        let symbols = vec![
            "BTCUSDT".to_string(),
            "BADUSDT".to_string(),
            "ETHUSDT".to_string(),
        ];

        let results =
            batch_latest_candles(client, &symbols, Timeframe::OneHour, 3).await;

        assert_eq!(results.len(), 3);
        assert!(results["BTCUSDT"].is_ok());
        assert!(results["ETHUSDT"].is_ok());
        assert!(results["BADUSDT"].is_err());
        assert_eq!(results["BTCUSDT"].as_ref().unwrap().len(), 3);
    }
}
