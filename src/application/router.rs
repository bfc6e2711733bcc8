//! Market-type routing over venue clients.
//!
//! One `ExchangeClient` facade that dispatches each call to the crypto
//! venue or the spot feed based on symbol classification, so the scanner,
//! paper trader, and harnesses stay venue-agnostic.

use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, MarketType, Timeframe};
use crate::domain::ports::ExchangeClient;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;

pub struct ExchangeRouter {
    crypto: Arc<dyn ExchangeClient>,
    spot: Arc<dyn ExchangeClient>,
}

impl ExchangeRouter {
    pub fn new(crypto: Arc<dyn ExchangeClient>, spot: Arc<dyn ExchangeClient>) -> Self {
        Self { crypto, spot }
    }

    fn client_for(&self, symbol: &str) -> &Arc<dyn ExchangeClient> {
        match MarketType::classify(symbol) {
            MarketType::CryptoSpot | MarketType::CryptoFutures => &self.crypto,
            MarketType::Forex | MarketType::Commodity => &self.spot,
        }
    }
}

#[async_trait]
impl ExchangeClient for ExchangeRouter {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.client_for(symbol)
            .fetch_candles(symbol, timeframe, start_ms, end_ms)
            .await
    }

    async fn latest_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.client_for(symbol)
            .latest_candles(symbol, timeframe, limit)
            .await
    }

    async fn fetch_prices(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let (crypto_symbols, spot_symbols): (Vec<String>, Vec<String>) =
            symbols.iter().cloned().partition(|s| {
                matches!(
                    MarketType::classify(s),
                    MarketType::CryptoSpot | MarketType::CryptoFutures
                )
            });

        let mut prices = HashMap::new();
        if !crypto_symbols.is_empty() {
            prices.extend(self.crypto.fetch_prices(&crypto_symbols).await?);
        }
        if !spot_symbols.is_empty() {
            prices.extend(self.spot.fetch_prices(&spot_symbols).await?);
        }
        Ok(prices)
    }

    async fn top_symbols_by_volume(&self, n: usize) -> Result<Vec<String>, ExchangeError> {
        self.crypto.top_symbols_by_volume(n).await
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        self.crypto.ping().await
    }
}
