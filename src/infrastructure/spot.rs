//! Spot feed client for forex and commodity symbols.
//!
//! Wraps a quote aggregator exposing two endpoints: `/quote?symbol=` for
//! the latest spot price and `/candles?symbol=&interval=&limit=` for OHLCV
//! history. Venues that cannot serve history fall back to a single
//! synthetic candle where O=H=L=C=latest; indicator warm-up then keeps the
//! rule engine quiet for that symbol, which is the intended behavior.

use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::ports::ExchangeClient;
use crate::infrastructure::http_client_factory::{HttpClientFactory, build_url_with_query};
use crate::infrastructure::rate_limit::{CANDLE_REQUEST_WEIGHT, TokenBudget};
use async_trait::async_trait;
use chrono::Utc;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct SpotFeedClient {
    client: ClientWithMiddleware,
    base_url: String,
    api_key: String,
    budget: Arc<TokenBudget>,
}

#[derive(Debug, Deserialize)]
struct QuoteResponse {
    price: String,
}

#[derive(Debug, Deserialize)]
struct SpotCandle {
    t: i64,
    o: String,
    h: String,
    l: String,
    c: String,
    #[serde(default)]
    v: Option<String>,
}

impl SpotFeedClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        budget: Arc<TokenBudget>,
    ) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            budget,
        }
    }

    async fn get<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, &str)],
        weight: u32,
    ) -> Result<T, ExchangeError> {
        self.budget.acquire(weight).await;

        let url = build_url_with_query(&format!("{}{}", self.base_url, path), params);
        let response = self
            .client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| ExchangeError::Unavailable {
                attempts: 5,
                reason: e.to_string(),
            })?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            self.budget.penalize().await;
            return Err(ExchangeError::RateLimited {
                retry_after_secs: 1,
            });
        }
        if !response.status().is_success() {
            return Err(ExchangeError::Unavailable {
                attempts: 1,
                reason: format!("spot feed status {}", response.status()),
            });
        }

        self.budget.restore().await;
        response
            .json::<T>()
            .await
            .map_err(|e| ExchangeError::Unavailable {
                attempts: 1,
                reason: format!("decode failed: {e}"),
            })
    }

    fn parse_candle(raw: SpotCandle, timeframe: Timeframe) -> Option<Candle> {
        let decimal = |s: &str| Decimal::from_str(s).ok();
        Some(Candle {
            open_time: raw.t,
            open: decimal(&raw.o)?,
            high: decimal(&raw.h)?,
            low: decimal(&raw.l)?,
            close: decimal(&raw.c)?,
            volume: raw.v.as_deref().and_then(decimal).unwrap_or(Decimal::ZERO),
            close_time: raw.t + timeframe.to_millis() - 1,
        })
    }

    async fn synthetic_latest(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let quote: QuoteResponse = self
            .get("/quote", &[("symbol", symbol)], 1)
            .await?;
        let price = Decimal::from_str(&quote.price).map_err(|e| ExchangeError::Unavailable {
            attempts: 1,
            reason: format!("bad quote price: {e}"),
        })?;
        let period = timeframe.period_start(Utc::now().timestamp_millis());
        warn!(symbol, "spot feed served no history; emitting synthetic candle");
        Ok(vec![Candle::synthetic(price, period, timeframe)])
    }
}

#[async_trait]
impl ExchangeClient for SpotFeedClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let start = start_ms.to_string();
        let end = end_ms.to_string();
        let candles: Vec<SpotCandle> = self
            .get(
                "/candles",
                &[
                    ("symbol", symbol),
                    ("interval", timeframe.to_binance_string()),
                    ("start", &start),
                    ("end", &end),
                ],
                CANDLE_REQUEST_WEIGHT,
            )
            .await?;

        Ok(candles
            .into_iter()
            .filter_map(|c| Self::parse_candle(c, timeframe))
            .filter(|c| c.open_time >= start_ms && c.open_time < end_ms)
            .collect())
    }

    async fn latest_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let limit_str = limit.to_string();
        let result: Result<Vec<SpotCandle>, _> = self
            .get(
                "/candles",
                &[
                    ("symbol", symbol),
                    ("interval", timeframe.to_binance_string()),
                    ("limit", &limit_str),
                ],
                CANDLE_REQUEST_WEIGHT,
            )
            .await;

        match result {
            Ok(raw) if !raw.is_empty() => {
                debug!(symbol, bars = raw.len(), "spot feed history fetched");
                Ok(raw
                    .into_iter()
                    .filter_map(|c| Self::parse_candle(c, timeframe))
                    .collect())
            }
            Ok(_) => self.synthetic_latest(symbol, timeframe).await,
            Err(ExchangeError::Unavailable { .. }) => {
                self.synthetic_latest(symbol, timeframe).await
            }
            Err(e) => Err(e),
        }
    }

    async fn fetch_prices(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError> {
        let mut prices = HashMap::new();
        for symbol in symbols {
            match self
                .get::<QuoteResponse>("/quote", &[("symbol", symbol)], 1)
                .await
            {
                Ok(quote) => {
                    if let Ok(price) = Decimal::from_str(&quote.price) {
                        prices.insert(symbol.clone(), price);
                    }
                }
                Err(e) => warn!(symbol, error = %e, "spot quote failed"),
            }
        }
        Ok(prices)
    }

    async fn top_symbols_by_volume(&self, _n: usize) -> Result<Vec<String>, ExchangeError> {
        // FX and commodity universes are fixed lists from configuration
        Ok(Vec::new())
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        self.get::<serde_json::Value>("/quote", &[("symbol", "EURUSD")], 1)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_candle_fills_zero_volume() {
        let raw = SpotCandle {
            t: 1_704_067_200_000,
            o: "1.0931".to_string(),
            h: "1.0940".to_string(),
            l: "1.0921".to_string(),
            c: "1.0925".to_string(),
            v: None,
        };
        let candle = SpotFeedClient::parse_candle(raw, Timeframe::OneHour).unwrap();
        assert_eq!(candle.volume, Decimal::ZERO);
        assert_eq!(candle.close_time, 1_704_067_200_000 + 3_600_000 - 1);
    }

    #[test]
    fn test_parse_candle_rejects_bad_price() {
        let raw = SpotCandle {
            t: 0,
            o: "x".to_string(),
            h: "1".to_string(),
            l: "1".to_string(),
            c: "1".to_string(),
            v: None,
        };
        assert!(SpotFeedClient::parse_candle(raw, Timeframe::OneHour).is_none());
    }
}
