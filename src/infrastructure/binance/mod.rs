//! Binance market data client.
//!
//! Public klines/ticker endpoints only; every request passes through the
//! shared token budget, and the retry loop here owns 429 handling so the
//! budget can be penalized and restored at the right moments.

use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::ports::ExchangeClient;
use crate::infrastructure::http_client_factory::HttpClientFactory;
use crate::infrastructure::rate_limit::{CANDLE_REQUEST_WEIGHT, TokenBudget};
use async_trait::async_trait;
use rand::Rng;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_ATTEMPTS: u32 = 5;
const KLINES_PAGE_LIMIT: usize = 1000;

pub struct BinanceClient {
    client: Client,
    base_url: String,
    budget: Arc<TokenBudget>,
}

impl BinanceClient {
    pub fn new(base_url: impl Into<String>, budget: Arc<TokenBudget>) -> Self {
        Self {
            client: HttpClientFactory::create_base_client(),
            base_url: base_url.into(),
            budget,
        }
    }

    /// GET with the full retry policy: token-budget acquisition, 429
    /// penalty + Retry-After, jittered exponential backoff on 5xx, and a
    /// typed error after the attempt budget is spent.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        weight: u32,
    ) -> Result<T, ExchangeError> {
        let mut last_error = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            self.budget.acquire(weight).await;

            let response = match self.client.get(url).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_error = e.to_string();
                    if e.is_timeout() {
                        warn!(url, attempt, "binance request timed out");
                    } else {
                        warn!(url, attempt, error = %e, "binance request failed");
                    }
                    backoff_sleep(attempt).await;
                    continue;
                }
            };

            let status = response.status();
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(1);
                self.budget.penalize().await;
                warn!(url, retry_after, "binance rate limit hit, minute budget halved");
                tokio::time::sleep(Duration::from_secs(retry_after)).await;
                last_error = format!("429 after {attempt} attempts");
                continue;
            }

            if status.is_server_error() {
                last_error = format!("server error {status}");
                warn!(url, attempt, %status, "binance server error");
                backoff_sleep(attempt).await;
                continue;
            }

            if !status.is_success() {
                // Client errors are not retryable
                let body = response.text().await.unwrap_or_default();
                return Err(ExchangeError::Unavailable {
                    attempts: attempt,
                    reason: format!("{status}: {body}"),
                });
            }

            self.budget.restore().await;
            return response
                .json::<T>()
                .await
                .map_err(|e| ExchangeError::Unavailable {
                    attempts: attempt,
                    reason: format!("decode failed: {e}"),
                });
        }

        Err(ExchangeError::Unavailable {
            attempts: MAX_ATTEMPTS,
            reason: last_error,
        })
    }

    async fn fetch_klines(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: Option<i64>,
        end_ms: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            symbol.to_uppercase(),
            timeframe.to_binance_string(),
            limit.min(KLINES_PAGE_LIMIT)
        );
        if let Some(start) = start_ms {
            url.push_str(&format!("&startTime={start}"));
        }
        if let Some(end) = end_ms {
            url.push_str(&format!("&endTime={end}"));
        }

        let raw: Vec<RawKline> = self.get_json(&url, CANDLE_REQUEST_WEIGHT).await?;
        raw.into_iter().map(parse_kline).collect()
    }
}

/// Binance kline tuple: mixed numbers and strings, positions documented by
/// the venue. Only the first seven fields matter here.
#[derive(Debug, Deserialize)]
struct RawKline(
    i64,                                 // open time
    String,                              // open
    String,                              // high
    String,                              // low
    String,                              // close
    String,                              // volume
    i64,                                 // close time
    #[serde(default)] serde_json::Value, // quote volume
    #[serde(default)] serde_json::Value, // trade count
    #[serde(default)] serde_json::Value, // taker buy base
    #[serde(default)] serde_json::Value, // taker buy quote
    #[serde(default)] serde_json::Value, // ignore
);

fn parse_kline(k: RawKline) -> Result<Candle, ExchangeError> {
    let decimal = |s: &str| {
        Decimal::from_str(s).map_err(|e| ExchangeError::Unavailable {
            attempts: 1,
            reason: format!("bad decimal in kline: {e}"),
        })
    };
    Ok(Candle {
        open_time: k.0,
        open: decimal(&k.1)?,
        high: decimal(&k.2)?,
        low: decimal(&k.3)?,
        close: decimal(&k.4)?,
        volume: decimal(&k.5)?,
        close_time: k.6,
    })
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

#[derive(Debug, Deserialize)]
struct Ticker24h {
    symbol: String,
    #[serde(rename = "quoteVolume")]
    quote_volume: String,
}

#[async_trait]
impl ExchangeClient for BinanceClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ExchangeError> {
        let interval = timeframe.to_millis();
        let mut all: Vec<Candle> = Vec::new();
        let mut cursor = start_ms;

        // Page through the range; the venue caps one response at 1000 bars
        while cursor < end_ms {
            let page = self
                .fetch_klines(symbol, timeframe, Some(cursor), Some(end_ms), KLINES_PAGE_LIMIT)
                .await?;
            if page.is_empty() {
                break;
            }
            let last_open = page.last().map(|c| c.open_time).unwrap_or(end_ms);
            all.extend(page.into_iter().filter(|c| c.open_time < end_ms));
            let next = last_open + interval;
            if next <= cursor {
                break;
            }
            cursor = next;
        }

        debug!(symbol, %timeframe, bars = all.len(), "fetched candle range");
        Ok(all)
    }

    async fn latest_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError> {
        self.fetch_klines(symbol, timeframe, None, None, limit).await
    }

    async fn fetch_prices(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError> {
        // One bulk call beats N singles against the weight budget
        let url = format!("{}/api/v3/ticker/price", self.base_url);
        let tickers: Vec<TickerPrice> = self.get_json(&url, 4).await?;

        let wanted: std::collections::HashSet<String> =
            symbols.iter().map(|s| s.to_uppercase()).collect();

        let mut prices = HashMap::new();
        for ticker in tickers {
            if wanted.contains(&ticker.symbol)
                && let Ok(price) = Decimal::from_str(&ticker.price)
            {
                prices.insert(ticker.symbol, price);
            }
        }
        Ok(prices)
    }

    async fn top_symbols_by_volume(&self, n: usize) -> Result<Vec<String>, ExchangeError> {
        let url = format!("{}/api/v3/ticker/24hr", self.base_url);
        let tickers: Vec<Ticker24h> = self.get_json(&url, 40).await?;

        let mut ranked: Vec<(String, f64)> = tickers
            .into_iter()
            .filter(|t| t.symbol.ends_with("USDT"))
            .filter_map(|t| {
                let volume = t.quote_volume.parse::<f64>().ok()?;
                Some((t.symbol, volume))
            })
            .collect();

        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(ranked.into_iter().take(n).map(|(s, _)| s).collect())
    }

    async fn ping(&self) -> Result<(), ExchangeError> {
        let url = format!("{}/api/v3/ping", self.base_url);
        let _: serde_json::Value = self.get_json(&url, 1).await?;
        Ok(())
    }
}

/// Jittered exponential backoff: 500ms · 2^(attempt-1), ±25%.
async fn backoff_sleep(attempt: u32) {
    let base_ms = 500u64.saturating_mul(1 << (attempt - 1).min(6));
    let jitter = {
        let mut rng = rand::rng();
        rng.random_range(0..=base_ms / 2)
    };
    tokio::time::sleep(Duration::from_millis(base_ms * 3 / 4 + jitter)).await;
}
