use crate::domain::errors::ExchangeError;
use crate::domain::market::{Candle, Timeframe};
use crate::domain::paper_trade::PaperTrade;
use crate::domain::signal::Signal;
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Uniform venue contract. Implementations exist per venue; all of them
/// speak the normalized candle type and go through the shared rate limiter.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// Candles in [start_ms, end_ms), strictly ordered by open time.
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        end_ms: i64,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// The most recent `limit` candles for a symbol.
    async fn latest_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, ExchangeError>;

    /// Current prices for a batch of symbols. Best-effort: missing symbols
    /// are simply absent from the map.
    async fn fetch_prices(
        &self,
        symbols: &[String],
    ) -> Result<HashMap<String, Decimal>, ExchangeError>;

    /// Symbol universe for scanning, ranked by 24h quote volume.
    async fn top_symbols_by_volume(&self, n: usize) -> Result<Vec<String>, ExchangeError>;

    /// Cheap reachability probe for health checks.
    async fn ping(&self) -> Result<(), ExchangeError>;
}

/// Events fanned out to WebSocket subscribers. Each carries a full entity
/// snapshot so consumers never need a follow-up read.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SignalEvent {
    SignalCreated { signal: Signal },
    SignalUpdated { signal: Signal },
    SignalClosed { signal: Signal },
    PaperTradeClosed { trade: PaperTrade },
}

/// Egress port for signal events. Publishing must never block signal
/// persistence; slow consumers are the transport's problem.
pub trait SignalPublisher: Send + Sync {
    fn publish(&self, event: SignalEvent);
}

/// No-op publisher for tests and CLI tools.
pub struct NullPublisher;

impl SignalPublisher for NullPublisher {
    fn publish(&self, _event: SignalEvent) {}
}
