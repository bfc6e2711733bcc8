//! Paper-trading engine.
//!
//! Auto-opens a simulated position on every eligible ACTIVE signal and
//! monitors open positions against batched live prices. SL is always
//! checked before TP so a tick that straddles both resolves conservatively.
//! Account metrics are recomputed from the trade ledger on demand; no
//! cached aggregates are trusted.

use crate::domain::errors::StoreError;
use crate::domain::market::MarketType;
use crate::domain::paper_trade::{PaperTrade, TradeStatus};
use crate::domain::ports::{ExchangeClient, SignalEvent, SignalPublisher};
use crate::domain::repositories::{
    PaperTradeRepository, SignalRepository, TradeCounterRepository,
};
use crate::domain::signal::{Signal, SignalStatus};
use crate::domain::optimization::{DEFAULT_TRIGGER_THRESHOLD, TradeCounter};
use crate::infrastructure::observability::Metrics;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub const MONITOR_CADENCE: Duration = Duration::from_secs(30);
pub const DEFAULT_NOTIONAL: Decimal = dec!(100);

/// Ledger-derived account metrics.
#[derive(Debug, Clone, Serialize)]
pub struct AccountSummary {
    pub balance: Decimal,
    pub equity: Decimal,
    pub realized_pnl: Decimal,
    pub unrealized_pnl: Decimal,
    pub open_trades: usize,
    pub closed_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
}

pub struct PaperTrader {
    trades: Arc<dyn PaperTradeRepository>,
    signals: Arc<dyn SignalRepository>,
    exchange: Arc<dyn ExchangeClient>,
    publisher: Arc<dyn SignalPublisher>,
    counters: Arc<dyn TradeCounterRepository>,
    /// Market types with auto-trade enabled
    auto_trade: HashSet<MarketType>,
    default_notional: Decimal,
    initial_balance: Decimal,
    metrics: Option<Metrics>,
}

impl PaperTrader {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        trades: Arc<dyn PaperTradeRepository>,
        signals: Arc<dyn SignalRepository>,
        exchange: Arc<dyn ExchangeClient>,
        publisher: Arc<dyn SignalPublisher>,
        counters: Arc<dyn TradeCounterRepository>,
        auto_trade: HashSet<MarketType>,
        initial_balance: Decimal,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            trades,
            signals,
            exchange,
            publisher,
            counters,
            auto_trade,
            default_notional: DEFAULT_NOTIONAL,
            initial_balance,
            metrics,
        }
    }

    /// After-commit hook invoked by the scanner for every new ACTIVE
    /// signal. Opens the system account's trade when auto-trade is on for
    /// the signal's market type; duplicates are silent no-ops.
    pub async fn on_signal_created(&self, signal: &Signal) {
        if !self.auto_trade.contains(&signal.market_type) {
            return;
        }
        match self.open_trade(None, signal, self.default_notional).await {
            Ok(trade) => {
                debug!(symbol = %trade.symbol, trade_id = %trade.id, "auto paper trade opened")
            }
            Err(e) if e.downcast_ref::<StoreError>().is_some() => {
                debug!(signal_id = %signal.id, "auto paper trade already open")
            }
            Err(e) => error!(signal_id = %signal.id, error = %e, "auto paper trade failed"),
        }
    }

    /// Open a trade for `owner` (None = system account) anchored at the
    /// signal's entry/SL/TP. A duplicate OPEN trade for the same
    /// (owner, signal) surfaces as a typed `StoreError::DuplicateEntity`.
    pub async fn open_trade(
        &self,
        owner: Option<Uuid>,
        signal: &Signal,
        notional: Decimal,
    ) -> Result<PaperTrade> {
        let trade = PaperTrade::open(
            signal.id,
            owner,
            &signal.symbol,
            signal.direction,
            signal.entry,
            notional,
            signal.stop_loss,
            signal.take_profit,
        );
        self.trades.insert(&trade).await?;
        Ok(trade)
    }

    /// One monitor pass: batch-fetch prices for all open trades, close
    /// whatever crossed its SL (checked first) or TP, mirror the signal
    /// status, and bump the learning counters.
    pub async fn monitor_cycle(&self) -> Result<usize> {
        let open = self.trades.list_open().await?;
        if let Some(m) = &self.metrics {
            m.open_paper_trades.set(open.len() as f64);
        }
        if open.is_empty() {
            return Ok(0);
        }

        let mut symbols: Vec<String> = open.iter().map(|t| t.symbol.clone()).collect();
        symbols.sort();
        symbols.dedup();

        let prices = match self.exchange.fetch_prices(&symbols).await {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "price fetch failed, monitor pass skipped");
                return Ok(0);
            }
        };

        let mut closed = 0;
        for mut trade in open {
            let Some(&price) = prices.get(&trade.symbol) else {
                debug!(symbol = %trade.symbol, "no price this pass");
                continue;
            };

            // SL before TP: conservative when one tick straddles both
            let status = if trade.stop_hit(price) {
                TradeStatus::ClosedSl
            } else if trade.target_hit(price) {
                TradeStatus::ClosedTp
            } else {
                continue;
            };

            let exit_price = match status {
                TradeStatus::ClosedSl => trade.stop_loss,
                TradeStatus::ClosedTp => trade.take_profit,
                _ => unreachable!(),
            };

            if let Err(e) = self.close_trade(&mut trade, exit_price, status).await {
                error!(trade_id = %trade.id, error = %e, "close failed");
                continue;
            }
            closed += 1;
        }

        if closed > 0 {
            info!(closed, "paper trades closed this pass");
        }
        Ok(closed)
    }

    async fn close_trade(
        &self,
        trade: &mut PaperTrade,
        exit_price: Decimal,
        status: TradeStatus,
    ) -> Result<()> {
        trade.close(exit_price, status)?;
        self.trades.close(trade).await?;

        if let Some(m) = &self.metrics {
            m.paper_trades_closed_total
                .with_label_values(&[&status.to_string()])
                .inc();
        }

        // Mirror the signal's terminal state; the signal may already be
        // terminal if another owner's trade closed it first
        if let Some(signal_status) = status.mirrored_signal_status()
            && let Err(e) = self.signals.update_status(trade.signal_id, signal_status).await
            && e.downcast_ref::<StoreError>().is_none()
        {
            warn!(signal_id = %trade.signal_id, error = %e, "signal mirror failed");
        }

        self.publisher.publish(SignalEvent::PaperTradeClosed {
            trade: trade.clone(),
        });
        if let Ok(Some(signal)) = self.signals.find_by_id(trade.signal_id).await
            && signal.status.is_terminal()
        {
            self.publisher.publish(SignalEvent::SignalClosed { signal });
        }

        self.bump_counter(MarketType::classify(&trade.symbol)).await;
        Ok(())
    }

    async fn bump_counter(&self, market_type: MarketType) {
        let result = async {
            let mut counter = match self.counters.load(market_type).await? {
                Some(c) => c,
                None => TradeCounter::new(market_type, DEFAULT_TRIGGER_THRESHOLD),
            };
            if counter.increment() {
                info!(%market_type, trades = counter.closed_trades, "optimization trigger armed");
            }
            self.counters.save(&counter).await
        }
        .await;

        if let Err(e) = result {
            warn!(%market_type, error = %e, "trade counter update failed");
        }
    }

    /// Recompute account metrics from the ledger. `owner` None is the
    /// system account.
    pub async fn account_summary(&self, owner: Option<Uuid>) -> Result<AccountSummary> {
        let trades = self.trades.list_by_owner(owner).await?;

        let mut realized = Decimal::ZERO;
        let mut wins = 0usize;
        let mut losses = 0usize;
        let mut open: Vec<&PaperTrade> = Vec::new();

        for trade in &trades {
            match trade.status {
                TradeStatus::Open => open.push(trade),
                _ => {
                    let pnl = trade.realized_pnl.unwrap_or(Decimal::ZERO);
                    realized += pnl;
                    if pnl > Decimal::ZERO {
                        wins += 1;
                    } else {
                        losses += 1;
                    }
                }
            }
        }

        let mut unrealized = Decimal::ZERO;
        if !open.is_empty() {
            let mut symbols: Vec<String> = open.iter().map(|t| t.symbol.clone()).collect();
            symbols.sort();
            symbols.dedup();
            if let Ok(prices) = self.exchange.fetch_prices(&symbols).await {
                for trade in &open {
                    if let Some(&price) = prices.get(&trade.symbol) {
                        unrealized += trade.unrealized_pnl(price);
                    }
                }
            }
        }

        let closed = wins + losses;
        Ok(AccountSummary {
            balance: self.initial_balance + realized,
            equity: self.initial_balance + realized + unrealized,
            realized_pnl: realized,
            unrealized_pnl: unrealized,
            open_trades: open.len(),
            closed_trades: closed,
            wins,
            losses,
            win_rate: if closed > 0 {
                wins as f64 / closed as f64
            } else {
                0.0
            },
        })
    }

    /// Monitor loop at the fixed cadence, until aborted at shutdown.
    pub async fn run_monitor(self: Arc<Self>) {
        let mut ticker = time::interval(MONITOR_CADENCE);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(cadence = ?MONITOR_CADENCE, "paper trade monitor started");

        loop {
            ticker.tick().await;
            if let Err(e) = self.monitor_cycle().await {
                error!(error = %e, "monitor cycle failed");
            }
        }
    }
}
