//! Deterministic bar-by-bar backtest engine.
//!
//! The replay walks a unified chronological timeline across all symbols.
//! Indicator snapshots are computed once per symbol (pure), positions open
//! at bar close, and per-bar SL/TP resolution treats SL as hit first when a
//! single bar straddles both. Two runs with identical inputs produce
//! bit-identical ledgers and equity curves.

use crate::domain::errors::ConfigError;
use crate::domain::evaluation::{BacktestReport, BacktestSpec};
use crate::domain::indicators::{IndicatorSnapshot, compute_snapshots};
use crate::domain::market::{Candle, CandleSeries};
use crate::domain::performance::{BacktestMetrics, ClosedTrade, EquityPoint, ExitReason};
use crate::domain::rules::{RuleEngine, SignalCandidate};
use crate::domain::signal::Direction;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Bars between cancellation/progress checkpoints.
pub const CHECKPOINT_INTERVAL: u64 = 256;

#[derive(Debug, Error)]
pub enum BacktestError {
    #[error(transparent)]
    InvalidConfig(#[from] ConfigError),

    #[error("no candle data for any requested symbol")]
    NoData,

    #[error("cancelled at bar {bars_processed}")]
    Cancelled { bars_processed: u64 },
}

/// Checkpoint callback: receives bars processed so far, returns false to
/// cancel. Long runs call it every `CHECKPOINT_INTERVAL` bars.
pub type Checkpoint<'a> = dyn FnMut(u64) -> bool + 'a;

struct OpenPosition {
    symbol: String,
    direction: Direction,
    entry_price: Decimal,
    quantity: Decimal,
    stop_loss: Decimal,
    take_profit: Decimal,
    entry_time: i64,
}

impl OpenPosition {
    fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        match self.direction {
            Direction::Long => (price - self.entry_price) * self.quantity,
            Direction::Short => (self.entry_price - price) * self.quantity,
        }
    }

    /// SL first, then TP, against the bar's full range.
    fn exit_on(&self, candle: &Candle) -> Option<(Decimal, ExitReason)> {
        match self.direction {
            Direction::Long => {
                if candle.low <= self.stop_loss {
                    Some((self.stop_loss, ExitReason::StopLoss))
                } else if candle.high >= self.take_profit {
                    Some((self.take_profit, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
            Direction::Short => {
                if candle.high >= self.stop_loss {
                    Some((self.stop_loss, ExitReason::StopLoss))
                } else if candle.low <= self.take_profit {
                    Some((self.take_profit, ExitReason::TakeProfit))
                } else {
                    None
                }
            }
        }
    }
}

pub struct BacktestEngine {
    rule_engine: RuleEngine,
}

impl BacktestEngine {
    pub fn new(rule_engine: RuleEngine) -> Self {
        Self { rule_engine }
    }

    /// Replay `spec` over pre-fetched candle series. `checkpoint` is
    /// invoked periodically with the bar count; returning false unwinds
    /// cleanly with `BacktestError::Cancelled`.
    pub fn run(
        &self,
        spec: &BacktestSpec,
        data: &HashMap<String, CandleSeries>,
        checkpoint: &mut Checkpoint<'_>,
    ) -> Result<BacktestReport, BacktestError> {
        spec.validate()?;

        // Deterministic symbol order regardless of map iteration
        let mut symbols: Vec<&String> = data.keys().collect();
        symbols.sort();
        if symbols.is_empty() {
            return Err(BacktestError::NoData);
        }

        let snapshots: HashMap<&String, Vec<IndicatorSnapshot>> = symbols
            .iter()
            .map(|&s| (s, compute_snapshots(&data[s])))
            .collect();

        // Unified timeline of every bar open across all symbols
        let timeline: BTreeSet<i64> = data
            .values()
            .flat_map(|series| series.candles().iter().map(|c| c.open_time))
            .collect();

        // Per-symbol cursor into its own series
        let mut cursors: HashMap<&String, usize> = symbols.iter().map(|&s| (s, 0usize)).collect();

        let mut cash = spec.initial_capital;
        let mut open_positions: Vec<OpenPosition> = Vec::new();
        let mut trades: Vec<ClosedTrade> = Vec::new();
        let mut equity_curve: Vec<EquityPoint> = Vec::new();
        let mut bars_processed: u64 = 0;

        for &now in &timeline {
            for &symbol in &symbols {
                let series = &data[symbol];
                let cursor = cursors.get_mut(symbol).expect("cursor exists");
                let candles = series.candles();

                if *cursor >= candles.len() || candles[*cursor].open_time != now {
                    // No bar for this symbol at this instant; mark open
                    // positions at their last known close below
                    continue;
                }
                let index = *cursor;
                let candle = &candles[index];
                *cursor += 1;
                bars_processed += 1;

                // 1. Resolve exits on this bar, SL before TP
                let mut i = 0;
                while i < open_positions.len() {
                    if open_positions[i].symbol != *symbol {
                        i += 1;
                        continue;
                    }
                    if let Some((exit_price, reason)) = open_positions[i].exit_on(candle) {
                        let position = open_positions.swap_remove(i);
                        let pnl = position.unrealized_pnl(exit_price);
                        cash += spec.position_size + pnl;
                        trades.push(ClosedTrade {
                            symbol: position.symbol,
                            direction: position.direction,
                            entry_time: position.entry_time,
                            exit_time: candle.close_time,
                            entry_price: position.entry_price,
                            exit_price,
                            quantity: position.quantity,
                            pnl,
                            exit_reason: reason,
                        });
                    } else {
                        i += 1;
                    }
                }

                // 2. Evaluate entry on this bar
                if open_positions.len() < spec.max_concurrent_positions
                    && cash >= spec.position_size
                    && !open_positions.iter().any(|p| p.symbol == *symbol)
                    && let Some(candidate) =
                        self.rule_engine
                            .evaluate(series, index, &snapshots[symbol][index], &spec.config)
                {
                    open_positions.push(self.open_position(
                        symbol,
                        candle,
                        &candidate,
                        spec.position_size,
                    ));
                    cash -= spec.position_size;
                }
            }

            // 3. Mark equity at this instant
            let mut equity = cash;
            for position in &open_positions {
                let mark = latest_close_at(&data[&position.symbol], now)
                    .unwrap_or(position.entry_price);
                equity += spec.position_size + position.unrealized_pnl(mark);
            }
            equity_curve.push(EquityPoint {
                timestamp: now,
                equity,
            });

            if bars_processed % CHECKPOINT_INTERVAL == 0 && !checkpoint(bars_processed) {
                return Err(BacktestError::Cancelled { bars_processed });
            }
        }

        // 4. Close whatever survived to the end of data, at last close
        for position in open_positions.drain(..) {
            let series = &data[&position.symbol];
            let last = series.last();
            let pnl = position.unrealized_pnl(last.close);
            cash += spec.position_size + pnl;
            trades.push(ClosedTrade {
                symbol: position.symbol,
                direction: position.direction,
                entry_time: position.entry_time,
                exit_time: last.close_time,
                entry_price: position.entry_price,
                exit_price: last.close,
                quantity: position.quantity,
                pnl,
                exit_reason: ExitReason::EndOfData,
            });
        }

        if let Some(last) = equity_curve.last_mut() {
            last.equity = cash;
        }

        let metrics = BacktestMetrics::calculate(
            &trades,
            &equity_curve,
            spec.initial_capital,
            spec.timeframe.bars_per_year(),
        );

        Ok(BacktestReport {
            trades,
            equity_curve,
            metrics,
        })
    }

    fn open_position(
        &self,
        symbol: &str,
        candle: &Candle,
        candidate: &SignalCandidate,
        position_size: Decimal,
    ) -> OpenPosition {
        OpenPosition {
            symbol: symbol.to_string(),
            direction: candidate.direction,
            entry_price: candidate.entry,
            quantity: position_size / candidate.entry,
            stop_loss: candidate.stop_loss,
            take_profit: candidate.take_profit,
            entry_time: candle.close_time,
        }
    }
}

impl Default for BacktestEngine {
    fn default() -> Self {
        Self::new(RuleEngine::default())
    }
}

/// Close of the most recent bar at or before `at`. Series are small enough
/// per scan that a binary search keeps replays linear overall.
fn latest_close_at(series: &CandleSeries, at: i64) -> Option<Decimal> {
    let candles = series.candles();
    let idx = candles.partition_point(|c| c.open_time <= at);
    idx.checked_sub(1).map(|i| candles[i].close)
}
