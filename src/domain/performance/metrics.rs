use crate::domain::signal::Direction;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a simulated position was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TakeProfit,
    EndOfData,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "SL"),
            ExitReason::TakeProfit => write!(f, "TP"),
            ExitReason::EndOfData => write!(f, "EOD"),
        }
    }
}

/// One closed trade in a backtest ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub symbol: String,
    pub direction: Direction,
    pub entry_time: i64,
    pub exit_time: i64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub quantity: Decimal,
    pub pnl: Decimal,
    pub exit_reason: ExitReason,
}

impl ClosedTrade {
    pub fn is_win(&self) -> bool {
        self.pnl > Decimal::ZERO
    }

    pub fn duration_ms(&self) -> i64 {
        self.exit_time - self.entry_time
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: i64,
    pub equity: Decimal,
}

/// Aggregate metrics computed from the trade ledger and equity curve only.
/// Live-system numbers never feed into these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestMetrics {
    pub total_trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    pub gross_profit: Decimal,
    pub gross_loss: Decimal,
    pub profit_factor: f64,
    pub net_pnl: Decimal,
    pub roi_pct: f64,
    pub max_drawdown_pct: f64,
    pub max_drawdown_abs: Decimal,
    pub sharpe: f64,
    pub avg_trade_duration_ms: i64,
}

impl BacktestMetrics {
    pub fn empty() -> Self {
        Self {
            total_trades: 0,
            wins: 0,
            losses: 0,
            win_rate: 0.0,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            profit_factor: 0.0,
            net_pnl: Decimal::ZERO,
            roi_pct: 0.0,
            max_drawdown_pct: 0.0,
            max_drawdown_abs: Decimal::ZERO,
            sharpe: 0.0,
            avg_trade_duration_ms: 0,
        }
    }

    /// Compute metrics from a ledger. `bars_per_year` annualizes the
    /// per-bar Sharpe ratio for the backtest's timeframe.
    pub fn calculate(
        trades: &[ClosedTrade],
        equity_curve: &[EquityPoint],
        initial_capital: Decimal,
        bars_per_year: f64,
    ) -> Self {
        if trades.is_empty() {
            let mut metrics = Self::empty();
            metrics.max_drawdown_pct = max_drawdown_pct(equity_curve);
            metrics.max_drawdown_abs = max_drawdown_abs(equity_curve);
            return metrics;
        }

        let wins = trades.iter().filter(|t| t.is_win()).count();
        let losses = trades.len() - wins;

        let gross_profit: Decimal = trades
            .iter()
            .filter(|t| t.pnl > Decimal::ZERO)
            .map(|t| t.pnl)
            .sum();
        let gross_loss: Decimal = trades
            .iter()
            .filter(|t| t.pnl < Decimal::ZERO)
            .map(|t| -t.pnl)
            .sum();
        let net_pnl: Decimal = trades.iter().map(|t| t.pnl).sum();

        let profit_factor = if gross_loss > Decimal::ZERO {
            (gross_profit / gross_loss).to_f64().unwrap_or(0.0)
        } else if gross_profit > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };

        let roi_pct = if initial_capital > Decimal::ZERO {
            (net_pnl / initial_capital).to_f64().unwrap_or(0.0) * 100.0
        } else {
            0.0
        };

        let total_duration: i64 = trades.iter().map(|t| t.duration_ms()).sum();

        Self {
            total_trades: trades.len(),
            wins,
            losses,
            win_rate: wins as f64 / trades.len() as f64,
            gross_profit,
            gross_loss,
            profit_factor,
            net_pnl,
            roi_pct,
            max_drawdown_pct: max_drawdown_pct(equity_curve),
            max_drawdown_abs: max_drawdown_abs(equity_curve),
            sharpe: sharpe_ratio(equity_curve, bars_per_year),
            avg_trade_duration_ms: total_duration / trades.len() as i64,
        }
    }
}

/// Largest peak-to-trough decline as a percentage of the peak.
pub fn max_drawdown_pct(equity_curve: &[EquityPoint]) -> f64 {
    let mut peak = Decimal::MIN;
    let mut max_dd = 0.0f64;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        } else if peak > Decimal::ZERO {
            let dd = ((peak - point.equity) / peak).to_f64().unwrap_or(0.0) * 100.0;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

pub fn max_drawdown_abs(equity_curve: &[EquityPoint]) -> Decimal {
    let mut peak = Decimal::MIN;
    let mut max_dd = Decimal::ZERO;
    for point in equity_curve {
        if point.equity > peak {
            peak = point.equity;
        } else {
            let dd = peak - point.equity;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Sharpe on per-bar equity returns, annualized by sqrt(bars_per_year).
/// Risk-free rate is taken as zero; bars where equity is flat still count.
pub fn sharpe_ratio(equity_curve: &[EquityPoint], bars_per_year: f64) -> f64 {
    if equity_curve.len() < 2 {
        return 0.0;
    }

    let mut returns = Vec::with_capacity(equity_curve.len() - 1);
    for pair in equity_curve.windows(2) {
        let prev = pair[0].equity.to_f64().unwrap_or(0.0);
        let curr = pair[1].equity.to_f64().unwrap_or(0.0);
        if prev > 0.0 {
            returns.push(curr / prev - 1.0);
        }
    }
    if returns.len() < 2 {
        return 0.0;
    }

    let mean = returns.iter().sum::<f64>() / returns.len() as f64;
    let variance =
        returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (returns.len() - 1) as f64;
    let std = variance.sqrt();
    if std == 0.0 {
        return 0.0;
    }

    mean / std * bars_per_year.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(pnl: Decimal) -> ClosedTrade {
        ClosedTrade {
            symbol: "BTCUSDT".to_string(),
            direction: Direction::Long,
            entry_time: 0,
            exit_time: 3_600_000,
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            quantity: Decimal::ONE,
            pnl,
            exit_reason: ExitReason::TakeProfit,
        }
    }

    fn curve(values: &[i64]) -> Vec<EquityPoint> {
        values
            .iter()
            .enumerate()
            .map(|(i, &v)| EquityPoint {
                timestamp: i as i64 * 3_600_000,
                equity: Decimal::from(v),
            })
            .collect()
    }

    #[test]
    fn test_win_rate_and_profit_factor() {
        let trades = vec![trade(dec!(30)), trade(dec!(10)), trade(dec!(-20))];
        let metrics = BacktestMetrics::calculate(
            &trades,
            &curve(&[1000, 1030, 1040, 1020]),
            dec!(1000),
            8760.0,
        );
        assert_eq!(metrics.total_trades, 3);
        assert_eq!(metrics.wins, 2);
        assert_eq!(metrics.losses, 1);
        assert!((metrics.win_rate - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(metrics.gross_profit, dec!(40));
        assert_eq!(metrics.gross_loss, dec!(20));
        assert!((metrics.profit_factor - 2.0).abs() < 1e-12);
        assert_eq!(metrics.net_pnl, dec!(20));
        assert!((metrics.roi_pct - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_max_drawdown() {
        let c = curve(&[1000, 1100, 990, 1050, 900]);
        assert_eq!(max_drawdown_abs(&c), dec!(200));
        let pct = max_drawdown_pct(&c);
        assert!((pct - 200.0 / 1100.0 * 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_flat_curve_zero_sharpe_and_dd() {
        let c = curve(&[1000, 1000, 1000]);
        assert_eq!(max_drawdown_pct(&c), 0.0);
        assert_eq!(sharpe_ratio(&c, 8760.0), 0.0);
    }

    #[test]
    fn test_rising_curve_positive_sharpe() {
        let c = curve(&[1000, 1010, 1025, 1030, 1060, 1065]);
        assert!(sharpe_ratio(&c, 8760.0) > 0.0);
    }

    #[test]
    fn test_empty_ledger() {
        let metrics = BacktestMetrics::calculate(&[], &curve(&[1000, 950]), dec!(1000), 8760.0);
        assert_eq!(metrics.total_trades, 0);
        assert_eq!(metrics.win_rate, 0.0);
        assert!(metrics.max_drawdown_pct > 0.0);
    }

    #[test]
    fn test_all_wins_infinite_profit_factor() {
        let trades = vec![trade(dec!(10)), trade(dec!(5))];
        let metrics =
            BacktestMetrics::calculate(&trades, &curve(&[1000, 1015]), dec!(1000), 8760.0);
        assert!(metrics.profit_factor.is_infinite());
    }
}
