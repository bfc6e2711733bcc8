use crate::domain::errors::SignalError;
use crate::domain::signal::{Direction, SignalStatus};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeStatus {
    Open,
    ClosedTp,
    ClosedSl,
    Cancelled,
}

impl TradeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TradeStatus::Open)
    }

    /// The signal status this trade status mirrors on close.
    pub fn mirrored_signal_status(&self) -> Option<SignalStatus> {
        match self {
            TradeStatus::Open => None,
            TradeStatus::ClosedTp => Some(SignalStatus::ClosedTp),
            TradeStatus::ClosedSl => Some(SignalStatus::ClosedSl),
            TradeStatus::Cancelled => Some(SignalStatus::Cancelled),
        }
    }
}

impl fmt::Display for TradeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStatus::Open => write!(f, "OPEN"),
            TradeStatus::ClosedTp => write!(f, "CLOSED_TP"),
            TradeStatus::ClosedSl => write!(f, "CLOSED_SL"),
            TradeStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for TradeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "OPEN" => Ok(TradeStatus::Open),
            "CLOSED_TP" => Ok(TradeStatus::ClosedTp),
            "CLOSED_SL" => Ok(TradeStatus::ClosedSl),
            "CANCELLED" => Ok(TradeStatus::Cancelled),
            _ => Err(format!("unknown trade status: {s}")),
        }
    }
}

/// A simulated position derived from a signal. `owner` is None for the
/// system account that auto-opens on every eligible signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperTrade {
    pub id: Uuid,
    pub signal_id: Uuid,
    pub owner: Option<Uuid>,
    pub symbol: String,
    pub direction: Direction,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub notional: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub status: TradeStatus,
    pub realized_pnl: Option<Decimal>,
    pub exit_price: Option<Decimal>,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl PaperTrade {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        signal_id: Uuid,
        owner: Option<Uuid>,
        symbol: impl Into<String>,
        direction: Direction,
        entry_price: Decimal,
        notional: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Self {
        let quantity = notional / entry_price;
        Self {
            id: Uuid::new_v4(),
            signal_id,
            owner,
            symbol: symbol.into(),
            direction,
            entry_price,
            quantity,
            notional,
            stop_loss,
            take_profit,
            status: TradeStatus::Open,
            realized_pnl: None,
            exit_price: None,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Close at `exit_price` and realize P&L:
    /// (exit − entry)·qty for LONG, (entry − exit)·qty for SHORT.
    pub fn close(&mut self, exit_price: Decimal, status: TradeStatus) -> Result<(), SignalError> {
        if self.status.is_terminal() {
            return Err(SignalError::TerminalTransition {
                from: self.status.to_string(),
            });
        }
        debug_assert!(status.is_terminal());

        self.realized_pnl = Some(match self.direction {
            Direction::Long => (exit_price - self.entry_price) * self.quantity,
            Direction::Short => (self.entry_price - exit_price) * self.quantity,
        });
        self.exit_price = Some(exit_price);
        self.status = status;
        self.closed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark-to-market P&L of an open trade at `price`.
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        match self.direction {
            Direction::Long => (price - self.entry_price) * self.quantity,
            Direction::Short => (self.entry_price - price) * self.quantity,
        }
    }

    /// SL/TP crossing checks. The monitor checks SL before TP.
    pub fn stop_hit(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price <= self.stop_loss,
            Direction::Short => price >= self.stop_loss,
        }
    }

    pub fn target_hit(&self, price: Decimal) -> bool {
        match self.direction {
            Direction::Long => price >= self.take_profit,
            Direction::Short => price <= self.take_profit,
        }
    }
}
