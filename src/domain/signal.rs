use crate::domain::errors::SignalError;
use crate::domain::market::{MarketType, Timeframe};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Long => write!(f, "LONG"),
            Direction::Short => write!(f, "SHORT"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "LONG" => Ok(Direction::Long),
            "SHORT" => Ok(Direction::Short),
            _ => Err(format!("unknown direction: {s}")),
        }
    }
}

/// Lifecycle of a signal. `Active` may move to any terminal state;
/// terminals are absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalStatus {
    Active,
    Expired,
    ClosedTp,
    ClosedSl,
    Cancelled,
}

impl SignalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SignalStatus::Active)
    }
}

impl fmt::Display for SignalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalStatus::Active => write!(f, "ACTIVE"),
            SignalStatus::Expired => write!(f, "EXPIRED"),
            SignalStatus::ClosedTp => write!(f, "CLOSED_TP"),
            SignalStatus::ClosedSl => write!(f, "CLOSED_SL"),
            SignalStatus::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl std::str::FromStr for SignalStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "ACTIVE" => Ok(SignalStatus::Active),
            "EXPIRED" => Ok(SignalStatus::Expired),
            "CLOSED_TP" => Ok(SignalStatus::ClosedTp),
            "CLOSED_SL" => Ok(SignalStatus::ClosedSl),
            "CANCELLED" => Ok(SignalStatus::Cancelled),
            _ => Err(format!("unknown signal status: {s}")),
        }
    }
}

/// A directional trade proposal emitted by the rule engine.
///
/// Geometry is validated at construction: LONG requires sl < entry < tp,
/// SHORT requires tp < entry < sl.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub entry: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub confidence: f64,
    pub status: SignalStatus,
    pub market_type: MarketType,
    pub config_version: i64,
    pub created_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl Signal {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        direction: Direction,
        entry: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        confidence: f64,
        market_type: MarketType,
        config_version: i64,
    ) -> Result<Self, SignalError> {
        let geometry_ok = match direction {
            Direction::Long => stop_loss < entry && entry < take_profit,
            Direction::Short => take_profit < entry && entry < stop_loss,
        };
        if !geometry_ok {
            return Err(SignalError::InvalidGeometry {
                direction: direction.to_string(),
                sl: stop_loss.to_string(),
                entry: entry.to_string(),
                tp: take_profit.to_string(),
            });
        }
        if !(0.0..=1.0).contains(&confidence) {
            return Err(SignalError::InvalidConfidence { value: confidence });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            timeframe,
            direction,
            entry,
            stop_loss,
            take_profit,
            confidence,
            status: SignalStatus::Active,
            market_type,
            config_version,
            created_at: Utc::now(),
            closed_at: None,
        })
    }

    /// Move to a terminal status. Terminals are absorbing.
    pub fn transition(&mut self, to: SignalStatus) -> Result<(), SignalError> {
        if self.status.is_terminal() {
            return Err(SignalError::TerminalTransition {
                from: self.status.to_string(),
            });
        }
        self.status = to;
        if to.is_terminal() {
            self.closed_at = Some(Utc::now());
        }
        Ok(())
    }

    /// Dedup key for the ACTIVE-uniqueness invariant.
    pub fn dedup_key(&self) -> (String, Timeframe, Direction) {
        (self.symbol.clone(), self.timeframe, self.direction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn long_signal() -> Signal {
        Signal::new(
            "BTCUSDT",
            Timeframe::FourHour,
            Direction::Long,
            dec!(50000),
            dec!(48500),
            dec!(53500),
            0.8,
            MarketType::CryptoSpot,
            1,
        )
        .unwrap()
    }

    #[test]
    fn test_long_geometry_enforced() {
        let bad = Signal::new(
            "BTCUSDT",
            Timeframe::FourHour,
            Direction::Long,
            dec!(50000),
            dec!(51000), // SL above entry
            dec!(53500),
            0.8,
            MarketType::CryptoSpot,
            1,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_short_geometry_enforced() {
        let ok = Signal::new(
            "EURUSD",
            Timeframe::OneHour,
            Direction::Short,
            dec!(1.0850),
            dec!(1.0900),
            dec!(1.0750),
            0.7,
            MarketType::Forex,
            1,
        );
        assert!(ok.is_ok());

        let bad = Signal::new(
            "EURUSD",
            Timeframe::OneHour,
            Direction::Short,
            dec!(1.0850),
            dec!(1.0750), // SL below entry for a short
            dec!(1.0900),
            0.7,
            MarketType::Forex,
            1,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_confidence_bounds() {
        let bad = Signal::new(
            "BTCUSDT",
            Timeframe::FourHour,
            Direction::Long,
            dec!(50000),
            dec!(48500),
            dec!(53500),
            1.2,
            MarketType::CryptoSpot,
            1,
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_terminal_statuses_absorbing() {
        let mut sig = long_signal();
        sig.transition(SignalStatus::ClosedTp).unwrap();
        assert!(sig.closed_at.is_some());

        let err = sig.transition(SignalStatus::Expired).unwrap_err();
        assert!(err.to_string().contains("CLOSED_TP"));
        assert_eq!(sig.status, SignalStatus::ClosedTp);
    }

    #[test]
    fn test_active_to_any_terminal() {
        for terminal in [
            SignalStatus::Expired,
            SignalStatus::ClosedTp,
            SignalStatus::ClosedSl,
            SignalStatus::Cancelled,
        ] {
            let mut sig = long_signal();
            sig.transition(terminal).unwrap();
            assert_eq!(sig.status, terminal);
        }
    }
}
