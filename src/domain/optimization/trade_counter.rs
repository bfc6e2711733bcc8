use crate::domain::market::MarketType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Monotonic closed-trade counter per volatility bucket. Crossing the
/// threshold arms the trade-volume optimization trigger; the learning loop
/// resets the counter when it picks the trigger up.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeCounter {
    pub market_type: MarketType,
    pub closed_trades: i64,
    pub threshold: i64,
    pub armed: bool,
    pub updated_at: DateTime<Utc>,
}

pub const DEFAULT_TRIGGER_THRESHOLD: i64 = 200;

impl TradeCounter {
    pub fn new(market_type: MarketType, threshold: i64) -> Self {
        Self {
            market_type,
            closed_trades: 0,
            threshold,
            armed: false,
            updated_at: Utc::now(),
        }
    }

    /// Record one closed trade; returns true when this increment armed the
    /// trigger (crossing, not merely being past, the threshold).
    pub fn increment(&mut self) -> bool {
        self.closed_trades += 1;
        self.updated_at = Utc::now();
        if !self.armed && self.closed_trades >= self.threshold {
            self.armed = true;
            return true;
        }
        false
    }

    /// Consume the armed trigger and start a fresh counting window.
    pub fn reset(&mut self) {
        self.closed_trades = 0;
        self.armed = false;
        self.updated_at = Utc::now();
    }
}
