use crate::domain::market::MarketType;
use crate::domain::strategy::signal_config::SignalConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a versioned strategy configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigStatus {
    Testing,
    Active,
    Archived,
    Failed,
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigStatus::Testing => write!(f, "TESTING"),
            ConfigStatus::Active => write!(f, "ACTIVE"),
            ConfigStatus::Archived => write!(f, "ARCHIVED"),
            ConfigStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for ConfigStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "TESTING" => Ok(ConfigStatus::Testing),
            "ACTIVE" => Ok(ConfigStatus::Active),
            "ARCHIVED" => Ok(ConfigStatus::Archived),
            "FAILED" => Ok(ConfigStatus::Failed),
            _ => Err(format!("unknown config status: {s}")),
        }
    }
}

/// One versioned configuration row for a market type. Append-only: archived
/// rows are never mutated, version numbers are monotone per market type, and
/// at most one row per market type is ACTIVE at any moment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfigHistory {
    pub id: Option<i64>,
    pub market_type: MarketType,
    pub version: i64,
    pub config: SignalConfig,
    pub fitness: Option<f64>,
    pub win_rate: Option<f64>,
    pub roi_pct: Option<f64>,
    pub sharpe: Option<f64>,
    pub status: ConfigStatus,
    pub applied_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StrategyConfigHistory {
    pub fn testing(market_type: MarketType, version: i64, config: SignalConfig) -> Self {
        Self {
            id: None,
            market_type,
            version,
            config,
            fitness: None,
            win_rate: None,
            roi_pct: None,
            sharpe: None,
            status: ConfigStatus::Testing,
            applied_at: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in [
            ConfigStatus::Testing,
            ConfigStatus::Active,
            ConfigStatus::Archived,
            ConfigStatus::Failed,
        ] {
            assert_eq!(s.to_string().parse::<ConfigStatus>().unwrap(), s);
        }
    }

    #[test]
    fn test_new_row_starts_testing() {
        let row = StrategyConfigHistory::testing(
            MarketType::Forex,
            3,
            SignalConfig::default(),
        );
        assert_eq!(row.status, ConfigStatus::Testing);
        assert_eq!(row.version, 3);
        assert!(row.applied_at.is_none());
    }
}
