//! Process-wide strategy configuration registry.
//!
//! Reads are cheap and lock-shared; activation takes the write lock,
//! archives the prior history row, appends the new version, and swaps the
//! in-memory map. The registry and the token budget are the only sanctioned
//! process-wide singletons.

use crate::domain::errors::ConfigError;
use crate::domain::market::MarketType;
use crate::domain::repositories::ConfigHistoryRepository;
use crate::domain::strategy::{ConfigStatus, SignalConfig, StrategyConfigHistory};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

struct ActiveEntry {
    config: SignalConfig,
    version: i64,
}

pub struct ConfigRegistry {
    history: Arc<dyn ConfigHistoryRepository>,
    active: RwLock<HashMap<MarketType, ActiveEntry>>,
}

impl ConfigRegistry {
    /// Build the registry from the store, seeding any market type that has
    /// no ACTIVE row yet from the supplied defaults (markets.toml).
    pub async fn bootstrap(
        history: Arc<dyn ConfigHistoryRepository>,
        defaults: HashMap<MarketType, SignalConfig>,
    ) -> Result<Self> {
        let mut active = HashMap::new();

        for (market_type, default_config) in defaults {
            match history.active_for(market_type).await? {
                Some(row) => {
                    active.insert(
                        market_type,
                        ActiveEntry {
                            config: row.config,
                            version: row.version,
                        },
                    );
                }
                None => {
                    default_config
                        .validate()
                        .context("invalid default config in markets.toml")?;
                    let version = history.next_version(market_type).await?;
                    let row =
                        StrategyConfigHistory::testing(market_type, version, default_config.clone());
                    let id = history.append(&row).await?;
                    history.promote(market_type, id).await?;
                    info!(%market_type, version, "seeded default strategy config");
                    active.insert(
                        market_type,
                        ActiveEntry {
                            config: default_config,
                            version,
                        },
                    );
                }
            }
        }

        Ok(Self {
            history,
            active: RwLock::new(active),
        })
    }

    /// Resolve the active config for a symbol via market-type classification.
    /// Returns (config, version). Unknown market types fall back to crypto
    /// spot, mirroring the classifier's own fallback.
    pub async fn get_config(&self, symbol: &str) -> Option<(SignalConfig, i64)> {
        let market_type = MarketType::classify(symbol);
        self.get_for_market(market_type).await
    }

    pub async fn get_for_market(&self, market_type: MarketType) -> Option<(SignalConfig, i64)> {
        let guard = self.active.read().await;
        let entry = guard
            .get(&market_type)
            .or_else(|| guard.get(&MarketType::CryptoSpot))?;
        Some((entry.config.clone(), entry.version))
    }

    /// Validate and activate a new config for a market type. The prior
    /// ACTIVE history row is archived; returns the prior version.
    pub async fn set_active(
        &self,
        market_type: MarketType,
        config: SignalConfig,
    ) -> Result<Option<i64>> {
        config.validate().map_err(|e: ConfigError| anyhow::Error::from(e))?;

        let mut guard = self.active.write().await;
        let prior_version = guard.get(&market_type).map(|e| e.version);

        let version = self.history.next_version(market_type).await?;
        let row = StrategyConfigHistory::testing(market_type, version, config.clone());
        let id = self.history.append(&row).await?;
        self.history.promote(market_type, id).await?;

        guard.insert(market_type, ActiveEntry { config, version });
        info!(%market_type, version, prior = ?prior_version, "activated strategy config");

        Ok(prior_version)
    }

    /// Record a candidate that was evaluated but not promoted.
    pub async fn archive_candidate(
        &self,
        market_type: MarketType,
        config: SignalConfig,
        fitness: f64,
    ) -> Result<()> {
        let version = self.history.next_version(market_type).await?;
        let mut row = StrategyConfigHistory::testing(market_type, version, config);
        row.fitness = Some(fitness);
        let id = self.history.append(&row).await?;
        self.history.set_status(id, ConfigStatus::Archived).await?;
        Ok(())
    }

    /// Version of the currently active config, for signal stamping.
    pub async fn active_version(&self, market_type: MarketType) -> Option<i64> {
        self.active.read().await.get(&market_type).map(|e| e.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqliteConfigHistoryRepository;

    async fn registry() -> ConfigRegistry {
        let db = Database::in_memory().await.unwrap();
        let history = Arc::new(SqliteConfigHistoryRepository::new(db.pool.clone()));
        let mut defaults = HashMap::new();
        defaults.insert(MarketType::CryptoSpot, SignalConfig::default());
        defaults.insert(MarketType::Forex, SignalConfig::default());
        ConfigRegistry::bootstrap(history, defaults).await.unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_defaults() {
        let registry = registry().await;
        let (config, version) = registry.get_config("BTCUSDT").await.unwrap();
        assert_eq!(version, 1);
        assert!(config.validate().is_ok());
    }

    #[tokio::test]
    async fn test_market_dispatch_by_symbol() {
        let registry = registry().await;
        // Forex classification routes to the forex entry
        let (_, fx_version) = registry.get_config("EURUSD").await.unwrap();
        assert_eq!(fx_version, 1);
        // Commodity has no entry; falls back to crypto spot
        assert!(registry.get_config("XAUUSD").await.is_some());
    }

    #[tokio::test]
    async fn test_set_active_bumps_version_and_returns_prior() {
        let registry = registry().await;

        let next = SignalConfig {
            long_adx_min: 25.0,
            ..Default::default()
        };
        let prior = registry
            .set_active(MarketType::CryptoSpot, next)
            .await
            .unwrap();
        assert_eq!(prior, Some(1));

        let (config, version) = registry.get_config("BTCUSDT").await.unwrap();
        assert_eq!(version, 2);
        assert_eq!(config.long_adx_min, 25.0);
    }

    #[tokio::test]
    async fn test_set_active_refuses_invalid() {
        let registry = registry().await;
        let bad = SignalConfig {
            min_confidence: 3.0,
            ..Default::default()
        };
        assert!(registry.set_active(MarketType::Forex, bad).await.is_err());
        // Active entry untouched
        let (_, version) = registry.get_config("EURUSD").await.unwrap();
        assert_eq!(version, 1);
    }
}
