use crate::domain::errors::StoreError;
use crate::domain::market::{MarketType, Timeframe};
use crate::domain::repositories::SignalRepository;
use crate::domain::signal::{Direction, Signal, SignalStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

pub struct SqliteSignalRepository {
    pool: SqlitePool,
}

impl SqliteSignalRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<Signal> {
        let timeframe: String = row.try_get("timeframe")?;
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        let market_type: String = row.try_get("market_type")?;
        let id: String = row.try_get("id")?;
        let entry: String = row.try_get("entry")?;
        let stop_loss: String = row.try_get("stop_loss")?;
        let take_profit: String = row.try_get("take_profit")?;
        let created_at: i64 = row.try_get("created_at")?;
        let closed_at: Option<i64> = row.try_get("closed_at")?;

        Ok(Signal {
            id: Uuid::parse_str(&id)?,
            symbol: row.try_get("symbol")?,
            timeframe: Timeframe::from_str(&timeframe)?,
            direction: Direction::from_str(&direction).map_err(anyhow::Error::msg)?,
            entry: Decimal::from_str(&entry)?,
            stop_loss: Decimal::from_str(&stop_loss)?,
            take_profit: Decimal::from_str(&take_profit)?,
            confidence: row.try_get("confidence")?,
            status: SignalStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            market_type: MarketType::from_str(&market_type).map_err(anyhow::Error::msg)?,
            config_version: row.try_get("config_version")?,
            created_at: Utc
                .timestamp_millis_opt(created_at)
                .single()
                .context("bad created_at")?,
            closed_at: closed_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }
}

#[async_trait]
impl SignalRepository for SqliteSignalRepository {
    async fn insert(&self, signal: &Signal) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO signals
            (id, symbol, timeframe, direction, entry, stop_loss, take_profit,
             confidence, status, market_type, config_version, created_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(signal.id.to_string())
        .bind(&signal.symbol)
        .bind(signal.timeframe.to_string())
        .bind(signal.direction.to_string())
        .bind(signal.entry.to_string())
        .bind(signal.stop_loss.to_string())
        .bind(signal.take_profit.to_string())
        .bind(signal.confidence)
        .bind(signal.status.to_string())
        .bind(signal.market_type.to_string())
        .bind(signal.config_version)
        .bind(signal.created_at.timestamp_millis())
        .bind(signal.closed_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateEntity {
                entity: "signal",
                key: format!(
                    "{}/{}/{}",
                    signal.symbol, signal.timeframe, signal.direction
                ),
            }
            .into()),
            Err(e) => Err(e).context("Failed to insert signal"),
        }
    }

    async fn find_active(&self, symbol: &str, direction: Direction) -> Result<Vec<Signal>> {
        let rows = sqlx::query(
            "SELECT * FROM signals WHERE symbol = ? AND direction = ? AND status = 'ACTIVE'",
        )
        .bind(symbol)
        .bind(direction.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::from_row).collect()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Signal>> {
        let row = sqlx::query("SELECT * FROM signals WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn list_active(&self, market_type: Option<MarketType>) -> Result<Vec<Signal>> {
        let rows = match market_type {
            Some(mt) => {
                sqlx::query(
                    "SELECT * FROM signals WHERE status = 'ACTIVE' AND market_type = ?
                     ORDER BY created_at DESC",
                )
                .bind(mt.to_string())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM signals WHERE status = 'ACTIVE' ORDER BY created_at DESC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };

        rows.iter().map(Self::from_row).collect()
    }

    async fn update_status(&self, id: Uuid, status: SignalStatus) -> Result<()> {
        let closed_at = status
            .is_terminal()
            .then(|| Utc::now().timestamp_millis());

        // Terminal statuses are absorbing: only an ACTIVE row may move
        let result = sqlx::query(
            "UPDATE signals SET status = ?, closed_at = COALESCE(?, closed_at)
             WHERE id = ? AND status = 'ACTIVE'",
        )
        .bind(status.to_string())
        .bind(closed_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update signal status")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "active signal",
                key: id.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

pub(crate) fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use rust_decimal_macros::dec;

    fn sample(symbol: &str) -> Signal {
        Signal::new(
            symbol,
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

    #[tokio::test]
    async fn test_insert_and_roundtrip() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteSignalRepository::new(db.pool.clone());

        let signal = sample("BTCUSDT");
        repo.insert(&signal).await.unwrap();

        let loaded = repo.find_by_id(signal.id).await.unwrap().unwrap();
        assert_eq!(loaded.symbol, "BTCUSDT");
        assert_eq!(loaded.entry, dec!(50000));
        assert_eq!(loaded.status, SignalStatus::Active);
        assert_eq!(loaded.timeframe, Timeframe::FourHour);
    }

    #[tokio::test]
    async fn test_active_uniqueness_enforced() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteSignalRepository::new(db.pool.clone());

        repo.insert(&sample("BTCUSDT")).await.unwrap();
        let err = repo.insert(&sample("BTCUSDT")).await.unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some());

        // A different timeframe is a different key
        let mut other = sample("BTCUSDT");
        other.timeframe = Timeframe::OneDay;
        repo.insert(&other).await.unwrap();
    }

    #[tokio::test]
    async fn test_terminal_status_absorbing_in_store() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteSignalRepository::new(db.pool.clone());

        let signal = sample("ETHUSDT");
        repo.insert(&signal).await.unwrap();

        repo.update_status(signal.id, SignalStatus::Expired)
            .await
            .unwrap();
        // Second transition must fail: the row is no longer ACTIVE
        assert!(repo
            .update_status(signal.id, SignalStatus::ClosedTp)
            .await
            .is_err());

        let loaded = repo.find_by_id(signal.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, SignalStatus::Expired);
        assert!(loaded.closed_at.is_some());

        // With the old row expired, a fresh ACTIVE insert is legal again
        repo.insert(&sample("ETHUSDT")).await.unwrap();
    }

    #[tokio::test]
    async fn test_list_active_filters_market_type() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteSignalRepository::new(db.pool.clone());

        repo.insert(&sample("BTCUSDT")).await.unwrap();
        let mut fx = sample("EURUSD");
        fx.market_type = MarketType::Forex;
        repo.insert(&fx).await.unwrap();

        let crypto = repo.list_active(Some(MarketType::CryptoSpot)).await.unwrap();
        assert_eq!(crypto.len(), 1);
        assert_eq!(crypto[0].symbol, "BTCUSDT");

        let all = repo.list_active(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }
}
