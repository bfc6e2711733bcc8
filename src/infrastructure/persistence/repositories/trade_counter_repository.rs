use crate::domain::market::MarketType;
use crate::domain::optimization::TradeCounter;
use crate::domain::repositories::TradeCounterRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;

pub struct SqliteTradeCounterRepository {
    pool: SqlitePool,
}

impl SqliteTradeCounterRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<TradeCounter> {
        let market_type: String = row.try_get("market_type")?;
        let updated_at: i64 = row.try_get("updated_at")?;
        Ok(TradeCounter {
            market_type: MarketType::from_str(&market_type).map_err(anyhow::Error::msg)?,
            closed_trades: row.try_get("closed_trades")?,
            threshold: row.try_get("threshold")?,
            armed: row.try_get("armed")?,
            updated_at: Utc
                .timestamp_millis_opt(updated_at)
                .single()
                .context("bad updated_at")?,
        })
    }
}

#[async_trait]
impl TradeCounterRepository for SqliteTradeCounterRepository {
    async fn load(&self, market_type: MarketType) -> Result<Option<TradeCounter>> {
        let row = sqlx::query("SELECT * FROM trade_counters WHERE market_type = ?")
            .bind(market_type.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn save(&self, counter: &TradeCounter) -> Result<()> {
        sqlx::query(
            "INSERT INTO trade_counters (market_type, closed_trades, threshold, armed, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT (market_type) DO UPDATE SET
               closed_trades = excluded.closed_trades,
               threshold = excluded.threshold,
               armed = excluded.armed,
               updated_at = excluded.updated_at",
        )
        .bind(counter.market_type.to_string())
        .bind(counter.closed_trades)
        .bind(counter.threshold)
        .bind(counter.armed)
        .bind(counter.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to save trade counter")?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<TradeCounter>> {
        let rows = sqlx::query("SELECT * FROM trade_counters")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::from_row).collect()
    }
}
