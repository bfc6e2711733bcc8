use crate::domain::market::MarketType;
use crate::domain::repositories::ConfigHistoryRepository;
use crate::domain::strategy::{ConfigStatus, SignalConfig, StrategyConfigHistory};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;

pub struct SqliteConfigHistoryRepository {
    pool: SqlitePool,
}

impl SqliteConfigHistoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<StrategyConfigHistory> {
        let market_type: String = row.try_get("market_type")?;
        let config_json: String = row.try_get("config_json")?;
        let status: String = row.try_get("status")?;
        let applied_at: Option<i64> = row.try_get("applied_at")?;
        let created_at: i64 = row.try_get("created_at")?;

        let config: SignalConfig =
            serde_json::from_str(&config_json).context("corrupt config_json row")?;

        Ok(StrategyConfigHistory {
            id: Some(row.try_get("id")?),
            market_type: MarketType::from_str(&market_type).map_err(anyhow::Error::msg)?,
            version: row.try_get("version")?,
            config,
            fitness: row.try_get("fitness")?,
            win_rate: row.try_get("win_rate")?,
            roi_pct: row.try_get("roi_pct")?,
            sharpe: row.try_get("sharpe")?,
            status: ConfigStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            applied_at: applied_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            created_at: Utc
                .timestamp_millis_opt(created_at)
                .single()
                .context("bad created_at")?,
        })
    }
}

#[async_trait]
impl ConfigHistoryRepository for SqliteConfigHistoryRepository {
    async fn append(&self, row: &StrategyConfigHistory) -> Result<i64> {
        row.config.validate()?;

        let result = sqlx::query(
            r#"
            INSERT INTO config_history
            (market_type, version, config_json, fitness, win_rate, roi_pct,
             sharpe, status, applied_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.market_type.to_string())
        .bind(row.version)
        .bind(serde_json::to_string(&row.config)?)
        .bind(row.fitness)
        .bind(row.win_rate)
        .bind(row.roi_pct)
        .bind(row.sharpe)
        .bind(row.status.to_string())
        .bind(row.applied_at.map(|t| t.timestamp_millis()))
        .bind(row.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to append config history row")?;

        Ok(result.last_insert_rowid())
    }

    async fn active_for(&self, market_type: MarketType) -> Result<Option<StrategyConfigHistory>> {
        let row = sqlx::query(
            "SELECT * FROM config_history WHERE market_type = ? AND status = 'ACTIVE'",
        )
        .bind(market_type.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn next_version(&self, market_type: MarketType) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(version), 0) AS max_version FROM config_history
             WHERE market_type = ?",
        )
        .bind(market_type.to_string())
        .fetch_one(&self.pool)
        .await?;
        let max_version: i64 = row.try_get("max_version")?;
        Ok(max_version + 1)
    }

    async fn promote(&self, market_type: MarketType, id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE config_history SET status = 'ARCHIVED'
             WHERE market_type = ? AND status = 'ACTIVE'",
        )
        .bind(market_type.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to archive prior active config")?;

        let result = sqlx::query(
            "UPDATE config_history SET status = 'ACTIVE', applied_at = ?
             WHERE id = ? AND market_type = ?",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id)
        .bind(market_type.to_string())
        .execute(&mut *tx)
        .await
        .context("Failed to activate config row")?;

        if result.rows_affected() == 0 {
            anyhow::bail!("config history row {id} not found for {market_type}");
        }

        tx.commit().await?;
        Ok(())
    }

    async fn set_status(&self, id: i64, status: ConfigStatus) -> Result<()> {
        sqlx::query("UPDATE config_history SET status = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(id)
            .execute(&self.pool)
            .await
            .context("Failed to set config history status")?;
        Ok(())
    }

    async fn history_for(
        &self,
        market_type: MarketType,
        limit: usize,
    ) -> Result<Vec<StrategyConfigHistory>> {
        let rows = sqlx::query(
            "SELECT * FROM config_history WHERE market_type = ?
             ORDER BY version DESC LIMIT ?",
        )
        .bind(market_type.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }
}
