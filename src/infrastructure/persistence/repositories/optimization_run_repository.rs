use crate::domain::market::MarketType;
use crate::domain::optimization::OptimizationRun;
use crate::domain::repositories::OptimizationRunRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};

pub struct SqliteOptimizationRunRepository {
    pool: SqlitePool,
}

impl SqliteOptimizationRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<OptimizationRun> {
        let payload: String = row.try_get("payload")?;
        serde_json::from_str(&payload).context("corrupt optimization run payload")
    }
}

#[async_trait]
impl OptimizationRunRepository for SqliteOptimizationRunRepository {
    async fn insert(&self, run: &OptimizationRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO optimization_runs
             (id, market_type, trigger_reason, status, improvement_found, payload, started_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(run.market_type.to_string())
        .bind(run.trigger.to_string())
        .bind(run.status.to_string())
        .bind(run.improvement_found)
        .bind(serde_json::to_string(run)?)
        .bind(run.started_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert optimization run")?;
        Ok(())
    }

    async fn update(&self, run: &OptimizationRun) -> Result<()> {
        sqlx::query(
            "UPDATE optimization_runs
             SET status = ?, improvement_found = ?, payload = ?
             WHERE id = ?",
        )
        .bind(run.status.to_string())
        .bind(run.improvement_found)
        .bind(serde_json::to_string(run)?)
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update optimization run")?;
        Ok(())
    }

    async fn recent(
        &self,
        market_type: Option<MarketType>,
        limit: usize,
    ) -> Result<Vec<OptimizationRun>> {
        let rows = match market_type {
            Some(mt) => {
                sqlx::query(
                    "SELECT payload FROM optimization_runs WHERE market_type = ?
                     ORDER BY started_at DESC LIMIT ?",
                )
                .bind(mt.to_string())
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT payload FROM optimization_runs ORDER BY started_at DESC LIMIT ?",
                )
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::optimization::{OptimizationStatus, TriggerReason};
    use crate::infrastructure::persistence::database::Database;

    #[tokio::test]
    async fn test_insert_update_recent() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqliteOptimizationRunRepository::new(db.pool.clone());

        let mut run =
            OptimizationRun::started(MarketType::CryptoSpot, TriggerReason::Manual, 2);
        repo.insert(&run).await.unwrap();

        run.status = OptimizationStatus::Completed;
        run.improvement_found = true;
        run.improvement_pct = Some(7.5);
        repo.update(&run).await.unwrap();

        let recent = repo.recent(Some(MarketType::CryptoSpot), 10).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].improvement_found);
        assert_eq!(recent[0].improvement_pct, Some(7.5));

        assert!(repo
            .recent(Some(MarketType::Forex), 10)
            .await
            .unwrap()
            .is_empty());
    }
}
