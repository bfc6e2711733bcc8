use crate::domain::errors::StoreError;
use crate::domain::paper_trade::{PaperTrade, TradeStatus};
use crate::domain::repositories::PaperTradeRepository;
use crate::domain::signal::Direction;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

use super::signal_repository::is_unique_violation;

pub struct SqlitePaperTradeRepository {
    pool: SqlitePool,
}

impl SqlitePaperTradeRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<PaperTrade> {
        let id: String = row.try_get("id")?;
        let signal_id: String = row.try_get("signal_id")?;
        let owner: Option<String> = row.try_get("owner")?;
        let direction: String = row.try_get("direction")?;
        let status: String = row.try_get("status")?;
        let entry_price: String = row.try_get("entry_price")?;
        let quantity: String = row.try_get("quantity")?;
        let notional: String = row.try_get("notional")?;
        let stop_loss: String = row.try_get("stop_loss")?;
        let take_profit: String = row.try_get("take_profit")?;
        let realized_pnl: Option<String> = row.try_get("realized_pnl")?;
        let exit_price: Option<String> = row.try_get("exit_price")?;
        let opened_at: i64 = row.try_get("opened_at")?;
        let closed_at: Option<i64> = row.try_get("closed_at")?;

        Ok(PaperTrade {
            id: Uuid::parse_str(&id)?,
            signal_id: Uuid::parse_str(&signal_id)?,
            owner: owner.map(|o| Uuid::parse_str(&o)).transpose()?,
            symbol: row.try_get("symbol")?,
            direction: Direction::from_str(&direction).map_err(anyhow::Error::msg)?,
            entry_price: Decimal::from_str(&entry_price)?,
            quantity: Decimal::from_str(&quantity)?,
            notional: Decimal::from_str(&notional)?,
            stop_loss: Decimal::from_str(&stop_loss)?,
            take_profit: Decimal::from_str(&take_profit)?,
            status: TradeStatus::from_str(&status).map_err(anyhow::Error::msg)?,
            realized_pnl: realized_pnl.map(|p| Decimal::from_str(&p)).transpose()?,
            exit_price: exit_price.map(|p| Decimal::from_str(&p)).transpose()?,
            opened_at: Utc
                .timestamp_millis_opt(opened_at)
                .single()
                .context("bad opened_at")?,
            closed_at: closed_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        })
    }
}

#[async_trait]
impl PaperTradeRepository for SqlitePaperTradeRepository {
    async fn insert(&self, trade: &PaperTrade) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO paper_trades
            (id, signal_id, owner, symbol, direction, entry_price, quantity,
             notional, stop_loss, take_profit, status, realized_pnl, exit_price,
             opened_at, closed_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(trade.id.to_string())
        .bind(trade.signal_id.to_string())
        .bind(trade.owner.map(|o| o.to_string()))
        .bind(&trade.symbol)
        .bind(trade.direction.to_string())
        .bind(trade.entry_price.to_string())
        .bind(trade.quantity.to_string())
        .bind(trade.notional.to_string())
        .bind(trade.stop_loss.to_string())
        .bind(trade.take_profit.to_string())
        .bind(trade.status.to_string())
        .bind(trade.realized_pnl.map(|p| p.to_string()))
        .bind(trade.exit_price.map(|p| p.to_string()))
        .bind(trade.opened_at.timestamp_millis())
        .bind(trade.closed_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(StoreError::DuplicateEntity {
                entity: "paper trade",
                key: format!(
                    "{}/{}",
                    trade.signal_id,
                    trade
                        .owner
                        .map(|o| o.to_string())
                        .unwrap_or_else(|| "SYSTEM".to_string())
                ),
            }
            .into()),
            Err(e) => Err(e).context("Failed to insert paper trade"),
        }
    }

    async fn list_open(&self) -> Result<Vec<PaperTrade>> {
        let rows = sqlx::query("SELECT * FROM paper_trades WHERE status = 'OPEN'")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn list_by_owner(&self, owner: Option<Uuid>) -> Result<Vec<PaperTrade>> {
        let rows = match owner {
            Some(owner) => {
                sqlx::query("SELECT * FROM paper_trades WHERE owner = ? ORDER BY opened_at DESC")
                    .bind(owner.to_string())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query(
                    "SELECT * FROM paper_trades WHERE owner IS NULL ORDER BY opened_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };
        rows.iter().map(Self::from_row).collect()
    }

    async fn close(&self, trade: &PaperTrade) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE paper_trades
            SET status = ?, realized_pnl = ?, exit_price = ?, closed_at = ?
            WHERE id = ? AND status = 'OPEN'
            "#,
        )
        .bind(trade.status.to_string())
        .bind(trade.realized_pnl.map(|p| p.to_string()))
        .bind(trade.exit_price.map(|p| p.to_string()))
        .bind(trade.closed_at.map(|t| t.timestamp_millis()))
        .bind(trade.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to close paper trade")?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                entity: "open paper trade",
                key: trade.id.to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::persistence::database::Database;
    use rust_decimal_macros::dec;

    fn sample(signal_id: Uuid, owner: Option<Uuid>) -> PaperTrade {
        PaperTrade::open(
            signal_id,
            owner,
            "BTCUSDT",
            Direction::Long,
            dec!(50000),
            dec!(100),
            dec!(48500),
            dec!(53500),
        )
    }

    #[tokio::test]
    async fn test_insert_roundtrip() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePaperTradeRepository::new(db.pool.clone());

        let trade = sample(Uuid::new_v4(), None);
        repo.insert(&trade).await.unwrap();

        let open = repo.list_open().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].quantity, dec!(100) / dec!(50000));
        assert_eq!(open[0].owner, None);
    }

    #[tokio::test]
    async fn test_duplicate_open_per_owner_signal() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePaperTradeRepository::new(db.pool.clone());

        let signal_id = Uuid::new_v4();
        repo.insert(&sample(signal_id, None)).await.unwrap();

        let err = repo.insert(&sample(signal_id, None)).await.unwrap_err();
        assert!(err.downcast_ref::<StoreError>().is_some());

        // A different owner may shadow the same signal
        repo.insert(&sample(signal_id, Some(Uuid::new_v4())))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_close_then_reopen_allowed() {
        let db = Database::in_memory().await.unwrap();
        let repo = SqlitePaperTradeRepository::new(db.pool.clone());

        let signal_id = Uuid::new_v4();
        let mut trade = sample(signal_id, None);
        repo.insert(&trade).await.unwrap();

        trade.close(dec!(53500), TradeStatus::ClosedTp).unwrap();
        repo.close(&trade).await.unwrap();

        assert!(repo.list_open().await.unwrap().is_empty());
        // Double close is a NotFound: the OPEN row is gone
        assert!(repo.close(&trade).await.is_err());

        let system_trades = repo.list_by_owner(None).await.unwrap();
        assert_eq!(system_trades.len(), 1);
        assert_eq!(system_trades[0].status, TradeStatus::ClosedTp);
        let expected = (dec!(53500) - dec!(50000)) * (dec!(100) / dec!(50000));
        assert_eq!(system_trades[0].realized_pnl, Some(expected));
    }
}
