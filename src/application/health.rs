//! Operational health snapshot: storage, exchange, and queue state,
//! logged periodically with structured fields.

use crate::application::worker::JobQueue;
use crate::domain::ports::ExchangeClient;
use crate::infrastructure::persistence::Database;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub storage_ok: bool,
    pub exchange_ok: bool,
    pub queue_depth: usize,
    pub healthy: bool,
}

pub struct HealthService {
    database: Database,
    exchange: Arc<dyn ExchangeClient>,
    queue: JobQueue,
}

impl HealthService {
    pub fn new(database: Database, exchange: Arc<dyn ExchangeClient>, queue: JobQueue) -> Self {
        Self {
            database,
            exchange,
            queue,
        }
    }

    pub async fn check(&self) -> HealthSnapshot {
        let storage_ok = sqlx::query("SELECT 1")
            .fetch_one(&self.database.pool)
            .await
            .is_ok();
        let exchange_ok = self.exchange.ping().await.is_ok();
        let queue_depth = self.queue.depth_hint();

        HealthSnapshot {
            storage_ok,
            exchange_ok,
            queue_depth,
            healthy: storage_ok && exchange_ok,
        }
    }

    pub async fn run_forever(self: Arc<Self>, interval: Duration) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let snapshot = self.check().await;
            if snapshot.healthy {
                info!(
                    storage = snapshot.storage_ok,
                    exchange = snapshot.exchange_ok,
                    queue_depth = snapshot.queue_depth,
                    "health ok"
                );
            } else {
                warn!(
                    storage = snapshot.storage_ok,
                    exchange = snapshot.exchange_ok,
                    queue_depth = snapshot.queue_depth,
                    "health degraded"
                );
            }
        }
    }
}
