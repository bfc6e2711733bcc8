//! Push-based metrics reporter.
//!
//! Periodically renders the prometheus registry and emits it as a single
//! structured log line prefixed `METRICS_TEXT:`. No HTTP server, no
//! incoming connections, only outbound data.

use crate::infrastructure::observability::metrics::Metrics;
use crate::infrastructure::rate_limit::TokenBudget;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::info;

pub struct MetricsReporter {
    metrics: Metrics,
    budget: Arc<TokenBudget>,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(metrics: Metrics, budget: Arc<TokenBudget>, interval_secs: u64) -> Self {
        Self {
            metrics,
            budget,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_secs),
        }
    }

    pub async fn run(self) {
        let mut ticker = time::interval(self.interval);
        ticker.tick().await; // first tick is immediate

        loop {
            ticker.tick().await;

            let cap = self.budget.effective_minute_cap().await;
            self.metrics.rate_limit_minute_cap.set(cap as f64);

            info!(
                uptime_secs = self.start_time.elapsed().as_secs(),
                "METRICS_TEXT:{}",
                self.metrics.render().replace('\n', "\\n")
            );
        }
    }
}
