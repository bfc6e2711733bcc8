//! Cron-style scan scheduling.
//!
//! One loop per timeframe at its configured cadence. Scans of the same
//! timeframe are serialized by construction (the loop awaits its own scan),
//! and `MissedTickBehavior::Skip` drops ticks that would otherwise pile up
//! behind a slow scan. Different timeframes run in parallel tasks.

use crate::application::scanner::MarketScanner;
use crate::domain::market::Timeframe;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::info;

pub struct ScanScheduler {
    scanner: Arc<MarketScanner>,
    timeframes: Vec<Timeframe>,
}

impl ScanScheduler {
    pub fn new(scanner: Arc<MarketScanner>, timeframes: Vec<Timeframe>) -> Self {
        Self {
            scanner,
            timeframes,
        }
    }

    /// Spawn one scan loop per timeframe and return the handles so the
    /// server can abort them at shutdown.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        self.timeframes
            .iter()
            .map(|&timeframe| {
                let scanner = self.scanner.clone();
                tokio::spawn(async move {
                    let cadence = timeframe.scan_cadence();
                    info!(%timeframe, ?cadence, "scan loop started");

                    let mut ticker = time::interval(cadence);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                    // The immediate first tick gives a scan right at startup
                    loop {
                        ticker.tick().await;
                        scanner.scan_timeframe(timeframe).await;
                    }
                })
            })
            .collect()
    }
}
