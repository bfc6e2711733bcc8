//! Stale-run watchdog.
//!
//! A worker crash leaves its row RUNNING with a frozen heartbeat. The
//! watchdog sweeps all four run tables, marks stale rows FAILED with a
//! diagnostic, and requeues them while the retry budget lasts.

use crate::application::worker::{Job, JobQueue};
use crate::domain::evaluation::RunStatus;
use crate::domain::repositories::{
    BacktestRunRepository, MlTuningJobRepository, MonteCarloRunRepository,
    WalkForwardRunRepository,
};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Heartbeats older than this mark a run as abandoned.
pub const STALE_AFTER_SECS: i64 = 120;

pub const MAX_RETRIES: u32 = 2;

pub struct Watchdog {
    backtests: Arc<dyn BacktestRunRepository>,
    walkforwards: Arc<dyn WalkForwardRunRepository>,
    montecarlos: Arc<dyn MonteCarloRunRepository>,
    mltunings: Arc<dyn MlTuningJobRepository>,
    queue: JobQueue,
}

impl Watchdog {
    pub fn new(
        backtests: Arc<dyn BacktestRunRepository>,
        walkforwards: Arc<dyn WalkForwardRunRepository>,
        montecarlos: Arc<dyn MonteCarloRunRepository>,
        mltunings: Arc<dyn MlTuningJobRepository>,
        queue: JobQueue,
    ) -> Self {
        Self {
            backtests,
            walkforwards,
            montecarlos,
            mltunings,
            queue,
        }
    }

    /// One reconciliation pass over every run table. Returns how many
    /// rows were touched.
    pub async fn sweep(&self) -> Result<usize> {
        let stale_before = Utc::now() - ChronoDuration::seconds(STALE_AFTER_SECS);
        let mut touched = 0;

        for mut run in self.backtests.find_stale(stale_before).await? {
            touched += 1;
            let requeue = run.retries < MAX_RETRIES;
            run.retries += 1;
            run.status = if requeue {
                RunStatus::Queued
            } else {
                run.error = Some("worker heartbeat lost; retry budget exhausted".to_string());
                RunStatus::Failed
            };
            run.heartbeat_at = None;
            self.backtests.update(&run).await?;
            if requeue {
                warn!(id = %run.id, retry = run.retries, "stale backtest requeued");
                self.queue.enqueue(Job::Backtest(run.id)).await?;
            } else {
                warn!(id = %run.id, "stale backtest failed permanently");
            }
        }

        for mut run in self.walkforwards.find_stale(stale_before).await? {
            touched += 1;
            let requeue = run.retries < MAX_RETRIES;
            run.retries += 1;
            run.status = if requeue {
                RunStatus::Queued
            } else {
                run.error = Some("worker heartbeat lost; retry budget exhausted".to_string());
                RunStatus::Failed
            };
            run.heartbeat_at = None;
            self.walkforwards.update(&run).await?;
            if requeue {
                warn!(id = %run.id, retry = run.retries, "stale walk-forward requeued");
                self.queue.enqueue(Job::WalkForward(run.id)).await?;
            }
        }

        for mut run in self.montecarlos.find_stale(stale_before).await? {
            touched += 1;
            let requeue = run.retries < MAX_RETRIES;
            run.retries += 1;
            run.status = if requeue {
                RunStatus::Queued
            } else {
                run.error = Some("worker heartbeat lost; retry budget exhausted".to_string());
                RunStatus::Failed
            };
            run.heartbeat_at = None;
            self.montecarlos.update(&run).await?;
            if requeue {
                warn!(id = %run.id, retry = run.retries, "stale monte-carlo requeued");
                self.queue.enqueue(Job::MonteCarlo(run.id)).await?;
            }
        }

        for mut job in self.mltunings.find_stale(stale_before).await? {
            touched += 1;
            let requeue = job.retries < MAX_RETRIES;
            job.retries += 1;
            job.status = if requeue {
                RunStatus::Queued
            } else {
                job.error = Some("worker heartbeat lost; retry budget exhausted".to_string());
                RunStatus::Failed
            };
            job.heartbeat_at = None;
            self.mltunings.update(&job).await?;
            if requeue {
                warn!(id = %job.id, retry = job.retries, "stale ml-tuning requeued");
                self.queue.enqueue(Job::MlTuning(job.id)).await?;
            }
        }

        Ok(touched)
    }

    pub async fn run_forever(self: Arc<Self>) {
        let mut ticker = time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("watchdog started");

        loop {
            ticker.tick().await;
            match self.sweep().await {
                Ok(0) => {}
                Ok(touched) => info!(touched, "watchdog reconciled stale runs"),
                Err(e) => warn!(error = %e, "watchdog sweep failed"),
            }
        }
    }
}
