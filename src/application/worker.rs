//! Evaluation job queue and worker pool.
//!
//! Every long-running harness run is a row (QUEUED) plus a queue message.
//! Workers flip rows to RUNNING, heartbeat while the CPU path executes on
//! a blocking thread, observe CANCELLED at checkpoints, and record
//! COMPLETED/FAILED with diagnostics. Delivery is at-least-once: the
//! watchdog requeues rows whose worker died mid-run.

use crate::application::backtest::{BacktestEngine, BacktestError};
use crate::application::ml_tuning::{MlTuningError, MlTuningHarness};
use crate::application::monte_carlo::{MonteCarloError, MonteCarloHarness};
use crate::application::walk_forward::WalkForwardHarness;
use crate::domain::evaluation::{
    BacktestRun, BacktestSpec, MlTuningJob, MlTuningSpec, MonteCarloRun, MonteCarloSpec,
    RunStatus, WalkForwardRun, WalkForwardSpec,
};
use crate::domain::market::CandleSeries;
use crate::domain::ports::ExchangeClient;
use crate::domain::repositories::{
    BacktestRunRepository, MlTuningJobRepository, MonteCarloRunRepository,
    WalkForwardRunRepository,
};
use crate::infrastructure::observability::Metrics;
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

pub const QUEUE_DEPTH: usize = 128;
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    Backtest(Uuid),
    WalkForward(Uuid),
    MonteCarlo(Uuid),
    MlTuning(Uuid),
}

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    pub async fn enqueue(&self, job: Job) -> Result<()> {
        self.tx.send(job).await.context("job queue closed")
    }

    pub fn depth_hint(&self) -> usize {
        QUEUE_DEPTH - self.tx.capacity()
    }
}

pub struct EvaluationWorker {
    backtests: Arc<dyn BacktestRunRepository>,
    walkforwards: Arc<dyn WalkForwardRunRepository>,
    montecarlos: Arc<dyn MonteCarloRunRepository>,
    mltunings: Arc<dyn MlTuningJobRepository>,
    exchange: Arc<dyn ExchangeClient>,
    metrics: Option<Metrics>,
    queue: JobQueue,
    rx: Arc<Mutex<mpsc::Receiver<Job>>>,
}

impl EvaluationWorker {
    pub fn new(
        backtests: Arc<dyn BacktestRunRepository>,
        walkforwards: Arc<dyn WalkForwardRunRepository>,
        montecarlos: Arc<dyn MonteCarloRunRepository>,
        mltunings: Arc<dyn MlTuningJobRepository>,
        exchange: Arc<dyn ExchangeClient>,
        metrics: Option<Metrics>,
    ) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        Arc::new(Self {
            backtests,
            walkforwards,
            montecarlos,
            mltunings,
            exchange,
            metrics,
            queue: JobQueue { tx },
            rx: Arc::new(Mutex::new(rx)),
        })
    }

    pub fn queue(&self) -> JobQueue {
        self.queue.clone()
    }

    // ── Submission ──────────────────────────────────────────────────

    pub async fn submit_backtest(&self, spec: BacktestSpec) -> Result<Uuid> {
        spec.validate()?;
        let run = BacktestRun::queued(spec);
        self.backtests.insert(&run).await?;
        self.queue.enqueue(Job::Backtest(run.id)).await?;
        Ok(run.id)
    }

    pub async fn submit_walk_forward(&self, spec: WalkForwardSpec) -> Result<Uuid> {
        spec.backtest.validate()?;
        let run = WalkForwardRun::queued(spec);
        self.walkforwards.insert(&run).await?;
        self.queue.enqueue(Job::WalkForward(run.id)).await?;
        Ok(run.id)
    }

    pub async fn submit_monte_carlo(&self, spec: MonteCarloSpec) -> Result<Uuid> {
        spec.backtest.validate()?;
        let run = MonteCarloRun::queued(spec);
        self.montecarlos.insert(&run).await?;
        self.queue.enqueue(Job::MonteCarlo(run.id)).await?;
        Ok(run.id)
    }

    pub async fn submit_ml_tuning(&self, spec: MlTuningSpec) -> Result<Uuid> {
        spec.backtest.validate()?;
        let job = MlTuningJob::queued(spec);
        self.mltunings.insert(&job).await?;
        self.queue.enqueue(Job::MlTuning(job.id)).await?;
        Ok(job.id)
    }

    // ── Worker pool ─────────────────────────────────────────────────

    pub fn start_pool(self: &Arc<Self>, workers: usize) -> Vec<JoinHandle<()>> {
        (0..workers.max(1))
            .map(|worker_id| {
                let worker = self.clone();
                tokio::spawn(async move {
                    info!(worker_id, "evaluation worker started");
                    loop {
                        let job = {
                            let mut rx = worker.rx.lock().await;
                            rx.recv().await
                        };
                        match job {
                            Some(job) => worker.execute(job).await,
                            None => break,
                        }
                    }
                })
            })
            .collect()
    }

    async fn execute(&self, job: Job) {
        let result = match job {
            Job::Backtest(id) => self.execute_backtest(id).await,
            Job::WalkForward(id) => self.execute_walk_forward(id).await,
            Job::MonteCarlo(id) => self.execute_monte_carlo(id).await,
            Job::MlTuning(id) => self.execute_ml_tuning(id).await,
        };
        if let Err(e) = result {
            error!(?job, error = %e, "job execution failed at the harness boundary");
        }
    }

    /// Shared run scaffolding: status flip, heartbeat task wired to an
    /// atomic progress counter, and a cancellation flag refreshed from
    /// the row's status.
    fn spawn_heartbeat<F>(
        &self,
        progress: Arc<AtomicU64>,
        cancelled: Arc<AtomicBool>,
        poll_status: F,
    ) -> JoinHandle<()>
    where
        F: Fn(u64) -> tokio::task::JoinHandle<Option<RunStatus>> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
            loop {
                ticker.tick().await;
                let current = progress.load(Ordering::Relaxed);
                if let Ok(Some(status)) = poll_status(current).await
                    && status == RunStatus::Cancelled
                {
                    cancelled.store(true, Ordering::Relaxed);
                    break;
                }
            }
        })
    }

    async fn fetch_range(
        &self,
        spec: &BacktestSpec,
    ) -> Result<HashMap<String, CandleSeries>> {
        let mut data = HashMap::new();
        for symbol in &spec.symbols {
            match self
                .exchange
                .fetch_candles(symbol, spec.timeframe, spec.start_ms, spec.end_ms)
                .await
            {
                Ok(candles) if !candles.is_empty() => {
                    match CandleSeries::new(symbol, spec.timeframe, candles) {
                        Ok(series) => {
                            data.insert(symbol.clone(), series);
                        }
                        Err(e) => warn!(symbol, error = %e, "series rejected at ingestion"),
                    }
                }
                Ok(_) => warn!(symbol, "no candles in range"),
                Err(e) => warn!(symbol, error = %e, "candle fetch failed"),
            }
        }
        Ok(data)
    }

    async fn execute_backtest(&self, id: Uuid) -> Result<()> {
        let Some(mut run) = self.backtests.find_by_id(id).await? else {
            warn!(%id, "backtest row vanished before execution");
            return Ok(());
        };
        if run.status.is_terminal() {
            return Ok(());
        }

        run.status = RunStatus::Running;
        run.heartbeat_at = Some(Utc::now());
        self.backtests.update(&run).await?;

        let data = self.fetch_range(&run.spec).await?;
        let progress = Arc::new(AtomicU64::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));

        let repo = self.backtests.clone();
        let heartbeat = self.spawn_heartbeat(progress.clone(), cancelled.clone(), move |p| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let _ = repo.heartbeat(id, p).await;
                repo.status_of(id).await.ok().flatten()
            })
        });

        let spec = run.spec.clone();
        let engine_progress = progress.clone();
        let engine_cancelled = cancelled.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let engine = BacktestEngine::default();
            engine.run(&spec, &data, &mut |bars| {
                engine_progress.store(bars, Ordering::Relaxed);
                !engine_cancelled.load(Ordering::Relaxed)
            })
        })
        .await
        .context("backtest task panicked")?;
        heartbeat.abort();

        run.progress = progress.load(Ordering::Relaxed);
        run.finished_at = Some(Utc::now());
        match outcome {
            Ok(report) => {
                run.status = RunStatus::Completed;
                run.report = Some(report);
            }
            Err(BacktestError::Cancelled { .. }) => {
                run.status = RunStatus::Cancelled;
            }
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
            }
        }
        self.record_outcome("backtest", run.status);
        self.backtests.update(&run).await
    }

    async fn execute_walk_forward(&self, id: Uuid) -> Result<()> {
        let Some(mut run) = self.walkforwards.find_by_id(id).await? else {
            return Ok(());
        };
        if run.status.is_terminal() {
            return Ok(());
        }

        run.status = RunStatus::Running;
        run.heartbeat_at = Some(Utc::now());
        self.walkforwards.update(&run).await?;

        let data = self.fetch_range(&run.spec.backtest).await?;
        let progress = Arc::new(AtomicU64::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));

        let repo = self.walkforwards.clone();
        let heartbeat = self.spawn_heartbeat(progress.clone(), cancelled.clone(), move |p| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let _ = repo.heartbeat(id, p).await;
                repo.status_of(id).await.ok().flatten()
            })
        });

        let spec = run.spec.clone();
        let harness_progress = progress.clone();
        let harness_cancelled = cancelled.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            WalkForwardHarness::default().run(&spec, &data, &mut |windows| {
                harness_progress.store(windows, Ordering::Relaxed);
                !harness_cancelled.load(Ordering::Relaxed)
            })
        })
        .await
        .context("walk-forward task panicked")?;
        heartbeat.abort();

        run.progress = progress.load(Ordering::Relaxed);
        run.finished_at = Some(Utc::now());
        match outcome {
            Ok(report) => {
                run.status = RunStatus::Completed;
                run.report = Some(report);
            }
            Err(BacktestError::Cancelled { .. }) => run.status = RunStatus::Cancelled,
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
            }
        }
        self.record_outcome("walk_forward", run.status);
        self.walkforwards.update(&run).await
    }

    async fn execute_monte_carlo(&self, id: Uuid) -> Result<()> {
        let Some(mut run) = self.montecarlos.find_by_id(id).await? else {
            return Ok(());
        };
        if run.status.is_terminal() {
            return Ok(());
        }

        run.status = RunStatus::Running;
        run.heartbeat_at = Some(Utc::now());
        self.montecarlos.update(&run).await?;

        let data = self.fetch_range(&run.spec.backtest).await?;
        let progress = Arc::new(AtomicU64::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));

        let repo = self.montecarlos.clone();
        let heartbeat = self.spawn_heartbeat(progress.clone(), cancelled.clone(), move |p| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let _ = repo.heartbeat(id, p).await;
                repo.status_of(id).await.ok().flatten()
            })
        });

        let spec = run.spec.clone();
        let harness_progress = progress.clone();
        let harness_cancelled = cancelled.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            MonteCarloHarness::default().run(&spec, &data, &mut |sims| {
                harness_progress.store(sims, Ordering::Relaxed);
                !harness_cancelled.load(Ordering::Relaxed)
            })
        })
        .await
        .context("monte-carlo task panicked")?;
        heartbeat.abort();

        run.progress = progress.load(Ordering::Relaxed);
        run.finished_at = Some(Utc::now());
        match outcome {
            Ok((outcomes, report)) => {
                self.montecarlos.insert_outcomes(id, &outcomes).await?;
                run.status = RunStatus::Completed;
                run.report = Some(report);
            }
            Err(MonteCarloError::Cancelled { .. }) => run.status = RunStatus::Cancelled,
            Err(e) => {
                run.status = RunStatus::Failed;
                run.error = Some(e.to_string());
            }
        }
        self.record_outcome("monte_carlo", run.status);
        self.montecarlos.update(&run).await
    }

    async fn execute_ml_tuning(&self, id: Uuid) -> Result<()> {
        let Some(mut job) = self.mltunings.find_by_id(id).await? else {
            return Ok(());
        };
        if job.status.is_terminal() {
            return Ok(());
        }

        job.status = RunStatus::Running;
        job.heartbeat_at = Some(Utc::now());
        self.mltunings.update(&job).await?;

        let data = self.fetch_range(&job.spec.backtest).await?;
        let progress = Arc::new(AtomicU64::new(0));
        let cancelled = Arc::new(AtomicBool::new(false));

        let repo = self.mltunings.clone();
        let heartbeat = self.spawn_heartbeat(progress.clone(), cancelled.clone(), move |p| {
            let repo = repo.clone();
            tokio::spawn(async move {
                let _ = repo.heartbeat(id, p).await;
                repo.status_of(id).await.ok().flatten()
            })
        });

        let spec = job.spec.clone();
        let harness_progress = progress.clone();
        let harness_cancelled = cancelled.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            MlTuningHarness::default()
                .run(&spec, &data, &mut |samples| {
                    harness_progress.store(samples, Ordering::Relaxed);
                    !harness_cancelled.load(Ordering::Relaxed)
                })
                .map(|output| (output.samples, output.report))
        })
        .await
        .context("ml tuning task panicked")?;
        heartbeat.abort();

        job.progress = progress.load(Ordering::Relaxed);
        job.finished_at = Some(Utc::now());
        match outcome {
            Ok((samples, report)) => {
                self.mltunings.insert_samples(id, &samples).await?;
                job.status = RunStatus::Completed;
                job.report = Some(report);
            }
            Err(MlTuningError::Cancelled { .. }) => job.status = RunStatus::Cancelled,
            Err(e) => {
                job.status = RunStatus::Failed;
                job.error = Some(e.to_string());
            }
        }
        self.record_outcome("ml_tuning", job.status);
        self.mltunings.update(&job).await
    }

    fn record_outcome(&self, harness: &str, status: RunStatus) {
        if let Some(m) = &self.metrics {
            m.evaluation_runs_total
                .with_label_values(&[harness, &status.to_string()])
                .inc();
        }
    }
}
