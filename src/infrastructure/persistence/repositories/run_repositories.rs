//! Repositories for the four evaluation-run tables.
//!
//! The tables share one shape (lifecycle columns + full record as JSON), so
//! a macro generates the per-table implementations. Lifecycle columns are
//! authoritative: on read they overwrite whatever the JSON payload carried,
//! which lets `heartbeat` stay a cheap column-only update.

use crate::domain::evaluation::{
    BacktestRun, MlTuningJob, MonteCarloRun, RunStatus, SimulationOutcome, TuningSample,
    WalkForwardRun,
};
use crate::domain::repositories::{
    BacktestRunRepository, MlTuningJobRepository, MonteCarloRunRepository,
    WalkForwardRunRepository,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

macro_rules! run_repository {
    ($repo:ident, $trait_name:ident, $run:ident, $table:literal) => {
        pub struct $repo {
            pool: SqlitePool,
        }

        impl $repo {
            pub fn new(pool: SqlitePool) -> Self {
                Self { pool }
            }

            fn from_row(row: &SqliteRow) -> Result<$run> {
                let payload: String = row.try_get("payload")?;
                let status: String = row.try_get("status")?;
                let progress: i64 = row.try_get("progress")?;
                let heartbeat_at: Option<i64> = row.try_get("heartbeat_at")?;
                let retries: i64 = row.try_get("retries")?;

                let mut run: $run = serde_json::from_str(&payload)
                    .with_context(|| concat!("corrupt payload in ", $table))?;
                run.status = RunStatus::from_str(&status).map_err(anyhow::Error::msg)?;
                run.progress = progress as u64;
                run.heartbeat_at =
                    heartbeat_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
                run.retries = retries as u32;
                Ok(run)
            }
        }

        #[async_trait]
        impl $trait_name for $repo {
            async fn insert(&self, run: &$run) -> Result<()> {
                sqlx::query(concat!(
                    "INSERT INTO ",
                    $table,
                    " (id, status, progress, heartbeat_at, retries, payload, created_at)
                     VALUES (?, ?, ?, ?, ?, ?, ?)"
                ))
                .bind(run.id.to_string())
                .bind(run.status.to_string())
                .bind(run.progress as i64)
                .bind(run.heartbeat_at.map(|t| t.timestamp_millis()))
                .bind(run.retries as i64)
                .bind(serde_json::to_string(run)?)
                .bind(run.created_at.timestamp_millis())
                .execute(&self.pool)
                .await
                .context(concat!("Failed to insert into ", $table))?;
                Ok(())
            }

            async fn update(&self, run: &$run) -> Result<()> {
                sqlx::query(concat!(
                    "UPDATE ",
                    $table,
                    " SET status = ?, progress = ?, heartbeat_at = ?, retries = ?, payload = ?
                     WHERE id = ?"
                ))
                .bind(run.status.to_string())
                .bind(run.progress as i64)
                .bind(run.heartbeat_at.map(|t| t.timestamp_millis()))
                .bind(run.retries as i64)
                .bind(serde_json::to_string(run)?)
                .bind(run.id.to_string())
                .execute(&self.pool)
                .await
                .context(concat!("Failed to update ", $table))?;
                Ok(())
            }

            async fn find_by_id(&self, id: Uuid) -> Result<Option<$run>> {
                let row = sqlx::query(concat!("SELECT * FROM ", $table, " WHERE id = ?"))
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await?;
                row.as_ref().map(Self::from_row).transpose()
            }

            async fn status_of(&self, id: Uuid) -> Result<Option<RunStatus>> {
                let row = sqlx::query(concat!("SELECT status FROM ", $table, " WHERE id = ?"))
                    .bind(id.to_string())
                    .fetch_optional(&self.pool)
                    .await?;
                row.map(|r| {
                    let status: String = r.try_get("status")?;
                    RunStatus::from_str(&status).map_err(anyhow::Error::msg)
                })
                .transpose()
            }

            async fn heartbeat(&self, id: Uuid, progress: u64) -> Result<()> {
                sqlx::query(concat!(
                    "UPDATE ",
                    $table,
                    " SET progress = ?, heartbeat_at = ? WHERE id = ?"
                ))
                .bind(progress as i64)
                .bind(Utc::now().timestamp_millis())
                .bind(id.to_string())
                .execute(&self.pool)
                .await
                .context(concat!("Failed to heartbeat ", $table))?;
                Ok(())
            }

            async fn find_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<$run>> {
                let rows = sqlx::query(concat!(
                    "SELECT * FROM ",
                    $table,
                    " WHERE status = 'RUNNING'
                     AND (heartbeat_at IS NULL OR heartbeat_at < ?)"
                ))
                .bind(stale_before.timestamp_millis())
                .fetch_all(&self.pool)
                .await?;
                rows.iter().map(Self::from_row).collect()
            }
        }
    };
}

run_repository!(
    SqliteBacktestRunRepository,
    BacktestRunRepository,
    BacktestRun,
    "backtest_runs"
);
run_repository!(
    SqliteWalkForwardRunRepository,
    WalkForwardRunRepository,
    WalkForwardRun,
    "walkforward_runs"
);

// Monte-Carlo and ML tuning carry child-row methods beyond the shared
// shape, so their traits are implemented by hand on top of the same macro
// bodies via delegation structs.

pub struct SqliteMonteCarloRunRepository {
    pool: SqlitePool,
}

impl SqliteMonteCarloRunRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<MonteCarloRun> {
        let payload: String = row.try_get("payload")?;
        let status: String = row.try_get("status")?;
        let progress: i64 = row.try_get("progress")?;
        let heartbeat_at: Option<i64> = row.try_get("heartbeat_at")?;
        let retries: i64 = row.try_get("retries")?;

        let mut run: MonteCarloRun =
            serde_json::from_str(&payload).context("corrupt payload in montecarlo_runs")?;
        run.status = RunStatus::from_str(&status).map_err(anyhow::Error::msg)?;
        run.progress = progress as u64;
        run.heartbeat_at = heartbeat_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        run.retries = retries as u32;
        Ok(run)
    }
}

#[async_trait]
impl MonteCarloRunRepository for SqliteMonteCarloRunRepository {
    async fn insert(&self, run: &MonteCarloRun) -> Result<()> {
        sqlx::query(
            "INSERT INTO montecarlo_runs
             (id, status, progress, heartbeat_at, retries, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(run.id.to_string())
        .bind(run.status.to_string())
        .bind(run.progress as i64)
        .bind(run.heartbeat_at.map(|t| t.timestamp_millis()))
        .bind(run.retries as i64)
        .bind(serde_json::to_string(run)?)
        .bind(run.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert into montecarlo_runs")?;
        Ok(())
    }

    async fn update(&self, run: &MonteCarloRun) -> Result<()> {
        sqlx::query(
            "UPDATE montecarlo_runs
             SET status = ?, progress = ?, heartbeat_at = ?, retries = ?, payload = ?
             WHERE id = ?",
        )
        .bind(run.status.to_string())
        .bind(run.progress as i64)
        .bind(run.heartbeat_at.map(|t| t.timestamp_millis()))
        .bind(run.retries as i64)
        .bind(serde_json::to_string(run)?)
        .bind(run.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update montecarlo_runs")?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<MonteCarloRun>> {
        let row = sqlx::query("SELECT * FROM montecarlo_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn status_of(&self, id: Uuid) -> Result<Option<RunStatus>> {
        let row = sqlx::query("SELECT status FROM montecarlo_runs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let status: String = r.try_get("status")?;
            RunStatus::from_str(&status).map_err(anyhow::Error::msg)
        })
        .transpose()
    }

    async fn heartbeat(&self, id: Uuid, progress: u64) -> Result<()> {
        sqlx::query("UPDATE montecarlo_runs SET progress = ?, heartbeat_at = ? WHERE id = ?")
            .bind(progress as i64)
            .bind(Utc::now().timestamp_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to heartbeat montecarlo_runs")?;
        Ok(())
    }

    async fn find_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<MonteCarloRun>> {
        let rows = sqlx::query(
            "SELECT * FROM montecarlo_runs WHERE status = 'RUNNING'
             AND (heartbeat_at IS NULL OR heartbeat_at < ?)",
        )
        .bind(stale_before.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn insert_outcomes(&self, run_id: Uuid, outcomes: &[SimulationOutcome]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for outcome in outcomes {
            sqlx::query(
                "INSERT OR REPLACE INTO montecarlo_outcomes (run_id, idx, outcome_json)
                 VALUES (?, ?, ?)",
            )
            .bind(run_id.to_string())
            .bind(outcome.index as i64)
            .bind(serde_json::to_string(outcome)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.context("Failed to insert outcomes")?;
        Ok(())
    }

    async fn outcomes_for(&self, run_id: Uuid) -> Result<Vec<SimulationOutcome>> {
        let rows = sqlx::query(
            "SELECT outcome_json FROM montecarlo_outcomes WHERE run_id = ? ORDER BY idx",
        )
        .bind(run_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let json: String = r.try_get("outcome_json")?;
                serde_json::from_str(&json).context("corrupt outcome row")
            })
            .collect()
    }
}

pub struct SqliteMlTuningJobRepository {
    pool: SqlitePool,
}

impl SqliteMlTuningJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn from_row(row: &SqliteRow) -> Result<MlTuningJob> {
        let payload: String = row.try_get("payload")?;
        let status: String = row.try_get("status")?;
        let progress: i64 = row.try_get("progress")?;
        let heartbeat_at: Option<i64> = row.try_get("heartbeat_at")?;
        let retries: i64 = row.try_get("retries")?;

        let mut job: MlTuningJob =
            serde_json::from_str(&payload).context("corrupt payload in mltuning_jobs")?;
        job.status = RunStatus::from_str(&status).map_err(anyhow::Error::msg)?;
        job.progress = progress as u64;
        job.heartbeat_at = heartbeat_at.and_then(|ms| Utc.timestamp_millis_opt(ms).single());
        job.retries = retries as u32;
        Ok(job)
    }
}

#[async_trait]
impl MlTuningJobRepository for SqliteMlTuningJobRepository {
    async fn insert(&self, job: &MlTuningJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO mltuning_jobs
             (id, status, progress, heartbeat_at, retries, payload, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.status.to_string())
        .bind(job.progress as i64)
        .bind(job.heartbeat_at.map(|t| t.timestamp_millis()))
        .bind(job.retries as i64)
        .bind(serde_json::to_string(job)?)
        .bind(job.created_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert into mltuning_jobs")?;
        Ok(())
    }

    async fn update(&self, job: &MlTuningJob) -> Result<()> {
        sqlx::query(
            "UPDATE mltuning_jobs
             SET status = ?, progress = ?, heartbeat_at = ?, retries = ?, payload = ?
             WHERE id = ?",
        )
        .bind(job.status.to_string())
        .bind(job.progress as i64)
        .bind(job.heartbeat_at.map(|t| t.timestamp_millis()))
        .bind(job.retries as i64)
        .bind(serde_json::to_string(job)?)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update mltuning_jobs")?;
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<MlTuningJob>> {
        let row = sqlx::query("SELECT * FROM mltuning_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::from_row).transpose()
    }

    async fn status_of(&self, id: Uuid) -> Result<Option<RunStatus>> {
        let row = sqlx::query("SELECT status FROM mltuning_jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| {
            let status: String = r.try_get("status")?;
            RunStatus::from_str(&status).map_err(anyhow::Error::msg)
        })
        .transpose()
    }

    async fn heartbeat(&self, id: Uuid, progress: u64) -> Result<()> {
        sqlx::query("UPDATE mltuning_jobs SET progress = ?, heartbeat_at = ? WHERE id = ?")
            .bind(progress as i64)
            .bind(Utc::now().timestamp_millis())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to heartbeat mltuning_jobs")?;
        Ok(())
    }

    async fn find_stale(&self, stale_before: DateTime<Utc>) -> Result<Vec<MlTuningJob>> {
        let rows = sqlx::query(
            "SELECT * FROM mltuning_jobs WHERE status = 'RUNNING'
             AND (heartbeat_at IS NULL OR heartbeat_at < ?)",
        )
        .bind(stale_before.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::from_row).collect()
    }

    async fn insert_samples(&self, job_id: Uuid, samples: &[TuningSample]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for sample in samples {
            sqlx::query(
                "INSERT OR REPLACE INTO mltuning_samples (job_id, idx, sample_json)
                 VALUES (?, ?, ?)",
            )
            .bind(job_id.to_string())
            .bind(sample.index as i64)
            .bind(serde_json::to_string(sample)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await.context("Failed to insert samples")?;
        Ok(())
    }

    async fn samples_for(&self, job_id: Uuid) -> Result<Vec<TuningSample>> {
        let rows = sqlx::query(
            "SELECT sample_json FROM mltuning_samples WHERE job_id = ? ORDER BY idx",
        )
        .bind(job_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| {
                let json: String = r.try_get("sample_json")?;
                serde_json::from_str(&json).context("corrupt sample row")
            })
            .collect()
    }
}
