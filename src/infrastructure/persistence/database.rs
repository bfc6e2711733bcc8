use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Singleton database wrapper
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// In-memory database for tests.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;
        let db = Self { pool };
        db.init().await?;
        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        // 1. Signals. The partial unique index is the dedup invariant:
        //    at most one ACTIVE signal per (symbol, timeframe, direction).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS signals (
                id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                confidence REAL NOT NULL,
                status TEXT NOT NULL,
                market_type TEXT NOT NULL,
                config_version INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                closed_at INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_signals_active_unique
            ON signals (symbol, timeframe, direction) WHERE status = 'ACTIVE';
            CREATE INDEX IF NOT EXISTS idx_signals_status
            ON signals (status, market_type);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create signals table")?;

        // 2. Paper trades. One OPEN trade per (owner, signal).
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS paper_trades (
                id TEXT PRIMARY KEY,
                signal_id TEXT NOT NULL,
                owner TEXT,
                symbol TEXT NOT NULL,
                direction TEXT NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                notional TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                status TEXT NOT NULL,
                realized_pnl TEXT,
                exit_price TEXT,
                opened_at INTEGER NOT NULL,
                closed_at INTEGER
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_paper_trades_open_unique
            ON paper_trades (signal_id, IFNULL(owner, 'SYSTEM')) WHERE status = 'OPEN';
            CREATE INDEX IF NOT EXISTS idx_paper_trades_status
            ON paper_trades (status, symbol);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create paper_trades table")?;

        // 3. Strategy config history: append-only, versioned per market type,
        //    at most one ACTIVE row per market type.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS config_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                market_type TEXT NOT NULL,
                version INTEGER NOT NULL,
                config_json TEXT NOT NULL,
                fitness REAL,
                win_rate REAL,
                roi_pct REAL,
                sharpe REAL,
                status TEXT NOT NULL,
                applied_at INTEGER,
                created_at INTEGER NOT NULL,
                UNIQUE (market_type, version)
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_config_history_active_unique
            ON config_history (market_type) WHERE status = 'ACTIVE';
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create config_history table")?;

        // 4-7. Evaluation run tables share one shape: indexed lifecycle
        //      columns plus the full run record as JSON.
        for table in [
            "backtest_runs",
            "walkforward_runs",
            "montecarlo_runs",
            "mltuning_jobs",
        ] {
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id TEXT PRIMARY KEY,
                    status TEXT NOT NULL,
                    progress INTEGER NOT NULL DEFAULT 0,
                    heartbeat_at INTEGER,
                    retries INTEGER NOT NULL DEFAULT 0,
                    payload TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table}_status
                ON {table} (status, heartbeat_at);
                "#
            ))
            .execute(&mut *conn)
            .await
            .with_context(|| format!("Failed to create {table} table"))?;
        }

        // 8. Monte-Carlo per-simulation child rows
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS montecarlo_outcomes (
                run_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                outcome_json TEXT NOT NULL,
                PRIMARY KEY (run_id, idx)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create montecarlo_outcomes table")?;

        // 9. ML tuning per-sample child rows
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS mltuning_samples (
                job_id TEXT NOT NULL,
                idx INTEGER NOT NULL,
                sample_json TEXT NOT NULL,
                PRIMARY KEY (job_id, idx)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create mltuning_samples table")?;

        // 10. Continuous-learning audit trail
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS optimization_runs (
                id TEXT PRIMARY KEY,
                market_type TEXT NOT NULL,
                trigger_reason TEXT NOT NULL,
                status TEXT NOT NULL,
                improvement_found INTEGER NOT NULL DEFAULT 0,
                payload TEXT NOT NULL,
                started_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_optimization_runs_market
            ON optimization_runs (market_type, started_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create optimization_runs table")?;

        // 11. Per-bucket closed-trade counters
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_counters (
                market_type TEXT PRIMARY KEY,
                closed_trades INTEGER NOT NULL DEFAULT 0,
                threshold INTEGER NOT NULL,
                armed INTEGER NOT NULL DEFAULT 0,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create trade_counters table")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
