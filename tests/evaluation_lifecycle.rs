//! Queue-to-completion lifecycle for evaluation runs, plus watchdog
//! reconciliation of abandoned rows.

mod support;

use chrono::Utc;
use rust_decimal_macros::dec;
use signalforge::application::watchdog::Watchdog;
use signalforge::application::worker::EvaluationWorker;
use signalforge::domain::evaluation::{BacktestRun, BacktestSpec, RunStatus};
use signalforge::domain::market::Timeframe;
use signalforge::domain::repositories::BacktestRunRepository;
use signalforge::domain::strategy::SignalConfig;
use signalforge::infrastructure::persistence::Database;
use signalforge::infrastructure::persistence::repositories::{
    SqliteBacktestRunRepository, SqliteMlTuningJobRepository, SqliteMonteCarloRunRepository,
    SqliteWalkForwardRunRepository,
};
use std::sync::Arc;
use std::time::Duration;
use support::{ScriptedExchange, candles_from_closes};

fn permissive() -> SignalConfig {
    SignalConfig {
        long_rsi_min: 0.0,
        long_rsi_max: 45.0,
        long_adx_min: 0.0,
        long_volume_multiplier: 0.1,
        short_rsi_min: 101.0,
        short_rsi_max: 102.0,
        min_confidence: 0.0,
        ..Default::default()
    }
}

struct Fixture {
    worker: Arc<EvaluationWorker>,
    backtests: Arc<SqliteBacktestRunRepository>,
    start_ms: i64,
    end_ms: i64,
}

async fn fixture() -> Fixture {
    let db = Database::in_memory().await.unwrap();
    let backtests = Arc::new(SqliteBacktestRunRepository::new(db.pool.clone()));
    let walkforwards = Arc::new(SqliteWalkForwardRunRepository::new(db.pool.clone()));
    let montecarlos = Arc::new(SqliteMonteCarloRunRepository::new(db.pool.clone()));
    let mltunings = Arc::new(SqliteMlTuningJobRepository::new(db.pool.clone()));

    let start_ms = 1_704_067_200_000i64;
    let closes: Vec<f64> = (0..400)
        .map(|i| 100.0 + (i as f64 * 0.2).sin() * 7.0 + i as f64 * 0.02)
        .collect();
    let exchange = Arc::new(ScriptedExchange::new().with_window(
        "BTCUSDT",
        Timeframe::FourHour,
        candles_from_closes(Timeframe::FourHour, start_ms, &closes),
    ));
    let end_ms = start_ms + 400 * Timeframe::FourHour.to_millis();

    let worker = EvaluationWorker::new(
        backtests.clone(),
        walkforwards,
        montecarlos,
        mltunings,
        exchange,
        None,
    );

    Fixture {
        worker,
        backtests,
        start_ms,
        end_ms,
    }
}

#[tokio::test]
async fn submitted_backtest_reaches_completed_with_report() {
    let f = fixture().await;
    let _handles = f.worker.start_pool(1);

    let id = f
        .worker
        .submit_backtest(BacktestSpec {
            symbols: vec!["BTCUSDT".to_string()],
            timeframe: Timeframe::FourHour,
            start_ms: f.start_ms,
            end_ms: f.end_ms,
            config: permissive(),
            initial_capital: dec!(10000),
            position_size: dec!(100),
            max_concurrent_positions: 3,
        })
        .await
        .unwrap();

    // Poll until the worker finishes
    let mut status = RunStatus::Queued;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        status = f.backtests.status_of(id).await.unwrap().unwrap();
        if status.is_terminal() {
            break;
        }
    }
    assert_eq!(status, RunStatus::Completed);

    let run = f.backtests.find_by_id(id).await.unwrap().unwrap();
    let report = run.report.expect("completed run carries its report");
    assert!(!report.equity_curve.is_empty());
    assert!(run.finished_at.is_some());
}

#[tokio::test]
async fn invalid_spec_is_refused_at_submission() {
    let f = fixture().await;
    let mut config = permissive();
    config.min_confidence = 9.0;

    let result = f
        .worker
        .submit_backtest(BacktestSpec {
            symbols: vec!["BTCUSDT".to_string()],
            timeframe: Timeframe::FourHour,
            start_ms: f.start_ms,
            end_ms: f.end_ms,
            config,
            initial_capital: dec!(10000),
            position_size: dec!(100),
            max_concurrent_positions: 3,
        })
        .await;
    assert!(result.is_err(), "invalid config must be refused before any work");
}

#[tokio::test]
async fn watchdog_requeues_then_fails_permanently() {
    let f = fixture().await;

    // A RUNNING row nobody is heartbeating, as if its worker crashed
    let mut run = BacktestRun::queued(BacktestSpec {
        symbols: vec!["BTCUSDT".to_string()],
        timeframe: Timeframe::FourHour,
        start_ms: f.start_ms,
        end_ms: f.end_ms,
        config: permissive(),
        initial_capital: dec!(10000),
        position_size: dec!(100),
        max_concurrent_positions: 3,
    });
    run.status = RunStatus::Running;
    run.retries = 0;
    f.backtests.insert(&run).await.unwrap();

    let watchdog = Arc::new(Watchdog::new(
        f.backtests.clone(),
        Arc::new(SqliteWalkForwardRunRepository::new(
            Database::in_memory().await.unwrap().pool,
        )),
        Arc::new(SqliteMonteCarloRunRepository::new(
            Database::in_memory().await.unwrap().pool,
        )),
        Arc::new(SqliteMlTuningJobRepository::new(
            Database::in_memory().await.unwrap().pool,
        )),
        f.worker.queue(),
    ));

    // First sweep requeues
    let touched = watchdog.sweep().await.unwrap();
    assert_eq!(touched, 1);
    let row = f.backtests.find_by_id(run.id).await.unwrap().unwrap();
    assert_eq!(row.status, RunStatus::Queued);
    assert_eq!(row.retries, 1);

    // Exhaust the retry budget: sweeps only see RUNNING rows, so flip it
    // back as a crashed worker would
    for expected_retry in 2..=3 {
        let mut stale = f.backtests.find_by_id(run.id).await.unwrap().unwrap();
        stale.status = RunStatus::Running;
        stale.heartbeat_at = Some(Utc::now() - chrono::Duration::minutes(10));
        f.backtests.update(&stale).await.unwrap();

        watchdog.sweep().await.unwrap();
        let row = f.backtests.find_by_id(run.id).await.unwrap().unwrap();
        if expected_retry <= 2 {
            assert_eq!(row.status, RunStatus::Queued);
        } else {
            assert_eq!(row.status, RunStatus::Failed);
            assert!(row.error.is_some());
        }
        assert_eq!(row.retries, expected_retry);
    }
}
