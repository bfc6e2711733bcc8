//! Signalforge worker - headless signal platform
//!
//! Runs the full pipeline in one process: the multi-timeframe scan
//! scheduler, the paper-trade monitor, the evaluation worker pool with its
//! watchdog, the continuous-learning loop, the WebSocket fan-out, and
//! periodic health/metrics reporting. Metrics are pushed via structured
//! JSON logs to stdout - no HTTP server, no incoming connections beyond
//! the event socket.

use anyhow::{Context, Result};
use signalforge::application::health::HealthService;
use signalforge::application::learning::LearningLoop;
use signalforge::application::paper_trading::PaperTrader;
use signalforge::application::registry::ConfigRegistry;
use signalforge::application::router::ExchangeRouter;
use signalforge::application::scanner::scheduler::ScanScheduler;
use signalforge::application::scanner::{MarketScanner, SymbolUniverse};
use signalforge::application::watchdog::Watchdog;
use signalforge::application::worker::EvaluationWorker;
use signalforge::application::backtest::BacktestEngine;
use signalforge::config::{Config, MarketsFile};
use signalforge::domain::market::{MarketType, Timeframe};
use signalforge::domain::ports::{ExchangeClient, SignalPublisher};
use signalforge::domain::rules::RuleEngine;
use signalforge::infrastructure::binance::BinanceClient;
use signalforge::infrastructure::observability::{Metrics, MetricsReporter};
use signalforge::infrastructure::persistence::Database;
use signalforge::infrastructure::persistence::repositories::{
    SqliteBacktestRunRepository, SqliteConfigHistoryRepository, SqliteMlTuningJobRepository,
    SqliteMonteCarloRunRepository, SqliteOptimizationRunRepository, SqlitePaperTradeRepository,
    SqliteSignalRepository, SqliteTradeCounterRepository, SqliteWalkForwardRunRepository,
};
use signalforge::infrastructure::rate_limit::TokenBudget;
use signalforge::infrastructure::spot::SpotFeedClient;
use signalforge::infrastructure::websocket::WebSocketServer;
use signalforge::infrastructure::SignalEventBus;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(stdout_layer)
        .init();

    info!("Signalforge {} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    let markets = MarketsFile::load(&config.markets_file)
        .with_context(|| format!("failed to load {}", config.markets_file))?;
    info!(
        markets = markets.markets.len(),
        timeframes = ?config.scan_timeframes,
        "configuration loaded"
    );

    // Storage
    let database = Database::new(&config.database_url).await?;
    let signals = Arc::new(SqliteSignalRepository::new(database.pool.clone()));
    let trades = Arc::new(SqlitePaperTradeRepository::new(database.pool.clone()));
    let history = Arc::new(SqliteConfigHistoryRepository::new(database.pool.clone()));
    let backtests = Arc::new(SqliteBacktestRunRepository::new(database.pool.clone()));
    let walkforwards = Arc::new(SqliteWalkForwardRunRepository::new(database.pool.clone()));
    let montecarlos = Arc::new(SqliteMonteCarloRunRepository::new(database.pool.clone()));
    let mltunings = Arc::new(SqliteMlTuningJobRepository::new(database.pool.clone()));
    let optimization_runs = Arc::new(SqliteOptimizationRunRepository::new(database.pool.clone()));
    let counters = Arc::new(SqliteTradeCounterRepository::new(database.pool.clone()));

    // Exchange clients behind one shared token budget
    let budget = Arc::new(TokenBudget::default());
    let binance = Arc::new(BinanceClient::new(
        config.binance_base_url.clone(),
        budget.clone(),
    ));
    let spot = Arc::new(SpotFeedClient::new(
        config.spot_feed_base_url.clone(),
        config.spot_feed_api_key.clone(),
        budget.clone(),
    ));
    let exchange: Arc<dyn ExchangeClient> = Arc::new(ExchangeRouter::new(binance, spot));

    // Fan-out
    let bus = SignalEventBus::new();
    let publisher: Arc<dyn SignalPublisher> = Arc::new(bus.clone());
    let ws_server = WebSocketServer::new(bus.clone(), config.websocket_bind.clone());
    tokio::spawn(async move {
        if let Err(e) = ws_server.run().await {
            tracing::error!(error = %e, "WebSocket fan-out stopped");
        }
    });

    // Strategy config registry
    let registry = Arc::new(
        ConfigRegistry::bootstrap(history.clone(), markets.defaults())
            .await
            .context("config registry bootstrap failed")?,
    );

    let metrics = Metrics::new()?;

    // Paper trading
    let paper_trader = Arc::new(PaperTrader::new(
        trades.clone(),
        signals.clone(),
        exchange.clone(),
        publisher.clone(),
        counters.clone(),
        config.auto_trade.clone(),
        config.paper_account_balance,
        Some(metrics.clone()),
    ));
    tokio::spawn(paper_trader.clone().run_monitor());

    // Scanner
    let confidence = markets.confidence.clone().unwrap_or_default();
    let scanner = Arc::new(MarketScanner::new(
        exchange.clone(),
        registry.clone(),
        signals.clone(),
        publisher.clone(),
        Some(paper_trader.clone()),
        RuleEngine::new(confidence.clone()),
        SymbolUniverse {
            crypto_top_n: config.crypto_top_n,
            ..Default::default()
        },
        Some(metrics.clone()),
    ));
    let scheduler = ScanScheduler::new(scanner, config.scan_timeframes.clone());
    let _scan_handles = scheduler.start();

    // Evaluation workers + watchdog
    let worker = EvaluationWorker::new(
        backtests.clone(),
        walkforwards.clone(),
        montecarlos.clone(),
        mltunings.clone(),
        exchange.clone(),
        Some(metrics.clone()),
    );
    let _worker_handles = worker.start_pool(config.worker_count);
    let watchdog = Arc::new(Watchdog::new(
        backtests.clone(),
        walkforwards.clone(),
        montecarlos.clone(),
        mltunings.clone(),
        worker.queue(),
    ));
    tokio::spawn(watchdog.run_forever());

    // Continuous learning
    let mut evaluation_symbols = HashMap::new();
    evaluation_symbols.insert(
        MarketType::CryptoSpot,
        vec![
            "BTCUSDT".to_string(),
            "ETHUSDT".to_string(),
            "SOLUSDT".to_string(),
        ],
    );
    evaluation_symbols.insert(
        MarketType::Forex,
        vec!["EURUSD".to_string(), "GBPUSD".to_string()],
    );
    evaluation_symbols.insert(MarketType::Commodity, vec!["XAUUSD".to_string()]);

    let learning = Arc::new(LearningLoop::new(
        registry.clone(),
        optimization_runs.clone(),
        counters.clone(),
        trades.clone(),
        exchange.clone(),
        BacktestEngine::new(RuleEngine::new(confidence)),
        evaluation_symbols,
        Timeframe::FourHour,
        Some(metrics.clone()),
    ));
    tokio::spawn(learning.run_forever());

    // Health + metrics reporting
    let health = Arc::new(HealthService::new(
        database.clone(),
        exchange.clone(),
        worker.queue(),
    ));
    tokio::spawn(health.run_forever(Duration::from_secs(60)));

    if config.observability_enabled {
        let reporter = MetricsReporter::new(
            metrics.clone(),
            budget.clone(),
            config.observability_interval_secs,
        );
        tokio::spawn(reporter.run());
        info!(
            interval = config.observability_interval_secs,
            "metrics reporter started"
        );
    }

    info!("Signalforge running. Press Ctrl+C to shutdown.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting...");

    Ok(())
}
