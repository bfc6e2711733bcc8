//! Manual optimization trigger
//!
//! Forces one continuous-learning cycle for a market type (the admin
//! invocation path) and prints the audit record. The ACTIVE config only
//! changes if the best candidate clears the promotion threshold.

use anyhow::{Context, Result};
use clap::Parser;
use signalforge::application::backtest::BacktestEngine;
use signalforge::application::learning::LearningLoop;
use signalforge::application::registry::ConfigRegistry;
use signalforge::config::{Config, MarketsFile};
use signalforge::domain::market::{MarketType, Timeframe};
use signalforge::domain::optimization::TriggerReason;
use signalforge::domain::rules::RuleEngine;
use signalforge::infrastructure::binance::BinanceClient;
use signalforge::infrastructure::persistence::Database;
use signalforge::infrastructure::persistence::repositories::{
    SqliteConfigHistoryRepository, SqliteOptimizationRunRepository,
    SqlitePaperTradeRepository, SqliteTradeCounterRepository,
};
use signalforge::infrastructure::rate_limit::TokenBudget;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(author, version, about = "Force a continuous-learning cycle", long_about = None)]
struct Cli {
    /// Market type to optimize (CRYPTO_SPOT, CRYPTO_FUT, FOREX, COMMODITY)
    #[arg(short, long, default_value = "CRYPTO_SPOT")]
    market_type: String,

    /// Comma-separated evaluation symbols
    #[arg(short, long, default_value = "BTCUSDT,ETHUSDT,SOLUSDT")]
    symbols: String,

    /// Evaluation timeframe
    #[arg(short, long, default_value = "4h")]
    timeframe: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();

    let market_type = MarketType::from_str(&cli.market_type).map_err(anyhow::Error::msg)?;
    let timeframe = Timeframe::from_str(&cli.timeframe).map_err(anyhow::Error::from)?;
    let symbols: Vec<String> = cli
        .symbols
        .split(',')
        .map(|s| s.trim().to_uppercase())
        .filter(|s| !s.is_empty())
        .collect();

    let config = Config::from_env()?;
    let markets = MarketsFile::load(&config.markets_file)
        .with_context(|| format!("failed to load {}", config.markets_file))?;

    let database = Database::new(&config.database_url).await?;
    let history = Arc::new(SqliteConfigHistoryRepository::new(database.pool.clone()));
    let runs = Arc::new(SqliteOptimizationRunRepository::new(database.pool.clone()));
    let counters = Arc::new(SqliteTradeCounterRepository::new(database.pool.clone()));
    let trades = Arc::new(SqlitePaperTradeRepository::new(database.pool.clone()));

    let registry = Arc::new(ConfigRegistry::bootstrap(history, markets.defaults()).await?);

    let budget = Arc::new(TokenBudget::default());
    let exchange = Arc::new(BinanceClient::new(config.binance_base_url.clone(), budget));

    let mut evaluation_symbols = HashMap::new();
    evaluation_symbols.insert(market_type, symbols);

    let learning = LearningLoop::new(
        registry,
        runs,
        counters,
        trades,
        exchange,
        BacktestEngine::new(RuleEngine::new(markets.confidence.unwrap_or_default())),
        evaluation_symbols,
        timeframe,
        None,
    );

    info!(%market_type, "running manual optimization cycle");
    let run = learning.run_cycle(market_type, TriggerReason::Manual).await?;

    println!("{}", serde_json::to_string_pretty(&run)?);
    if run.improvement_found {
        println!(
            "\nImprovement of {:.2}% found; new config promoted.",
            run.improvement_pct.unwrap_or_default()
        );
    } else {
        println!("\nNo qualifying improvement; baseline remains active.");
    }

    Ok(())
}
