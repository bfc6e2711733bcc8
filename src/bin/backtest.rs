//! Backtest CLI
//!
//! Runs a deterministic backtest over an OHLCV CSV file and prints the
//! metric report. The CSV format matches the live candle contract:
//! `open_time,open,high,low,close,volume,close_time` in UTC millis.

use anyhow::{Context, Result};
use clap::Parser;
use rust_decimal::Decimal;
use signalforge::application::backtest::BacktestEngine;
use signalforge::config::MarketsFile;
use signalforge::domain::evaluation::BacktestSpec;
use signalforge::domain::market::{CandleSeries, MarketType, Timeframe};
use signalforge::domain::ports::ExchangeClient;
use signalforge::domain::rules::RuleEngine;
use signalforge::domain::strategy::SignalConfig;
use signalforge::infrastructure::csv_source::CsvCandleSource;
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Parser)]
#[command(author, version, about = "CSV-driven deterministic backtest", long_about = None)]
struct Cli {
    /// OHLCV CSV file
    #[arg(long)]
    csv: String,

    /// Symbol the CSV belongs to
    #[arg(short, long, default_value = "BTCUSDT")]
    symbol: String,

    /// Timeframe of the bars (15m, 1h, 4h, 1d)
    #[arg(short, long, default_value = "4h")]
    timeframe: String,

    /// markets.toml with per-market strategy defaults
    #[arg(long, default_value = "config/markets.toml")]
    markets: String,

    /// Initial capital
    #[arg(long, default_value = "10000")]
    capital: Decimal,

    /// Fixed position size per trade
    #[arg(long, default_value = "100")]
    position_size: Decimal,

    /// Maximum concurrent positions
    #[arg(long, default_value = "3")]
    max_positions: usize,

    /// Print every closed trade
    #[arg(long)]
    trades: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_target(false).init();
    let cli = Cli::parse();

    let timeframe = Timeframe::from_str(&cli.timeframe).map_err(anyhow::Error::from)?;

    let mut source = CsvCandleSource::new();
    let bars = source
        .load_file(&cli.symbol, timeframe, &cli.csv)
        .with_context(|| format!("failed to load {}", cli.csv))?;
    println!("Loaded {bars} bars from {}", cli.csv);

    let config = match MarketsFile::load(&cli.markets) {
        Ok(markets) => {
            let market_type = MarketType::classify(&cli.symbol);
            markets
                .defaults()
                .remove(&market_type)
                .unwrap_or_default()
        }
        Err(e) => {
            eprintln!("warning: {e:#}; using built-in defaults");
            SignalConfig::default()
        }
    };

    let candles = source
        .latest_candles(&cli.symbol, timeframe, usize::MAX)
        .await?;
    let series = CandleSeries::new(&cli.symbol, timeframe, candles)?;
    let (start_ms, end_ms) = (
        series.candles().first().map(|c| c.open_time).unwrap_or(0),
        series.last().close_time + 1,
    );

    let spec = BacktestSpec {
        symbols: vec![cli.symbol.clone()],
        timeframe,
        start_ms,
        end_ms,
        config,
        initial_capital: cli.capital,
        position_size: cli.position_size,
        max_concurrent_positions: cli.max_positions,
    };

    let mut data = HashMap::new();
    data.insert(cli.symbol.clone(), series);

    let engine = BacktestEngine::new(RuleEngine::default());
    let report = engine.run(&spec, &data, &mut |_| true)?;

    let m = &report.metrics;
    println!("\n=== Backtest: {} {} ===", cli.symbol, timeframe);
    println!("Trades:          {}", m.total_trades);
    println!("Wins / Losses:   {} / {}", m.wins, m.losses);
    println!("Win rate:        {:.1}%", m.win_rate * 100.0);
    println!("Net P&L:         {}", m.net_pnl);
    println!("ROI:             {:.2}%", m.roi_pct);
    println!("Profit factor:   {:.2}", m.profit_factor);
    println!("Max drawdown:    {:.2}% ({})", m.max_drawdown_pct, m.max_drawdown_abs);
    println!("Sharpe:          {:.2}", m.sharpe);
    println!(
        "Avg duration:    {:.1}h",
        m.avg_trade_duration_ms as f64 / 3_600_000.0
    );

    if cli.trades {
        println!("\n--- Trades ---");
        for trade in &report.trades {
            println!(
                "{} {} entry {} exit {} ({}) pnl {}",
                trade.symbol,
                trade.direction,
                trade.entry_price,
                trade.exit_price,
                trade.exit_reason,
                trade.pnl
            );
        }
    }

    Ok(())
}
