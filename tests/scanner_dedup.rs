//! End-to-end scanner behavior: dedup idempotence and timeframe upgrade.

mod support;

use signalforge::application::registry::ConfigRegistry;
use signalforge::application::scanner::{MarketScanner, SymbolUniverse};
use signalforge::domain::market::{MarketType, Timeframe};
use signalforge::domain::ports::NullPublisher;
use signalforge::domain::repositories::SignalRepository;
use signalforge::domain::rules::RuleEngine;
use signalforge::domain::signal::{Direction, SignalStatus};
use signalforge::domain::strategy::SignalConfig;
use signalforge::infrastructure::persistence::Database;
use signalforge::infrastructure::persistence::repositories::{
    SqliteConfigHistoryRepository, SqliteSignalRepository,
};
use std::collections::HashMap;
use std::sync::Arc;
use support::{ScriptedExchange, oversold_window};

fn permissive_config(timeframes: Vec<Timeframe>) -> SignalConfig {
    SignalConfig {
        long_rsi_min: 0.0,
        long_rsi_max: 45.0,
        long_adx_min: 0.0,
        long_volume_multiplier: 1.0,
        short_rsi_min: 55.0,
        short_rsi_max: 100.0,
        short_adx_min: 0.0,
        short_volume_multiplier: 1000.0, // shorts effectively off
        min_confidence: 0.0,
        timeframes,
        ..Default::default()
    }
}

async fn scanner_fixture(
    timeframes: Vec<Timeframe>,
) -> (Arc<MarketScanner>, Arc<SqliteSignalRepository>) {
    let db = Database::in_memory().await.unwrap();
    let signals = Arc::new(SqliteSignalRepository::new(db.pool.clone()));
    let history = Arc::new(SqliteConfigHistoryRepository::new(db.pool.clone()));

    let mut defaults = HashMap::new();
    defaults.insert(MarketType::CryptoSpot, permissive_config(timeframes.clone()));
    let registry = Arc::new(
        ConfigRegistry::bootstrap(history, defaults).await.unwrap(),
    );

    let mut exchange = ScriptedExchange::new().with_top_symbols(&["BTCUSDT"]);
    for timeframe in &timeframes {
        exchange = exchange.with_window(
            "BTCUSDT",
            *timeframe,
            oversold_window(*timeframe, 1_700_000_000_000),
        );
    }

    let scanner = Arc::new(MarketScanner::new(
        Arc::new(exchange),
        registry,
        signals.clone(),
        Arc::new(NullPublisher),
        None,
        RuleEngine::default(),
        SymbolUniverse {
            crypto_top_n: 10,
            forex: vec![],
            commodities: vec![],
        },
        None,
    ));
    (scanner, signals)
}

#[tokio::test]
async fn scanning_twice_creates_exactly_one_signal() {
    let (scanner, signals) = scanner_fixture(vec![Timeframe::FourHour]).await;

    let first = scanner.scan_timeframe(Timeframe::FourHour).await;
    assert_eq!(first.signals_created, 1, "first scan must emit the signal");
    assert_eq!(first.deduped, 0);

    let second = scanner.scan_timeframe(Timeframe::FourHour).await;
    assert_eq!(second.signals_created, 0);
    assert_eq!(second.deduped, 1, "second scan must dedup, not insert");

    let active = signals
        .find_active("BTCUSDT", Direction::Long)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].timeframe, Timeframe::FourHour);
    assert_eq!(active[0].status, SignalStatus::Active);
    // Long geometry holds
    assert!(active[0].stop_loss < active[0].entry);
    assert!(active[0].entry < active[0].take_profit);
}

#[tokio::test]
async fn higher_timeframe_upgrades_lower_one() {
    let (scanner, signals) =
        scanner_fixture(vec![Timeframe::FifteenMin, Timeframe::FourHour]).await;

    let low = scanner.scan_timeframe(Timeframe::FifteenMin).await;
    assert_eq!(low.signals_created, 1);

    let high = scanner.scan_timeframe(Timeframe::FourHour).await;
    assert_eq!(high.signals_created, 1);
    assert_eq!(high.upgraded, 1, "the 15m signal must be superseded");

    let active = signals
        .find_active("BTCUSDT", Direction::Long)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].timeframe, Timeframe::FourHour);

    // Re-scanning the lower timeframe now inserts again: the 4h signal
    // lives on a different dedup key
    let low_again = scanner.scan_timeframe(Timeframe::FifteenMin).await;
    assert_eq!(low_again.signals_created, 1);

    let active = signals
        .find_active("BTCUSDT", Direction::Long)
        .await
        .unwrap();
    assert_eq!(active.len(), 2);
}

#[tokio::test]
async fn lower_timeframe_never_displaces_higher() {
    let (scanner, signals) =
        scanner_fixture(vec![Timeframe::FifteenMin, Timeframe::FourHour]).await;

    scanner.scan_timeframe(Timeframe::FourHour).await;
    let low = scanner.scan_timeframe(Timeframe::FifteenMin).await;
    assert_eq!(low.signals_created, 1);
    assert_eq!(low.upgraded, 0);

    let active = signals
        .find_active("BTCUSDT", Direction::Long)
        .await
        .unwrap();
    // Both live: the 4h signal was not expired by the 15m insert
    assert_eq!(active.len(), 2);
    assert!(active.iter().any(|s| s.timeframe == Timeframe::FourHour));
}
