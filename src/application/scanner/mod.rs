//! Market scanner: enumerates the symbol universe for one timeframe,
//! evaluates the rule engine on the freshest candle window, and persists
//! candidates through the dedup-and-upgrade step.

pub mod scheduler;

use crate::application::paper_trading::PaperTrader;
use crate::application::registry::ConfigRegistry;
use crate::domain::errors::{DataError, StoreError};
use crate::domain::market::{CandleSeries, MarketType, Timeframe};
use crate::domain::ports::{ExchangeClient, SignalEvent, SignalPublisher};
use crate::domain::repositories::SignalRepository;
use crate::domain::rules::{RuleEngine, SignalCandidate};
use crate::domain::signal::Signal;
use crate::infrastructure::batch::batch_latest_candles;
use crate::infrastructure::observability::Metrics;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Bars fetched per symbol per scan: enough for indicator warm-up (50)
/// plus headroom for the volume average and gap tolerance.
pub const SCAN_WINDOW_BARS: usize = 120;

/// Consecutive malformed-data scans before a symbol is disabled.
pub const DISABLE_AFTER_FAILURES: u32 = 3;

/// Fixed universes for markets without a volume-discovery endpoint.
#[derive(Debug, Clone)]
pub struct SymbolUniverse {
    pub crypto_top_n: usize,
    pub forex: Vec<String>,
    pub commodities: Vec<String>,
}

impl Default for SymbolUniverse {
    fn default() -> Self {
        Self {
            crypto_top_n: 50,
            forex: vec![
                "EURUSD".to_string(),
                "GBPUSD".to_string(),
                "USDJPY".to_string(),
                "AUDUSD".to_string(),
                "USDCAD".to_string(),
            ],
            commodities: vec!["XAUUSD".to_string(), "XAGUSD".to_string(), "WTIUSD".to_string()],
        }
    }
}

/// Outcome of one timeframe scan, for logs, metrics, and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub timeframe: Option<Timeframe>,
    pub symbols_scanned: usize,
    pub signals_created: usize,
    pub deduped: usize,
    pub upgraded: usize,
    pub failures: usize,
}

pub struct MarketScanner {
    exchange: Arc<dyn ExchangeClient>,
    registry: Arc<ConfigRegistry>,
    signals: Arc<dyn SignalRepository>,
    publisher: Arc<dyn SignalPublisher>,
    paper_trader: Option<Arc<PaperTrader>>,
    rule_engine: RuleEngine,
    universe: SymbolUniverse,
    metrics: Option<Metrics>,
    /// symbol -> consecutive malformed-candle scans
    failure_counts: Mutex<HashMap<String, u32>>,
    disabled: Mutex<HashSet<String>>,
}

impl MarketScanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        registry: Arc<ConfigRegistry>,
        signals: Arc<dyn SignalRepository>,
        publisher: Arc<dyn SignalPublisher>,
        paper_trader: Option<Arc<PaperTrader>>,
        rule_engine: RuleEngine,
        universe: SymbolUniverse,
        metrics: Option<Metrics>,
    ) -> Self {
        Self {
            exchange,
            registry,
            signals,
            publisher,
            paper_trader,
            rule_engine,
            universe,
            metrics,
            failure_counts: Mutex::new(HashMap::new()),
            disabled: Mutex::new(HashSet::new()),
        }
    }

    /// One full scan of `timeframe`. Per-symbol failures are logged and
    /// skipped; the scan completes as long as any symbol succeeded.
    /// Re-running on the same candles is idempotent: duplicates land in
    /// the dedup counter, not in the store.
    pub async fn scan_timeframe(&self, timeframe: Timeframe) -> ScanReport {
        let mut report = ScanReport {
            timeframe: Some(timeframe),
            ..Default::default()
        };

        let universe = self.enumerate_universe(timeframe).await;
        if universe.is_empty() {
            warn!(%timeframe, "scan universe is empty");
            return report;
        }

        let windows = batch_latest_candles(
            self.exchange.clone(),
            &universe,
            timeframe,
            SCAN_WINDOW_BARS,
        )
        .await;

        for symbol in &universe {
            match windows.get(symbol) {
                Some(Ok(candles)) => {
                    match self.scan_symbol(symbol, timeframe, candles.clone(), &mut report).await {
                        Ok(()) => {
                            self.failure_counts.lock().await.remove(symbol);
                        }
                        Err(e) => {
                            report.failures += 1;
                            self.record_failure(symbol, &e).await;
                        }
                    }
                }
                Some(Err(e)) => {
                    report.failures += 1;
                    warn!(symbol, %timeframe, error = %e, "candle fetch failed, symbol skipped");
                    if let Some(m) = &self.metrics {
                        m.scan_errors_total.with_label_values(&["fetch"]).inc();
                    }
                }
                None => {
                    report.failures += 1;
                }
            }
            report.symbols_scanned += 1;
        }

        info!(
            %timeframe,
            scanned = report.symbols_scanned,
            created = report.signals_created,
            deduped = report.deduped,
            upgraded = report.upgraded,
            failures = report.failures,
            "scan complete"
        );
        if let Some(m) = &self.metrics {
            m.scans_total
                .with_label_values(&[timeframe.to_binance_string(), "completed"])
                .inc();
        }

        report
    }

    async fn enumerate_universe(&self, timeframe: Timeframe) -> Vec<String> {
        let mut symbols = Vec::new();

        match self.exchange.top_symbols_by_volume(self.universe.crypto_top_n).await {
            Ok(top) => symbols.extend(top),
            Err(e) => error!(error = %e, "failed to enumerate crypto universe"),
        }
        symbols.extend(self.universe.forex.iter().cloned());
        symbols.extend(self.universe.commodities.iter().cloned());

        let disabled = self.disabled.lock().await;
        let mut filtered = Vec::with_capacity(symbols.len());
        for symbol in symbols {
            if disabled.contains(&symbol) {
                continue;
            }
            // Only scan symbols whose active config includes this timeframe
            if let Some((config, _)) = self.registry.get_config(&symbol).await
                && config.timeframes.contains(&timeframe)
            {
                filtered.push(symbol);
            }
        }
        filtered
    }

    async fn scan_symbol(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candles: Vec<crate::domain::market::Candle>,
        report: &mut ScanReport,
    ) -> Result<(), DataError> {
        let series = CandleSeries::new(symbol, timeframe, candles)?;
        if series.len() < crate::domain::indicators::WARMUP_BARS {
            return Err(DataError::InsufficientHistory {
                symbol: symbol.to_string(),
                need: crate::domain::indicators::WARMUP_BARS,
                got: series.len(),
            });
        }

        let Some((config, config_version)) = self.registry.get_config(symbol).await else {
            return Ok(());
        };

        let snapshots = crate::domain::indicators::compute_snapshots(&series);
        let index = series.len() - 1;
        let Some(candidate) = self
            .rule_engine
            .evaluate(&series, index, &snapshots[index], &config)
        else {
            return Ok(());
        };

        self.dedup_and_insert(symbol, timeframe, candidate, config_version, report)
            .await;
        Ok(())
    }

    /// Dedup-and-upgrade: same (symbol, timeframe, direction) ACTIVE is a
    /// no-op; an ACTIVE on a lower-priority timeframe is expired in favor
    /// of the new candidate; otherwise plain insert.
    async fn dedup_and_insert(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        candidate: SignalCandidate,
        config_version: i64,
        report: &mut ScanReport,
    ) {
        let existing = match self.signals.find_active(symbol, candidate.direction).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(symbol, error = %e, "active-signal lookup failed");
                report.failures += 1;
                return;
            }
        };

        if existing.iter().any(|s| s.timeframe == timeframe) {
            report.deduped += 1;
            if let Some(m) = &self.metrics {
                m.dedup_total
                    .with_label_values(&[timeframe.to_binance_string()])
                    .inc();
            }
            return;
        }

        let mut upgraded = false;
        for stale in existing
            .iter()
            .filter(|s| s.timeframe.priority() < timeframe.priority())
        {
            match self
                .signals
                .update_status(stale.id, crate::domain::signal::SignalStatus::Expired)
                .await
            {
                Ok(()) => {
                    upgraded = true;
                    let mut expired = stale.clone();
                    expired.status = crate::domain::signal::SignalStatus::Expired;
                    self.publisher
                        .publish(SignalEvent::SignalUpdated { signal: expired });
                }
                Err(e) => {
                    warn!(symbol, error = %e, "failed to expire lower-timeframe signal")
                }
            }
        }

        let market_type = MarketType::classify(symbol);
        let signal = match Signal::new(
            symbol,
            timeframe,
            candidate.direction,
            candidate.entry,
            candidate.stop_loss,
            candidate.take_profit,
            candidate.confidence,
            market_type,
            config_version,
        ) {
            Ok(s) => s,
            Err(e) => {
                error!(symbol, error = %e, "rule engine produced invalid geometry");
                report.failures += 1;
                return;
            }
        };

        match self.signals.insert(&signal).await {
            Ok(()) => {
                report.signals_created += 1;
                if upgraded {
                    report.upgraded += 1;
                }
                if let Some(m) = &self.metrics {
                    m.signals_total
                        .with_label_values(&[
                            &market_type.to_string(),
                            &signal.direction.to_string(),
                        ])
                        .inc();
                }

                // After-commit dispatch: fan-out first, then auto paper trade
                self.publisher.publish(SignalEvent::SignalCreated {
                    signal: signal.clone(),
                });
                if let Some(trader) = &self.paper_trader {
                    trader.on_signal_created(&signal).await;
                }
            }
            Err(e) if e.downcast_ref::<StoreError>().is_some() => {
                // Raced with a concurrent scan; the unique index held
                report.deduped += 1;
            }
            Err(e) => {
                error!(symbol, error = %e, "signal insert failed");
                report.failures += 1;
            }
        }
    }

    async fn record_failure(&self, symbol: &str, error: &DataError) {
        warn!(symbol, error = %error, "symbol skipped for this scan");
        if let Some(m) = &self.metrics {
            m.scan_errors_total.with_label_values(&["data"]).inc();
        }

        let mut counts = self.failure_counts.lock().await;
        let count = counts.entry(symbol.to_string()).or_insert(0);
        *count += 1;
        if *count >= DISABLE_AFTER_FAILURES {
            counts.remove(symbol);
            drop(counts);
            self.disabled.lock().await.insert(symbol.to_string());
            error!(
                symbol,
                "symbol disabled after {DISABLE_AFTER_FAILURES} consecutive bad-data scans; maintenance required"
            );
        }
    }

    /// Re-enable a symbol after operator intervention.
    pub async fn enable_symbol(&self, symbol: &str) {
        self.disabled.lock().await.remove(symbol);
    }

    pub async fn disabled_symbols(&self) -> Vec<String> {
        self.disabled.lock().await.iter().cloned().collect()
    }
}
