//! Prometheus metrics definitions.
//!
//! All metrics use the `signalforge_` prefix.

use prometheus::{
    CounterVec, Gauge, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Scans completed, by timeframe and outcome
    pub scans_total: CounterVec,
    /// Signals emitted, by market type and direction
    pub signals_total: CounterVec,
    /// Candidates suppressed by the dedup step, by timeframe
    pub dedup_total: CounterVec,
    /// Per-symbol scan failures, by reason
    pub scan_errors_total: CounterVec,
    /// Paper trades closed, by exit kind
    pub paper_trades_closed_total: CounterVec,
    /// Evaluation runs finished, by harness and status
    pub evaluation_runs_total: CounterVec,
    /// Learning cycles finished, by outcome
    pub learning_cycles_total: CounterVec,
    /// Current effective per-minute request budget
    pub rate_limit_minute_cap: GenericGauge<AtomicF64>,
    /// Open paper trades right now
    pub open_paper_trades: GenericGauge<AtomicF64>,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let scans_total = CounterVec::new(
            Opts::new("signalforge_scans_total", "Scans completed"),
            &["timeframe", "outcome"],
        )?;
        registry.register(Box::new(scans_total.clone()))?;

        let signals_total = CounterVec::new(
            Opts::new("signalforge_signals_total", "Signals emitted"),
            &["market_type", "direction"],
        )?;
        registry.register(Box::new(signals_total.clone()))?;

        let dedup_total = CounterVec::new(
            Opts::new(
                "signalforge_dedup_total",
                "Candidates suppressed as duplicates",
            ),
            &["timeframe"],
        )?;
        registry.register(Box::new(dedup_total.clone()))?;

        let scan_errors_total = CounterVec::new(
            Opts::new("signalforge_scan_errors_total", "Per-symbol scan failures"),
            &["reason"],
        )?;
        registry.register(Box::new(scan_errors_total.clone()))?;

        let paper_trades_closed_total = CounterVec::new(
            Opts::new(
                "signalforge_paper_trades_closed_total",
                "Paper trades closed",
            ),
            &["exit"],
        )?;
        registry.register(Box::new(paper_trades_closed_total.clone()))?;

        let evaluation_runs_total = CounterVec::new(
            Opts::new(
                "signalforge_evaluation_runs_total",
                "Evaluation harness runs finished",
            ),
            &["harness", "status"],
        )?;
        registry.register(Box::new(evaluation_runs_total.clone()))?;

        let learning_cycles_total = CounterVec::new(
            Opts::new(
                "signalforge_learning_cycles_total",
                "Continuous-learning cycles finished",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(learning_cycles_total.clone()))?;

        let rate_limit_minute_cap = Gauge::with_opts(Opts::new(
            "signalforge_rate_limit_minute_cap",
            "Effective per-minute request budget",
        ))?;
        registry.register(Box::new(rate_limit_minute_cap.clone()))?;

        let open_paper_trades = Gauge::with_opts(Opts::new(
            "signalforge_open_paper_trades",
            "Open paper trades",
        ))?;
        registry.register(Box::new(open_paper_trades.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            scans_total,
            signals_total,
            dedup_total,
            scan_errors_total,
            paper_trades_closed_total,
            evaluation_runs_total,
            learning_cycles_total,
            rate_limit_minute_cap,
            open_paper_trades,
        })
    }

    /// Render the registry in the text exposition format.
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        encoder
            .encode_to_string(&self.registry.gather())
            .unwrap_or_default()
    }
}
