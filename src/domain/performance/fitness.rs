use crate::domain::performance::metrics::BacktestMetrics;

/// Composite fitness used to rank candidate configurations during
/// continuous learning. Higher is better. Each component is capped so a
/// single outlier metric cannot dominate the score:
///
/// `0.30·win_rate + 0.25·min(pf,5)·20 + 0.20·min(sharpe,3)·33.3
///  + 0.15·min(roi,100) − 0.10·max_drawdown`
///
/// Win rate enters as a percentage; drawdown as a positive percentage.
pub fn fitness(metrics: &BacktestMetrics) -> f64 {
    let win_rate_pct = metrics.win_rate * 100.0;
    let profit_factor = if metrics.profit_factor.is_finite() {
        metrics.profit_factor
    } else {
        5.0
    };
    let sharpe = if metrics.sharpe.is_finite() {
        metrics.sharpe
    } else {
        0.0
    };

    0.30 * win_rate_pct
        + 0.25 * profit_factor.min(5.0) * 20.0
        + 0.20 * sharpe.clamp(0.0, 3.0) * 33.3
        + 0.15 * metrics.roi_pct.min(100.0)
        - 0.10 * metrics.max_drawdown_pct
}

/// Relative improvement of `candidate` over `baseline`, as a fraction.
/// Returns 0.0 when the baseline fitness is non-positive and the candidate
/// is not better, so a degenerate baseline never produces a spurious
/// promotion.
pub fn improvement(baseline: f64, candidate: f64) -> f64 {
    if baseline.abs() < f64::EPSILON {
        return if candidate > 0.0 { f64::INFINITY } else { 0.0 };
    }
    (candidate - baseline) / baseline.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn metrics(win_rate: f64, pf: f64, sharpe: f64, roi: f64, dd: f64) -> BacktestMetrics {
        BacktestMetrics {
            total_trades: 10,
            wins: (win_rate * 10.0) as usize,
            losses: 10 - (win_rate * 10.0) as usize,
            win_rate,
            gross_profit: Decimal::ZERO,
            gross_loss: Decimal::ZERO,
            profit_factor: pf,
            net_pnl: Decimal::ZERO,
            roi_pct: roi,
            max_drawdown_pct: dd,
            max_drawdown_abs: Decimal::ZERO,
            sharpe,
            avg_trade_duration_ms: 0,
        }
    }

    #[test]
    fn test_better_metrics_score_higher() {
        let weak = fitness(&metrics(0.4, 1.0, 0.5, 5.0, 20.0));
        let strong = fitness(&metrics(0.6, 2.5, 1.5, 40.0, 8.0));
        assert!(strong > weak);
    }

    #[test]
    fn test_caps_apply() {
        // Profit factor and ROI above the caps must not change the score
        let capped = fitness(&metrics(0.5, 5.0, 3.0, 100.0, 10.0));
        let excessive = fitness(&metrics(0.5, 50.0, 30.0, 1000.0, 10.0));
        assert!((capped - excessive).abs() < 1e-9);
    }

    #[test]
    fn test_drawdown_penalizes() {
        let low_dd = fitness(&metrics(0.5, 2.0, 1.0, 20.0, 5.0));
        let high_dd = fitness(&metrics(0.5, 2.0, 1.0, 20.0, 30.0));
        assert!(low_dd > high_dd);
    }

    #[test]
    fn test_improvement_fraction() {
        assert!((improvement(100.0, 105.0) - 0.05).abs() < 1e-12);
        assert!((improvement(100.0, 95.0) + 0.05).abs() < 1e-12);
        assert_eq!(improvement(0.0, -1.0), 0.0);
    }

    #[test]
    fn test_infinite_profit_factor_capped() {
        let m = metrics(0.5, f64::INFINITY, 1.0, 20.0, 5.0);
        assert!(fitness(&m).is_finite());
    }
}
