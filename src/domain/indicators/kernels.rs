//! Pure indicator kernels over `f64` slices.
//!
//! Every kernel returns one value per input bar, with `None` during the
//! warm-up prefix. Outputs are bit-identical for identical inputs; no kernel
//! holds state between calls.

/// Simple moving average. First `period - 1` values are None.
pub fn sma(data: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || data.len() < period {
        return vec![None; data.len()];
    }

    let mut result = vec![None; data.len()];
    let mut window_sum: f64 = data[..period].iter().sum();
    result[period - 1] = Some(window_sum / period as f64);

    for i in period..data.len() {
        window_sum += data[i] - data[i - period];
        result[i] = Some(window_sum / period as f64);
    }

    result
}

/// Exponential moving average seeded with the SMA of the first window.
pub fn ema(data: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || data.len() < period {
        return vec![None; data.len()];
    }

    let mut result = vec![None; data.len()];
    let multiplier = 2.0 / (period as f64 + 1.0);

    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = Some(seed);

    let mut prev = seed;
    for i in period..data.len() {
        prev = (data[i] - prev) * multiplier + prev;
        result[i] = Some(prev);
    }

    result
}

/// Relative Strength Index. Needs `period + 1` bars before the first value.
pub fn rsi(closes: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || closes.len() <= period {
        return vec![None; closes.len()];
    }

    let mut gains = Vec::with_capacity(closes.len() - 1);
    let mut losses = Vec::with_capacity(closes.len() - 1);
    for pair in closes.windows(2) {
        let change = pair[1] - pair[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let avg_gains = wilder(&gains, period);
    let avg_losses = wilder(&losses, period);

    let mut result = vec![None; closes.len()];
    for i in 0..avg_gains.len() {
        if let (Some(gain), Some(loss)) = (avg_gains[i], avg_losses[i]) {
            let value = if loss == 0.0 {
                // Flat or all-gain window; synthetic zero-range bars land here
                if gain == 0.0 { 50.0 } else { 100.0 }
            } else {
                100.0 - 100.0 / (1.0 + gain / loss)
            };
            // One bar was consumed by the change computation
            result[i + 1] = Some(value);
        }
    }

    result
}

/// Average True Range with Wilder smoothing. Tolerates zero-range bars:
/// a dead-flat window yields ATR 0.0, never a division by zero.
pub fn atr(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let len = highs.len();
    if period == 0 || len < period || lows.len() != len || closes.len() != len {
        return vec![None; len];
    }

    let mut true_ranges = Vec::with_capacity(len);
    true_ranges.push(highs[0] - lows[0]);
    for i in 1..len {
        let h_l = highs[i] - lows[i];
        let h_pc = (highs[i] - closes[i - 1]).abs();
        let l_pc = (lows[i] - closes[i - 1]).abs();
        true_ranges.push(h_l.max(h_pc).max(l_pc));
    }

    let mut result = vec![None; len];
    let first: f64 = true_ranges[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = Some(first);

    let mut prev = first;
    for i in period..len {
        prev = (prev * (period - 1) as f64 + true_ranges[i]) / period as f64;
        result[i] = Some(prev);
    }

    result
}

/// Average Directional Index. Needs roughly `2 * period` bars of warm-up.
pub fn adx(highs: &[f64], lows: &[f64], closes: &[f64], period: usize) -> Vec<Option<f64>> {
    let len = highs.len();
    if period == 0 || len < 2 * period || lows.len() != len || closes.len() != len {
        return vec![None; len];
    }

    let mut tr = vec![0.0; len];
    let mut plus_dm = vec![0.0; len];
    let mut minus_dm = vec![0.0; len];

    for i in 1..len {
        let h_l = highs[i] - lows[i];
        let h_pc = (highs[i] - closes[i - 1]).abs();
        let l_pc = (lows[i] - closes[i - 1]).abs();
        tr[i] = h_l.max(h_pc).max(l_pc);

        let up = highs[i] - highs[i - 1];
        let down = lows[i - 1] - lows[i];
        plus_dm[i] = if up > down && up > 0.0 { up } else { 0.0 };
        minus_dm[i] = if down > up && down > 0.0 { down } else { 0.0 };
    }

    let mut smoothed_tr = vec![0.0; len];
    let mut smoothed_plus = vec![0.0; len];
    let mut smoothed_minus = vec![0.0; len];
    let mut dx = vec![0.0; len];

    smoothed_tr[period] = tr[1..=period].iter().sum::<f64>() / period as f64;
    smoothed_plus[period] = plus_dm[1..=period].iter().sum::<f64>() / period as f64;
    smoothed_minus[period] = minus_dm[1..=period].iter().sum::<f64>() / period as f64;
    dx[period] = directional_index(
        smoothed_tr[period],
        smoothed_plus[period],
        smoothed_minus[period],
    );

    for i in (period + 1)..len {
        smoothed_tr[i] = (smoothed_tr[i - 1] * (period - 1) as f64 + tr[i]) / period as f64;
        smoothed_plus[i] =
            (smoothed_plus[i - 1] * (period - 1) as f64 + plus_dm[i]) / period as f64;
        smoothed_minus[i] =
            (smoothed_minus[i - 1] * (period - 1) as f64 + minus_dm[i]) / period as f64;
        dx[i] = directional_index(smoothed_tr[i], smoothed_plus[i], smoothed_minus[i]);
    }

    // ADX is the Wilder smoothing of DX, seeded at bar 2*period - 1
    let mut result = vec![None; len];
    let seed_idx = 2 * period - 1;
    let seed: f64 = dx[period..=seed_idx].iter().sum::<f64>() / period as f64;
    result[seed_idx] = Some(seed);

    let mut prev = seed;
    for i in (seed_idx + 1)..len {
        prev = (prev * (period - 1) as f64 + dx[i]) / period as f64;
        result[i] = Some(prev);
    }

    result
}

fn directional_index(tr: f64, plus: f64, minus: f64) -> f64 {
    // Zero-range guard: a dead market has no directional movement
    if tr == 0.0 {
        return 0.0;
    }
    let plus_di = 100.0 * plus / tr;
    let minus_di = 100.0 * minus / tr;
    let sum = plus_di + minus_di;
    if sum == 0.0 {
        0.0
    } else {
        100.0 * (plus_di - minus_di).abs() / sum
    }
}

/// MACD line, signal line, and histogram.
pub struct MacdOutput {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

pub fn macd(closes: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdOutput {
    let len = closes.len();
    let fast_ema = ema(closes, fast);
    let slow_ema = ema(closes, slow);

    let mut macd_line = vec![None; len];
    for i in 0..len {
        if let (Some(f), Some(s)) = (fast_ema[i], slow_ema[i]) {
            macd_line[i] = Some(f - s);
        }
    }

    // Signal line: EMA of the defined portion of the MACD line
    let defined_start = macd_line.iter().position(|v| v.is_some());
    let mut signal_line = vec![None; len];
    if let Some(start) = defined_start {
        let values: Vec<f64> = macd_line[start..].iter().map(|v| v.unwrap()).collect();
        let sig = ema(&values, signal_period);
        for (offset, v) in sig.into_iter().enumerate() {
            signal_line[start + offset] = v;
        }
    }

    let mut histogram = vec![None; len];
    for i in 0..len {
        if let (Some(m), Some(s)) = (macd_line[i], signal_line[i]) {
            histogram[i] = Some(m - s);
        }
    }

    MacdOutput {
        macd: macd_line,
        signal: signal_line,
        histogram,
    }
}

fn wilder(data: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 || data.len() < period {
        return vec![None; data.len()];
    }
    let mut result = vec![None; data.len()];
    let seed: f64 = data[..period].iter().sum::<f64>() / period as f64;
    result[period - 1] = Some(seed);
    let mut prev = seed;
    for i in period..data.len() {
        prev = (prev * (period - 1) as f64 + data[i]) / period as f64;
        result[i] = Some(prev);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_warmup_and_values() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = sma(&data, 3);
        assert_eq!(result[0], None);
        assert_eq!(result[1], None);
        assert_eq!(result[2], Some(2.0));
        assert_eq!(result[4], Some(4.0));
    }

    #[test]
    fn test_ema_seeded_with_sma() {
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let result = ema(&data, 3);
        assert_eq!(result[2], Some(2.0));
        // multiplier = 0.5: (4 - 2) * 0.5 + 2 = 3
        assert_eq!(result[3], Some(3.0));
        assert_eq!(result[4], Some(4.0));
    }

    #[test]
    fn test_rsi_range_and_warmup() {
        let data: Vec<f64> = (0..40).map(|i| 100.0 + (i as f64 * 0.7).sin()).collect();
        let result = rsi(&data, 14);
        for v in result.iter().take(14) {
            assert!(v.is_none());
        }
        for v in result.iter().skip(14).flatten() {
            assert!((0.0..=100.0).contains(v));
        }
    }

    #[test]
    fn test_rsi_all_gains_saturates() {
        let data: Vec<f64> = (0..30).map(|i| i as f64).collect();
        let result = rsi(&data, 14);
        assert!(result.last().unwrap().unwrap() > 90.0);
    }

    #[test]
    fn test_rsi_flat_series_is_neutral() {
        let data = vec![100.0; 30];
        let result = rsi(&data, 14);
        assert_eq!(result.last().unwrap().unwrap(), 50.0);
    }

    #[test]
    fn test_atr_zero_range_bars() {
        // Synthetic spot-feed bars: O=H=L=C
        let flat = vec![100.0; 30];
        let result = atr(&flat, &flat, &flat, 14);
        assert_eq!(result.last().unwrap().unwrap(), 0.0);
    }

    #[test]
    fn test_atr_positive_on_real_ranges() {
        let highs: Vec<f64> = (0..30).map(|i| 101.0 + i as f64 * 0.1).collect();
        let lows: Vec<f64> = (0..30).map(|i| 99.0 + i as f64 * 0.1).collect();
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64 * 0.1).collect();
        let result = atr(&highs, &lows, &closes, 14);
        assert!(result.last().unwrap().unwrap() > 0.0);
    }

    #[test]
    fn test_adx_warmup_boundary() {
        let highs: Vec<f64> = (0..40).map(|i| 101.0 + i as f64).collect();
        let lows: Vec<f64> = (0..40).map(|i| 99.0 + i as f64).collect();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + i as f64).collect();
        let result = adx(&highs, &lows, &closes, 14);
        assert!(result[26].is_none());
        assert!(result[27].is_some());
        // Sustained trend means high ADX
        assert!(result.last().unwrap().unwrap() > 25.0);
    }

    #[test]
    fn test_adx_flat_market_is_zero() {
        let flat = vec![100.0; 40];
        let result = adx(&flat, &flat, &flat, 14);
        assert_eq!(result.last().unwrap().unwrap(), 0.0);
    }

    #[test]
    fn test_macd_histogram_consistency() {
        let data: Vec<f64> = (0..60).map(|i| 100.0 + (i as f64 * 0.3).sin() * 5.0).collect();
        let out = macd(&data, 12, 26, 9);
        for i in 0..data.len() {
            if let (Some(m), Some(s), Some(h)) = (out.macd[i], out.signal[i], out.histogram[i]) {
                assert!((h - (m - s)).abs() < 1e-12);
            }
        }
    }

    #[test]
    fn test_indicator_purity_prefix_independence() {
        let data: Vec<f64> = (0..80).map(|i| 100.0 + (i as f64 * 0.5).cos() * 3.0).collect();
        let full = rsi(&data, 14);
        let prefix = rsi(&data[..50], 14);
        for i in 0..50 {
            assert_eq!(full[i], prefix[i]);
        }
    }
}
