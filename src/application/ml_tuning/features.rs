//! Feature engineering for the tuning regressor.
//!
//! The feature vector is the sampled parameters (in range-map key order)
//! followed by interaction terms derived from the resolved config. Order
//! must match `feature_names` exactly; the model stores names for
//! importance reporting.

use crate::domain::evaluation::ParamRange;
use crate::domain::strategy::SignalConfig;
use std::collections::BTreeMap;

/// Names for every feature column, parameters first.
pub fn feature_names(ranges: &BTreeMap<String, ParamRange>) -> Vec<String> {
    let mut names: Vec<String> = ranges.keys().cloned().collect();
    names.extend(
        [
            "long_rsi_range",
            "short_rsi_range",
            "tp_sl_ratio",
            "volume_mult_spread",
            "adx_floor_active",
        ]
        .map(String::from),
    );
    names
}

/// Build one feature row from a parameter draw and its resolved config.
pub fn feature_row(
    parameters: &BTreeMap<String, f64>,
    config: &SignalConfig,
) -> Vec<f64> {
    let mut row: Vec<f64> = parameters.values().copied().collect();

    row.push(config.long_rsi_max - config.long_rsi_min);
    row.push(config.short_rsi_max - config.short_rsi_min);
    row.push(if config.sl_atr_multiplier > 0.0 {
        config.tp_atr_multiplier / config.sl_atr_multiplier
    } else {
        0.0
    });
    row.push((config.long_volume_multiplier - config.short_volume_multiplier).abs());
    row.push(if config.adx_no_trade_floor.is_some() {
        1.0
    } else {
        0.0
    });

    row
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_matches_names_length() {
        let mut ranges = BTreeMap::new();
        ranges.insert(
            "long_rsi_max".to_string(),
            ParamRange::Continuous {
                min: 20.0,
                max: 40.0,
            },
        );
        ranges.insert(
            "tp_atr_multiplier".to_string(),
            ParamRange::Continuous { min: 3.0, max: 6.0 },
        );

        let mut parameters = BTreeMap::new();
        parameters.insert("long_rsi_max".to_string(), 33.0);
        parameters.insert("tp_atr_multiplier".to_string(), 4.5);

        let config = SignalConfig::default()
            .with_parameter("long_rsi_max", 33.0)
            .with_parameter("tp_atr_multiplier", 4.5);

        let names = feature_names(&ranges);
        let row = feature_row(&parameters, &config);
        assert_eq!(names.len(), row.len());
    }

    #[test]
    fn test_interaction_terms() {
        let config = SignalConfig {
            long_rsi_min: 25.0,
            long_rsi_max: 35.0,
            sl_atr_multiplier: 1.5,
            tp_atr_multiplier: 4.5,
            ..Default::default()
        };
        let row = feature_row(&BTreeMap::new(), &config);
        // [long_rsi_range, short_rsi_range, tp_sl_ratio, vol_spread, adx_floor]
        assert_eq!(row[0], 10.0);
        assert!((row[2] - 3.0).abs() < 1e-12);
        assert_eq!(row[4], 0.0);
    }
}
