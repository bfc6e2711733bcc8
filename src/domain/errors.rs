use thiserror::Error;

/// Errors surfaced by exchange clients after internal retry handling.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange unavailable after {attempts} attempts: {reason}")]
    Unavailable { attempts: u32, reason: String },

    #[error("rate limited: retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("unknown symbol: {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("request timed out after {duration_ms}ms")]
    Timeout { duration_ms: u64 },
}

/// Errors raised when candle data fails ingestion validation.
#[derive(Debug, Error)]
pub enum DataError {
    #[error("malformed candles for {symbol}/{timeframe}: {reason}")]
    MalformedCandles {
        symbol: String,
        timeframe: String,
        reason: String,
    },

    #[error("insufficient history for {symbol}: need {need} bars, got {got}")]
    InsufficientHistory {
        symbol: String,
        need: usize,
        got: usize,
    },
}

/// Errors from the persistence layer that carry domain meaning.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("duplicate {entity} for key {key}")]
    DuplicateEntity { entity: &'static str, key: String },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },
}

/// Strategy configuration invariant violations. Activation is refused
/// before any signal or trade is simulated.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid RSI window [{min}, {max}]: require min < max within [0, 100]")]
    InvalidRsiWindow { min: f64, max: f64 },

    #[error("invalid ADX minimum {value}: must be >= 0")]
    InvalidAdxMin { value: f64 },

    #[error("invalid volume multiplier {value}: must be > 0")]
    InvalidVolumeMultiplier { value: f64 },

    #[error("invalid SL/TP multipliers (sl {sl}, tp {tp}): require 0 < sl < tp")]
    InvalidStopMultipliers { sl: f64, tp: f64 },

    #[error("invalid minimum confidence {value}: must be within [0, 1]")]
    InvalidMinConfidence { value: f64 },

    #[error("no timeframes configured")]
    NoTimeframes,
}

/// Signal state machine violations.
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("invalid {direction} geometry: sl {sl}, entry {entry}, tp {tp}")]
    InvalidGeometry {
        direction: String,
        sl: String,
        entry: String,
        tp: String,
    },

    #[error("illegal transition from terminal status {from}")]
    TerminalTransition { from: String },

    #[error("confidence {value} outside [0, 1]")]
    InvalidConfidence { value: f64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_formatting() {
        let err = ConfigError::InvalidStopMultipliers { sl: 2.0, tp: 1.5 };
        let msg = err.to_string();
        assert!(msg.contains("sl 2"));
        assert!(msg.contains("tp 1.5"));
    }

    #[test]
    fn test_store_error_formatting() {
        let err = StoreError::DuplicateEntity {
            entity: "signal",
            key: "BTCUSDT/4h/LONG".to_string(),
        };
        assert!(err.to_string().contains("BTCUSDT/4h/LONG"));
    }
}
