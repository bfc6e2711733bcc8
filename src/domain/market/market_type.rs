use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{OnceLock, RwLock};

/// Market category a symbol trades in. Strategy parameters are resolved per
/// market type, and the continuous-learning loop keys its counters on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketType {
    CryptoSpot,
    CryptoFutures,
    Forex,
    Commodity,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketType::CryptoSpot => write!(f, "CRYPTO_SPOT"),
            MarketType::CryptoFutures => write!(f, "CRYPTO_FUT"),
            MarketType::Forex => write!(f, "FOREX"),
            MarketType::Commodity => write!(f, "COMMODITY"),
        }
    }
}

impl FromStr for MarketType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "CRYPTO_SPOT" => Ok(MarketType::CryptoSpot),
            "CRYPTO_FUT" | "CRYPTO_FUTURES" => Ok(MarketType::CryptoFutures),
            "FOREX" | "FX" => Ok(MarketType::Forex),
            "COMMODITY" => Ok(MarketType::Commodity),
            _ => Err(format!("unknown market type: {s}")),
        }
    }
}

/// Commodity tickers served by the spot feed. Kept short on purpose: the
/// commodity universe is a curated list, not a discovery problem.
pub const COMMODITY_TICKERS: &[&str] = &[
    "XAUUSD", "XAGUSD", "WTIUSD", "BRENTUSD", "NATGASUSD", "COPPERUSD",
];

fn forex_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z]{6}$").expect("static regex"))
}

fn crypto_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Z0-9]{2,12}(USDT|BTC)$").expect("static regex"))
}

fn classification_cache() -> &'static RwLock<HashMap<String, MarketType>> {
    static CACHE: OnceLock<RwLock<HashMap<String, MarketType>>> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

impl MarketType {
    /// Classify a symbol string. Commodities are checked before the forex
    /// pattern because XAUUSD-style tickers are also six alphabetic chars.
    /// Unknown symbols fall back to crypto spot. Results are cached
    /// process-wide.
    pub fn classify(symbol: &str) -> MarketType {
        let upper = symbol.to_uppercase();

        if let Ok(cache) = classification_cache().read()
            && let Some(mt) = cache.get(&upper)
        {
            return *mt;
        }

        let market_type = if COMMODITY_TICKERS.contains(&upper.as_str()) {
            MarketType::Commodity
        } else if crypto_pattern().is_match(&upper) {
            if upper.ends_with("USDT") && upper.contains("PERP") {
                MarketType::CryptoFutures
            } else {
                MarketType::CryptoSpot
            }
        } else if forex_pattern().is_match(&upper) {
            MarketType::Forex
        } else {
            MarketType::CryptoSpot
        };

        if let Ok(mut cache) = classification_cache().write() {
            cache.insert(upper, market_type);
        }

        market_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_crypto() {
        assert_eq!(MarketType::classify("BTCUSDT"), MarketType::CryptoSpot);
        assert_eq!(MarketType::classify("ETHBTC"), MarketType::CryptoSpot);
        assert_eq!(MarketType::classify("solusdt"), MarketType::CryptoSpot);
    }

    #[test]
    fn test_classify_forex() {
        assert_eq!(MarketType::classify("EURUSD"), MarketType::Forex);
        assert_eq!(MarketType::classify("GBPJPY"), MarketType::Forex);
    }

    #[test]
    fn test_classify_commodity_before_forex() {
        // XAUUSD matches the 6-alpha forex pattern; curated list wins
        assert_eq!(MarketType::classify("XAUUSD"), MarketType::Commodity);
        assert_eq!(MarketType::classify("WTIUSD"), MarketType::Commodity);
    }

    #[test]
    fn test_unknown_falls_back_to_crypto() {
        assert_eq!(MarketType::classify("WEIRD123"), MarketType::CryptoSpot);
    }

    #[test]
    fn test_roundtrip_display_parse() {
        for mt in [
            MarketType::CryptoSpot,
            MarketType::CryptoFutures,
            MarketType::Forex,
            MarketType::Commodity,
        ] {
            assert_eq!(mt.to_string().parse::<MarketType>().unwrap(), mt);
        }
    }
}
