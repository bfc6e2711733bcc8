// Market data domain
pub mod candle;
pub mod market_type;
pub mod timeframe;

pub use candle::{Candle, CandleSeries};
pub use market_type::MarketType;
pub use timeframe::Timeframe;
