pub mod batch;
pub mod binance;
pub mod csv_source;
pub mod event_bus;
pub mod http_client_factory;
pub mod observability;
pub mod persistence;
pub mod rate_limit;
pub mod spot;
pub mod websocket;

pub use event_bus::SignalEventBus;
pub use persistence::Database;
pub use rate_limit::TokenBudget;
