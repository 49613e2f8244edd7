pub mod aggregator;
pub mod candle;
pub mod price_generator;
pub mod timeframe;
pub mod timeframe_store;

// Re-export the core types for convenient access (e.g. `use crate::market_data::Candle`).
pub use candle::Candle;
pub use price_generator::PriceGenerator;
pub use timeframe::Timeframe;
pub use timeframe_store::TimeframeStore;
