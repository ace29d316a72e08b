pub mod rest;

pub use rest::{BinanceMarketData, DEFAULT_BASE_URL};
