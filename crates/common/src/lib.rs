pub mod config;
pub mod error;
pub mod exchange;
pub mod settings;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use exchange::{MarketDataSource, NotificationSink};
pub use settings::{ClockTime, Settings, SignalRules};
pub use types::*;
