pub mod binance;
pub mod journal;
pub mod scheduler;

pub use binance::BinanceMarketData;
pub use journal::{JournalEntry, SignalJournal};
pub use scheduler::{Cadence, Scheduler, SharedWatchlist, TickReport};
