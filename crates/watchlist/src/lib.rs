pub mod watchlist;

pub use watchlist::{Rejection, Rollup, WatchlistStateMachine};
