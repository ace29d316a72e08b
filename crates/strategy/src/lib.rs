pub mod generator;
pub mod indicators;

pub use generator::SignalGenerator;
pub use indicators::IndicatorEngine;
