use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Not enough samples for an indicator. Skip the symbol this cycle.
    #[error("insufficient data: need {needed} samples, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Market data fetch failed or returned nothing. Skip the symbol this cycle.
    #[error("market data unavailable: {0}")]
    DataSourceUnavailable(String),

    /// Computed plan has zero or negative risk, or misordered levels.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Notification error: {0}")]
    Notify(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
