//! Error types

use thiserror::Error;

/// Upstream provider errors. Adapters convert these into empty results
/// at their public boundary.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("Upstream returned status {0}")]
    Status(u16),

    #[error("Failed to parse upstream payload: {0}")]
    Parse(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),
}

/// Price feed errors
#[derive(Debug, Error)]
pub enum PriceFeedError {
    #[error("WebSocket connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Subscription failed: {0}")]
    SubscriptionFailed(String),

    #[error("Timeout waiting for data")]
    Timeout,

    #[error("Subscription capacity exceeded (max {max})")]
    CapacityExceeded { max: usize },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

/// Result type alias
pub type ProviderResult<T> = Result<T, ProviderError>;
pub type PriceFeedResult<T> = Result<T, PriceFeedError>;
pub type ConfigResult<T> = Result<T, ConfigError>;
