//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{ConfigError, ConfigResult};

/// Token bucket settings for one upstream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u32,
    pub refill_every_ms: u64,
    pub refill_amount: u32,
}

impl RateLimitConfig {
    /// Batch quote API: at most 2 requests per second
    pub fn yahoo() -> Self {
        Self {
            capacity: 2,
            refill_every_ms: 1_000,
            refill_amount: 2,
        }
    }

    /// FX API: at most 10 requests per minute
    pub fn fx() -> Self {
        Self {
            capacity: 10,
            refill_every_ms: 60_000,
            refill_amount: 10,
        }
    }

    /// Scraped page: one fetch every few seconds is plenty
    pub fn scrape() -> Self {
        Self {
            capacity: 1,
            refill_every_ms: 5_000,
            refill_amount: 1,
        }
    }

    pub fn refill_every(&self) -> Duration {
        Duration::from_millis(self.refill_every_ms)
    }

    fn validate(&self, name: &str) -> ConfigResult<()> {
        if self.capacity == 0 || self.refill_every_ms == 0 || self.refill_amount == 0 {
            return Err(ConfigError::Invalid(format!(
                "{name} rate limit needs non-zero capacity, refill interval and refill amount"
            )));
        }
        Ok(())
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::yahoo()
    }
}

/// Upstream endpoints and HTTP behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Batch quote endpoint; the comma-joined symbol list is passed as `symbols`
    pub yahoo_url: String,
    /// FX endpoint accepting `base` and `symbols`
    pub fx_url: String,
    /// Public futures page
    pub futures_url: String,
    pub user_agent: String,
    pub http_timeout_ms: u64,
    pub chunk_size: usize,
    pub yahoo_limit: RateLimitConfig,
    pub fx_limit: RateLimitConfig,
    pub futures_limit: RateLimitConfig,
    pub futures_cache_ttl_ms: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            yahoo_url: "https://query1.finance.yahoo.com/v7/finance/quote".to_string(),
            fx_url: "https://api.exchangerate.host/latest".to_string(),
            futures_url: "https://finviz.com/futures.ashx".to_string(),
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36".to_string(),
            http_timeout_ms: 10_000,
            chunk_size: 50,
            yahoo_limit: RateLimitConfig::yahoo(),
            fx_limit: RateLimitConfig::fx(),
            futures_limit: RateLimitConfig::scrape(),
            futures_cache_ttl_ms: 60_000,
        }
    }
}

impl ProviderConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    pub fn futures_cache_ttl(&self) -> Duration {
        Duration::from_millis(self.futures_cache_ttl_ms)
    }
}

/// Streaming ticker feed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub ws_url: String,
    pub max_subscriptions: usize,
    pub heartbeat_interval_ms: u64,
    pub backoff_ms: Vec<u64>,
    pub connect_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ws_url: "wss://ws-feed.exchange.coinbase.com".to_string(),
            max_subscriptions: 50,
            heartbeat_interval_ms: 30_000,
            backoff_ms: vec![1_000, 2_000, 5_000, 10_000],
            connect_timeout_ms: 10_000,
        }
    }
}

impl StreamConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn backoff(&self) -> Vec<Duration> {
        self.backoff_ms.iter().copied().map(Duration::from_millis).collect()
    }
}

/// Refresh cadence of pull-based providers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub equities_interval_ms: u64,
    pub fx_interval_ms: u64,
    pub snapshot_interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            equities_interval_ms: 15_000,
            fx_interval_ms: 30_000,
            snapshot_interval_ms: 300_000,
        }
    }
}

impl PollingConfig {
    pub fn equities_interval(&self) -> Duration {
        Duration::from_millis(self.equities_interval_ms)
    }

    pub fn fx_interval(&self) -> Duration {
        Duration::from_millis(self.fx_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }
}

/// Symbols tracked by the aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    pub stocks: Vec<String>,
    pub indexes: Vec<String>,
    pub futures: Vec<String>,
    pub crypto: Vec<String>,
    pub fx_base: String,
    pub fx_quotes: Vec<String>,
    /// Batch symbols for the aggregate overview snapshot
    pub snapshot_indexes: Vec<String>,
    pub snapshot_crypto: Vec<String>,
    pub snapshot_forex: Vec<String>,
    pub snapshot_stocks: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            stocks: strings(&["AAPL", "MSFT", "NVDA", "TSLA", "AMZN"]),
            indexes: strings(&["^GSPC", "^NDX", "^DJI", "^RUT", "^VIX"]),
            futures: strings(&["ES=F", "NQ=F", "CL=F", "GC=F"]),
            crypto: strings(&["BTC-USD", "ETH-USD", "SOL-USD"]),
            fx_base: "USD".to_string(),
            fx_quotes: strings(&["EUR", "GBP", "JPY", "AUD", "CAD"]),
            snapshot_indexes: strings(&["^GSPC", "^IXIC", "^DJI", "^RUT"]),
            snapshot_crypto: strings(&["BTC-USD", "ETH-USD", "BNB-USD", "SOL-USD"]),
            snapshot_forex: strings(&["EURUSD=X", "GBPUSD=X", "JPYUSD=X", "AUDUSD=X"]),
            snapshot_stocks: strings(&["AAPL", "MSFT", "GOOGL", "AMZN", "TSLA", "META"]),
        }
    }
}

impl UniverseConfig {
    /// Symbols refreshed through the batch quote provider
    pub fn batch_symbols(&self) -> Vec<String> {
        self.stocks
            .iter()
            .chain(&self.indexes)
            .chain(&self.futures)
            .cloned()
            .collect()
    }

    /// FX pairs as six-letter symbols (`USDEUR`)
    pub fn fx_pairs(&self) -> Vec<String> {
        self.fx_quotes
            .iter()
            .map(|q| format!("{}{}", self.fx_base, q))
            .collect()
    }
}

/// Complete market data configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketConfig {
    pub providers: ProviderConfig,
    pub stream: StreamConfig,
    pub polling: PollingConfig,
    pub universe: UniverseConfig,
    /// Number of recent prices kept per symbol
    pub sparkline_len: usize,
    /// Capacity of the delta broadcast channel
    pub delta_channel_size: usize,
}

impl MarketConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        self.providers.yahoo_limit.validate("yahoo")?;
        self.providers.fx_limit.validate("fx")?;
        self.providers.futures_limit.validate("futures")?;

        if self.providers.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be > 0".to_string()));
        }
        if self.stream.backoff_ms.is_empty() {
            return Err(ConfigError::Invalid("stream backoff sequence is empty".to_string()));
        }
        if self.stream.heartbeat_interval_ms == 0 {
            return Err(ConfigError::Invalid("heartbeat interval must be > 0".to_string()));
        }
        if self.polling.equities_interval_ms == 0
            || self.polling.fx_interval_ms == 0
            || self.polling.snapshot_interval_ms == 0
        {
            return Err(ConfigError::Invalid("polling intervals must be > 0".to_string()));
        }
        if self.delta_channel_size == 0 {
            return Err(ConfigError::Invalid("delta_channel_size must be > 0".to_string()));
        }
        Ok(())
    }
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            providers: ProviderConfig::default(),
            stream: StreamConfig::default(),
            polling: PollingConfig::default(),
            universe: UniverseConfig::default(),
            sparkline_len: 30,
            delta_channel_size: 1_024,
        }
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub market: MarketConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            market: MarketConfig::default(),
        }
    }
}
