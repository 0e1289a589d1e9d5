//! Market data aggregation layer
//!
//! Features:
//! - Token-bucket rate limiting per upstream
//! - Batch REST, FX and scraped futures adapters
//! - Shared streaming ticker connection with reconnect and backoff
//! - Latest-quote cache with snapshot and delta fan-out
//! - Interval polling with deterministic teardown

pub mod aggregator;
pub mod feeds;
pub mod providers;
pub mod rate_limiter;
pub mod scheduler;
pub mod snapshot;
pub mod state;

pub use aggregator::{AggregatorStats, MarketAggregator};
pub use feeds::{Backoff, ConnectionState, StreamSubscription, StreamingManager};
pub use providers::{FuturesProvider, FxProvider, QuoteSource, YahooProvider};
pub use rate_limiter::RateLimiter;
pub use scheduler::PollingScheduler;
pub use snapshot::SnapshotJob;
pub use state::{QuoteDelta, QuoteRouter, RouterStats, Subscription, SubscriptionId};
