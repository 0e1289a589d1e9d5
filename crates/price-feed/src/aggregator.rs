//! Market aggregator - owns and coordinates every component
//!
//! Everything is constructed explicitly in [`MarketAggregator::new`]; nothing
//! is global. `start` performs the initial load, registers the polling jobs
//! and opens the stream; `stop` tears all of it down.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use mktdata_core::{
    normalize_symbol, AssetClass, AssetFilter, MarketConfig, MarketSnapshot, Quote, QuoteUpdate,
};

use crate::feeds::{ConnectionState, StreamSubscription, StreamingManager};
use crate::providers::{http_client, FuturesProvider, FxProvider, YahooProvider};
use crate::scheduler::PollingScheduler;
use crate::snapshot::SnapshotJob;
use crate::state::QuoteRouter;

/// Main market data aggregator
pub struct MarketAggregator {
    config: MarketConfig,
    router: Arc<QuoteRouter>,
    yahoo: Arc<YahooProvider>,
    fx: Arc<FxProvider>,
    futures: Arc<FuturesProvider>,
    stream: Arc<StreamingManager>,
    snapshot: Arc<SnapshotJob>,
    scheduler: PollingScheduler,
    stream_subscriptions: Mutex<Vec<StreamSubscription>>,
    running: AtomicBool,
}

impl MarketAggregator {
    pub fn new(config: MarketConfig) -> Self {
        let providers = &config.providers;
        let client = http_client(providers.http_timeout(), &providers.user_agent);

        let router = Arc::new(QuoteRouter::new(config.sparkline_len, config.delta_channel_size));
        let yahoo = Arc::new(YahooProvider::from_config(providers, client.clone()));
        let fx = Arc::new(FxProvider::from_config(providers, client.clone()));
        let futures = Arc::new(FuturesProvider::from_config(providers, client));
        let snapshot = Arc::new(SnapshotJob::new(yahoo.clone(), &config.universe));
        let stream = Arc::new(StreamingManager::new(config.stream.clone()));
        let scheduler = PollingScheduler::new(Arc::clone(&router));

        Self {
            config,
            router,
            yahoo,
            fx,
            futures,
            stream,
            snapshot,
            scheduler,
            stream_subscriptions: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MarketConfig {
        &self.config
    }

    pub fn router(&self) -> Arc<QuoteRouter> {
        Arc::clone(&self.router)
    }

    pub fn stream(&self) -> Arc<StreamingManager> {
        Arc::clone(&self.stream)
    }

    /// Initial load, polling jobs and the crypto stream
    pub async fn start(&self) -> anyhow::Result<()> {
        self.config.validate()?;
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Market aggregator already running");
            return Ok(());
        }
        info!("Starting market aggregator");

        self.initial_load().await;

        let universe = &self.config.universe;
        let polling = &self.config.polling;
        self.scheduler
            .poll_source(self.yahoo.clone(), universe.batch_symbols(), polling.equities_interval());
        self.scheduler
            .poll_source(self.fx.clone(), universe.fx_pairs(), polling.fx_interval());
        self.scheduler
            .poll_source(self.futures.clone(), vec![], polling.equities_interval());

        let snapshot = Arc::clone(&self.snapshot);
        self.scheduler.every("snapshot", polling.snapshot_interval(), move || {
            let snapshot = Arc::clone(&snapshot);
            async move { snapshot.refresh().await }
        });

        {
            let mut subscriptions = self.stream_subscriptions.lock();
            for symbol in &universe.crypto {
                let router = Arc::clone(&self.router);
                subscriptions.push(self.stream.subscribe(symbol, move |update: &QuoteUpdate| {
                    router.ingest(vec![update.clone().into_quote(AssetClass::Crypto)]);
                }));
            }
        }
        self.stream.start();

        info!(
            "Market aggregator started: {} quotes cached, {} poll jobs, {} stream symbols",
            self.router.len(),
            self.scheduler.job_count(),
            self.stream.subscription_count()
        );
        Ok(())
    }

    /// Cancel polling, close the stream and drop subscribers.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("Stopping market aggregator");

        self.scheduler.stop();
        let subscriptions: Vec<StreamSubscription> =
            self.stream_subscriptions.lock().drain(..).collect();
        for subscription in subscriptions {
            subscription.unsubscribe();
        }
        self.stream.stop().await;
        self.router.clear_subscribers();

        info!("Market aggregator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn initial_load(&self) {
        let batch_symbols = self.config.universe.batch_symbols();
        let fx_pairs = self.config.universe.fx_pairs();
        let (batch, fx, board, overview) = tokio::join!(
            self.yahoo.quotes(&batch_symbols),
            self.fx.fetch_pairs(&fx_pairs),
            self.futures.quotes(),
            self.snapshot.refresh(),
        );

        let loaded = [
            ("yahoo", batch),
            ("fx", fx),
            ("futures", board),
            ("snapshot", overview),
        ];
        for (source, quotes) in loaded {
            if quotes.is_empty() {
                warn!("Initial load from {} returned no quotes", source);
            } else {
                self.router.ingest(quotes);
            }
        }
    }

    /// First batch for one tab: fetch what the filter needs, ingest, and
    /// return the filtered view.
    pub async fn load_first(&self, filter: AssetFilter) -> Vec<Quote> {
        let universe = &self.config.universe;
        let fetched = match filter {
            AssetFilter::All => {
                self.initial_load().await;
                vec![]
            }
            AssetFilter::Only(AssetClass::Crypto) => self.yahoo.quotes(&universe.crypto).await,
            AssetFilter::Only(AssetClass::Forex) => self.fx.fetch_pairs(&universe.fx_pairs()).await,
            AssetFilter::Only(AssetClass::Stock) => self.yahoo.quotes(&universe.stocks).await,
            AssetFilter::Only(AssetClass::Index) => self.yahoo.quotes(&universe.indexes).await,
            AssetFilter::Only(AssetClass::Future) => {
                let (listed, board) = tokio::join!(
                    self.yahoo.quotes(&universe.futures),
                    self.futures.quotes()
                );
                listed.into_iter().chain(board).collect()
            }
            AssetFilter::Only(_) => self.futures.quotes().await,
        };

        self.router.ingest(fetched);
        self.router.list_top(filter)
    }

    /// Batch quotes for arbitrary symbols (deduplicated, blanks dropped).
    /// Results are ingested and returned as committed.
    pub async fn batch_quotes(&self, symbols: &[String]) -> Vec<Quote> {
        let mut seen = HashSet::new();
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| normalize_symbol(s))
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();
        if symbols.is_empty() {
            return vec![];
        }
        let quotes = self.yahoo.quotes(&symbols).await;
        self.router.ingest(quotes)
    }

    /// Quotes for six-letter FX pairs
    pub async fn fx_quotes(&self, pairs: &[String]) -> Vec<Quote> {
        let quotes = self.fx.fetch_pairs(pairs).await;
        self.router.ingest(quotes)
    }

    /// Scraped futures board (cached by the provider)
    pub async fn futures_board(&self) -> Vec<Quote> {
        let board = self.futures.quotes().await;
        self.router.ingest(board)
    }

    pub fn snapshot(&self) -> MarketSnapshot {
        self.snapshot.current()
    }

    pub fn stats(&self) -> AggregatorStats {
        let router = self.router.stats();
        AggregatorStats {
            running: self.is_running(),
            quote_count: router.quote_count,
            subscriber_count: router.subscriber_count,
            update_count: router.update_count,
            last_update_age: router.last_update_age,
            poll_jobs: self.scheduler.job_count(),
            stream_state: self.stream.state(),
            stream_symbols: self.stream.subscription_count(),
            stream_reconnect_attempts: self.stream.reconnect_attempts(),
        }
    }
}

/// Aggregator statistics
#[derive(Debug, Clone)]
pub struct AggregatorStats {
    pub running: bool,
    pub quote_count: usize,
    pub subscriber_count: usize,
    pub update_count: u64,
    pub last_update_age: Option<Duration>,
    pub poll_jobs: usize,
    pub stream_state: ConnectionState,
    pub stream_symbols: usize,
    pub stream_reconnect_attempts: usize,
}
