//! Quote cache and router
//!
//! Single source of truth for the latest quote per symbol and the fan-out
//! point for consumers. A batch is merged completely under the write lock
//! before anyone is notified, so subscribers never observe a half-applied
//! batch. Publication (snapshot callbacks and deltas) is serialized by the
//! publish lock and follows commit order. Callbacks run outside the cache
//! locks but must not call back into `ingest` or `subscribe`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tracing::debug;

use mktdata_core::{normalize_symbol, AssetFilter, ChangeBasis, Quote};

/// Full-snapshot subscriber callback
pub type SnapshotCallback = Arc<dyn Fn(&[Quote]) + Send + Sync>;

/// Batch of quotes committed by one ingest call
pub type QuoteDelta = Arc<Vec<Quote>>;

/// Identifies one registered callback instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

#[derive(Debug)]
struct CachedQuote {
    quote: Quote,
    history: VecDeque<f64>,
}

/// Handle returned by [`QuoteRouter::subscribe`]
#[must_use = "dropping the handle leaves the callback registered; call `unsubscribe`"]
#[derive(Debug)]
pub struct Subscription {
    router: Weak<QuoteRouter>,
    key: String,
    id: SubscriptionId,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Remove this callback. A no-op if the router is gone.
    pub fn unsubscribe(self) {
        if let Some(router) = self.router.upgrade() {
            router.unsubscribe(&self.key, self.id);
        }
    }
}

/// Latest-quote cache with snapshot and delta fan-out
pub struct QuoteRouter {
    /// Taken before `quotes`; held until a commit is fully published
    publish: Mutex<()>,
    quotes: RwLock<HashMap<String, CachedQuote>>,
    subscribers: Mutex<HashMap<String, Vec<(SubscriptionId, SnapshotCallback)>>>,
    next_id: AtomicU64,
    deltas: broadcast::Sender<QuoteDelta>,
    sparkline_len: usize,
    update_count: AtomicU64,
    last_update: RwLock<Option<Instant>>,
}

impl QuoteRouter {
    pub fn new(sparkline_len: usize, delta_capacity: usize) -> Self {
        let (deltas, _) = broadcast::channel(delta_capacity.max(1));
        Self {
            publish: Mutex::new(()),
            quotes: RwLock::new(HashMap::new()),
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            deltas,
            sparkline_len,
            update_count: AtomicU64::new(0),
            last_update: RwLock::new(None),
        }
    }

    /// Merge a batch (last write wins), then notify every subscriber with
    /// the full snapshot and publish the committed batch as a delta.
    /// Returns the committed quotes.
    pub fn ingest(&self, batch: Vec<Quote>) -> Vec<Quote> {
        if batch.is_empty() {
            return vec![];
        }

        let _publishing = self.publish.lock();
        let (committed, snapshot) = {
            let mut quotes = self.quotes.write();
            let committed: Vec<Quote> = batch
                .into_iter()
                .map(|quote| self.merge(&mut quotes, quote))
                .collect();
            // No receivers is fine
            let _ = self.deltas.send(Arc::new(committed.clone()));
            (committed, Self::sorted_snapshot(&quotes))
        };

        self.update_count.fetch_add(committed.len() as u64, Ordering::Relaxed);
        *self.last_update.write() = Some(Instant::now());

        self.notify(&snapshot);
        committed
    }

    fn merge(&self, quotes: &mut HashMap<String, CachedQuote>, mut quote: Quote) -> Quote {
        quote.symbol = normalize_symbol(&quote.symbol);

        let mut history = match quotes.remove(&quote.symbol) {
            Some(prev) => {
                if quote.change_basis == ChangeBasis::Derived {
                    quote.derive_change(Some(prev.quote.price));
                }
                // Ticks carry no display name; keep the better one
                if quote.name == quote.symbol && prev.quote.name != prev.quote.symbol {
                    quote.name = prev.quote.name;
                }
                prev.history
            }
            None => {
                if quote.change_basis == ChangeBasis::Derived {
                    quote.derive_change(None);
                }
                VecDeque::with_capacity(self.sparkline_len)
            }
        };

        if self.sparkline_len > 0 {
            history.push_back(quote.price);
            while history.len() > self.sparkline_len {
                history.pop_front();
            }
            quote.sparkline = Some(history.iter().copied().collect());
        }

        quotes.insert(
            quote.symbol.clone(),
            CachedQuote {
                quote: quote.clone(),
                history,
            },
        );
        quote
    }

    fn sorted_snapshot(quotes: &HashMap<String, CachedQuote>) -> Vec<Quote> {
        let mut snapshot: Vec<Quote> = quotes.values().map(|c| c.quote.clone()).collect();
        snapshot.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        snapshot
    }

    fn notify(&self, snapshot: &[Quote]) {
        let callbacks: Vec<SnapshotCallback> = self
            .subscribers
            .lock()
            .values()
            .flat_map(|cbs| cbs.iter().map(|(_, cb)| Arc::clone(cb)))
            .collect();

        debug!("Notifying {} subscribers with {} quotes", callbacks.len(), snapshot.len());
        for callback in callbacks {
            callback(snapshot);
        }
    }

    /// Register `callback` under `key` and invoke it once with the current
    /// snapshot (possibly empty).
    pub fn subscribe(
        self: &Arc<Self>,
        key: impl Into<String>,
        callback: impl Fn(&[Quote]) + Send + Sync + 'static,
    ) -> Subscription {
        let key = key.into();
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let callback: SnapshotCallback = Arc::new(callback);

        // An in-flight commit finishes publishing before the first snapshot
        let _publishing = self.publish.lock();
        self.subscribers
            .lock()
            .entry(key.clone())
            .or_default()
            .push((id, Arc::clone(&callback)));

        callback(&self.snapshot());

        Subscription {
            router: Arc::downgrade(self),
            key,
            id,
        }
    }

    /// Remove exactly one callback instance. Empty keys are pruned.
    /// Returns whether anything was removed.
    pub fn unsubscribe(&self, key: &str, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock();
        let Some(callbacks) = subscribers.get_mut(key) else {
            return false;
        };
        let before = callbacks.len();
        callbacks.retain(|(cb_id, _)| *cb_id != id);
        let removed = callbacks.len() != before;
        if callbacks.is_empty() {
            subscribers.remove(key);
        }
        removed
    }

    /// Drop every subscriber (used on shutdown)
    pub fn clear_subscribers(&self) {
        self.subscribers.lock().clear();
    }

    /// Receiver of committed batches for push-style consumers
    pub fn deltas(&self) -> broadcast::Receiver<QuoteDelta> {
        self.deltas.subscribe()
    }

    /// Every cached quote, ordered by symbol
    pub fn snapshot(&self) -> Vec<Quote> {
        Self::sorted_snapshot(&self.quotes.read())
    }

    pub fn list_top(&self, filter: AssetFilter) -> Vec<Quote> {
        let mut quotes: Vec<Quote> = self
            .quotes
            .read()
            .values()
            .filter(|c| filter.matches(c.quote.asset_class))
            .map(|c| c.quote.clone())
            .collect();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        quotes
    }

    /// Case-insensitive substring match on symbol and name
    pub fn search(&self, query: &str) -> Vec<Quote> {
        let query = query.trim().to_lowercase();
        let mut quotes: Vec<Quote> = self
            .quotes
            .read()
            .values()
            .filter(|c| c.quote.matches_query(&query))
            .map(|c| c.quote.clone())
            .collect();
        quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        quotes
    }

    pub fn get_quote(&self, symbol: &str) -> Option<Quote> {
        self.quotes
            .read()
            .get(&normalize_symbol(symbol))
            .map(|c| c.quote.clone())
    }

    pub fn len(&self) -> usize {
        self.quotes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().values().map(Vec::len).sum()
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            quote_count: self.len(),
            subscriber_count: self.subscriber_count(),
            update_count: self.update_count.load(Ordering::Relaxed),
            last_update_age: self.last_update.read().map(|t| t.elapsed()),
        }
    }
}

impl Default for QuoteRouter {
    fn default() -> Self {
        Self::new(30, 1_024)
    }
}

/// Statistics about the router
#[derive(Debug, Clone)]
pub struct RouterStats {
    pub quote_count: usize,
    pub subscriber_count: usize,
    pub update_count: u64,
    pub last_update_age: Option<Duration>,
}
