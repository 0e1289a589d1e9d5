//! Streaming ticker feed
//!
//! One persistent WebSocket shared by every subscribed symbol. The manager
//! tracks symbol -> callbacks locally, (re)subscribes on every connect, pings
//! on a fixed interval and reconnects forever with a stepped backoff.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use mktdata_core::{
    change_between, normalize_symbol, now_ms, PriceFeedError, PriceFeedResult, QuoteUpdate,
    StreamConfig,
};

/// Per-symbol tick callback
pub type TickCallback = Arc<dyn Fn(&QuoteUpdate) + Send + Sync>;

/// Connection state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Stepped reconnect delay. The last step repeats once reached.
#[derive(Debug, Clone)]
pub struct Backoff {
    steps: Vec<Duration>,
    attempt: usize,
}

impl Backoff {
    pub fn new(steps: Vec<Duration>) -> Self {
        let steps = if steps.is_empty() {
            vec![Duration::from_secs(1)]
        } else {
            steps
        };
        Self { steps, attempt: 0 }
    }

    /// Delay for the next attempt; advances the counter.
    pub fn next_delay(&mut self) -> Duration {
        let index = self.attempt.min(self.steps.len() - 1);
        self.attempt += 1;
        self.steps[index]
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failures since the last reset
    pub fn attempt(&self) -> usize {
        self.attempt
    }
}

/// Numeric fields arrive as strings upstream; accept plain numbers too.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Text(String),
    Number(f64),
}

impl Numeric {
    fn value(&self) -> Option<f64> {
        match self {
            Numeric::Text(s) => s.trim().parse().ok(),
            Numeric::Number(n) => Some(*n),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Ticker {
    product_id: String,
    price: Numeric,
    #[serde(default)]
    volume_24h: Option<Numeric>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum FeedMessage {
    Ticker(Ticker),
    Subscriptions {
        #[serde(default)]
        channels: serde_json::Value,
    },
    Heartbeat,
    Error {
        #[serde(default)]
        message: String,
        #[serde(default)]
        reason: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug)]
enum Command {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
}

fn control_message(kind: &str, symbols: &[String]) -> Message {
    let body = serde_json::json!({
        "type": kind,
        "product_ids": symbols,
        "channels": ["ticker"],
    });
    Message::Text(body.to_string())
}

fn ping_message() -> Message {
    Message::Text(serde_json::json!({ "type": "ping" }).to_string())
}

fn ws_error(e: tokio_tungstenite::tungstenite::Error) -> PriceFeedError {
    PriceFeedError::ConnectionFailed(e.to_string())
}

struct FeedShared {
    config: StreamConfig,
    state: RwLock<ConnectionState>,
    subscriptions: Mutex<HashMap<String, Vec<(u64, TickCallback)>>>,
    last_prices: DashMap<String, f64>,
    next_id: AtomicU64,
    /// Mirrors `Backoff::attempt` of the connection loop
    reconnect_attempts: AtomicUsize,
    /// Present only while connected
    commands: Mutex<Option<mpsc::UnboundedSender<Command>>>,
}

impl FeedShared {
    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
    }

    fn send_command(&self, command: Command) {
        if let Some(tx) = self.commands.lock().as_ref() {
            // A closed receiver means the connection is going down; the
            // next connect resubscribes from the tracked set anyway.
            let _ = tx.send(command);
        }
    }

    fn tracked_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.subscriptions.lock().keys().cloned().collect();
        symbols.sort();
        symbols
    }

    fn remove_callback(&self, symbol: &str, id: u64) {
        let emptied = {
            let mut subs = self.subscriptions.lock();
            let Some(callbacks) = subs.get_mut(symbol) else {
                return;
            };
            callbacks.retain(|(cb_id, _)| *cb_id != id);
            if callbacks.is_empty() {
                subs.remove(symbol);
                true
            } else {
                false
            }
        };

        if emptied {
            debug!("[Stream] Last callback for {} removed, unsubscribing", symbol);
            self.last_prices.remove(symbol);
            self.send_command(Command::Unsubscribe(vec![symbol.to_string()]));
        }
    }

    fn handle_text(&self, text: &str) {
        match serde_json::from_str::<FeedMessage>(text) {
            Ok(FeedMessage::Ticker(ticker)) => self.apply_tick(ticker),
            Ok(FeedMessage::Subscriptions { channels }) => {
                debug!("[Stream] Subscriptions confirmed: {}", channels);
            }
            Ok(FeedMessage::Heartbeat) | Ok(FeedMessage::Other) => {}
            Ok(FeedMessage::Error { message, reason }) => {
                error!(
                    "[Stream] Upstream error: {} ({})",
                    message,
                    reason.unwrap_or_default()
                );
            }
            Err(e) => warn!("[Stream] Discarding malformed message: {}", e),
        }
    }

    fn apply_tick(&self, ticker: Ticker) {
        let symbol = normalize_symbol(&ticker.product_id);
        let Some(price) = ticker.price.value().filter(|p| p.is_finite() && *p > 0.0) else {
            warn!("[Stream] Discarding tick for {} with unusable price", symbol);
            return;
        };

        let previous = self.last_prices.get(&symbol).map(|p| *p);
        let (change, change_percent) = change_between(previous, price);
        let update = QuoteUpdate {
            symbol: symbol.clone(),
            price,
            change,
            change_percent,
            volume: ticker.volume_24h.as_ref().and_then(Numeric::value),
            timestamp_ms: now_ms(),
        };

        let callbacks: Vec<TickCallback> = {
            let subs = self.subscriptions.lock();
            let Some(cbs) = subs.get(&symbol) else {
                debug!("[Stream] Ignoring tick for untracked {}", symbol);
                return;
            };
            // Recorded under the lock so a concurrent unsubscribe cannot
            // leave a stale entry behind
            self.last_prices.insert(symbol.clone(), price);
            cbs.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };
        for callback in &callbacks {
            callback(&update);
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = Backoff::new(self.config.backoff());

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let outcome = self.connect_and_listen(&mut backoff, &mut shutdown).await;
            self.commands.lock().take();
            self.set_state(ConnectionState::Disconnected);

            if *shutdown.borrow() {
                break;
            }
            match outcome {
                Ok(()) => info!("[Stream] Connection closed"),
                Err(e) => error!("[Stream] Connection error: {}", e),
            }

            let delay = backoff.next_delay();
            self.reconnect_attempts.store(backoff.attempt(), Ordering::SeqCst);
            warn!(
                "[Stream] Reconnecting in {:?} (attempt {})",
                delay,
                backoff.attempt()
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("[Stream] Feed loop stopped");
    }

    async fn connect_and_listen(
        &self,
        backoff: &mut Backoff,
        shutdown: &mut watch::Receiver<bool>,
    ) -> PriceFeedResult<()> {
        info!("[Stream] Connecting to {}", self.config.ws_url);

        let connecting = tokio::time::timeout(
            self.config.connect_timeout(),
            connect_async(self.config.ws_url.as_str()),
        );
        let ws_stream = tokio::select! {
            result = connecting => result
                .map_err(|_| PriceFeedError::Timeout)?
                .map_err(ws_error)?
                .0,
            _ = shutdown.changed() => return Ok(()),
        };
        let (mut write, mut read) = ws_stream.split();

        self.set_state(ConnectionState::Connected);
        backoff.reset();
        self.reconnect_attempts.store(0, Ordering::SeqCst);
        info!("[Stream] Connected");

        // Install the command channel before snapshotting the tracked set so
        // a concurrent subscribe is never lost.
        let (tx, mut commands) = mpsc::unbounded_channel();
        *self.commands.lock() = Some(tx);

        let symbols = self.tracked_symbols();
        if !symbols.is_empty() {
            debug!("[Stream] Resubscribing {} symbols", symbols.len());
            write
                .send(control_message("subscribe", &symbols))
                .await
                .map_err(ws_error)?;
        }

        let period = self.config.heartbeat_interval().max(Duration::from_millis(1));
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                _ = heartbeat.tick() => {
                    write.send(ping_message()).await.map_err(ws_error)?;
                }
                Some(command) = commands.recv() => {
                    let message = match &command {
                        Command::Subscribe(symbols) => control_message("subscribe", symbols),
                        Command::Unsubscribe(symbols) => control_message("unsubscribe", symbols),
                    };
                    write.send(message).await.map_err(ws_error)?;
                }
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_text(&text),
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await.map_err(ws_error)?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!("[Stream] Closed by server: {:?}", frame);
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(ws_error(e)),
                    None => return Ok(()),
                },
            }
        }
    }
}

/// Handle for one registered tick callback
#[must_use = "dropping the handle leaves the callback registered; call `unsubscribe`"]
pub struct StreamSubscription {
    feed: Weak<FeedShared>,
    symbol: String,
    id: Option<u64>,
}

impl StreamSubscription {
    fn rejected(symbol: String) -> Self {
        Self {
            feed: Weak::new(),
            symbol,
            id: None,
        }
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// False when the subscription was rejected at capacity
    pub fn is_active(&self) -> bool {
        self.id.is_some()
    }

    pub fn unsubscribe(self) {
        if let (Some(id), Some(feed)) = (self.id, self.feed.upgrade()) {
            feed.remove_callback(&self.symbol, id);
        }
    }
}

/// Shared streaming connection with subscription accounting
pub struct StreamingManager {
    shared: Arc<FeedShared>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamingManager {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            shared: Arc::new(FeedShared {
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                subscriptions: Mutex::new(HashMap::new()),
                last_prices: DashMap::new(),
                next_id: AtomicU64::new(1),
                reconnect_attempts: AtomicUsize::new(0),
                commands: Mutex::new(None),
            }),
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Spawn the connection loop. No-op if already running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock() = Some(tx);
        *task = Some(tokio::spawn(Arc::clone(&self.shared).run(rx)));
    }

    /// Close the socket and cancel any pending reconnect.
    pub async fn stop(&self) {
        if let Some(tx) = self.shutdown.lock().take() {
            let _ = tx.send(true);
        }
        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("[Stream] Feed task ended abnormally: {}", e);
            }
        }
        self.shared.set_state(ConnectionState::Disconnected);
    }

    /// Register `callback` for `symbol`. The first callback for a symbol
    /// sends a subscribe upstream when connected.
    pub fn try_subscribe(
        &self,
        symbol: &str,
        callback: impl Fn(&QuoteUpdate) + Send + Sync + 'static,
    ) -> PriceFeedResult<StreamSubscription> {
        let symbol = normalize_symbol(symbol);
        if symbol.is_empty() {
            return Err(PriceFeedError::SubscriptionFailed("empty symbol".to_string()));
        }

        let max = self.shared.config.max_subscriptions;
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let callback: TickCallback = Arc::new(callback);
        let is_new = {
            let mut subs = self.shared.subscriptions.lock();
            let is_new = !subs.contains_key(&symbol);
            if is_new && subs.len() >= max {
                return Err(PriceFeedError::CapacityExceeded { max });
            }
            subs.entry(symbol.clone())
                .or_default()
                .push((id, callback));
            is_new
        };

        if is_new {
            self.shared
                .send_command(Command::Subscribe(vec![symbol.clone()]));
        }

        Ok(StreamSubscription {
            feed: Arc::downgrade(&self.shared),
            symbol,
            id: Some(id),
        })
    }

    /// Like [`Self::try_subscribe`], but a rejection is logged and yields an
    /// inactive handle whose `unsubscribe` does nothing.
    pub fn subscribe(
        &self,
        symbol: &str,
        callback: impl Fn(&QuoteUpdate) + Send + Sync + 'static,
    ) -> StreamSubscription {
        match self.try_subscribe(symbol, callback) {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!("[Stream] Subscription to {} rejected: {}", symbol, e);
                StreamSubscription::rejected(normalize_symbol(symbol))
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Number of distinct tracked symbols
    pub fn subscription_count(&self) -> usize {
        self.shared.subscriptions.lock().len()
    }

    pub fn symbols(&self) -> Vec<String> {
        self.shared.tracked_symbols()
    }

    /// Consecutive failed connections since the last successful connect
    pub fn reconnect_attempts(&self) -> usize {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub fn last_price(&self, symbol: &str) -> Option<f64> {
        self.shared
            .last_prices
            .get(&normalize_symbol(symbol))
            .map(|p| *p)
    }
}

impl Drop for StreamingManager {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.get_mut().take() {
            let _ = tx.send(true);
        }
    }
}
