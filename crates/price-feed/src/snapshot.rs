//! Aggregate market snapshot (indexes / crypto / forex / stocks)

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{info, warn};

use mktdata_core::{normalize_symbol, MarketSnapshot, Quote, UniverseConfig};

use crate::providers::QuoteSource;

/// Periodically rebuilt overview served to the dashboard.
///
/// A refresh that yields nothing keeps the previous snapshot and its
/// timestamp.
pub struct SnapshotJob {
    source: Arc<dyn QuoteSource>,
    indexes: Vec<String>,
    crypto: Vec<String>,
    forex: Vec<String>,
    stocks: Vec<String>,
    current: RwLock<MarketSnapshot>,
}

fn normalized(symbols: &[String]) -> Vec<String> {
    symbols
        .iter()
        .map(|s| normalize_symbol(s))
        .filter(|s| !s.is_empty())
        .collect()
}

fn bucket(quotes: &[Quote], members: &[String]) -> Vec<Quote> {
    let members: HashSet<&str> = members.iter().map(String::as_str).collect();
    quotes
        .iter()
        .filter(|q| members.contains(q.symbol.as_str()))
        .cloned()
        .collect()
}

impl SnapshotJob {
    pub fn new(source: Arc<dyn QuoteSource>, universe: &UniverseConfig) -> Self {
        Self {
            source,
            indexes: normalized(&universe.snapshot_indexes),
            crypto: normalized(&universe.snapshot_crypto),
            forex: normalized(&universe.snapshot_forex),
            stocks: normalized(&universe.snapshot_stocks),
            current: RwLock::new(MarketSnapshot::default()),
        }
    }

    /// Every symbol the snapshot covers, deduplicated in bucket order
    pub fn symbols(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        [&self.indexes, &self.crypto, &self.forex, &self.stocks]
            .into_iter()
            .flatten()
            .filter(|s| seen.insert(s.as_str()))
            .cloned()
            .collect()
    }

    /// Rebuild the snapshot. Returns the fetched quotes (empty on failure).
    pub async fn refresh(&self) -> Vec<Quote> {
        let quotes = self.source.fetch_quotes(&self.symbols()).await;
        if quotes.is_empty() {
            warn!("[Snapshot] Refresh returned no quotes, keeping previous snapshot");
            return quotes;
        }

        let snapshot = MarketSnapshot {
            indexes: bucket(&quotes, &self.indexes),
            crypto: bucket(&quotes, &self.crypto),
            forex: bucket(&quotes, &self.forex),
            stocks: bucket(&quotes, &self.stocks),
            timestamp: Some(Utc::now()),
        };
        info!("[Snapshot] Rebuilt with {} quotes", snapshot.quote_count());
        *self.current.write() = snapshot;

        quotes
    }

    pub fn current(&self) -> MarketSnapshot {
        self.current.read().clone()
    }
}
