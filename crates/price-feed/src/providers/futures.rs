//! Scraped futures board.
//!
//! Fetches a public HTML page and turns each row of its quote table into a
//! [`Quote`]. Pages that embed the board as a `var tiles = {...};` script
//! object are parsed from that object instead. Rows are bucketed into
//! commodity groups by futures root code or by keywords in the row label.
//! The last non-empty board is cached for a freshness window and served
//! when a refresh fails.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use parking_lot::RwLock;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use mktdata_core::{normalize_symbol, AssetClass, ProviderConfig, ProviderResult, Quote};

use super::{get_text, QuoteSource};
use crate::rate_limiter::RateLimiter;

const PROVIDER_NAME: &str = "futures";

static TILES: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"var tiles = (\{[\s\S]+?\});").ok());

const BOND_CODES: &[&str] = &["ZB", "ZN", "ZF", "ZT"];
const METAL_CODES: &[&str] = &["GC", "SI", "PL", "HG", "PA"];
const ENERGY_CODES: &[&str] = &["CL", "QA", "RB", "HO", "NG", "ZK"];
const SOFT_CODES: &[&str] = &["CC", "CT", "JO", "KC", "LB", "SB"];
const MEAT_CODES: &[&str] = &["LC", "FC", "LH"];
const GRAIN_CODES: &[&str] = &["ZS", "ZM", "ZL", "ZC", "ZW", "ZR", "ZO", "RS"];
const INDEX_CODES: &[&str] = &["YM", "ES", "NQ", "RTY", "NKD", "FESX", "FDAX", "VX"];
const FOREX_CODES: &[&str] = &["DX", "6E", "6J", "6B", "6C", "6S", "6A", "6N"];

// Checked in order; the first group with a matching keyword wins.
const KEYWORDS: &[(AssetClass, &[&str])] = &[
    (AssetClass::Crypto, &["bitcoin", "ether"]),
    (AssetClass::Metals, &["gold", "silver", "platinum", "palladium", "copper"]),
    (
        AssetClass::Energy,
        &["crude", "gasoline", "heating oil", "natural gas", "brent", "ethanol"],
    ),
    (
        AssetClass::Index,
        &["s&p", "nasdaq", "dow", "russell", "nikkei", "dax", "stoxx", "ftse", "vix", "hang seng"],
    ),
    (AssetClass::Bonds, &["treasury", "bond", "t-note", "note"]),
    (
        AssetClass::Grains,
        &["corn", "wheat", "soybean", "oats", "rice", "canola"],
    ),
    (
        AssetClass::Softs,
        &["cocoa", "coffee", "cotton", "sugar", "orange juice", "lumber"],
    ),
    (AssetClass::Meats, &["cattle", "hogs"]),
    (
        AssetClass::Forex,
        &["dollar", "euro fx", "yen", "pound", "franc", "peso", "canadian", "australian"],
    ),
];

const CURRENCY_CODES: &[&str] = &["USD", "EUR", "JPY", "GBP", "CHF", "CAD", "AUD", "NZD"];

/// Bucket a scraped row. Known root codes classify directly; otherwise
/// keywords in the label decide, then bare currency codes; anything else
/// is a plain future.
pub fn classify_row(ticker: Option<&str>, name: &str) -> AssetClass {
    if let Some(code) = ticker.map(|t| t.trim().to_ascii_uppercase()) {
        let code = code.as_str();
        let by_code = [
            (BOND_CODES, AssetClass::Bonds),
            (METAL_CODES, AssetClass::Metals),
            (ENERGY_CODES, AssetClass::Energy),
            (SOFT_CODES, AssetClass::Softs),
            (MEAT_CODES, AssetClass::Meats),
            (GRAIN_CODES, AssetClass::Grains),
            (INDEX_CODES, AssetClass::Index),
            (FOREX_CODES, AssetClass::Forex),
        ];
        if let Some((_, class)) = by_code.iter().find(|(codes, _)| codes.contains(&code)) {
            return *class;
        }
    }

    let lower = name.to_lowercase();
    for (class, words) in KEYWORDS {
        if words.iter().any(|w| lower.contains(w)) {
            return *class;
        }
    }

    let has_currency_code = name
        .split(|c: char| !c.is_ascii_alphabetic())
        .any(|token| CURRENCY_CODES.contains(&token));
    if has_currency_code {
        return AssetClass::Forex;
    }

    AssetClass::Future
}

/// Parse `"1,234.50"`, `"+0.53%"`, `"-12"`; `None` for anything else.
fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ',' | '%' | '+' | ' '))
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn row_quote(
    ticker: Option<&str>,
    name: &str,
    price: f64,
    change: f64,
    change_percent: f64,
) -> Quote {
    let symbol = match ticker {
        Some(t) if !t.trim().is_empty() => normalize_symbol(t),
        _ => normalize_symbol(&name.replace(' ', "_")),
    };
    Quote::new(&symbol, classify_row(ticker, name), price)
        .with_name(name)
        .with_supplied_change(change, change_percent)
}

/// Rows of `<tr data-ticker=".."><td>label</td><td>last</td><td>change</td><td>change%</td></tr>`.
/// Rows whose price cell does not parse are skipped.
fn parse_table(document: &Html) -> Vec<Quote> {
    let (Ok(rows), Ok(cells)) = (Selector::parse("table tr"), Selector::parse("td")) else {
        return vec![];
    };

    document
        .select(&rows)
        .filter_map(|row| {
            let texts: Vec<String> = row
                .select(&cells)
                .map(|c| c.text().collect::<String>().trim().to_string())
                .collect();
            if texts.len() < 2 || texts[0].is_empty() {
                return None;
            }
            let price = parse_number(&texts[1])?;
            let change = texts.get(2).and_then(|t| parse_number(t)).unwrap_or(0.0);
            let change_percent = texts
                .get(3)
                .and_then(|t| parse_number(t))
                .unwrap_or_else(|| {
                    let prev = price - change;
                    if prev != 0.0 { change / prev * 100.0 } else { 0.0 }
                });
            let ticker = row.value().attr("data-ticker");
            Some(row_quote(ticker, &texts[0], price, change, change_percent))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Tile {
    label: Option<String>,
    last: Option<f64>,
    change: Option<f64>,
    prev_close: Option<f64>,
}

fn parse_tiles(html: &str) -> Vec<Quote> {
    let Some(pattern) = TILES.as_ref() else {
        return vec![];
    };
    let Some(raw) = pattern.captures(html).and_then(|c| c.get(1)) else {
        return vec![];
    };
    let tiles: HashMap<String, Tile> = match serde_json::from_str(raw.as_str()) {
        Ok(t) => t,
        Err(e) => {
            warn!("[Futures] embedded tiles object did not parse: {}", e);
            return vec![];
        }
    };

    let mut quotes: Vec<Quote> = tiles
        .into_iter()
        .filter_map(|(ticker, tile)| {
            let price = tile.last.filter(|p| p.is_finite())?;
            let change = tile.change.unwrap_or(0.0);
            let prev_close = tile.prev_close.unwrap_or(price);
            let change_percent = if prev_close > 0.0 { change / prev_close * 100.0 } else { 0.0 };
            let name = tile.label.unwrap_or_else(|| ticker.clone());
            Some(row_quote(Some(&ticker), &name, price, change, change_percent))
        })
        .collect();
    quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    quotes
}

/// Parse a futures page, preferring the quote table.
pub fn parse_board(html: &str) -> Vec<Quote> {
    let table = parse_table(&Html::parse_document(html));
    if !table.is_empty() {
        return table;
    }
    parse_tiles(html)
}

#[derive(Debug)]
struct CachedBoard {
    fetched_at: Instant,
    quotes: Vec<Quote>,
}

/// Scraped futures adapter with a freshness-window cache
pub struct FuturesProvider {
    client: reqwest::Client,
    url: String,
    user_agent: String,
    limiter: Arc<RateLimiter>,
    ttl: Duration,
    cache: RwLock<Option<CachedBoard>>,
}

impl FuturesProvider {
    pub fn new(
        client: reqwest::Client,
        url: impl Into<String>,
        user_agent: impl Into<String>,
        limiter: Arc<RateLimiter>,
        ttl: Duration,
    ) -> Self {
        Self {
            client,
            url: url.into(),
            user_agent: user_agent.into(),
            limiter,
            ttl,
            cache: RwLock::new(None),
        }
    }

    pub fn from_config(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self::new(
            client,
            config.futures_url.clone(),
            config.user_agent.clone(),
            Arc::new(RateLimiter::new(PROVIDER_NAME, config.futures_limit)),
            config.futures_cache_ttl(),
        )
    }

    /// Current board: cached while fresh, otherwise refetched. A failed or
    /// empty refresh falls back to the last good board.
    pub async fn quotes(&self) -> Vec<Quote> {
        let fresh_cached = self
            .cache
            .read()
            .as_ref()
            .filter(|b| b.fetched_at.elapsed() < self.ttl)
            .map(|b| b.quotes.clone());
        if let Some(quotes) = fresh_cached {
            return quotes;
        }

        let fresh = match self.limiter.schedule(|| self.scrape()).await {
            Ok(quotes) => quotes,
            Err(e) => {
                warn!("[Futures] scrape failed: {}", e);
                vec![]
            }
        };

        if fresh.is_empty() {
            debug!("[Futures] no rows scraped, serving cached board");
            return self
                .cache
                .read()
                .as_ref()
                .map(|b| b.quotes.clone())
                .unwrap_or_default();
        }

        *self.cache.write() = Some(CachedBoard {
            fetched_at: Instant::now(),
            quotes: fresh.clone(),
        });
        fresh
    }

    async fn scrape(&self) -> ProviderResult<Vec<Quote>> {
        let html = get_text(
            self.client
                .get(&self.url)
                .header(reqwest::header::USER_AGENT, &self.user_agent),
        )
        .await?;
        Ok(parse_board(&html))
    }
}

#[async_trait::async_trait]
impl QuoteSource for FuturesProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    /// The board is fetched whole; a non-empty `symbols` narrows the result.
    async fn fetch_quotes(&self, symbols: &[String]) -> Vec<Quote> {
        let board = self.quotes().await;
        if symbols.is_empty() {
            return board;
        }
        let wanted: Vec<String> = symbols.iter().map(|s| normalize_symbol(s)).collect();
        board.into_iter().filter(|q| wanted.contains(&q.symbol)).collect()
    }
}
