//! Batch REST quote provider (Yahoo Finance v7 quote endpoint).
//!
//! Symbols are split into fixed-size chunks that are requested
//! concurrently, each through the provider's rate limiter. A failing chunk
//! contributes nothing; the other chunks still return their quotes.

pub mod models;

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use mktdata_core::{AssetClass, ProviderConfig, ProviderError, ProviderResult, Quote};

use self::models::{YahooQuote, YahooQuoteResponse};
use super::{get_text, QuoteSource};
use crate::rate_limiter::RateLimiter;

const PROVIDER_NAME: &str = "yahoo";

/// Map a symbol and the upstream `quoteType` to an asset class.
///
/// Naming conventions win over the raw type: `^` prefix is an index,
/// `=F` suffix a future, `=X` suffix a currency pair, `-USD` suffix a coin.
pub fn classify_symbol(symbol: &str, quote_type: Option<&str>) -> AssetClass {
    if symbol.starts_with('^') {
        return AssetClass::Index;
    }
    if symbol.ends_with("=F") {
        return AssetClass::Future;
    }
    if symbol.ends_with("=X") {
        return AssetClass::Forex;
    }
    if symbol.ends_with("-USD") {
        return AssetClass::Crypto;
    }
    match quote_type.map(|t| t.to_ascii_uppercase()).as_deref() {
        Some("INDEX") => AssetClass::Index,
        Some("FUTURE") => AssetClass::Future,
        Some("CURRENCY") => AssetClass::Forex,
        Some("CRYPTOCURRENCY") => AssetClass::Crypto,
        _ => AssetClass::Stock,
    }
}

impl YahooQuote {
    /// Normalize; quotes without a usable price are dropped.
    fn into_quote(self) -> Option<Quote> {
        let price = self.regular_market_price.filter(|p| p.is_finite() && *p != 0.0)?;
        let class = classify_symbol(&self.symbol, self.quote_type.as_deref());
        let name = self
            .long_name
            .or(self.short_name)
            .unwrap_or_else(|| self.symbol.clone());

        Some(
            Quote::new(&self.symbol, class, price)
                .with_name(name)
                .with_volume(self.regular_market_volume)
                .with_supplied_change(
                    self.regular_market_change.unwrap_or(0.0),
                    self.regular_market_change_percent.unwrap_or(0.0),
                ),
        )
    }
}

/// Batch quote adapter
pub struct YahooProvider {
    client: reqwest::Client,
    base_url: String,
    chunk_size: usize,
    limiter: Arc<RateLimiter>,
}

impl YahooProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        chunk_size: usize,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            chunk_size: chunk_size.max(1),
            limiter,
        }
    }

    pub fn from_config(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self::new(
            client,
            config.yahoo_url.clone(),
            config.chunk_size,
            Arc::new(RateLimiter::new(PROVIDER_NAME, config.yahoo_limit)),
        )
    }

    /// Fetch and normalize all `symbols`, chunked and concurrent.
    pub async fn quotes(&self, symbols: &[String]) -> Vec<Quote> {
        let symbols: Vec<&str> = symbols
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return vec![];
        }

        let requests = symbols
            .chunks(self.chunk_size)
            .enumerate()
            .map(|(index, chunk)| self.fetch_chunk_or_empty(index, chunk));

        join_all(requests).await.into_iter().flatten().collect()
    }

    async fn fetch_chunk_or_empty(&self, index: usize, chunk: &[&str]) -> Vec<Quote> {
        match self.limiter.schedule(|| self.fetch_chunk(chunk)).await {
            Ok(quotes) => {
                debug!("[Yahoo] chunk {} returned {} quotes", index, quotes.len());
                quotes
            }
            Err(e) => {
                warn!("[Yahoo] chunk {} ({} symbols) failed: {}", index, chunk.len(), e);
                vec![]
            }
        }
    }

    async fn fetch_chunk(&self, chunk: &[&str]) -> ProviderResult<Vec<Quote>> {
        let joined = chunk.join(",");
        let body = get_text(
            self.client
                .get(&self.base_url)
                .query(&[("symbols", joined.as_str())]),
        )
        .await?;

        let parsed: YahooQuoteResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;

        Ok(parsed
            .quote_response
            .result
            .into_iter()
            .filter_map(YahooQuote::into_quote)
            .collect())
    }
}

#[async_trait::async_trait]
impl QuoteSource for YahooProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Vec<Quote> {
        self.quotes(symbols).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktdata_core::{ChangeBasis, RateLimitConfig};
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Answers every requested symbol at price 10, except chunks that
    /// contain `fail_on`, which get a 500.
    struct EchoQuotes {
        fail_on: Option<&'static str>,
    }

    fn requested_symbols(request: &Request) -> Vec<String> {
        request
            .url
            .query_pairs()
            .find(|(k, _)| k == "symbols")
            .map(|(_, v)| v.split(',').map(str::to_string).collect())
            .unwrap_or_default()
    }

    impl Respond for EchoQuotes {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let symbols = requested_symbols(request);
            if let Some(fail) = self.fail_on {
                if symbols.iter().any(|s| s == fail) {
                    return ResponseTemplate::new(500);
                }
            }
            let result: Vec<_> = symbols
                .iter()
                .map(|s| {
                    json!({
                        "symbol": s,
                        "regularMarketPrice": 10.0,
                        "regularMarketChange": 0.5,
                        "regularMarketChangePercent": 5.0
                    })
                })
                .collect();
            ResponseTemplate::new(200)
                .set_body_json(json!({ "quoteResponse": { "result": result } }))
        }
    }

    fn provider(server: &MockServer) -> YahooProvider {
        let limiter = Arc::new(RateLimiter::new(
            "yahoo-test",
            RateLimitConfig {
                capacity: 10,
                refill_every_ms: 1_000,
                refill_amount: 10,
            },
        ));
        YahooProvider::new(
            reqwest::Client::new(),
            format!("{}/v7/finance/quote", server.uri()),
            50,
            limiter,
        )
    }

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("S{i:03}")).collect()
    }

    #[test]
    fn test_classify_symbol() {
        assert_eq!(classify_symbol("^GSPC", None), AssetClass::Index);
        assert_eq!(classify_symbol("ES=F", None), AssetClass::Future);
        assert_eq!(classify_symbol("EURUSD=X", None), AssetClass::Forex);
        assert_eq!(classify_symbol("BTC-USD", None), AssetClass::Crypto);
        assert_eq!(classify_symbol("DX-Y.NYB", Some("INDEX")), AssetClass::Index);
        assert_eq!(classify_symbol("AAPL", Some("EQUITY")), AssetClass::Stock);
        assert_eq!(classify_symbol("AAPL", None), AssetClass::Stock);
    }

    #[test]
    fn test_into_quote_drops_missing_price() {
        let raw: YahooQuote = serde_json::from_value(json!({ "symbol": "X" })).unwrap();
        assert!(raw.into_quote().is_none());
    }

    #[test]
    fn test_into_quote_keeps_official_change() {
        let raw: YahooQuote = serde_json::from_value(json!({
            "symbol": "^gspc",
            "shortName": "S&P 500",
            "regularMarketPrice": 5000.0,
            "regularMarketChange": -12.5,
            "regularMarketChangePercent": -0.25
        }))
        .unwrap();
        let quote = raw.into_quote().unwrap();
        assert_eq!(quote.symbol, "^GSPC");
        assert_eq!(quote.name, "S&P 500");
        assert_eq!(quote.asset_class, AssetClass::Index);
        assert_eq!(quote.change, -12.5);
        assert_eq!(quote.change_basis, ChangeBasis::Supplied);
    }

    #[tokio::test]
    async fn test_chunks_and_isolates_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v7/finance/quote"))
            .respond_with(EchoQuotes { fail_on: Some("S075") })
            .mount(&server)
            .await;

        let quotes = provider(&server).quotes(&symbols(120)).await;

        let requests = server.received_requests().await.unwrap();
        let mut sizes: Vec<usize> = requests.iter().map(|r| requested_symbols(r).len()).collect();
        sizes.sort_unstable();
        assert_eq!(sizes, vec![20, 50, 50]);

        // Chunk 2 (S050..S099) failed, chunks 1 and 3 still delivered
        assert_eq!(quotes.len(), 70);
        assert!(quotes.iter().any(|q| q.symbol == "S000"));
        assert!(quotes.iter().any(|q| q.symbol == "S119"));
        assert!(!quotes.iter().any(|q| q.symbol == "S075"));
    }

    #[tokio::test]
    async fn test_malformed_body_yields_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nope</html>"))
            .mount(&server)
            .await;

        let quotes = provider(&server).quotes(&symbols(3)).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_empty_symbol_list_makes_no_request() {
        let server = MockServer::start().await;
        let quotes = provider(&server).quotes(&[" ".to_string()]).await;
        assert!(quotes.is_empty());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
