//! FX rate provider.
//!
//! One request fetches a base currency's rates against a list of quote
//! currencies. Change figures are computed against the previously observed
//! rate of the same pair, held per adapter instance; the first observation
//! of a pair always reports zero change.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use serde::Deserialize;
use tracing::{debug, warn};

use mktdata_core::{
    change_between, AssetClass, ProviderConfig, ProviderError, ProviderResult, Quote,
};

use super::{get_text, QuoteSource};
use crate::rate_limiter::RateLimiter;

const PROVIDER_NAME: &str = "fx";

/// Raw rate response. Both `success: false` and `result: "error"` flavours
/// of upstream failure are recognised.
#[derive(Debug, Deserialize)]
struct FxResponse {
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    rates: HashMap<String, f64>,
}

impl FxResponse {
    fn is_failure(&self) -> bool {
        self.success == Some(false) || self.result.as_deref() == Some("error")
    }
}

/// Split a six-letter pair (`EURUSD`) into base and quote currencies.
pub fn split_pair(pair: &str) -> ProviderResult<(String, String)> {
    let pair = pair.trim();
    if pair.len() != 6 || !pair.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ProviderError::InvalidSymbol(pair.to_string()));
    }
    let upper = pair.to_ascii_uppercase();
    Ok((upper[..3].to_string(), upper[3..].to_string()))
}

/// FX adapter with its own rolling previous-rate map
pub struct FxProvider {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    previous: DashMap<String, f64>,
}

impl FxProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            limiter,
            previous: DashMap::new(),
        }
    }

    pub fn from_config(config: &ProviderConfig, client: reqwest::Client) -> Self {
        Self::new(
            client,
            config.fx_url.clone(),
            Arc::new(RateLimiter::new(PROVIDER_NAME, config.fx_limit)),
        )
    }

    /// Quotes for `base` against each of `symbols`. Empty on any failure.
    pub async fn get_pairs(&self, base: &str, symbols: &[String]) -> Vec<Quote> {
        let base = base.trim().to_ascii_uppercase();
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_ascii_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        if symbols.is_empty() {
            return vec![];
        }

        let rates = match self.limiter.schedule(|| self.fetch_rates(&base, &symbols)).await {
            Ok(rates) => rates,
            Err(e) => {
                warn!("[FX] fetch for base {} failed: {}", base, e);
                return vec![];
            }
        };

        let quotes: Vec<Quote> = symbols
            .iter()
            .filter_map(|currency| {
                let rate = *rates.get(currency)?;
                if !rate.is_finite() || rate <= 0.0 {
                    return None;
                }
                Some(self.observe(&base, currency, rate))
            })
            .collect();

        debug!("[FX] {} pairs for base {}", quotes.len(), base);
        quotes
    }

    /// Quotes for six-letter pairs, one upstream call per distinct base.
    /// Malformed pairs are ignored.
    pub async fn fetch_pairs(&self, pairs: &[String]) -> Vec<Quote> {
        let mut by_base: Vec<(String, Vec<String>)> = Vec::new();
        for pair in pairs {
            let (base, quote) = match split_pair(pair) {
                Ok(split) => split,
                Err(e) => {
                    debug!("[FX] Skipping pair: {}", e);
                    continue;
                }
            };
            match by_base.iter_mut().find(|(b, _)| *b == base) {
                Some((_, quotes)) => {
                    if !quotes.contains(&quote) {
                        quotes.push(quote)
                    }
                }
                None => by_base.push((base, vec![quote])),
            }
        }

        let requests = by_base
            .iter()
            .map(|(base, quotes)| self.get_pairs(base, quotes));
        join_all(requests).await.into_iter().flatten().collect()
    }

    /// Last rate observed for a pair, if any.
    pub fn previous_rate(&self, pair: &str) -> Option<f64> {
        self.previous.get(pair).map(|r| *r.value())
    }

    fn observe(&self, base: &str, currency: &str, rate: f64) -> Quote {
        let symbol = format!("{base}{currency}");
        let previous = self.previous.insert(symbol.clone(), rate);
        let (change, change_percent) = change_between(previous.or(Some(rate)), rate);

        Quote::new(&symbol, AssetClass::Forex, rate)
            .with_name(format!("{base}/{currency}"))
            .with_supplied_change(change, change_percent)
    }

    async fn fetch_rates(
        &self,
        base: &str,
        symbols: &[String],
    ) -> ProviderResult<HashMap<String, f64>> {
        let joined = symbols.join(",");
        let body = get_text(
            self.client
                .get(&self.base_url)
                .query(&[("base", base), ("symbols", joined.as_str())]),
        )
        .await?;

        let parsed: FxResponse =
            serde_json::from_str(&body).map_err(|e| ProviderError::Parse(e.to_string()))?;
        if parsed.is_failure() {
            return Err(ProviderError::Parse("upstream reported failure".to_string()));
        }
        Ok(parsed.rates)
    }
}

#[async_trait::async_trait]
impl QuoteSource for FxProvider {
    fn name(&self) -> &str {
        PROVIDER_NAME
    }

    /// `symbols` are six-letter pairs
    async fn fetch_quotes(&self, symbols: &[String]) -> Vec<Quote> {
        self.fetch_pairs(symbols).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktdata_core::{ChangeBasis, RateLimitConfig};
    use serde_json::json;
    use wiremock::matchers::{method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(server: &MockServer) -> FxProvider {
        let limiter = Arc::new(RateLimiter::new(
            "fx-test",
            RateLimitConfig {
                capacity: 10,
                refill_every_ms: 60_000,
                refill_amount: 10,
            },
        ));
        FxProvider::new(reqwest::Client::new(), format!("{}/latest", server.uri()), limiter)
    }

    fn rates(eur: f64) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "base": "USD",
            "rates": { "EUR": eur, "GBP": 0.8, "XXX": 0.0 }
        }))
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_split_pair() {
        assert_eq!(split_pair("eurusd").unwrap(), ("EUR".to_string(), "USD".to_string()));
        assert!(matches!(
            split_pair("EURUS"),
            Err(ProviderError::InvalidSymbol(s)) if s == "EURUS"
        ));
        assert!(matches!(split_pair("EUR/US"), Err(ProviderError::InvalidSymbol(_))));
    }

    #[tokio::test]
    async fn test_first_observation_reports_zero_change() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("base", "USD"))
            .respond_with(rates(0.9))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("base", "USD"))
            .respond_with(rates(0.99))
            .mount(&server)
            .await;

        let fx = provider(&server);
        let first = fx.get_pairs("usd", &strings(&["EUR", "GBP"])).await;
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].symbol, "USDEUR");
        assert_eq!(first[0].name, "USD/EUR");
        assert_eq!(first[0].change, 0.0);
        assert_eq!(first[0].change_basis, ChangeBasis::Supplied);

        let second = fx.get_pairs("USD", &strings(&["EUR"])).await;
        assert_eq!(second.len(), 1);
        assert!((second[0].change - 0.09).abs() < 1e-9);
        assert!((second[0].change_percent - 10.0).abs() < 1e-6);
        assert_eq!(fx.previous_rate("USDEUR"), Some(0.99));
    }

    #[tokio::test]
    async fn test_instances_do_not_share_history() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(rates(0.9)).mount(&server).await;

        let a = provider(&server);
        let b = provider(&server);
        a.get_pairs("USD", &strings(&["EUR"])).await;

        assert_eq!(a.previous_rate("USDEUR"), Some(0.9));
        assert_eq!(b.previous_rate("USDEUR"), None);
    }

    #[tokio::test]
    async fn test_skips_unusable_rates() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).respond_with(rates(0.9)).mount(&server).await;

        let quotes = provider(&server).get_pairs("USD", &strings(&["XXX", "JPY"])).await;
        assert!(quotes.is_empty());
    }

    #[tokio::test]
    async fn test_failure_response_yields_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": false })))
            .mount(&server)
            .await;
        assert!(provider(&server).get_pairs("USD", &strings(&["EUR"])).await.is_empty());
    }

    #[tokio::test]
    async fn test_server_error_yields_empty() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        assert!(provider(&server).get_pairs("USD", &strings(&["EUR"])).await.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_pairs_groups_by_base() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("base", "USD"))
            .respond_with(rates(0.9))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("base", "EUR"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "rates": { "JPY": 160.0 }
            })))
            .mount(&server)
            .await;

        let fx = provider(&server);
        let quotes = fx
            .fetch_pairs(&strings(&["USDEUR", "usdgbp", "EURJPY", "bogus", "USDEUR"]))
            .await;

        let mut symbols: Vec<_> = quotes.iter().map(|q| q.symbol.as_str()).collect();
        symbols.sort_unstable();
        assert_eq!(symbols, vec!["EURJPY", "USDEUR", "USDGBP"]);
        assert_eq!(server.received_requests().await.unwrap().len(), 2);
    }
}
