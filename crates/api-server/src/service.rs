//! HTTP handlers
//!
//! Upstream failures never surface here as errors: the aggregator degrades
//! them to empty lists. Only malformed requests and unknown symbols do.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json, Response,
    },
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, warn};

use mktdata_core::{AssetFilter, MarketSnapshot, Quote};
use mktdata_price_feed::MarketAggregator;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    aggregator: Arc<MarketAggregator>,
    started: Instant,
}

impl AppState {
    pub fn new(aggregator: Arc<MarketAggregator>) -> Self {
        Self {
            aggregator,
            started: Instant::now(),
        }
    }

    pub fn aggregator(&self) -> &Arc<MarketAggregator> {
        &self.aggregator
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Quote not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct QuotesResponse {
    pub quotes: Vec<Quote>,
}

#[derive(Debug, Deserialize)]
pub struct FxRequest {
    #[serde(default)]
    pub pairs: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct QuotesRequest {
    #[serde(default)]
    pub symbols: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct FilterQuery {
    pub filter: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

fn parse_filter(raw: Option<&str>) -> Result<AssetFilter, ApiError> {
    raw.unwrap_or_default()
        .parse()
        .map_err(|e: mktdata_core::ConfigError| ApiError::BadRequest(e.to_string()))
}

/// All routes, without middleware
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/fx", post(fx_quotes))
        .route("/api/quotes", post(batch_quotes))
        .route("/api/quotes/top", get(top_quotes))
        .route("/api/quotes/search", get(search_quotes))
        .route("/api/quotes/:symbol", get(get_quote))
        .route("/api/futures", get(futures_board))
        .route("/api/markets", get(markets))
        .route("/api/stream", get(stream_quotes))
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.aggregator.stats();
    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started.elapsed().as_secs(),
        "running": stats.running,
        "quotes": stats.quote_count,
        "subscribers": stats.subscriber_count,
        "updates": stats.update_count,
        "lastUpdateAgeMs": stats.last_update_age.map(|age| age.as_millis() as u64),
        "pollJobs": stats.poll_jobs,
        "stream": format!("{:?}", stats.stream_state).to_lowercase(),
        "streamSymbols": stats.stream_symbols,
        "streamReconnectAttempts": stats.stream_reconnect_attempts,
    }))
}

async fn fx_quotes(
    State(state): State<AppState>,
    Json(request): Json<FxRequest>,
) -> Json<QuotesResponse> {
    let quotes = state.aggregator.fx_quotes(&request.pairs).await;
    Json(QuotesResponse { quotes })
}

async fn batch_quotes(
    State(state): State<AppState>,
    Json(request): Json<QuotesRequest>,
) -> Json<QuotesResponse> {
    let quotes = state.aggregator.batch_quotes(&request.symbols).await;
    Json(QuotesResponse { quotes })
}

async fn futures_board(State(state): State<AppState>) -> Json<QuotesResponse> {
    let quotes = state.aggregator.futures_board().await;
    Json(QuotesResponse { quotes })
}

async fn markets(State(state): State<AppState>) -> Json<MarketSnapshot> {
    Json(state.aggregator.snapshot())
}

async fn top_quotes(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Result<Json<QuotesResponse>, ApiError> {
    let filter = parse_filter(query.filter.as_deref())?;
    let quotes = state.aggregator.router().list_top(filter);
    Ok(Json(QuotesResponse { quotes }))
}

async fn search_quotes(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Json<QuotesResponse> {
    let quotes = if query.q.trim().is_empty() {
        vec![]
    } else {
        state.aggregator.router().search(&query.q)
    };
    Json(QuotesResponse { quotes })
}

async fn get_quote(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Quote>, ApiError> {
    state
        .aggregator
        .router()
        .get_quote(&symbol)
        .map(Json)
        .ok_or(ApiError::NotFound(symbol))
}

/// One `quotes` event per committed batch, narrowed to the filter
async fn stream_quotes(
    State(state): State<AppState>,
    Query(query): Query<FilterQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let filter = parse_filter(query.filter.as_deref())?;
    debug!("SSE client attached (filter {})", filter);

    let deltas = BroadcastStream::new(state.aggregator.router().deltas());
    let events = deltas.filter_map(move |batch| {
        let batch = match batch {
            Ok(batch) => batch,
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!("SSE client lagged, skipped {} batches", skipped);
                return None;
            }
        };
        let quotes: Vec<Quote> = batch
            .iter()
            .filter(|q| filter.matches(q.asset_class))
            .cloned()
            .collect();
        if quotes.is_empty() {
            return None;
        }
        match Event::default().event("quotes").json_data(QuotesResponse { quotes }) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("Failed to encode SSE event: {}", e);
                None
            }
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use mktdata_core::{AssetClass, MarketConfig, RateLimitConfig};
    use serde_json::Value;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn upstream() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/quote"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "quoteResponse": { "result": [
                    { "symbol": "AAPL", "longName": "Apple Inc.", "regularMarketPrice": 190.0,
                      "regularMarketChange": 2.0, "regularMarketChangePercent": 1.06 },
                    { "symbol": "BTC-USD", "shortName": "Bitcoin USD", "regularMarketPrice": 60000.0 },
                    { "symbol": "^GSPC", "shortName": "S&P 500", "regularMarketPrice": 5000.0 }
                ]}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/latest"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "rates": { "USD": 1.08 }
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/futures"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<table><tr><td>Silver</td><td>29.10</td><td>0.20</td><td>0.69%</td></tr></table>",
            ))
            .mount(&server)
            .await;
        server
    }

    fn app(server: &MockServer) -> (Router, Arc<MarketAggregator>) {
        let mut config = MarketConfig::default();
        let open = RateLimitConfig {
            capacity: 100,
            refill_every_ms: 1_000,
            refill_amount: 100,
        };
        config.providers.yahoo_url = format!("{}/quote", server.uri());
        config.providers.fx_url = format!("{}/latest", server.uri());
        config.providers.futures_url = format!("{}/futures", server.uri());
        config.providers.yahoo_limit = open;
        config.providers.fx_limit = open;
        config.providers.futures_limit = open;

        let aggregator = Arc::new(MarketAggregator::new(config));
        (router(AppState::new(Arc::clone(&aggregator))), aggregator)
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let server = upstream().await;
        let (app, _) = app(&server);
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["quotes"], 0);
        assert_eq!(body["stream"], "disconnected");
    }

    #[tokio::test]
    async fn test_batch_quotes_then_lookup() {
        let server = upstream().await;
        let (app, _) = app(&server);

        let (status, _) = send(&app, get("/api/quotes/AAPL")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(
            &app,
            post_json("/api/quotes", json!({ "symbols": ["aapl", "BTC-USD", "AAPL", ""] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["quotes"].as_array().unwrap().len(), 3);

        let (status, quote) = send(&app, get("/api/quotes/aapl")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(quote["name"], "Apple Inc.");
        assert_eq!(quote["changePercent"], 1.06);
        assert_eq!(quote["assetClass"], "stock");
    }

    #[tokio::test]
    async fn test_top_and_search() {
        let server = upstream().await;
        let (app, _) = app(&server);
        send(&app, post_json("/api/quotes", json!({ "symbols": ["AAPL"] }))).await;

        let (_, body) = send(&app, get("/api/quotes/top?filter=crypto")).await;
        let quotes = body["quotes"].as_array().unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0]["symbol"], "BTC-USD");

        let (_, body) = send(&app, get("/api/quotes/top")).await;
        assert_eq!(body["quotes"].as_array().unwrap().len(), 3);

        let (status, body) = send(&app, get("/api/quotes/top?filter=bananas")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().is_some());

        let (_, body) = send(&app, get("/api/quotes/search?q=bitcoin")).await;
        assert_eq!(body["quotes"][0]["symbol"], "BTC-USD");

        let (_, body) = send(&app, get("/api/quotes/search?q=")).await;
        assert!(body["quotes"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_fx_and_futures() {
        let server = upstream().await;
        let (app, _) = app(&server);

        let request = post_json("/api/fx", json!({ "pairs": ["EURUSD", "nope"] }));
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
        let quotes = body["quotes"].as_array().unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0]["symbol"], "EURUSD");
        assert_eq!(quotes[0]["change"], 0.0);

        let (_, body) = send(&app, get("/api/futures")).await;
        assert_eq!(body["quotes"][0]["symbol"], "SILVER");
        assert_eq!(body["quotes"][0]["assetClass"], "metals");
    }

    #[tokio::test]
    async fn test_markets_snapshot() {
        let server = upstream().await;
        let (app, aggregator) = app(&server);

        let (_, body) = send(&app, get("/api/markets")).await;
        assert!(body["timestamp"].is_null());

        aggregator.load_first(AssetFilter::All).await;
        let (_, body) = send(&app, get("/api/markets")).await;
        assert!(body["timestamp"].is_string());
        assert_eq!(body["indexes"][0]["symbol"], "^GSPC");
        assert_eq!(body["crypto"][0]["symbol"], "BTC-USD");
    }

    #[tokio::test]
    async fn test_stream_emits_filtered_batches() {
        let server = upstream().await;
        let (app, aggregator) = app(&server);

        let response = app.clone().oneshot(get("/api/stream?filter=crypto")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()["content-type"].to_str().unwrap(),
            "text/event-stream"
        );

        let router = aggregator.router();
        router.ingest(vec![Quote::new("AAPL", AssetClass::Stock, 1.0)]);
        router.ingest(vec![Quote::new("ETH-USD", AssetClass::Crypto, 3000.0)]);

        let mut body = response.into_body().into_data_stream();
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), body.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8(frame.to_vec()).unwrap();
        assert!(text.starts_with("event: quotes"));
        assert!(text.contains("ETH-USD"));
        assert!(!text.contains("AAPL"));
    }
}
