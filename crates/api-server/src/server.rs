//! HTTP server configuration and startup

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use mktdata_core::{MarketConfig, ServerConfig};
use mktdata_price_feed::MarketAggregator;

use crate::service::{self, AppState};

/// HTTP server wrapper owning the aggregator lifecycle
pub struct ApiServer {
    config: ServerConfig,
    aggregator: Arc<MarketAggregator>,
}

impl ApiServer {
    pub fn new(config: ServerConfig) -> Self {
        let aggregator = Arc::new(MarketAggregator::new(config.market.clone()));
        Self { config, aggregator }
    }

    pub fn aggregator(&self) -> &Arc<MarketAggregator> {
        &self.aggregator
    }

    /// Routes plus CORS and request tracing
    pub fn app(&self) -> Router {
        service::router(AppState::new(Arc::clone(&self.aggregator)))
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }

    /// Start the aggregator, serve until `shutdown` fires, then stop it.
    pub async fn start_with_shutdown(
        &self,
        shutdown: tokio::sync::oneshot::Receiver<()>,
    ) -> anyhow::Result<()> {
        let addr: SocketAddr = self.address().parse()?;

        self.aggregator.start().await?;

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!("Failed to bind {}: {}", addr, e);
                self.aggregator.stop().await;
                return Err(e.into());
            }
        };
        info!("HTTP server listening on {} (with graceful shutdown)", addr);

        let served = axum::serve(listener, self.app())
            .with_graceful_shutdown(async {
                shutdown.await.ok();
                info!("Shutdown signal received");
            })
            .await;

        self.aggregator.stop().await;
        served?;
        Ok(())
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

/// Builder for server configuration
pub struct ApiServerBuilder {
    config: ServerConfig,
}

impl ApiServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn market(mut self, market: MarketConfig) -> Self {
        self.config.market = market;
        self
    }

    pub fn build(self) -> ApiServer {
        ApiServer::new(self.config)
    }
}

impl Default for ApiServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.host, "127.0.0.1");
    }

    #[test]
    fn test_builder() {
        let server = ApiServerBuilder::new().host("0.0.0.0").port(9000).build();
        assert_eq!(server.address(), "0.0.0.0:9000");
    }

    #[tokio::test]
    async fn test_app_answers_cors_preflight() {
        let server = ApiServerBuilder::new().build();
        let response = server
            .app()
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/api/quotes")
                    .header("origin", "http://localhost:3000")
                    .header("access-control-request-method", "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("access-control-allow-origin"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_aggregator() {
        let mut market = MarketConfig::default();
        // Keep the test offline: unreachable upstreams degrade to empty data
        market.providers.yahoo_url = "http://127.0.0.1:9/quote".into();
        market.providers.fx_url = "http://127.0.0.1:9/latest".into();
        market.providers.futures_url = "http://127.0.0.1:9/futures".into();
        market.stream.ws_url = "ws://127.0.0.1:9".into();
        market.stream.backoff_ms = vec![60_000];

        let server = ApiServerBuilder::new().port(0).market(market).build();
        let (tx, rx) = tokio::sync::oneshot::channel();
        tx.send(()).unwrap();

        server.start_with_shutdown(rx).await.unwrap();
        assert!(!server.aggregator().is_running());
    }
}
