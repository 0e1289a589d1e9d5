//! Pull-based upstream provider adapters
//!
//! Every adapter normalizes its raw upstream payload into [`Quote`] at the
//! boundary and never surfaces an error to its caller: failures are logged
//! and degrade to an empty result.

pub mod futures;
pub mod fx;
pub mod yahoo;

use std::time::Duration;

use mktdata_core::{ProviderError, Quote};

pub use self::futures::{classify_row, FuturesProvider};
pub use self::fx::FxProvider;
pub use self::yahoo::{classify_symbol, YahooProvider};

/// A pull-based quote source driven by the polling scheduler.
#[async_trait::async_trait]
pub trait QuoteSource: Send + Sync {
    /// Short identifier used in logs
    fn name(&self) -> &str;

    /// Fetch quotes for `symbols`. Returns an empty list on failure.
    async fn fetch_quotes(&self, symbols: &[String]) -> Vec<Quote>;
}

/// Shared HTTP client with an explicit request timeout.
pub fn http_client(timeout: Duration, user_agent: &str) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(user_agent)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("Failed to build configured HTTP client ({}), using defaults", e);
            reqwest::Client::new()
        })
}

/// Map a transport error into [`ProviderError`].
pub(crate) fn transport_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout
    } else if let Some(status) = e.status() {
        ProviderError::Status(status.as_u16())
    } else if e.is_decode() {
        ProviderError::Parse(e.to_string())
    } else {
        ProviderError::Http(e.to_string())
    }
}

/// Send a GET and return the body, treating non-2xx as an error.
pub(crate) async fn get_text(
    request: reqwest::RequestBuilder,
) -> Result<String, ProviderError> {
    let response = request.send().await.map_err(transport_error)?;
    let status = response.status();
    if !status.is_success() {
        return Err(ProviderError::Status(status.as_u16()));
    }
    response.text().await.map_err(transport_error)
}
