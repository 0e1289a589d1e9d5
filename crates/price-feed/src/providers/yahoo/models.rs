//! Yahoo Finance batch quote response models.
//!
//! Only the fields the adapter normalizes are modelled; anything else in
//! the payload is ignored by serde.

use serde::Deserialize;

/// Top-level wrapper of the v7 quote endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YahooQuoteResponse {
    pub quote_response: YahooQuoteResult,
}

#[derive(Debug, Deserialize)]
pub struct YahooQuoteResult {
    #[serde(default)]
    pub result: Vec<YahooQuote>,
}

/// One symbol in the batch
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YahooQuote {
    pub symbol: String,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    pub quote_type: Option<String>,
    pub regular_market_price: Option<f64>,
    pub regular_market_change: Option<f64>,
    pub regular_market_change_percent: Option<f64>,
    pub regular_market_volume: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_batch() {
        let json = r#"{
            "quoteResponse": {
                "result": [
                    {
                        "symbol": "AAPL",
                        "shortName": "Apple Inc.",
                        "longName": "Apple Inc.",
                        "quoteType": "EQUITY",
                        "regularMarketPrice": 189.5,
                        "regularMarketChange": 1.25,
                        "regularMarketChangePercent": 0.66,
                        "regularMarketVolume": 51234567,
                        "exchange": "NMS"
                    },
                    { "symbol": "ZZZZ" }
                ],
                "error": null
            }
        }"#;
        let parsed: YahooQuoteResponse = serde_json::from_str(json).unwrap();
        let result = parsed.quote_response.result;
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].regular_market_price, Some(189.5));
        assert_eq!(result[0].regular_market_volume, Some(51_234_567.0));
        assert_eq!(result[1].regular_market_price, None);
    }

    #[test]
    fn test_deserialize_missing_result() {
        let json = r#"{ "quoteResponse": { "error": "bad" } }"#;
        let parsed: YahooQuoteResponse = serde_json::from_str(json).unwrap();
        assert!(parsed.quote_response.result.is_empty());
    }
}
