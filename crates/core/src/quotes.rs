//! Quote types

use serde::{Deserialize, Serialize};

use crate::{now_ms, normalize_symbol, AssetClass, ChangeBasis};

/// Normalized price record for one tradable symbol
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,
    pub name: String,
    pub asset_class: AssetClass,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<f64>,
    pub last_update: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sparkline: Option<Vec<f64>>,
    #[serde(skip)]
    pub change_basis: ChangeBasis,
}

impl Quote {
    /// Quote with no change information; the router derives it on ingest
    pub fn new(symbol: &str, asset_class: AssetClass, price: f64) -> Self {
        let symbol = normalize_symbol(symbol);
        Self {
            name: symbol.clone(),
            symbol,
            asset_class,
            price,
            change: 0.0,
            change_percent: 0.0,
            volume: None,
            last_update: now_ms(),
            sparkline: None,
            change_basis: ChangeBasis::Derived,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !name.trim().is_empty() {
            self.name = name;
        }
        self
    }

    pub fn with_volume(mut self, volume: Option<f64>) -> Self {
        self.volume = volume.filter(|v| v.is_finite());
        self
    }

    /// Attach an upstream-supplied change, which the router keeps as-is
    pub fn with_supplied_change(mut self, change: f64, change_percent: f64) -> Self {
        self.change = change;
        self.change_percent = change_percent;
        self.change_basis = ChangeBasis::Supplied;
        self
    }

    pub fn with_timestamp(mut self, timestamp_ms: u64) -> Self {
        self.last_update = timestamp_ms;
        self
    }

    /// Recompute change figures against a prior price
    pub fn derive_change(&mut self, previous: Option<f64>) {
        let (change, pct) = change_between(previous, self.price);
        self.change = change;
        self.change_percent = pct;
    }

    /// Case-insensitive substring match against symbol and name
    pub fn matches_query(&self, query_lower: &str) -> bool {
        self.symbol.to_lowercase().contains(query_lower)
            || self.name.to_lowercase().contains(query_lower)
    }
}

/// `(change, change_percent)` of `price` relative to `previous`.
/// Zero when there is no previous value; percent is zero when previous is zero.
pub fn change_between(previous: Option<f64>, price: f64) -> (f64, f64) {
    match previous {
        Some(prev) => {
            let change = price - prev;
            let pct = if prev != 0.0 { change / prev * 100.0 } else { 0.0 };
            (change, pct)
        }
        None => (0.0, 0.0),
    }
}

/// Incremental tick delivered by a streaming feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteUpdate {
    pub symbol: String,
    pub price: f64,
    pub change: f64,
    pub change_percent: f64,
    pub volume: Option<f64>,
    pub timestamp_ms: u64,
}

impl QuoteUpdate {
    pub fn into_quote(self, asset_class: AssetClass) -> Quote {
        Quote::new(&self.symbol, asset_class, self.price)
            .with_volume(self.volume)
            .with_timestamp(self.timestamp_ms)
    }
}

/// Aggregate snapshot served to the dashboard overview
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub indexes: Vec<Quote>,
    pub crypto: Vec<Quote>,
    pub forex: Vec<Quote>,
    pub stocks: Vec<Quote>,
    pub timestamp: Option<chrono::DateTime<chrono::Utc>>,
}

impl MarketSnapshot {
    pub fn quote_count(&self) -> usize {
        self.indexes.len() + self.crypto.len() + self.forex.len() + self.stocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quote_count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_change_between() {
        assert_eq!(change_between(None, 10.0), (0.0, 0.0));
        let (c, p) = change_between(Some(150.0), 153.0);
        assert!((c - 3.0).abs() < 1e-9);
        assert!((p - 2.0).abs() < 1e-9);
        assert_eq!(change_between(Some(0.0), 5.0), (5.0, 0.0));
    }

    #[test]
    fn test_quote_wire_format() {
        let q = Quote::new("aapl", AssetClass::Stock, 150.0).with_name("Apple Inc.");
        let json = serde_json::to_value(&q).unwrap();
        assert_eq!(json["symbol"], "AAPL");
        assert_eq!(json["assetClass"], "stock");
        assert_eq!(json["changePercent"], 0.0);
        assert!(json.get("volume").is_none());
        assert!(json.get("changeBasis").is_none());
    }

    #[test]
    fn test_blank_name_falls_back_to_symbol() {
        let q = Quote::new("MSFT", AssetClass::Stock, 1.0).with_name("  ");
        assert_eq!(q.name, "MSFT");
    }
}
