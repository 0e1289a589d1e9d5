//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ConfigError;

/// Coarse category of a quote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetClass {
    Stock,
    Index,
    Future,
    Crypto,
    Forex,
    Metals,
    Energy,
    Grains,
    Softs,
    Meats,
    Bonds,
}

impl AssetClass {
    pub fn name(&self) -> &'static str {
        match self {
            AssetClass::Stock => "stock",
            AssetClass::Index => "index",
            AssetClass::Future => "future",
            AssetClass::Crypto => "crypto",
            AssetClass::Forex => "forex",
            AssetClass::Metals => "metals",
            AssetClass::Energy => "energy",
            AssetClass::Grains => "grains",
            AssetClass::Softs => "softs",
            AssetClass::Meats => "meats",
            AssetClass::Bonds => "bonds",
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for AssetClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Tab names are plural in the UI ("stocks", "indexes"), accept both
        let class = match s.trim().to_ascii_lowercase().as_str() {
            "stock" | "stocks" => AssetClass::Stock,
            "index" | "indexes" | "indices" => AssetClass::Index,
            "future" | "futures" => AssetClass::Future,
            "crypto" => AssetClass::Crypto,
            "forex" | "fx" => AssetClass::Forex,
            "metals" | "metal" => AssetClass::Metals,
            "energy" => AssetClass::Energy,
            "grains" => AssetClass::Grains,
            "softs" => AssetClass::Softs,
            "meats" => AssetClass::Meats,
            "bonds" => AssetClass::Bonds,
            other => return Err(ConfigError::Invalid(format!("unknown asset class: {other}"))),
        };
        Ok(class)
    }
}

/// View filter used by `list_top` and the streaming endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssetFilter {
    #[default]
    All,
    Only(AssetClass),
}

impl AssetFilter {
    pub fn matches(&self, class: AssetClass) -> bool {
        match self {
            AssetFilter::All => true,
            AssetFilter::Only(c) => *c == class,
        }
    }
}

impl FromStr for AssetFilter {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("all") {
            return Ok(AssetFilter::All);
        }
        trimmed.parse().map(AssetFilter::Only)
    }
}

impl fmt::Display for AssetFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AssetFilter::All => write!(f, "all"),
            AssetFilter::Only(c) => write!(f, "{c}"),
        }
    }
}

/// Where a quote's change figures come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeBasis {
    /// Upstream supplied an official change (batch REST, FX adapter)
    Supplied,
    /// Router derives change from the prior cached price
    #[default]
    Derived,
}

/// Current wall-clock time in milliseconds
pub fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Canonical cache key for a symbol
pub fn normalize_symbol(symbol: &str) -> String {
    symbol.trim().to_ascii_uppercase()
}
