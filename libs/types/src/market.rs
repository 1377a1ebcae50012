//! Market context types
//!
//! A `MarketContext` names one stream of market data: which venue it came
//! from, which symbol, and which bar granularity. Every event and every
//! instance key carries one, and routing matches on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported bar granularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Granularity {
    /// 1 minute
    #[serde(rename = "1m")]
    M1,
    /// 3 minutes
    #[serde(rename = "3m")]
    M3,
    /// 5 minutes
    #[serde(rename = "5m")]
    M5,
    /// 15 minutes
    #[serde(rename = "15m")]
    M15,
    /// 30 minutes
    #[serde(rename = "30m")]
    M30,
    /// 1 hour
    #[serde(rename = "1h")]
    H1,
    /// 4 hours
    #[serde(rename = "4h")]
    H4,
    /// 1 day
    #[serde(rename = "1d")]
    D1,
    /// 1 week
    #[serde(rename = "1w")]
    W1,
}

impl Granularity {
    /// Duration of one bar in milliseconds.
    pub fn duration_millis(&self) -> i64 {
        match self {
            Granularity::M1 => 60_000,
            Granularity::M3 => 3 * 60_000,
            Granularity::M5 => 5 * 60_000,
            Granularity::M15 => 15 * 60_000,
            Granularity::M30 => 30 * 60_000,
            Granularity::H1 => 3_600_000,
            Granularity::H4 => 4 * 3_600_000,
            Granularity::D1 => 86_400_000,
            Granularity::W1 => 7 * 86_400_000,
        }
    }

    /// All supported granularities, shortest first.
    pub fn all() -> &'static [Granularity] {
        &[
            Granularity::M1,
            Granularity::M3,
            Granularity::M5,
            Granularity::M15,
            Granularity::M30,
            Granularity::H1,
            Granularity::H4,
            Granularity::D1,
            Granularity::W1,
        ]
    }

    /// Align a timestamp to this granularity's bar boundary (floor).
    pub fn align_to_boundary(&self, timestamp_millis: i64) -> i64 {
        timestamp_millis.div_euclid(self.duration_millis()) * self.duration_millis()
    }

    /// Short label used in keys and channel names (`"5m"`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Granularity::M1 => "1m",
            Granularity::M3 => "3m",
            Granularity::M5 => "5m",
            Granularity::M15 => "15m",
            Granularity::M30 => "30m",
            Granularity::H1 => "1h",
            Granularity::H4 => "4h",
            Granularity::D1 => "1d",
            Granularity::W1 => "1w",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a granularity label is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown granularity: {0}")]
pub struct ParseGranularityError(pub String);

impl FromStr for Granularity {
    type Err = ParseGranularityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Granularity::all()
            .iter()
            .copied()
            .find(|g| g.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseGranularityError(s.to_string()))
    }
}

/// Identifies one market data stream: (source, symbol, granularity).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MarketContext {
    /// Venue or feed name, lowercased (e.g. `binance`).
    pub source: String,
    /// Venue symbol (e.g. `BTCUSDT`).
    pub symbol: String,
    pub granularity: Granularity,
}

impl MarketContext {
    pub fn new(
        source: impl Into<String>,
        symbol: impl Into<String>,
        granularity: Granularity,
    ) -> Self {
        Self {
            source: source.into().to_ascii_lowercase(),
            symbol: symbol.into(),
            granularity,
        }
    }

    /// Channel key used when publishing live results (`binance:BTCUSDT:5m`).
    pub fn channel_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for MarketContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.source, self.symbol, self.granularity)
    }
}
