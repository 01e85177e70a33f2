//! Asset identifiers: the closed set of tracked coins.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the four tracked assets.
///
/// The set is closed: nothing adds assets at runtime, so per-asset state can
/// live in fixed arrays indexed by [`AssetId::index`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AssetId {
    Eth,
    Btc,
    Sol,
    Xrp,
}

impl AssetId {
    /// All assets, in index order.
    pub const ALL: [AssetId; 4] = [AssetId::Eth, AssetId::Btc, AssetId::Sol, AssetId::Xrp];

    /// Number of tracked assets.
    pub const COUNT: usize = 4;

    /// Stable array slot for per-asset state.
    pub fn index(self) -> usize {
        match self {
            AssetId::Eth => 0,
            AssetId::Btc => 1,
            AssetId::Sol => 2,
            AssetId::Xrp => 3,
        }
    }

    /// Ticker symbol, e.g. `BTC`.
    pub fn ticker(self) -> &'static str {
        match self {
            AssetId::Eth => "ETH",
            AssetId::Btc => "BTC",
            AssetId::Sol => "SOL",
            AssetId::Xrp => "XRP",
        }
    }

    /// Upstream coin identifier used by the market data API.
    pub fn provider_id(self) -> &'static str {
        match self {
            AssetId::Eth => "ethereum",
            AssetId::Btc => "bitcoin",
            AssetId::Sol => "solana",
            AssetId::Xrp => "ripple",
        }
    }

    /// Human-readable name.
    pub fn display_name(self) -> &'static str {
        match self {
            AssetId::Eth => "Ethereum",
            AssetId::Btc => "Bitcoin",
            AssetId::Sol => "Solana",
            AssetId::Xrp => "XRP",
        }
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ticker())
    }
}

/// Returned when a string names none of the tracked assets.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown asset '{0}' (expected one of ETH, BTC, SOL, XRP)")]
pub struct UnknownAsset(pub String);

impl FromStr for AssetId {
    type Err = UnknownAsset;

    /// Accepts tickers or upstream coin ids, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim();
        AssetId::ALL
            .into_iter()
            .find(|a| {
                a.ticker().eq_ignore_ascii_case(needle)
                    || a.provider_id().eq_ignore_ascii_case(needle)
            })
            .ok_or_else(|| UnknownAsset(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_are_dense_and_unique() {
        for (i, asset) in AssetId::ALL.iter().enumerate() {
            assert_eq!(asset.index(), i);
        }
    }

    #[test]
    fn parses_tickers_and_coin_ids() {
        assert_eq!("btc".parse::<AssetId>().unwrap(), AssetId::Btc);
        assert_eq!("Ripple".parse::<AssetId>().unwrap(), AssetId::Xrp);
        assert_eq!(" SOL ".parse::<AssetId>().unwrap(), AssetId::Sol);
        assert!("DOGE".parse::<AssetId>().is_err());
    }

    #[test]
    fn serializes_as_ticker() {
        let json = serde_json::to_string(&AssetId::Eth).unwrap();
        assert_eq!(json, "\"ETH\"");
        let back: AssetId = serde_json::from_str("\"XRP\"").unwrap();
        assert_eq!(back, AssetId::Xrp);
    }
}
