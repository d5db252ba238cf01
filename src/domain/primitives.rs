//! Domain primitives: TimeMs, Wallet, MarketId, OutcomeIndex, Role, FillSource.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

const MS_PER_DAY: i64 = 86_400_000;

/// Time in milliseconds since Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeMs(pub i64);

impl TimeMs {
    /// Create a TimeMs from milliseconds.
    pub fn new(ms: i64) -> Self {
        TimeMs(ms)
    }

    /// Current wall-clock time.
    pub fn now() -> Self {
        TimeMs(chrono::Utc::now().timestamp_millis())
    }

    /// Get the underlying milliseconds value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Alias of [`TimeMs::as_i64`].
    pub fn as_ms(&self) -> i64 {
        self.0
    }

    /// UTC day number since the epoch.
    pub fn day_index(&self) -> i64 {
        self.0.div_euclid(MS_PER_DAY)
    }

    /// Whole days elapsed from `self` until `later` (0 if `later` is earlier).
    pub fn days_until(&self, later: TimeMs) -> i64 {
        (later.0 - self.0).max(0) / MS_PER_DAY
    }

    /// RFC 3339 rendering for exports; falls back to the raw number when out of range.
    pub fn to_rfc3339(&self) -> String {
        chrono::DateTime::from_timestamp_millis(self.0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| self.0.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseIdError {
    pub kind: &'static str,
    pub value: String,
}

/// Raw on-chain wallet address (executor or proxy), lowercased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Wallet(pub String);

impl Wallet {
    /// Create a Wallet, normalizing case and surrounding whitespace.
    pub fn new(addr: impl AsRef<str>) -> Self {
        Wallet(addr.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `0x` followed by one or more hex digits.
    pub fn is_hex_address(&self) -> bool {
        self.0.len() > 2
            && self.0.starts_with("0x")
            && self.0[2..].chars().all(|c| c.is_ascii_hexdigit())
    }
}

impl FromStr for Wallet {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wallet = Wallet::new(s);
        if wallet.is_hex_address() {
            Ok(wallet)
        } else {
            Err(ParseIdError {
                kind: "wallet",
                value: s.to_string(),
            })
        }
    }
}

impl std::fmt::Display for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Market (condition) identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketId(pub String);

impl MarketId {
    pub fn new(id: impl AsRef<str>) -> Self {
        MarketId(id.as_ref().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MarketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 0-based outcome index within a market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OutcomeIndex(pub u8);

impl OutcomeIndex {
    pub fn new(idx: u8) -> Self {
        OutcomeIndex(idx)
    }

    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl std::fmt::Display for OutcomeIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a CLOB match the wallet was on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Maker,
    Taker,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Maker => "maker",
            Role::Taker => "taker",
        }
    }
}

impl FromStr for Role {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "maker" => Ok(Role::Maker),
            "taker" => Ok(Role::Taker),
            _ => Err(ParseIdError {
                kind: "role",
                value: s.to_string(),
            }),
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Origin tag of a fill as delivered by ingestion.
///
/// Unknown tags are preserved verbatim in `Other` so exclusion policy can name them.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum FillSource {
    OrderMatched,
    Split,
    Merge,
    Redemption,
    Conversion,
    Other(String),
}

impl FillSource {
    pub fn as_str(&self) -> &str {
        match self {
            FillSource::OrderMatched => "order-matched",
            FillSource::Split => "split",
            FillSource::Merge => "merge",
            FillSource::Redemption => "redemption",
            FillSource::Conversion => "conversion",
            FillSource::Other(s) => s.as_str(),
        }
    }

    pub fn is_split_or_merge(&self) -> bool {
        matches!(self, FillSource::Split | FillSource::Merge)
    }

    /// Whether the cash/quantity ratio of this event is a market price.
    pub fn is_price_bearing(&self) -> bool {
        matches!(self, FillSource::OrderMatched)
    }
}

impl From<String> for FillSource {
    fn from(s: String) -> Self {
        let norm = s.trim().to_ascii_lowercase().replace('_', "-");
        match norm.as_str() {
            "order-matched" | "ordermatched" | "trade" => FillSource::OrderMatched,
            "split" => FillSource::Split,
            "merge" => FillSource::Merge,
            "redemption" | "redeem" => FillSource::Redemption,
            "conversion" | "convert" => FillSource::Conversion,
            _ => FillSource::Other(norm),
        }
    }
}

impl From<&str> for FillSource {
    fn from(s: &str) -> Self {
        FillSource::from(s.to_string())
    }
}

impl From<FillSource> for String {
    fn from(source: FillSource) -> Self {
        source.as_str().to_string()
    }
}

impl std::fmt::Display for FillSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The partition key of one FIFO ledger: (wallet, market, outcome).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub wallet: Wallet,
    pub market_id: MarketId,
    pub outcome_index: OutcomeIndex,
}

impl PositionKey {
    pub fn new(wallet: Wallet, market_id: MarketId, outcome_index: OutcomeIndex) -> Self {
        Self {
            wallet,
            market_id,
            outcome_index,
        }
    }
}

impl std::fmt::Display for PositionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.wallet, self.market_id, self.outcome_index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_normalizes_case() {
        let w = Wallet::new("  0xABCdef12 ");
        assert_eq!(w.as_str(), "0xabcdef12");
        assert!(w.is_hex_address());
    }

    #[test]
    fn test_wallet_from_str_rejects_non_hex() {
        assert!(Wallet::from_str("0xzz").is_err());
        assert!(Wallet::from_str("abc").is_err());
        assert!(Wallet::from_str("0x").is_err());
        assert!(Wallet::from_str("0x01").is_ok());
    }

    #[test]
    fn test_fill_source_parsing() {
        assert_eq!(FillSource::from("ORDER_MATCHED"), FillSource::OrderMatched);
        assert_eq!(FillSource::from("split"), FillSource::Split);
        assert_eq!(FillSource::from("Redeem"), FillSource::Redemption);
        assert_eq!(
            FillSource::from("liquidity_adapter"),
            FillSource::Other("liquidity-adapter".to_string())
        );
    }

    #[test]
    fn test_fill_source_serialization() {
        let json = serde_json::to_string(&FillSource::OrderMatched).unwrap();
        assert_eq!(json, "\"order-matched\"");
        let back: FillSource = serde_json::from_str("\"merge\"").unwrap();
        assert_eq!(back, FillSource::Merge);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Maker).unwrap(), "\"maker\"");
        assert_eq!(Role::from_str("TAKER").unwrap(), Role::Taker);
    }

    #[test]
    fn test_day_index_and_days_until() {
        let t = TimeMs::new(86_400_000 * 3 + 5);
        assert_eq!(t.day_index(), 3);
        assert_eq!(TimeMs::new(0).days_until(t), 3);
        assert_eq!(t.days_until(TimeMs::new(0)), 0);
    }

    #[test]
    fn test_position_key_display() {
        let key = PositionKey::new(
            Wallet::new("0xAA"),
            MarketId::new("0xM1"),
            OutcomeIndex::new(1),
        );
        assert_eq!(key.to_string(), "0xaa/0xm1/1");
    }
}
