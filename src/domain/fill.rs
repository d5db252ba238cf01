//! Fill type: one atomic economic event for a wallet on one market outcome.

use crate::domain::{Decimal, FillSource, MarketId, OutcomeIndex, PositionKey, Role, TimeMs, Wallet};
use serde::{Deserialize, Serialize};

/// A single deduplicated fill as delivered by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fill {
    /// Stable unique identifier for this record.
    pub fill_key: String,
    /// Transaction identifier.
    pub tx_id: String,
    /// Position of this event within its transaction's event list.
    pub log_index: i64,
    pub wallet: Wallet,
    pub market_id: MarketId,
    pub outcome_index: OutcomeIndex,
    pub event_time: TimeMs,
    /// Signed token quantity: positive = acquired, negative = disposed.
    pub token_delta: Decimal,
    /// Signed USD cash: positive = received, negative = paid.
    pub cash_delta_usd: Decimal,
    pub role: Role,
    pub source: FillSource,
}

impl Fill {
    /// Create a new Fill and derive its `fill_key`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx_id: impl Into<String>,
        log_index: i64,
        wallet: Wallet,
        market_id: MarketId,
        outcome_index: OutcomeIndex,
        event_time: TimeMs,
        token_delta: Decimal,
        cash_delta_usd: Decimal,
        role: Role,
        source: FillSource,
    ) -> Self {
        let tx_id = tx_id.into().trim().to_ascii_lowercase();
        let fill_key =
            Self::compute_fill_key(&wallet, &tx_id, log_index, &market_id, outcome_index, role);
        Fill {
            fill_key,
            tx_id,
            log_index,
            wallet,
            market_id,
            outcome_index,
            event_time,
            token_delta,
            cash_delta_usd,
            role,
            source,
        }
    }

    /// Generate a stable unique key for this fill.
    ///
    /// Exact replays of the same event hash to the same key, so storage inserts are idempotent.
    pub fn compute_fill_key(
        wallet: &Wallet,
        tx_id: &str,
        log_index: i64,
        market_id: &MarketId,
        outcome_index: OutcomeIndex,
        role: Role,
    ) -> String {
        use sha2::{Digest, Sha256};

        let mut hasher = Sha256::new();
        hasher.update(wallet.as_str());
        hasher.update([0u8]);
        hasher.update(tx_id);
        hasher.update([0u8]);
        hasher.update(log_index.to_le_bytes());
        hasher.update(market_id.as_str());
        hasher.update([0u8]);
        hasher.update([outcome_index.as_u8()]);
        hasher.update(role.as_str());
        let hash = hasher.finalize();
        format!("fill:{}", hex::encode(&hash[..16]))
    }

    /// Borrow the precomputed fill key.
    pub fn fill_key(&self) -> &str {
        &self.fill_key
    }

    /// The ledger partition this fill belongs to.
    pub fn position_key(&self) -> PositionKey {
        PositionKey::new(self.wallet.clone(), self.market_id.clone(), self.outcome_index)
    }
}
