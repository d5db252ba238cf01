//! Mock data source for testing without network calls.

use super::{DataSource, DataSourceError};
use crate::domain::{Fill, MarketId, Resolution, TimeMs, Wallet};
use async_trait::async_trait;

/// Mock data source that returns predefined test data.
#[derive(Debug, Clone, Default)]
pub struct MockDataSource {
    fills: Vec<Fill>,
    resolutions: Vec<Resolution>,
    aliases: Vec<(Wallet, Wallet)>,
}

impl MockDataSource {
    /// Create a new mock data source with empty data.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fill(mut self, fill: Fill) -> Self {
        self.fills.push(fill);
        self
    }

    pub fn with_fills(mut self, fills: Vec<Fill>) -> Self {
        self.fills.extend(fills);
        self
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolutions.push(resolution);
        self
    }

    pub fn with_alias(mut self, raw: Wallet, canonical: Wallet) -> Self {
        self.aliases.push((raw, canonical));
        self
    }
}

#[async_trait]
impl DataSource for MockDataSource {
    async fn fetch_fills(
        &self,
        wallet: &Wallet,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Fill>, DataSourceError> {
        let from_time = TimeMs::new(from_ms);
        let to_time = TimeMs::new(to_ms);

        Ok(self
            .fills
            .iter()
            .filter(|f| &f.wallet == wallet && f.event_time >= from_time && f.event_time <= to_time)
            .cloned()
            .collect())
    }

    async fn fetch_resolutions(
        &self,
        market_ids: &[MarketId],
    ) -> Result<Vec<Resolution>, DataSourceError> {
        Ok(self
            .resolutions
            .iter()
            .filter(|r| market_ids.contains(&r.market_id))
            .cloned()
            .collect())
    }

    async fn fetch_wallet_aliases(
        &self,
        wallets: &[Wallet],
    ) -> Result<Vec<(Wallet, Wallet)>, DataSourceError> {
        Ok(self
            .aliases
            .iter()
            .filter(|(raw, canonical)| wallets.contains(raw) || wallets.contains(canonical))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Decimal, FillSource, OutcomeIndex, Role};

    fn make_test_fill(wallet: &str, time: i64) -> Fill {
        Fill::new(
            "0x1",
            0,
            Wallet::new(wallet),
            MarketId::new("0xm"),
            OutcomeIndex::new(0),
            TimeMs::new(time),
            Decimal::from_str_canonical("10").unwrap(),
            Decimal::from_str_canonical("-5").unwrap(),
            Role::Taker,
            FillSource::OrderMatched,
        )
    }

    #[tokio::test]
    async fn test_mock_datasource_fetch_fills_filtered() {
        let mock = MockDataSource::new()
            .with_fill(make_test_fill("0xa", 1000))
            .with_fill(make_test_fill("0xa", 3000))
            .with_fill(make_test_fill("0xb", 1000));

        let fills = mock.fetch_fills(&Wallet::new("0xa"), 0, 2000).await.unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].event_time, TimeMs::new(1000));
    }

    #[tokio::test]
    async fn test_mock_datasource_resolutions_and_aliases() {
        let res = Resolution::new(
            MarketId::new("0xm"),
            OutcomeIndex::new(0),
            Decimal::one(),
            TimeMs::new(5),
        );
        let mock = MockDataSource::new()
            .with_resolution(res.clone())
            .with_alias(Wallet::new("0xe1"), Wallet::new("0xacc"));

        let found = mock.fetch_resolutions(&[MarketId::new("0xm")]).await.unwrap();
        assert_eq!(found, vec![res]);
        let none = mock.fetch_resolutions(&[MarketId::new("0xz")]).await.unwrap();
        assert!(none.is_empty());

        let aliases = mock.fetch_wallet_aliases(&[Wallet::new("0xacc")]).await.unwrap();
        assert_eq!(aliases.len(), 1);
    }
}
