//! HTTP client for an ingestion service that speaks the logical fill,
//! resolution and alias schemas as JSON.

use super::records::{AliasRecord, FillRecord, ResolutionRecord};
use super::{DataSource, DataSourceError};
use crate::domain::{Fill, MarketId, Resolution, Wallet};
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Upper bound on pages fetched for one wallet window.
const MAX_PAGES: usize = 1000;

/// One page of `GET /fills`.
#[derive(Debug, Deserialize)]
struct FillsPage {
    fills: Vec<FillRecord>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HttpDataSource {
    client: Client,
    base_url: String,
}

impl HttpDataSource {
    pub fn new(base_url: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn send_json<T, F>(&self, make_request: F) -> Result<T, DataSourceError>
    where
        T: DeserializeOwned,
        F: Fn() -> RequestBuilder,
    {
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(30)),
            ..Default::default()
        };

        let body = retry(backoff, || async {
            let response = make_request().send().await.map_err(|e| {
                backoff::Error::transient(DataSourceError::NetworkError(e.to_string()))
            })?;

            let status = response.status();
            if status == 429 {
                return Err(backoff::Error::transient(DataSourceError::RateLimited));
            }
            if status.is_server_error() {
                return Err(backoff::Error::transient(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Server error".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(DataSourceError::HttpError {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<serde_json::Value>()
                .await
                .map_err(|e| backoff::Error::permanent(DataSourceError::ParseError(e.to_string())))
        })
        .await?;

        serde_json::from_value(body).map_err(|e| DataSourceError::ParseError(e.to_string()))
    }
}

#[async_trait]
impl DataSource for HttpDataSource {
    async fn fetch_fills(
        &self,
        wallet: &Wallet,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Fill>, DataSourceError> {
        debug!(wallet = %wallet, from_ms, to_ms, "Fetching fills");

        let url = format!("{}/fills", self.base_url);
        let mut fills = Vec::new();
        let mut cursor: Option<String> = None;

        for _ in 0..MAX_PAGES {
            let mut params = vec![
                ("wallet", wallet.as_str().to_string()),
                ("from", from_ms.to_string()),
                ("to", to_ms.to_string()),
            ];
            if let Some(c) = &cursor {
                params.push(("cursor", c.clone()));
            }

            let page: FillsPage = self
                .send_json(|| self.client.get(&url).query(&params))
                .await?;
            fills.extend(records_to_fills(page.fills)?);

            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => return Ok(fills),
            }
        }

        Err(DataSourceError::ParseError(format!(
            "fill pagination for {} did not terminate after {} pages",
            wallet, MAX_PAGES
        )))
    }

    async fn fetch_resolutions(
        &self,
        market_ids: &[MarketId],
    ) -> Result<Vec<Resolution>, DataSourceError> {
        if market_ids.is_empty() {
            return Ok(Vec::new());
        }
        debug!(markets = market_ids.len(), "Fetching resolutions");

        let url = format!("{}/resolutions", self.base_url);
        let payload = serde_json::json!({
            "market_ids": market_ids.iter().map(|m| m.as_str()).collect::<Vec<_>>(),
        });
        let records: Vec<ResolutionRecord> = self
            .send_json(|| self.client.post(&url).json(&payload))
            .await?;

        records
            .into_iter()
            .map(ResolutionRecord::into_resolution)
            .collect()
    }

    async fn fetch_wallet_aliases(
        &self,
        wallets: &[Wallet],
    ) -> Result<Vec<(Wallet, Wallet)>, DataSourceError> {
        if wallets.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/aliases", self.base_url);
        let payload = serde_json::json!({
            "wallets": wallets.iter().map(|w| w.as_str()).collect::<Vec<_>>(),
        });
        let records: Vec<AliasRecord> = self
            .send_json(|| self.client.post(&url).json(&payload))
            .await?;

        records.into_iter().map(AliasRecord::into_pair).collect()
    }
}

fn records_to_fills(records: Vec<FillRecord>) -> Result<Vec<Fill>, DataSourceError> {
    records.into_iter().map(FillRecord::into_fill).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Role;

    #[test]
    fn test_parse_fills_page() {
        let body = serde_json::json!({
            "fills": [{
                "tx_id": "0xaa",
                "log_index": 2,
                "wallet": "0xabc",
                "market_id": "0xm",
                "outcome_index": 0,
                "event_time": 1000,
                "token_delta": "10",
                "cash_delta_usd": "-4.2",
                "role": "maker",
                "source": "order-matched"
            }],
            "next_cursor": "abc"
        });

        let page: FillsPage = serde_json::from_value(body).unwrap();
        assert_eq!(page.next_cursor.as_deref(), Some("abc"));
        let fills = records_to_fills(page.fills).unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].role, Role::Maker);
        assert_eq!(fills[0].log_index, 2);
    }

    #[test]
    fn test_last_page_has_no_cursor() {
        let page: FillsPage = serde_json::from_value(serde_json::json!({ "fills": [] })).unwrap();
        assert!(page.next_cursor.is_none());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let source = HttpDataSource::new("http://localhost:9000/".to_string());
        assert_eq!(source.base_url, "http://localhost:9000");
    }
}
