//! Data source abstraction for fetching fills, resolutions and wallet aliases
//! from the external ingestion collaborators.

use crate::config::DataSourceKind;
use crate::domain::{Fill, MarketId, Resolution, Wallet};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub mod csv_file;
pub mod http;
pub mod mock;
pub mod records;

pub use csv_file::CsvDataSource;
pub use http::HttpDataSource;
pub use mock::MockDataSource;
pub use records::{AliasRecord, FillRecord, ResolutionRecord};

/// Data source trait for fetching ledger inputs.
///
/// Implementations must handle pagination, retry/backoff, and rate limiting.
/// Records are validated at this boundary; a malformed record is an error,
/// never silently dropped.
#[async_trait]
pub trait DataSource: Send + Sync + fmt::Debug {
    /// Fetch fills for a raw wallet within a time range (both bounds inclusive).
    async fn fetch_fills(
        &self,
        wallet: &Wallet,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Fill>, DataSourceError>;

    /// Fetch resolutions for the given markets. Unresolved markets are simply absent.
    async fn fetch_resolutions(
        &self,
        market_ids: &[MarketId],
    ) -> Result<Vec<Resolution>, DataSourceError>;

    /// Fetch raw → canonical aliases for the given wallets, in either direction.
    async fn fetch_wallet_aliases(
        &self,
        wallets: &[Wallet],
    ) -> Result<Vec<(Wallet, Wallet)>, DataSourceError>;
}

/// Build the configured data source; `None` when ingestion is disabled.
pub fn from_kind(kind: &DataSourceKind) -> Option<Arc<dyn DataSource>> {
    match kind {
        DataSourceKind::None => None,
        DataSourceKind::Http { base_url } => Some(Arc::new(HttpDataSource::new(base_url.clone()))),
        DataSourceKind::Csv { dir } => Some(Arc::new(CsvDataSource::new(dir.clone()))),
    }
}

/// Error type for data source operations.
#[derive(Debug, Clone, Error)]
pub enum DataSourceError {
    /// Network error (e.g., connection timeout, DNS failure)
    #[error("Network error: {0}")]
    NetworkError(String),
    /// HTTP error (e.g., 429 rate limit, 5xx server error)
    #[error("HTTP error {status}: {message}")]
    HttpError { status: u16, message: String },
    /// Invalid JSON/CSV or a record that violates the input contract
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("I/O error: {0}")]
    Io(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_kind() {
        assert!(from_kind(&DataSourceKind::None).is_none());
        assert!(from_kind(&DataSourceKind::Csv {
            dir: std::path::PathBuf::from("/tmp")
        })
        .is_some());
    }

    #[test]
    fn test_datasource_error_display() {
        let err = DataSourceError::NetworkError("connection timeout".to_string());
        assert_eq!(err.to_string(), "Network error: connection timeout");

        let err = DataSourceError::HttpError {
            status: 429,
            message: "Too many requests".to_string(),
        };
        assert_eq!(err.to_string(), "HTTP error 429: Too many requests");

        let err = DataSourceError::ParseError("invalid JSON".to_string());
        assert_eq!(err.to_string(), "Parse error: invalid JSON");

        let err = DataSourceError::RateLimited;
        assert_eq!(err.to_string(), "Rate limited");
    }
}
