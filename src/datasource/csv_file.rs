//! Directory of CSV exports, optionally LZ4-frame compressed.
//!
//! Expected files: `fills.csv`, `resolutions.csv`, `aliases.csv` (each may
//! instead be `<name>.csv.lz4`). A missing file means "no records".

use super::records::{AliasRecord, FillRecord, ResolutionRecord};
use super::{DataSource, DataSourceError};
use crate::domain::{Fill, MarketId, Resolution, TimeMs, Wallet};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct CsvDataSource {
    dir: PathBuf,
}

impl CsvDataSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn decompress_lz4_frame(lz4_bytes: &[u8]) -> Result<Vec<u8>, DataSourceError> {
        let mut decoder = lz4_flex::frame::FrameDecoder::new(lz4_bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| DataSourceError::Io(format!("lz4: {}", e)))?;
        Ok(out)
    }

    pub fn parse_csv<T: DeserializeOwned>(csv_bytes: &[u8]) -> Result<Vec<T>, DataSourceError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_reader(csv_bytes);

        reader
            .deserialize::<T>()
            .enumerate()
            .map(|(i, record)| {
                record.map_err(|e| DataSourceError::ParseError(format!("row {}: {}", i + 1, e)))
            })
            .collect()
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Vec<T>, DataSourceError> {
        let plain = self.dir.join(format!("{}.csv", name));
        let compressed = self.dir.join(format!("{}.csv.lz4", name));

        let bytes = if plain.exists() {
            read_file(&plain)?
        } else if compressed.exists() {
            Self::decompress_lz4_frame(&read_file(&compressed)?)?
        } else {
            debug!(dir = %self.dir.display(), name, "No CSV file, treating as empty");
            return Ok(Vec::new());
        };

        Self::parse_csv(&bytes)
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>, DataSourceError> {
    std::fs::read(path).map_err(|e| DataSourceError::Io(format!("{}: {}", path.display(), e)))
}

#[async_trait]
impl DataSource for CsvDataSource {
    async fn fetch_fills(
        &self,
        wallet: &Wallet,
        from_ms: i64,
        to_ms: i64,
    ) -> Result<Vec<Fill>, DataSourceError> {
        let (from_time, to_time) = (TimeMs::new(from_ms), TimeMs::new(to_ms));
        let mut fills = Vec::new();
        for record in self.load::<FillRecord>("fills")? {
            let fill = record.into_fill()?;
            if &fill.wallet == wallet && fill.event_time >= from_time && fill.event_time <= to_time {
                fills.push(fill);
            }
        }
        Ok(fills)
    }

    async fn fetch_resolutions(
        &self,
        market_ids: &[MarketId],
    ) -> Result<Vec<Resolution>, DataSourceError> {
        let mut resolutions = Vec::new();
        for record in self.load::<ResolutionRecord>("resolutions")? {
            let resolution = record.into_resolution()?;
            if market_ids.contains(&resolution.market_id) {
                resolutions.push(resolution);
            }
        }
        Ok(resolutions)
    }

    async fn fetch_wallet_aliases(
        &self,
        wallets: &[Wallet],
    ) -> Result<Vec<(Wallet, Wallet)>, DataSourceError> {
        let mut pairs = Vec::new();
        for record in self.load::<AliasRecord>("aliases")? {
            let (raw, canonical) = record.into_pair()?;
            if wallets.contains(&raw) || wallets.contains(&canonical) {
                pairs.push((raw, canonical));
            }
        }
        Ok(pairs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    const FILLS: &str = "tx_id,log_index,wallet,market_id,outcome_index,event_time,token_delta,cash_delta_usd,role,source\n\
        0x01,0,0xaaa,0xm,0,1000,300,-150,taker,order-matched\n\
        0x02,0,0xaaa,0xm,0,2000,-100,65,maker,order-matched\n\
        0x03,0,0xbbb,0xm,1,1500,10,-1,taker,order-matched\n";

    fn compress_lz4_frame(input: &[u8]) -> Vec<u8> {
        let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
        encoder.write_all(input).unwrap();
        encoder.finish().unwrap()
    }

    #[tokio::test]
    async fn test_fetch_fills_from_plain_csv() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fills.csv"), FILLS).unwrap();

        let source = CsvDataSource::new(dir.path());
        let fills = source
            .fetch_fills(&Wallet::new("0xaaa"), 0, 1500)
            .await
            .unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].token_delta.to_canonical_string(), "300");
    }

    #[tokio::test]
    async fn test_fetch_from_lz4_csv() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("fills.csv.lz4"),
            compress_lz4_frame(FILLS.as_bytes()),
        )
        .unwrap();
        std::fs::write(
            dir.path().join("resolutions.csv.lz4"),
            compress_lz4_frame(b"market_id,outcome_index,payout_per_share,resolved_at\n0xm,0,1,5000\n"),
        )
        .unwrap();

        let source = CsvDataSource::new(dir.path());
        let fills = source
            .fetch_fills(&Wallet::new("0xaaa"), 0, i64::MAX)
            .await
            .unwrap();
        assert_eq!(fills.len(), 2);

        let resolutions = source
            .fetch_resolutions(&[MarketId::new("0xm")])
            .await
            .unwrap();
        assert_eq!(resolutions.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_files_are_empty() {
        let dir = TempDir::new().unwrap();
        let source = CsvDataSource::new(dir.path());
        assert!(source
            .fetch_wallet_aliases(&[Wallet::new("0xaaa")])
            .await
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_malformed_row_reports_line() {
        let csv = b"raw_wallet,canonical_wallet\n0xabc\n";
        let err = CsvDataSource::parse_csv::<AliasRecord>(csv).unwrap_err();
        assert!(matches!(err, DataSourceError::ParseError(msg) if msg.starts_with("row 1")));
    }
}
