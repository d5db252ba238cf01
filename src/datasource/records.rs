//! Wire records shared by the HTTP and CSV sources.
//!
//! Field names follow the logical input schema (snake_case). Decimals travel
//! as strings so no precision is lost in transit.

use super::DataSourceError;
use crate::domain::{Decimal, Fill, FillSource, MarketId, OutcomeIndex, Resolution, Role, TimeMs, Wallet};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRecord {
    pub tx_id: String,
    #[serde(default)]
    pub log_index: i64,
    pub wallet: String,
    pub market_id: String,
    pub outcome_index: u8,
    /// Milliseconds since the Unix epoch.
    pub event_time: i64,
    pub token_delta: String,
    pub cash_delta_usd: String,
    pub role: String,
    pub source: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionRecord {
    pub market_id: String,
    pub outcome_index: u8,
    pub payout_per_share: String,
    pub resolved_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    pub raw_wallet: String,
    pub canonical_wallet: String,
}

fn parse_decimal(field: &str, value: &str) -> Result<Decimal, DataSourceError> {
    Decimal::from_str_canonical(value)
        .map_err(|e| DataSourceError::ParseError(format!("Invalid {}: {:?}: {}", field, value, e)))
}

fn parse_wallet(value: &str) -> Result<Wallet, DataSourceError> {
    Wallet::from_str(value).map_err(|e| DataSourceError::ParseError(e.to_string()))
}

fn require(field: &str, value: &str) -> Result<(), DataSourceError> {
    if value.trim().is_empty() {
        return Err(DataSourceError::ParseError(format!("Missing {} field", field)));
    }
    Ok(())
}

impl FillRecord {
    /// Validate and convert into a [`Fill`].
    ///
    /// # Errors
    /// Returns `ParseError` for a malformed wallet, decimal or role.
    pub fn into_fill(self) -> Result<Fill, DataSourceError> {
        require("tx_id", &self.tx_id)?;
        require("market_id", &self.market_id)?;
        require("source", &self.source)?;
        let wallet = parse_wallet(&self.wallet)?;
        let role = Role::from_str(&self.role).map_err(|e| DataSourceError::ParseError(e.to_string()))?;

        Ok(Fill::new(
            self.tx_id,
            self.log_index,
            wallet,
            MarketId::new(self.market_id),
            OutcomeIndex::new(self.outcome_index),
            TimeMs::new(self.event_time),
            parse_decimal("token_delta", &self.token_delta)?,
            parse_decimal("cash_delta_usd", &self.cash_delta_usd)?,
            role,
            FillSource::from(self.source),
        ))
    }
}

impl From<&Fill> for FillRecord {
    fn from(fill: &Fill) -> Self {
        FillRecord {
            tx_id: fill.tx_id.clone(),
            log_index: fill.log_index,
            wallet: fill.wallet.as_str().to_string(),
            market_id: fill.market_id.as_str().to_string(),
            outcome_index: fill.outcome_index.as_u8(),
            event_time: fill.event_time.as_i64(),
            token_delta: fill.token_delta.to_canonical_string(),
            cash_delta_usd: fill.cash_delta_usd.to_canonical_string(),
            role: fill.role.as_str().to_string(),
            source: fill.source.as_str().to_string(),
        }
    }
}

impl ResolutionRecord {
    /// Validate and convert into a [`Resolution`].
    ///
    /// # Errors
    /// Returns `ParseError` for a malformed payout or one outside `[0, 1]`.
    pub fn into_resolution(self) -> Result<Resolution, DataSourceError> {
        require("market_id", &self.market_id)?;
        let resolution = Resolution::new(
            MarketId::new(self.market_id),
            OutcomeIndex::new(self.outcome_index),
            parse_decimal("payout_per_share", &self.payout_per_share)?,
            TimeMs::new(self.resolved_at),
        );
        if !resolution.payout_in_range() {
            return Err(DataSourceError::ParseError(format!(
                "payout_per_share {} outside [0, 1] for {}/{}",
                resolution.payout_per_share, resolution.market_id, resolution.outcome_index
            )));
        }
        Ok(resolution)
    }
}

impl AliasRecord {
    /// # Errors
    /// Returns `ParseError` if either side is not a hex address.
    pub fn into_pair(self) -> Result<(Wallet, Wallet), DataSourceError> {
        Ok((
            parse_wallet(&self.raw_wallet)?,
            parse_wallet(&self.canonical_wallet)?,
        ))
    }
}
