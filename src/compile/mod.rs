//! Rebuild pipeline for turning stored fills into ledger output.
//!
//! This module provides:
//! - Full per-unit recomputation (never incremental patching)
//! - Bounded worker-pool fan-out with a per-unit timeout
//! - Failure isolation and a persisted, auditable run summary

use crate::domain::{ParseIdError, PositionKey, TimeMs};
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

pub mod rebuild;

pub use rebuild::Rebuilder;

/// Errors that abort a whole rebuild run. Per-unit problems never do.
#[derive(Debug, Error)]
pub enum RebuildError {
    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

/// Why one unit did not produce output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Input contract violation; the unit's previous output is cleared.
    Contract,
    /// The unit exceeded its time budget; previous output is kept.
    Timeout,
    /// Reading or writing the unit failed; previous output is kept.
    Storage,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Contract => "contract",
            FailureKind::Timeout => "timeout",
            FailureKind::Storage => "storage",
        }
    }
}

impl FromStr for FailureKind {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "contract" => Ok(FailureKind::Contract),
            "timeout" => Ok(FailureKind::Timeout),
            "storage" => Ok(FailureKind::Storage),
            other => Err(ParseIdError {
                kind: "failure kind",
                value: other.to_string(),
            }),
        }
    }
}

/// A unit that failed during a run, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub key: PositionKey,
    pub kind: FailureKind,
    pub reason: String,
}

/// Audit record of one rebuild run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RebuildSummary {
    pub run_id: Uuid,
    pub started_at: TimeMs,
    pub finished_at: TimeMs,
    pub units_total: usize,
    pub units_succeeded: usize,
    pub units_resolved: usize,
    pub units_unresolved: usize,
    /// Units whose every fill was excluded or collapsed.
    pub units_empty: usize,
    pub fills_excluded: usize,
    pub makers_collapsed: usize,
    pub failures: Vec<UnitFailure>,
    /// SHA-256 over every produced row, in unit order.
    pub output_digest: String,
}

impl RebuildSummary {
    pub fn units_failed(&self) -> usize {
        self.failures.len()
    }
}
