use crate::domain::{Decimal, FillSource};
use crate::engine::{EnginePolicy, LeaderboardFilters, SplitMergeCash};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub data_source: DataSourceKind,
    pub lookback_ms: i64,
    pub policy: EnginePolicy,
    pub rebuild_concurrency: usize,
    pub unit_timeout_ms: u64,
    pub leaderboard: LeaderboardFilters,
}

/// Where ingestion pulls fills, resolutions and aliases from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceKind {
    /// Only data already in the store is used.
    None,
    Http { base_url: String },
    Csv { dir: PathBuf },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let port = parse_or(&env_map, "PORT", 8080u16, "must be a valid u16")?;

        let database_path = env_map
            .get("DATABASE_PATH")
            .cloned()
            .ok_or_else(|| ConfigError::MissingEnv("DATABASE_PATH".to_string()))?;

        let data_source = match env_map
            .get("DATA_SOURCE")
            .map(|s| s.as_str())
            .unwrap_or("none")
        {
            "none" => DataSourceKind::None,
            "http" => DataSourceKind::Http {
                base_url: env_map
                    .get("DATA_SOURCE_URL")
                    .cloned()
                    .ok_or_else(|| ConfigError::MissingEnv("DATA_SOURCE_URL".to_string()))?,
            },
            "csv" => DataSourceKind::Csv {
                dir: env_map
                    .get("DATA_DIR")
                    .map(PathBuf::from)
                    .ok_or_else(|| ConfigError::MissingEnv("DATA_DIR".to_string()))?,
            },
            other => {
                return Err(ConfigError::InvalidValue(
                    "DATA_SOURCE".to_string(),
                    format!("must be none, http, or csv, got {}", other),
                ))
            }
        };

        let lookback_ms = parse_or(&env_map, "LOOKBACK_MS", 86_400_000i64, "must be a valid i64")?;

        let excluded_sources: BTreeSet<FillSource> = match env_map.get("EXCLUDED_SOURCES") {
            Some(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(FillSource::from)
                .collect(),
            None => EnginePolicy::default_excluded_sources(),
        };

        let split_price = parse_or(
            &env_map,
            "SPLIT_PRICE",
            Decimal::new(rust_decimal::Decimal::new(5, 1)),
            "must be a decimal",
        )?;
        let split_merge_cash = match env_map
            .get("SPLIT_MERGE_CASH")
            .map(|s| s.as_str())
            .unwrap_or("excluded")
        {
            "excluded" => SplitMergeCash::Excluded,
            "fixed" => SplitMergeCash::FixedPrice(split_price),
            "raw" => SplitMergeCash::Raw,
            other => {
                return Err(ConfigError::InvalidValue(
                    "SPLIT_MERGE_CASH".to_string(),
                    format!("must be excluded, fixed, or raw, got {}", other),
                ))
            }
        };

        let roi_cap = parse_or(&env_map, "ROI_CAP", Decimal::from(10i64), "must be a decimal")?;
        let roi_floor = parse_or(&env_map, "ROI_FLOOR", -Decimal::one(), "must be a decimal")?;
        if roi_floor < -Decimal::one() || roi_floor >= roi_cap {
            return Err(ConfigError::InvalidValue(
                "ROI_FLOOR".to_string(),
                "must be >= -1 and below ROI_CAP".to_string(),
            ));
        }

        let rebuild_concurrency =
            parse_or(&env_map, "REBUILD_CONCURRENCY", 8usize, "must be a positive integer")?;
        if rebuild_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "REBUILD_CONCURRENCY".to_string(),
                "must be a positive integer".to_string(),
            ));
        }
        let unit_timeout_ms = parse_or(&env_map, "UNIT_TIMEOUT_MS", 30_000u64, "must be a valid u64")?;

        let leaderboard = LeaderboardFilters {
            min_resolved_positions: parse_or(
                &env_map,
                "MIN_RESOLVED_POSITIONS",
                10usize,
                "must be a non-negative integer",
            )?,
            min_wallet_age_days: parse_or(&env_map, "MIN_WALLET_AGE_DAYS", 0i64, "must be a valid i64")?,
            active_within_days: parse_opt(&env_map, "ACTIVE_WITHIN_DAYS", "must be a valid i64")?,
            min_position_size: parse_or(
                &env_map,
                "MIN_POSITION_SIZE",
                Decimal::zero(),
                "must be a decimal",
            )?,
            require_non_negative_pnl: parse_or(
                &env_map,
                "REQUIRE_NON_NEGATIVE_PNL",
                true,
                "must be true or false",
            )?,
            min_median_win_roi: parse_opt(&env_map, "MIN_MEDIAN_WIN_ROI", "must be a decimal")?,
        };

        Ok(Config {
            port,
            database_path,
            data_source,
            lookback_ms,
            policy: EnginePolicy {
                excluded_sources,
                split_merge_cash,
                roi_cap,
                roi_floor,
            },
            rebuild_concurrency,
            unit_timeout_ms,
            leaderboard,
        })
    }
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    default: T,
    expectation: &str,
) -> Result<T, ConfigError> {
    Ok(parse_opt(env_map, key, expectation)?.unwrap_or(default))
}

fn parse_opt<T: FromStr>(
    env_map: &HashMap<String, String>,
    key: &str,
    expectation: &str,
) -> Result<Option<T>, ConfigError> {
    match env_map.get(key).map(|s| s.trim()).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(key.to_string(), expectation.to_string())),
    }
}
