pub mod api;
pub mod compile;
pub mod config;
pub mod datasource;
pub mod db;
pub mod domain;
pub mod engine;
pub mod error;
pub mod orchestration;

pub use compile::{RebuildSummary, Rebuilder};
pub use config::Config;
pub use datasource::{CsvDataSource, DataSource, DataSourceError, HttpDataSource, MockDataSource};
pub use db::{init_db, Repository};
pub use domain::{
    Decimal, Fill, FillSource, MarketId, OutcomeIndex, PositionKey, Resolution, Role, TimeMs,
    Wallet,
};
pub use engine::{EnginePolicy, EngineError};
pub use error::AppError;
