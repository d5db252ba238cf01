pub mod ensure;
pub mod orchestrator;
pub mod reports;

pub use ensure::{IngestionError, IngestionResult, Ingestor};
pub use orchestrator::{OrchestrationError, Orchestrator};
pub use reports::{build_leaderboard, wallet_report, write_leaderboard_csv, WalletReport};
