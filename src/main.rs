use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use polyledger::api;
use polyledger::domain::{TimeMs, Wallet};
use polyledger::engine::SortKey;
use polyledger::orchestration::{build_leaderboard, write_leaderboard_csv};
use polyledger::{config::Config, db::init_db, Repository};
use std::fs::File;
use std::io::{self, Write};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "polyledger", about = "FIFO lot ledger and wallet leaderboard", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the read API.
    Serve,
    /// Pull one wallet's inputs from the configured data source and rebuild it.
    Ingest {
        #[arg(long)]
        wallet: String,
        #[arg(long)]
        from_ms: Option<i64>,
        #[arg(long)]
        to_ms: Option<i64>,
    },
    /// Recompute ledger output from stored fills.
    Rebuild {
        /// Only this wallet's units; default is every stored unit.
        #[arg(long)]
        wallet: Option<String>,
    },
    /// Export the ranked leaderboard.
    Leaderboard(LeaderboardArgs),
}

#[derive(Args, Debug)]
struct LeaderboardArgs {
    #[arg(long, default_value = "pnl")]
    sort_key: String,
    #[arg(long, value_enum, default_value_t = ExportFormat::Csv)]
    format: ExportFormat,
    /// Output file; stdout when absent.
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    limit: Option<usize>,
    /// Rank raw wallets instead of canonical accounts.
    #[arg(long, default_value_t = false)]
    raw: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ExportFormat {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing_subscriber::filter::LevelFilter::INFO.into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("configuration error")?;

    let pool = init_db(&config.database_path)
        .await
        .with_context(|| format!("failed to initialize database {}", config.database_path))?;
    let repo = Arc::new(Repository::new(pool));
    let state = api::AppState::from_config(repo.clone(), config.clone());

    match cli.command {
        Commands::Serve => serve(state, config.port).await,
        Commands::Ingest {
            wallet,
            from_ms,
            to_ms,
        } => {
            let wallet = parse_wallet(&wallet)?;
            let summary = state
                .orchestrator
                .ensure_compiled(&wallet, from_ms.map(TimeMs::new), to_ms.map(TimeMs::new))
                .await?;
            print_json(&api::rebuild::RebuildResponse::from(summary))
        }
        Commands::Rebuild { wallet } => {
            let rebuilder = state.orchestrator.rebuilder();
            let summary = match wallet {
                Some(w) => rebuilder.rebuild_wallet(&parse_wallet(&w)?).await?,
                None => rebuilder.rebuild_all().await?,
            };
            print_json(&api::rebuild::RebuildResponse::from(summary))
        }
        Commands::Leaderboard(args) => export_leaderboard(&repo, &config, args).await,
    }
}

async fn serve(state: api::AppState, port: u16) -> Result<()> {
    let app = api::create_router(state);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    tracing::info!("Server listening on {}", addr);
    axum::serve(listener, app).await.context("server error")
}

async fn export_leaderboard(repo: &Repository, config: &Config, args: LeaderboardArgs) -> Result<()> {
    let sort_key = SortKey::from_str(&args.sort_key).map_err(anyhow::Error::msg)?;
    let board = build_leaderboard(
        repo,
        &config.leaderboard,
        sort_key,
        TimeMs::now(),
        args.limit,
        !args.raw,
        &config.policy,
    )
    .await?;
    tracing::info!(
        sort_key = %sort_key,
        candidates = board.candidates,
        ranked = board.entries.len(),
        "Leaderboard built"
    );

    let writer: Box<dyn Write> = match &args.out {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(io::stdout().lock()),
    };

    match args.format {
        ExportFormat::Csv => write_leaderboard_csv(&board, writer)?,
        ExportFormat::Json => {
            serde_json::to_writer_pretty(writer, &api::leaderboard::to_response(board))?
        }
    }
    Ok(())
}

fn parse_wallet(raw: &str) -> Result<Wallet> {
    Wallet::from_str(raw).with_context(|| format!("invalid wallet address {:?}", raw))
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
