use axum::http::StatusCode;
use polyledger::api::{self, AppState};
use polyledger::datasource::MockDataSource;
use polyledger::db::init_db;
use polyledger::{
    Config, Decimal, Fill, FillSource, MarketId, OutcomeIndex, Repository, Resolution, Role, TimeMs,
    Wallet,
};
use std::collections::HashMap;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

const ALICE: &str = "0x00000000000000000000000000000000000000a1";
const ALICE_PROXY: &str = "0x00000000000000000000000000000000000000a2";
const ACCOUNT: &str = "0x00000000000000000000000000000000000000ac";
const BOB: &str = "0x00000000000000000000000000000000000000b0";

struct TestApp {
    app: axum::Router,
    state: AppState,
    _temp: TempDir,
}

fn test_config(db_path: &str) -> Config {
    let mut env = HashMap::new();
    env.insert("DATABASE_PATH".to_string(), db_path.to_string());
    env.insert("LOOKBACK_MS".to_string(), "0".to_string());
    env.insert("MIN_RESOLVED_POSITIONS".to_string(), "1".to_string());
    Config::from_env_map(env).unwrap()
}

fn d(s: &str) -> Decimal {
    Decimal::from_str_canonical(s).unwrap()
}

fn trade(wallet: &str, tx: &str, market: &str, time_ms: i64, qty: &str, cash: &str) -> Fill {
    Fill::new(
        tx,
        0,
        Wallet::new(wallet),
        MarketId::new(market),
        OutcomeIndex::new(0),
        TimeMs::new(time_ms),
        d(qty),
        d(cash),
        Role::Taker,
        FillSource::OrderMatched,
    )
}

fn resolution(market: &str, payout: &str) -> Resolution {
    Resolution::new(
        MarketId::new(market),
        OutcomeIndex::new(0),
        d(payout),
        TimeMs::new(10_000),
    )
}

async fn setup_test_app(datasource: MockDataSource) -> TestApp {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir
        .path()
        .join("test.db")
        .to_string_lossy()
        .to_string();
    let pool = init_db(&db_path).await.expect("init_db failed");

    let repo = Arc::new(Repository::new(pool));
    let state = AppState::with_datasource(repo, test_config(&db_path), Some(Arc::new(datasource)));
    let app = api::create_router(state.clone());

    TestApp {
        app,
        state,
        _temp: temp_dir,
    }
}

/// Alice (two raw wallets under one account) and Bob, all already ingested and rebuilt.
async fn seeded_app() -> TestApp {
    let test_app = setup_test_app(MockDataSource::new()).await;
    let repo = &test_app.state.repo;
    repo.insert_fills_batch(&[
        trade(ALICE, "0x01", "0xm1", 1000, "100", "-40"),
        trade(ALICE_PROXY, "0x02", "0xm2", 2000, "100", "-30"),
        trade(BOB, "0x03", "0xm1", 1500, "50", "-25"),
        trade(BOB, "0x04", "0xm1", 3000, "-50", "20"),
    ])
    .await
    .unwrap();
    repo.upsert_resolutions(&[resolution("0xm1", "1"), resolution("0xm2", "1")])
        .await
        .unwrap();
    repo.upsert_wallet_aliases(&[
        (Wallet::new(ALICE), Wallet::new(ACCOUNT)),
        (Wallet::new(ALICE_PROXY), Wallet::new(ACCOUNT)),
    ])
    .await
    .unwrap();
    test_app.state.orchestrator.rebuild_all().await.unwrap();
    test_app
}

async fn request(app: axum::Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
    let req = axum::http::Request::builder()
        .method(method)
        .uri(uri)
        .body(axum::body::Body::empty())
        .unwrap();

    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let body = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_and_ready() {
    let test_app = setup_test_app(MockDataSource::new()).await;

    let (status, body) = request(test_app.app.clone(), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = request(test_app.app.clone(), "GET", "/ready").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ready");
    assert!(body["lastRebuild"].is_null());

    test_app.state.orchestrator.rebuild_all().await.unwrap();
    let (_, body) = request(test_app.app, "GET", "/ready").await;
    assert_eq!(body["lastRebuild"]["unitsTotal"], 0);
}

#[tokio::test]
async fn test_positions_endpoint() {
    let test_app = seeded_app().await;

    let uri = format!("/v1/positions?wallet={}&includeLots=true", BOB);
    let (status, body) = request(test_app.app, "GET", &uri).await;
    assert_eq!(status, StatusCode::OK);

    let positions = body["positions"].as_array().unwrap();
    assert_eq!(positions.len(), 1);
    let p = &positions[0];
    assert_eq!(p["marketId"], "0xm1");
    assert_eq!(p["status"], "resolved_won");
    assert_eq!(p["totalRealizedPnl"], "-5");
    assert_eq!(p["isClosed"], true);
    assert_eq!(p["roi"], "-0.2");
    assert_eq!(body["lots"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_positions_rejects_bad_wallet() {
    let test_app = seeded_app().await;
    let (status, body) = request(test_app.app, "GET", "/v1/positions?wallet=not-a-wallet").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("wallet"));
}

#[tokio::test]
async fn test_pnl_raw_and_canonical() {
    let test_app = seeded_app().await;

    let (status, body) = request(
        test_app.app.clone(),
        "GET",
        &format!("/v1/pnl?wallet={}", ALICE),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["realizedPnl"], "60");
    assert_eq!(body["positionCount"], 1);

    let (status, body) = request(
        test_app.app,
        "GET",
        &format!("/v1/pnl?wallet={}&canonical=true", ACCOUNT),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["wallet"], ACCOUNT);
    assert_eq!(body["realizedPnl"], "130");
    assert_eq!(body["wins"], 2);
    assert_eq!(body["memberWallets"].as_array().unwrap().len(), 2);
    assert_eq!(body["winRate"], "1");
}

#[tokio::test]
async fn test_leaderboard_endpoint() {
    let test_app = seeded_app().await;

    let (status, body) = request(
        test_app.app.clone(),
        "GET",
        "/v1/leaderboard?sortKey=pnl&asOfMs=20000",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["sortKey"], "pnl");
    assert_eq!(body["candidates"], 2);

    let entries = body["entries"].as_array().unwrap();
    // Bob's loss is filtered by the non-negative PnL stage.
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["wallet"], ACCOUNT);
    assert_eq!(entries[0]["score"], "130");
    assert_eq!(entries[0]["confidence"], "low");

    let funnel = body["funnel"].as_array().unwrap();
    let pnl_stage = funnel
        .iter()
        .find(|s| s["stage"] == "non_negative_pnl")
        .unwrap();
    assert_eq!(pnl_stage["entered"], 2);
    assert_eq!(pnl_stage["survived"], 1);

    let (_, body) = request(
        test_app.app,
        "GET",
        "/v1/leaderboard?canonical=false&requireNonNegativePnl=false&asOfMs=20000",
    )
    .await;
    assert_eq!(body["candidates"], 3);
    assert_eq!(body["entries"].as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn test_leaderboard_rejects_unknown_sort_key() {
    let test_app = seeded_app().await;
    let (status, _) = request(test_app.app, "GET", "/v1/leaderboard?sortKey=volume").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rebuild_endpoint_ingests_wallet() {
    let ds = MockDataSource::new()
        .with_fill(trade(ALICE, "0x01", "0xm1", 1000, "-100", "60"))
        .with_resolution(resolution("0xm1", "0"));
    let test_app = setup_test_app(ds).await;

    let (status, body) = request(
        test_app.app.clone(),
        "POST",
        &format!("/v1/rebuild?wallet={}", ALICE),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unitsTotal"], 1);
    assert_eq!(body["unitsResolved"], 1);
    assert_eq!(body["unitsFailed"], 0);
    assert_eq!(body["outputDigest"].as_str().unwrap().len(), 64);

    let (_, body) = request(
        test_app.app,
        "GET",
        &format!("/v1/positions?wallet={}", ALICE),
    )
    .await;
    assert_eq!(body["positions"][0]["totalRealizedPnl"], "60");
    assert_eq!(body["positions"][0]["isShort"], true);
}

#[tokio::test]
async fn test_rebuild_all_endpoint() {
    let test_app = seeded_app().await;
    let (status, body) = request(test_app.app, "POST", "/v1/rebuild").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["unitsTotal"], 3);
    assert_eq!(body["unitsSucceeded"], 3);
}
