//! Drives a real `Orchestrator` over fake collaborators and an in-memory database,
//! rather than exercising the building blocks directly (see `scenarios.rs` for those).
//! Covers the tail of the lifecycle — WAITING_CAP through settlement — since
//! reproducing the TA engine's exact signal detection from synthetic candles would
//! make the scenario fragile without compiling it to check.

use async_trait::async_trait;

use martin::domain::enums::{CapStatus, Decision, Direction, FillStatus, PolicyMode, TimeMode, TradeStatus};
use martin::domain::models::{CapCheck, MarketWindow, QualityBreakdown, Settings, Signal, Trade};
use martin::exchange::{Candle, CandleDataClient, MarketCandidate, MarketDiscoveryClient, PriceHistoryClient};
use martin::execution::ExecutionMode;
use martin::orchestrator::Orchestrator;
use martin::snapshot::TaSnapshotCache;
use martin::storage::Database;

struct FakeDiscovery {
    slug: String,
    outcome: Direction,
}

#[async_trait]
impl MarketDiscoveryClient for FakeDiscovery {
    async fn search_markets(&self, _asset: &str) -> anyhow::Result<Vec<MarketCandidate>> {
        Ok(vec![])
    }

    async fn get_market_by_slug(&self, slug: &str) -> anyhow::Result<Option<MarketCandidate>> {
        if slug != self.slug {
            return Ok(None);
        }
        Ok(Some(MarketCandidate {
            slug: self.slug.clone(),
            condition_id: "cond-1".into(),
            up_token_id: "up-token".into(),
            down_token_id: "down-token".into(),
            start_ts: 0,
            end_ts: 10_000,
            outcome: Some(self.outcome),
        }))
    }
}

struct NoCandles;

#[async_trait]
impl CandleDataClient for NoCandles {
    async fn get_candles(&self, _asset: &str, _interval: &str, _start_ts: i64, _end_ts: i64) -> anyhow::Result<Vec<Candle>> {
        Ok(vec![])
    }
}

struct FakePrices {
    points: Vec<(i64, f64)>,
}

#[async_trait]
impl PriceHistoryClient for FakePrices {
    async fn get_price_history(&self, _token_id: &str, _start_ts: i64, _end_ts: i64) -> anyhow::Result<Vec<(i64, f64)>> {
        Ok(self.points.clone())
    }
}

fn config() -> martin::config::Config {
    martin::config::Config {
        timezone: "UTC".parse().unwrap(),
        assets: vec!["BTC".to_string()],
        price_cap: 0.55,
        confirm_delay_seconds: 120,
        cap_min_ticks: 5,
        window_seconds: 3600,
        warmup_seconds: 7200,
        day_start_hour: 8,
        day_end_hour: 22,
        base_day_min_quality: 50.0,
        base_night_min_quality: 60.0,
        switch_streak_at: 3,
        night_max_win_streak: 5,
        night_session_mode: martin::domain::enums::NightSessionMode::Soft,
        night_autotrade_enabled: false,
        reminder_minutes_before_day_end: 0,
        stake_base_amount_usdc: 5.0,
        execution_mode: ExecutionMode::Paper,
        max_response_seconds: 600,
        rolling_days: 14,
        max_samples: 500,
        min_samples: 50,
        strict_fallback_mult: 1.25,
        db_path: ":memory:".to_string(),
        gamma_base_url: "https://gamma-api.polymarket.com".to_string(),
        binance_base_url: "https://api.binance.com".to_string(),
        clob_base_url: "https://clob.polymarket.com".to_string(),
        live_api_key_encrypted: None,
        live_api_secret_encrypted: None,
    }
}

/// Seeds a window + signal + trade already at WAITING_CAP (unix hour 0, so the
/// configured day window of [8,22) classifies `now` as NIGHT throughout), then drives
/// two real cycles through cap validation, auto-confirm, paper fill and settlement.
#[tokio::test]
async fn waiting_cap_trade_settles_as_a_night_win_over_two_ticks() {
    let db = Database::open_in_memory().unwrap();
    db.init().unwrap();

    let window = MarketWindow {
        id: None,
        asset: "BTC".into(),
        slug: "btc-1".into(),
        condition_id: "cond-1".into(),
        up_token_id: "up-token".into(),
        down_token_id: "down-token".into(),
        start_ts: 0,
        end_ts: 10_000,
        outcome: None,
        created_at: 0,
    };
    let window_id = db.market_windows().insert(&window).unwrap();

    let signal = Signal {
        id: None,
        window_id,
        direction: Direction::Up,
        signal_ts: 500,
        confirm_ts: 620,
        quality: 70.0,
        quality_breakdown: QualityBreakdown { final_quality: 70.0, ..Default::default() },
        anchor_bar_ts: 440,
        created_at: 500,
    };
    let signal_id = db.signals().insert(&signal).unwrap();

    let mut trade = Trade::new(window_id, TimeMode::Night, PolicyMode::Base, (0, 0), 500);
    trade.signal_id = Some(signal_id);
    trade.status = TradeStatus::WaitingCap;
    trade.token_id = "up-token".into();
    let trade_id = db.trades().insert(&trade).unwrap();

    let cap_check = CapCheck::new(trade_id, "up-token".into(), 620, 10_000, 600);
    assert_eq!(cap_check.status, CapStatus::Pending);
    db.cap_checks().insert(&cap_check).unwrap();

    db.settings().upsert(&Settings::empty(0)).unwrap();

    let cfg = config();
    let discovery = FakeDiscovery { slug: "btc-1".into(), outcome: Direction::Up };
    let candles = NoCandles;
    let prices = FakePrices { points: vec![(620, 0.54), (621, 0.53), (622, 0.52), (623, 0.51), (624, 0.50)] };
    let chat = martin::chat::StubChatClient::new();
    let snapshots = TaSnapshotCache::new(90);

    let orchestrator = Orchestrator::new(cfg, &db, &discovery, &candles, &prices, None, &chat, &snapshots);

    orchestrator.tick(700).await.unwrap();
    let after_cap = db.trades().get_by_id(trade_id).unwrap().unwrap();
    assert_eq!(after_cap.status, TradeStatus::Ready);

    orchestrator.tick(710).await.unwrap();
    let settled = db.trades().get_by_id(trade_id).unwrap().unwrap();
    assert_eq!(settled.status, TradeStatus::Settled);
    assert_eq!(settled.decision, Decision::AutoOk);
    assert_eq!(settled.fill_status, FillStatus::Filled);
    assert_eq!(settled.fill_price, Some(0.55));
    assert_eq!(settled.is_win, Some(true));
    assert!(settled.pnl.unwrap() > 0.0);

    let stats = db.stats().get().unwrap();
    assert_eq!(stats.total_trades, 1);
    assert_eq!(stats.total_wins, 1);
    assert_eq!(stats.win_rate(), 100.0);
}
