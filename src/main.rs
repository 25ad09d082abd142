use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;

use martin::chat::StubChatClient;
use martin::config::Config;
use martin::domain::enums::{NightSessionMode, TimeMode};
use martin::exchange::candles::BinanceCandleClient;
use martin::exchange::discovery::GammaClient;
use martin::exchange::orders::ClobOrderClient;
use martin::exchange::prices::ClobPriceClient;
use martin::exchange::signing::OrderAuth;
use martin::execution::ExecutionMode;
use martin::logging::{self, obj, v_str, Domain, Level};
use martin::orchestrator::Orchestrator;
use martin::snapshot::{refresh_all, TaSnapshotCache};
use martin::stats::{StatsConfig, StatsService};
use martin::storage::Database;
use martin::vault::{AesGcmVault, Vault};

const SNAPSHOT_TTL_SECONDS: i64 = 90;
const SNAPSHOT_REFRESH_SECONDS: u64 = 60;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    logging::log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("assets", v_str(&config.assets.join(","))),
            ("execution_mode", v_str(&format!("{:?}", config.execution_mode))),
            ("timezone", v_str(&config.timezone.to_string())),
        ]),
    );

    let db = Database::open(&config.db_path)?;
    db.init()?;
    recompute_startup_quantiles(&db, &config)?;

    let discovery = GammaClient::new(config.gamma_base_url.clone());
    let candles = BinanceCandleClient::new(config.binance_base_url.clone());
    let prices = ClobPriceClient::new(config.clob_base_url.clone());

    // Live-mode credentials are stored encrypted at rest and only decrypted once, at
    // startup, immediately before arming the order client.
    let order_client = match config.execution_mode {
        ExecutionMode::Paper => None,
        ExecutionMode::Live => {
            let vault = AesGcmVault::from_env()?;
            let api_key = vault.decrypt(config.live_api_key_encrypted.as_deref().expect("validated at config load"))?;
            let api_secret = vault.decrypt(config.live_api_secret_encrypted.as_deref().expect("validated at config load"))?;
            let auth = OrderAuth::Hmac { api_key, api_secret };
            Some(ClobOrderClient::new(config.clob_base_url.clone(), auth)?)
        }
    };
    let order_client_ref = order_client.as_ref().map(|c| c as &dyn martin::exchange::OrderClient);

    let chat = StubChatClient::new();
    let snapshots = TaSnapshotCache::new(SNAPSHOT_TTL_SECONDS);

    let orchestrator = Orchestrator::new(config.clone(), &db, &discovery, &candles, &prices, order_client_ref, &chat, &snapshots);

    let shutdown = Arc::new(AtomicBool::new(false));
    tokio::spawn(wait_for_shutdown_signal(shutdown.clone()));

    // Run the cycle and the independent snapshot refresher side by side on the same
    // task; neither needs `'static` lifetimes since `join!` never outlives this frame.
    tokio::join!(
        orchestrator.run(shutdown.clone()),
        run_snapshot_refresh(&candles, &snapshots, &config.assets, config.warmup_seconds, shutdown.clone()),
    );

    logging::log(Level::Info, Domain::System, "shutdown_complete", obj(&[]));
    Ok(())
}

/// Rolling STRICT quantile thresholds are recomputed once at startup (and again after
/// every settlement, in the orchestrator) so a freshly-restarted process doesn't trade
/// on a stale threshold left over from before a restart.
fn recompute_startup_quantiles(db: &Database, config: &Config) -> Result<()> {
    let stats_service = StatsService::new(StatsConfig {
        switch_streak_at: config.switch_streak_at,
        night_max_win_streak: config.night_max_win_streak,
        night_session_resets_trade_streak: matches!(config.night_session_mode, NightSessionMode::Hard),
        rolling_days: config.rolling_days,
        max_samples: config.max_samples,
        min_samples: config.min_samples,
        strict_fallback_mult: config.strict_fallback_mult,
        base_day_min_quality: config.base_day_min_quality,
        base_night_min_quality: config.base_night_min_quality,
        ..StatsConfig::default()
    });

    let mut stats = db.stats().get()?;
    let now = chrono::Utc::now().timestamp();
    let since_ts = now - config.rolling_days * 86_400;
    let day_qualities = db.trades().get_filled_quality_samples(TimeMode::Day, since_ts, config.max_samples)?;
    let night_qualities = db.trades().get_filled_quality_samples(TimeMode::Night, since_ts, config.max_samples)?;
    stats_service.update_rolling_quantiles(&mut stats, &day_qualities, &night_qualities, now);
    db.stats().upsert(&stats)?;
    Ok(())
}

async fn run_snapshot_refresh(candles: &BinanceCandleClient, cache: &TaSnapshotCache, assets: &[String], warmup_seconds: i64, shutdown: Arc<AtomicBool>) {
    while !shutdown.load(Ordering::Relaxed) {
        let now = chrono::Utc::now().timestamp();
        refresh_all(cache, candles, assets, warmup_seconds, now).await;
        for _ in 0..SNAPSHOT_REFRESH_SECONDS {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }
    }
}

async fn wait_for_shutdown_signal(shutdown: Arc<AtomicBool>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).expect("install SIGTERM handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    logging::log(Level::Info, Domain::System, "shutdown_signal_received", obj(&[]));
    shutdown.store(true, Ordering::Relaxed);
}
