//! Periodic orchestrator (§4.5): one cycle per wake, driving discovery, in-window signal
//! search, confirmation, cap validation, order placement and settlement across every
//! non-terminal trade. Collaborators are injected as trait objects so the cycle can run
//! against paper or live execution without branching on mode outside `execution.rs`.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{TimeZone, Timelike, Utc};

use crate::cap::CapValidator;
use crate::chat::{ChatClient, UserResponse};
use crate::config::Config;
use crate::domain::enums::{CapStatus, Decision, Direction, TimeMode, TradeStatus};
use crate::domain::models::{CapCheck, MarketWindow, Signal, Stats, Trade};
use crate::exchange::{Candle, CandleDataClient, MarketCandidate, MarketDiscoveryClient, OrderClient, PriceHistoryClient};
use crate::execution::{ExecutionMode, ExecutionService};
use crate::logging::{self, Domain as LogDomain, Level};
use crate::snapshot::TaSnapshotCache;
use crate::state_machine;
use crate::stats::{StatsConfig, StatsService};
use crate::storage::Database;
use crate::ta;
use crate::time_mode::TimeModeService;

/// Wires every external collaborator for the trade lifecycle together and drives it
/// one cycle at a time. Holds no trade state of its own; everything lives in `db`.
pub struct Orchestrator<'a> {
    config: Config,
    db: &'a Database,
    discovery: &'a dyn MarketDiscoveryClient,
    candles: &'a dyn CandleDataClient,
    prices: &'a dyn PriceHistoryClient,
    order_client: Option<&'a dyn OrderClient>,
    chat: &'a dyn ChatClient,
    snapshots: &'a TaSnapshotCache,
    time_mode_service: TimeModeService,
    stats_service: StatsService,
    cycle_id: AtomicU64,
    last_reminder_date: Mutex<Option<i64>>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: Config,
        db: &'a Database,
        discovery: &'a dyn MarketDiscoveryClient,
        candles: &'a dyn CandleDataClient,
        prices: &'a dyn PriceHistoryClient,
        order_client: Option<&'a dyn OrderClient>,
        chat: &'a dyn ChatClient,
        snapshots: &'a TaSnapshotCache,
    ) -> Self {
        let time_mode_service = TimeModeService::new(config.timezone, config.day_start_hour, config.day_end_hour, config.night_autotrade_enabled);
        let stats_service = StatsService::new(StatsConfig {
            switch_streak_at: config.switch_streak_at,
            night_max_win_streak: config.night_max_win_streak,
            night_session_resets_trade_streak: matches!(config.night_session_mode, crate::domain::enums::NightSessionMode::Hard),
            rolling_days: config.rolling_days,
            max_samples: config.max_samples,
            min_samples: config.min_samples,
            strict_fallback_mult: config.strict_fallback_mult,
            base_day_min_quality: config.base_day_min_quality,
            base_night_min_quality: config.base_night_min_quality,
            ..StatsConfig::default()
        });
        Self {
            config,
            db,
            discovery,
            candles,
            prices,
            order_client,
            chat,
            snapshots,
            time_mode_service,
            stats_service,
            cycle_id: AtomicU64::new(0),
            last_reminder_date: Mutex::new(None),
        }
    }

    /// Drives the cycle on a fixed cadence until `shutdown` flips true. Runs alongside
    /// an independently spawned TA-snapshot-refresh task; see `main.rs` for the wiring.
    pub async fn run(&self, shutdown: Arc<AtomicBool>) {
        logging::log(Level::Info, LogDomain::System, "orchestrator_started", logging::obj(&[]));
        while !shutdown.load(Ordering::Relaxed) {
            let _scope = logging::ProfileScope::new("orchestrator_tick");
            let now = Utc::now().timestamp();
            if let Err(err) = self.tick(now).await {
                logging::log(
                    Level::Error,
                    LogDomain::System,
                    "cycle_error",
                    logging::obj(&[("error", logging::v_str(&err.to_string()))]),
                );
            }
            drop(_scope);
            logging::tick_aggregator();
            Self::sleep_cooperatively(Duration::from_secs(60), &shutdown).await;
        }
        logging::log(Level::Info, LogDomain::System, "orchestrator_stopped", logging::obj(&[]));
    }

    async fn sleep_cooperatively(total: Duration, shutdown: &Arc<AtomicBool>) {
        let step = Duration::from_millis(500);
        let mut waited = Duration::ZERO;
        while waited < total {
            if shutdown.load(Ordering::Relaxed) {
                return;
            }
            let chunk = step.min(total - waited);
            tokio::time::sleep(chunk).await;
            waited += chunk;
        }
    }

    /// One cycle: pause/mode gate -> day-end reminder -> discovery -> active-trade
    /// processing -> settlement. Active trades are re-fetched fresh after discovery,
    /// since discovery may have just created new SEARCHING_SIGNAL trades this tick.
    /// Public so integration tests can drive individual cycles deterministically.
    pub async fn tick(&self, now: i64) -> Result<()> {
        let cycle_id = self.cycle_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stats = self.db.stats().get()?;

        logging::log(
            Level::Info,
            LogDomain::System,
            "cycle_start",
            logging::obj(&[("cycle_id", serde_json::json!(cycle_id)), ("is_paused", serde_json::json!(stats.is_paused))]),
        );

        if stats.is_paused {
            logging::log(Level::Info, LogDomain::System, "cycle_skip_paused", logging::obj(&[("cycle_id", serde_json::json!(cycle_id))]));
            return Ok(());
        }

        let time_mode = self.time_mode_service.get_current_mode(now);
        if (stats.day_only && time_mode == TimeMode::Night) || (stats.night_only && time_mode == TimeMode::Day) {
            logging::log(
                Level::Info,
                LogDomain::System,
                "cycle_skip_mode",
                logging::obj(&[("cycle_id", serde_json::json!(cycle_id)), ("time_mode", logging::v_str(&format!("{:?}", time_mode)))]),
            );
            return Ok(());
        }

        let settings = self.db.settings().get()?;
        let effective = self.config.apply_settings(&settings);

        // Step 0 (non-mutating): best-effort day-end reminder, once per local day.
        self.maybe_send_day_end_reminder(now, time_mode).await;

        self.discover(now, &effective, &stats, time_mode, cycle_id).await;

        let active_trades = self.db.trades().get_non_terminal()?;
        for mut trade in active_trades {
            if let Err(err) = self.process_trade(&mut trade, now, time_mode, &stats, &effective, cycle_id).await {
                logging::log(
                    Level::Error,
                    LogDomain::System,
                    "trade_processing_error",
                    logging::obj(&[
                        ("cycle_id", serde_json::json!(cycle_id)),
                        ("trade_id", serde_json::json!(trade.id)),
                        ("error", logging::v_str(&err.to_string())),
                    ]),
                );
            }
        }

        self.settle_pending(now, cycle_id).await;

        logging::log(Level::Info, LogDomain::System, "cycle_end", logging::obj(&[("cycle_id", serde_json::json!(cycle_id))]));
        Ok(())
    }

    /// Fires `send_notice` once per local calendar day, `reminder_minutes_before_day_end`
    /// minutes before the configured day/night boundary. Never touches trade or stats
    /// state; a failure here never aborts the cycle.
    async fn maybe_send_day_end_reminder(&self, now: i64, time_mode: TimeMode) {
        if time_mode != TimeMode::Day || self.config.day_start_hour == self.config.day_end_hour {
            return;
        }

        let local = Utc.timestamp_opt(now, 0).single().expect("valid unix timestamp").with_timezone(&self.config.timezone);
        let today = local.date_naive().and_hms_opt(0, 0, 0).map(|d| d.and_utc().timestamp()).unwrap_or(now);

        let minutes_to_boundary = {
            let day_end_minute = self.config.day_end_hour as i64 * 60;
            let current_minute = local.hour() as i64 * 60 + local.minute() as i64;
            if self.config.day_start_hour < self.config.day_end_hour {
                day_end_minute - current_minute
            } else if current_minute < day_end_minute {
                day_end_minute - current_minute
            } else {
                (24 * 60 - current_minute) + day_end_minute
            }
        };

        if minutes_to_boundary < 0 || minutes_to_boundary > self.config.reminder_minutes_before_day_end {
            return;
        }

        let mut last = self.last_reminder_date.lock().expect("reminder mutex poisoned");
        if *last == Some(today) {
            return;
        }
        *last = Some(today);
        drop(last);

        self.chat.send_notice(&format!("Day session ends in {} minute(s).", minutes_to_boundary.max(0))).await;
        logging::log(Level::Info, LogDomain::System, "day_end_reminder_sent", logging::obj(&[]));
    }

    /// Per-asset market discovery with persistence and SEARCHING_SIGNAL creation, plus
    /// dedup against any window that already has a non-terminal trade.
    async fn discover(&self, now: i64, cfg: &Config, stats: &Stats, time_mode: TimeMode, cycle_id: u64) {
        let non_terminal = self.db.trades().get_non_terminal().unwrap_or_default();
        let windows_with_active_trade: HashSet<i64> = non_terminal.iter().map(|t| t.window_id).collect();

        for asset in &cfg.assets {
            let candidates = match self.discovery.search_markets(asset).await {
                Ok(c) => c,
                Err(err) => {
                    logging::log(
                        Level::Warn,
                        LogDomain::Market,
                        "discovery_error",
                        logging::obj(&[
                            ("cycle_id", serde_json::json!(cycle_id)),
                            ("asset", logging::v_str(asset)),
                            ("error", logging::v_str(&err.to_string())),
                        ]),
                    );
                    continue;
                }
            };

            for candidate in candidates {
                self.ensure_window_and_trade(candidate, asset, now, stats, time_mode, &windows_with_active_trade, cycle_id).await;
            }
        }
    }

    async fn ensure_window_and_trade(
        &self,
        candidate: MarketCandidate,
        asset: &str,
        now: i64,
        stats: &Stats,
        time_mode: TimeMode,
        windows_with_active_trade: &HashSet<i64>,
        cycle_id: u64,
    ) {
        let window = match self.db.market_windows().get_by_slug(&candidate.slug) {
            Ok(Some(w)) => w,
            Ok(None) => {
                let w = MarketWindow {
                    id: None,
                    asset: asset.to_string(),
                    slug: candidate.slug.clone(),
                    condition_id: candidate.condition_id.clone(),
                    up_token_id: candidate.up_token_id.clone(),
                    down_token_id: candidate.down_token_id.clone(),
                    start_ts: candidate.start_ts,
                    end_ts: candidate.end_ts,
                    outcome: candidate.outcome,
                    created_at: now,
                };
                match self.db.market_windows().insert(&w) {
                    Ok(id) => {
                        logging::log(
                            Level::Info,
                            LogDomain::Market,
                            "window_selected",
                            logging::obj(&[
                                ("cycle_id", serde_json::json!(cycle_id)),
                                ("window_id", serde_json::json!(id)),
                                ("slug", logging::v_str(&w.slug)),
                            ]),
                        );
                        MarketWindow { id: Some(id), ..w }
                    }
                    Err(err) => {
                        logging::log(Level::Error, LogDomain::Market, "window_insert_failed", logging::obj(&[("error", logging::v_str(&err.to_string()))]));
                        return;
                    }
                }
            }
            Err(err) => {
                logging::log(Level::Error, LogDomain::Market, "window_lookup_failed", logging::obj(&[("error", logging::v_str(&err.to_string()))]));
                return;
            }
        };

        if window.is_expired(now) {
            return;
        }

        if windows_with_active_trade.contains(&window.id.expect("persisted window")) {
            return;
        }

        self.create_searching_signal_trade(&window, now, stats, time_mode, cycle_id);
    }

    /// Refuses to create any trade row at all for a NIGHT window when night autotrade
    /// is disabled, matching the "no CANCELLED ghost trade" rule.
    fn create_searching_signal_trade(&self, window: &MarketWindow, now: i64, stats: &Stats, time_mode: TimeMode, cycle_id: u64) {
        if time_mode == TimeMode::Night && !self.time_mode_service.is_night_autotrade_enabled() {
            logging::log(
                Level::Info,
                LogDomain::System,
                "night_trading_disabled",
                logging::obj(&[("cycle_id", serde_json::json!(cycle_id)), ("window_id", serde_json::json!(window.id))]),
            );
            return;
        }

        let mut trade = Trade::new(window.id.expect("persisted window"), time_mode, stats.policy_mode, (stats.trade_level_streak, stats.night_streak), now);
        if let Err(err) = state_machine::on_start_searching(&mut trade, now) {
            logging::log(Level::Error, LogDomain::System, "trade_start_failed", logging::obj(&[("error", logging::v_str(&err.to_string()))]));
            return;
        }

        match self.db.trades().insert(&trade) {
            Ok(id) => logging::log(
                Level::Info,
                LogDomain::System,
                "trade_created",
                logging::obj(&[("cycle_id", serde_json::json!(cycle_id)), ("trade_id", serde_json::json!(id)), ("window_id", serde_json::json!(window.id))]),
            ),
            Err(err) => logging::log(Level::Error, LogDomain::System, "trade_insert_failed", logging::obj(&[("error", logging::v_str(&err.to_string()))])),
        }
    }

    /// Per-status dispatch for one non-terminal trade. An expired parent window forces
    /// the trade to CANCELLED(EXPIRED) (or NO_SIGNAL if still searching) regardless of
    /// status.
    async fn process_trade(&self, trade: &mut Trade, now: i64, time_mode: TimeMode, stats: &Stats, cfg: &Config, cycle_id: u64) -> Result<()> {
        let window = match self.db.market_windows().get_by_id(trade.window_id)? {
            Some(w) => w,
            None => return Ok(()),
        };

        if window.is_expired(now) {
            if trade.status == TradeStatus::SearchingSignal {
                state_machine::on_no_qualifying_signal(trade, now)?;
            } else {
                state_machine::on_expired(trade, now)?;
            }
            self.db.trades().update(trade)?;
            return Ok(());
        }

        match trade.status {
            TradeStatus::SearchingSignal => self.process_searching_signal(trade, &window, now, time_mode, stats, cfg, cycle_id).await?,
            TradeStatus::WaitingConfirm => self.process_waiting_confirm(trade, &window, now)?,
            TradeStatus::WaitingCap => self.process_waiting_cap(trade, cfg, now).await?,
            TradeStatus::Ready => self.process_ready(trade, &window, now, time_mode, cfg, cycle_id).await?,
            _ => {}
        }
        Ok(())
    }

    /// Continuous in-window scanning: stays in SEARCHING_SIGNAL while no signal clears
    /// the quality bar, or while a cleared signal's confirm window would run past the
    /// window end (a later, better-timed signal may still arrive).
    async fn process_searching_signal(
        &self,
        trade: &mut Trade,
        window: &MarketWindow,
        now: i64,
        time_mode: TimeMode,
        stats: &Stats,
        cfg: &Config,
        cycle_id: u64,
    ) -> Result<()> {
        let (candles_1m, candles_5m) = match self.fetch_candles(&window.asset, window.start_ts, now, cfg.warmup_seconds).await {
            Ok(pair) => pair,
            Err(err) => {
                logging::log(
                    Level::Warn,
                    LogDomain::Market,
                    "searching_signal_candles_error",
                    logging::obj(&[
                        ("cycle_id", serde_json::json!(cycle_id)),
                        ("trade_id", serde_json::json!(trade.id)),
                        ("error", logging::v_str(&err.to_string())),
                    ]),
                );
                return Ok(());
            }
        };

        let detected = match ta::detect_signal(&candles_1m, window.start_ts) {
            Some(d) => d,
            None => return Ok(()),
        };

        let breakdown = ta::calculate_quality(&detected, &candles_5m);
        let threshold = self.stats_service.get_current_threshold(stats, time_mode, trade.policy_mode);
        if breakdown.final_quality < threshold {
            return Ok(());
        }

        let confirm_ts = detected.signal_ts + cfg.confirm_delay_seconds;
        if confirm_ts >= window.end_ts {
            return Ok(());
        }

        let mut signal = Signal {
            id: None,
            window_id: window.id.expect("persisted window"),
            direction: detected.direction,
            signal_ts: detected.signal_ts,
            confirm_ts,
            quality: breakdown.final_quality,
            quality_breakdown: breakdown,
            anchor_bar_ts: detected.anchor_bar_ts,
            created_at: now,
        };
        let signal_id = self.db.signals().insert(&signal)?;
        signal.id = Some(signal_id);

        state_machine::on_qualifying_signal_found(trade, &signal, now)?;
        state_machine::on_quality_pass(trade, now)?;
        self.db.trades().update(trade)?;

        self.chat.send_trade_card(trade.id.expect("persisted trade"), signal.direction, signal.quality).await;

        logging::log_signal(window.id.expect("persisted window"), &format!("{:?}", signal.direction).to_uppercase(), signal.quality, signal.confirm_ts);
        logging::log(
            Level::Info,
            LogDomain::Signal,
            "qualifying_signal_found",
            logging::obj(&[("cycle_id", serde_json::json!(cycle_id)), ("trade_id", serde_json::json!(trade.id))]),
        );
        Ok(())
    }

    /// Cache-aside candle fetch: serves the TA snapshot cache when fresh, falling back
    /// to a direct concurrent fetch on miss or staleness.
    async fn fetch_candles(&self, asset: &str, window_start: i64, now: i64, warmup_seconds: i64) -> Result<(Vec<Candle>, Vec<Candle>)> {
        if let Some(snapshot) = self.snapshots.get(asset, now) {
            return Ok((snapshot.candles_1m, snapshot.candles_5m));
        }
        let start_ts = window_start.min(now) - warmup_seconds;
        let (candles_1m, candles_5m) =
            futures::try_join!(self.candles.get_candles(asset, "1m", start_ts, now), self.candles.get_candles(asset, "5m", start_ts, now))?;
        Ok((candles_1m, candles_5m))
    }

    /// WAITING_CONFIRM -> WAITING_CAP once `signal.confirm_ts` has elapsed; the
    /// orchestrator (not the state machine) owns constructing the resulting CapCheck.
    fn process_waiting_confirm(&self, trade: &mut Trade, window: &MarketWindow, now: i64) -> Result<()> {
        let signal_id = match trade.signal_id {
            Some(id) => id,
            None => return Ok(()),
        };
        let signal = match self.db.signals().get_by_id(signal_id)? {
            Some(s) => s,
            None => return Ok(()),
        };
        if now < signal.confirm_ts {
            return Ok(());
        }

        state_machine::on_confirm_reached(trade, now)?;
        let token_id = match signal.direction {
            Direction::Up => window.up_token_id.clone(),
            Direction::Down => window.down_token_id.clone(),
        };
        let cap_check = CapCheck::new(trade.id.expect("persisted trade"), token_id, signal.confirm_ts, window.end_ts, now);
        self.db.cap_checks().insert(&cap_check)?;
        self.db.trades().update(trade)?;
        Ok(())
    }

    /// WAITING_CAP: evaluates the persisted CapCheck, idempotently, against the
    /// configured price cap and minimum consecutive-tick requirement.
    async fn process_waiting_cap(&self, trade: &mut Trade, cfg: &Config, now: i64) -> Result<()> {
        let mut cap_check = match self.db.cap_checks().get_by_trade_id(trade.id.expect("persisted trade"))? {
            Some(c) => c,
            None => return Ok(()),
        };

        if cap_check.status == CapStatus::Late {
            state_machine::on_cap_late(trade, now)?;
            self.db.trades().update(trade)?;
            return Ok(());
        }

        if cap_check.status == CapStatus::Pending {
            let validator = CapValidator::new(self.prices, cfg.price_cap, cfg.cap_min_ticks);
            cap_check = validator.check(cap_check, now).await?;
            self.db.cap_checks().update(&cap_check)?;
        }

        match cap_check.status {
            CapStatus::Pass => {
                state_machine::on_cap_pass(trade, &cap_check, now)?;
                self.db.trades().update(trade)?;
            }
            CapStatus::Fail => {
                state_machine::on_cap_fail(trade, now)?;
                self.db.trades().update(trade)?;
            }
            CapStatus::Late | CapStatus::Pending => {}
        }
        Ok(())
    }

    /// READY: day mode waits for a chat decision (auto-skipping past
    /// `max_response_seconds`), night mode auto-confirms; either way a taken decision
    /// places and immediately fills an order (paper-mode-shaped: no partial fills).
    async fn process_ready(&self, trade: &mut Trade, window: &MarketWindow, now: i64, time_mode: TimeMode, cfg: &Config, cycle_id: u64) -> Result<()> {
        let signal_id = match trade.signal_id {
            Some(id) => id,
            None => return Ok(()),
        };
        let signal = match self.db.signals().get_by_id(signal_id)? {
            Some(s) => s,
            None => return Ok(()),
        };

        match time_mode {
            TimeMode::Day => {
                match trade.decision {
                    Decision::Pending => {
                        let elapsed_since_ready = now - signal.confirm_ts;
                        if cfg.max_response_seconds > 0 && elapsed_since_ready >= cfg.max_response_seconds {
                            state_machine::on_user_no_response_skip(trade, now)?;
                            self.db.trades().update(trade)?;
                            return Ok(());
                        }
                        match self.chat.poll_response(trade.id.expect("persisted trade")).await {
                            Some(UserResponse::Ok) => state_machine::on_user_ok(trade),
                            Some(UserResponse::Skip) => {
                                state_machine::on_user_skip(trade, now)?;
                                self.db.trades().update(trade)?;
                                return Ok(());
                            }
                            None => return Ok(()),
                        }
                    }
                    Decision::Skip | Decision::AutoSkip => return Ok(()),
                    Decision::Ok | Decision::AutoOk => {}
                }
            }
            TimeMode::Night => {
                if trade.decision == Decision::Pending {
                    state_machine::on_auto_ok(trade);
                }
            }
        }

        if !matches!(trade.decision, Decision::Ok | Decision::AutoOk) {
            self.db.trades().update(trade)?;
            return Ok(());
        }

        let execution = match cfg.execution_mode {
            ExecutionMode::Paper => ExecutionService::paper(cfg.price_cap),
            ExecutionMode::Live => {
                ExecutionService::live(cfg.price_cap, self.order_client.ok_or_else(|| anyhow::anyhow!("live execution requires an order client"))?)
            }
        };

        let stake = execution.calculate_stake(cfg.stake_base_amount_usdc);
        let placed = match execution.place_order(window, signal.direction, stake).await {
            Ok(p) => p,
            Err(err) => {
                logging::log(
                    Level::Error,
                    LogDomain::Exec,
                    "order_failed",
                    logging::obj(&[
                        ("cycle_id", serde_json::json!(cycle_id)),
                        ("trade_id", serde_json::json!(trade.id)),
                        ("error", logging::v_str(&err.to_string())),
                    ]),
                );
                self.db.trades().update(trade)?;
                return Ok(());
            }
        };

        state_machine::on_order_placed(trade, placed.order_id.clone(), placed.token_id.clone(), stake, now)?;
        state_machine::on_order_filled(trade, placed.fill_price);
        self.db.trades().update(trade)?;

        logging::log(
            Level::Info,
            LogDomain::Exec,
            "order_filled",
            logging::obj(&[
                ("cycle_id", serde_json::json!(cycle_id)),
                ("trade_id", serde_json::json!(trade.id)),
                ("order_id", logging::v_str(&placed.order_id)),
                ("fill_price", logging::v_num(placed.fill_price)),
            ]),
        );
        Ok(())
    }

    /// Settlement sweep over every ORDER_PLACED trade: resolves a missing window
    /// outcome best-effort, then settles and folds the result into stats once known.
    async fn settle_pending(&self, now: i64, cycle_id: u64) {
        let pending: Vec<Trade> = match self.db.trades().get_non_terminal() {
            Ok(trades) => trades.into_iter().filter(|t| t.status == TradeStatus::OrderPlaced).collect(),
            Err(err) => {
                logging::log(Level::Error, LogDomain::Fill, "settlement_scan_failed", logging::obj(&[("error", logging::v_str(&err.to_string()))]));
                return;
            }
        };

        for mut trade in pending {
            if let Err(err) = self.settle_one(&mut trade, now, cycle_id).await {
                logging::log(
                    Level::Error,
                    LogDomain::Fill,
                    "settlement_failed",
                    logging::obj(&[
                        ("cycle_id", serde_json::json!(cycle_id)),
                        ("trade_id", serde_json::json!(trade.id)),
                        ("error", logging::v_str(&err.to_string())),
                    ]),
                );
            }
        }
    }

    async fn settle_one(&self, trade: &mut Trade, now: i64, cycle_id: u64) -> Result<()> {
        let mut window = match self.db.market_windows().get_by_id(trade.window_id)? {
            Some(w) => w,
            None => return Ok(()),
        };

        if window.outcome.is_none() {
            if let Ok(Some(refreshed)) = self.discovery.get_market_by_slug(&window.slug).await {
                if let Some(outcome) = refreshed.outcome {
                    self.db.market_windows().update_outcome(window.id.expect("persisted window"), outcome)?;
                    window.outcome = Some(outcome);
                    logging::log(
                        Level::Info,
                        LogDomain::Fill,
                        "settlement_outcome_found",
                        logging::obj(&[("cycle_id", serde_json::json!(cycle_id)), ("trade_id", serde_json::json!(trade.id))]),
                    );
                }
            }
        }

        let outcome = match window.outcome {
            Some(o) => o,
            None => return Ok(()),
        };

        let signal_id = match trade.signal_id {
            Some(id) => id,
            None => return Ok(()),
        };
        let signal = match self.db.signals().get_by_id(signal_id)? {
            Some(s) => s,
            None => return Ok(()),
        };
        let fill_price = match trade.fill_price {
            Some(p) => p,
            None => return Ok(()),
        };

        let execution = ExecutionService::paper(fill_price);
        let (is_win, pnl) = execution.settle_trade(signal.direction, fill_price, trade.stake_amount, outcome);

        state_machine::on_settled(trade, is_win, pnl, now)?;
        self.db.trades().update(trade)?;

        let mut stats = self.db.stats().get()?;
        self.stats_service.on_trade_settled(&mut stats, trade, is_win, trade.time_mode, now);
        self.db.stats().upsert(&stats)?;

        let since_ts = now - self.config.rolling_days * 86_400;
        let day_qualities = self.db.trades().get_filled_quality_samples(TimeMode::Day, since_ts, self.config.max_samples)?;
        let night_qualities = self.db.trades().get_filled_quality_samples(TimeMode::Night, since_ts, self.config.max_samples)?;
        self.stats_service.update_rolling_quantiles(&mut stats, &day_qualities, &night_qualities, now);
        self.db.stats().upsert(&stats)?;

        logging::log_settlement(trade.id.unwrap_or(0), is_win, pnl, stats.trade_level_streak);
        logging::agg_increment("settlement");
        logging::log(
            Level::Info,
            LogDomain::Fill,
            "settlement_complete",
            logging::obj(&[
                ("cycle_id", serde_json::json!(cycle_id)),
                ("trade_id", serde_json::json!(trade.id)),
                ("is_win", serde_json::json!(is_win)),
                ("pnl", logging::v_num(pnl)),
            ]),
        );
        Ok(())
    }
}
