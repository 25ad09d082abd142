//! Per-entity repositories. Enums are persisted as their serde string representation
//! (e.g. `Direction::Up` -> `"UP"`) so the schema stays human-readable in `sqlite3 .dump`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::domain::enums::TimeMode;
use crate::domain::models::{CapCheck, MarketWindow, Settings, Signal, Stats, Trade};
use crate::errors::MartinError;

fn ser_enum<T: Serialize>(v: &T) -> String {
    match serde_json::to_value(v) {
        Ok(Value::String(s)) => s,
        other => panic!("enum did not serialize to a string: {other:?}"),
    }
}

fn de_enum<T: DeserializeOwned>(s: &str) -> T {
    serde_json::from_value(Value::String(s.to_string())).expect("stored enum text is not valid for this type")
}

pub struct MarketWindowRepository<'a> {
    conn: &'a Connection,
}

impl<'a> MarketWindowRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, w: &MarketWindow) -> Result<i64, MartinError> {
        self.conn.execute(
            "INSERT INTO market_windows (asset, slug, condition_id, up_token_id, down_token_id, start_ts, end_ts, outcome, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![w.asset, w.slug, w.condition_id, w.up_token_id, w.down_token_id, w.start_ts, w.end_ts, w.outcome.map(|d| ser_enum(&d)), w.created_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update_outcome(&self, id: i64, outcome: crate::domain::enums::Direction) -> Result<(), MartinError> {
        self.conn.execute("UPDATE market_windows SET outcome = ?1 WHERE id = ?2", params![ser_enum(&outcome), id])?;
        Ok(())
    }

    pub fn get_by_slug(&self, slug: &str) -> Result<Option<MarketWindow>, MartinError> {
        self.conn
            .query_row(
                "SELECT id, asset, slug, condition_id, up_token_id, down_token_id, start_ts, end_ts, outcome, created_at
                 FROM market_windows WHERE slug = ?1",
                params![slug],
                Self::from_row,
            )
            .optional()
            .map_err(MartinError::from)
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<MarketWindow>, MartinError> {
        self.conn
            .query_row(
                "SELECT id, asset, slug, condition_id, up_token_id, down_token_id, start_ts, end_ts, outcome, created_at
                 FROM market_windows WHERE id = ?1",
                params![id],
                Self::from_row,
            )
            .optional()
            .map_err(MartinError::from)
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<MarketWindow> {
        let outcome: Option<String> = row.get(8)?;
        Ok(MarketWindow {
            id: row.get(0)?,
            asset: row.get(1)?,
            slug: row.get(2)?,
            condition_id: row.get(3)?,
            up_token_id: row.get(4)?,
            down_token_id: row.get(5)?,
            start_ts: row.get(6)?,
            end_ts: row.get(7)?,
            outcome: outcome.map(|s| de_enum(&s)),
            created_at: row.get(9)?,
        })
    }
}

pub struct SignalRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SignalRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, s: &Signal) -> Result<i64, MartinError> {
        let breakdown_json = serde_json::to_string(&s.quality_breakdown).map_err(|e| MartinError::Config(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO signals (window_id, direction, signal_ts, confirm_ts, quality, quality_breakdown, anchor_bar_ts, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![s.window_id, ser_enum(&s.direction), s.signal_ts, s.confirm_ts, s.quality, breakdown_json, s.anchor_bar_ts, s.created_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Signal>, MartinError> {
        self.conn
            .query_row(
                "SELECT id, window_id, direction, signal_ts, confirm_ts, quality, quality_breakdown, anchor_bar_ts, created_at
                 FROM signals WHERE id = ?1",
                params![id],
                Self::from_row,
            )
            .optional()
            .map_err(MartinError::from)
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Signal> {
        let direction: String = row.get(2)?;
        let breakdown_json: String = row.get(6)?;
        Ok(Signal {
            id: row.get(0)?,
            window_id: row.get(1)?,
            direction: de_enum(&direction),
            signal_ts: row.get(3)?,
            confirm_ts: row.get(4)?,
            quality: row.get(5)?,
            quality_breakdown: serde_json::from_str(&breakdown_json).unwrap_or_default(),
            anchor_bar_ts: row.get(7)?,
            created_at: row.get(8)?,
        })
    }
}

pub struct TradeRepository<'a> {
    conn: &'a Connection,
}

impl<'a> TradeRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, t: &Trade) -> Result<i64, MartinError> {
        self.conn.execute(
            "INSERT INTO trades (window_id, signal_id, status, time_mode, policy_mode, decision, cancel_reason, token_id,
                                  order_id, fill_status, fill_price, stake_amount, pnl, is_win, trade_level_streak, night_streak,
                                  created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
            params![
                t.window_id,
                t.signal_id,
                ser_enum(&t.status),
                ser_enum(&t.time_mode),
                ser_enum(&t.policy_mode),
                ser_enum(&t.decision),
                t.cancel_reason.map(|r| ser_enum(&r)),
                t.token_id,
                t.order_id,
                ser_enum(&t.fill_status),
                t.fill_price,
                t.stake_amount,
                t.pnl,
                t.is_win,
                t.trade_level_streak,
                t.night_streak,
                t.created_at,
                t.updated_at,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update(&self, t: &Trade) -> Result<(), MartinError> {
        let id = t.id.expect("cannot update a trade without an id");
        self.conn.execute(
            "UPDATE trades SET signal_id = ?1, status = ?2, decision = ?3, cancel_reason = ?4, token_id = ?5, order_id = ?6,
                                fill_status = ?7, fill_price = ?8, stake_amount = ?9, pnl = ?10, is_win = ?11, updated_at = ?12
             WHERE id = ?13",
            params![
                t.signal_id,
                ser_enum(&t.status),
                ser_enum(&t.decision),
                t.cancel_reason.map(|r| ser_enum(&r)),
                t.token_id,
                t.order_id,
                ser_enum(&t.fill_status),
                t.fill_price,
                t.stake_amount,
                t.pnl,
                t.is_win,
                t.updated_at,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<Trade>, MartinError> {
        self.conn
            .query_row(
                "SELECT id, window_id, signal_id, status, time_mode, policy_mode, decision, cancel_reason, token_id, order_id,
                        fill_status, fill_price, stake_amount, pnl, is_win, trade_level_streak, night_streak, created_at, updated_at
                 FROM trades WHERE id = ?1",
                params![id],
                Self::from_row,
            )
            .optional()
            .map_err(MartinError::from)
    }

    /// Trades not yet in a terminal status, for the active-trade tick.
    pub fn get_non_terminal(&self) -> Result<Vec<Trade>, MartinError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, window_id, signal_id, status, time_mode, policy_mode, decision, cancel_reason, token_id, order_id,
                    fill_status, fill_price, stake_amount, pnl, is_win, trade_level_streak, night_streak, created_at, updated_at
             FROM trades WHERE status NOT IN ('SETTLED', 'CANCELLED', 'ERROR')",
        )?;
        let rows = stmt.query_map([], Self::from_row)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(MartinError::from)
    }

    /// Quality samples for taken+filled trades in a given time mode since `since_ts`,
    /// most recent first, capped at `limit` — feeds the rolling-quantile calculation.
    pub fn get_filled_quality_samples(&self, time_mode: TimeMode, since_ts: i64, limit: usize) -> Result<Vec<f64>, MartinError> {
        let mut stmt = self.conn.prepare(
            "SELECT s.quality FROM trades t
             JOIN signals s ON s.id = t.signal_id
             WHERE t.time_mode = ?1 AND t.fill_status = 'FILLED' AND t.decision IN ('OK', 'AUTO_OK')
                   AND t.created_at >= ?2
             ORDER BY t.created_at DESC LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![ser_enum(&time_mode), since_ts, limit as i64], |row| row.get::<_, f64>(0))?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(MartinError::from)
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Trade> {
        let status: String = row.get(3)?;
        let time_mode: String = row.get(4)?;
        let policy_mode: String = row.get(5)?;
        let decision: String = row.get(6)?;
        let cancel_reason: Option<String> = row.get(7)?;
        let fill_status: String = row.get(10)?;
        Ok(Trade {
            id: row.get(0)?,
            window_id: row.get(1)?,
            signal_id: row.get(2)?,
            status: de_enum(&status),
            time_mode: de_enum(&time_mode),
            policy_mode: de_enum(&policy_mode),
            decision: de_enum(&decision),
            cancel_reason: cancel_reason.map(|s| de_enum(&s)),
            token_id: row.get(8)?,
            order_id: row.get(9)?,
            fill_status: de_enum(&fill_status),
            fill_price: row.get(11)?,
            stake_amount: row.get(12)?,
            pnl: row.get(13)?,
            is_win: row.get(14)?,
            trade_level_streak: row.get(15)?,
            night_streak: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

pub struct CapCheckRepository<'a> {
    conn: &'a Connection,
}

impl<'a> CapCheckRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn insert(&self, c: &CapCheck) -> Result<i64, MartinError> {
        self.conn.execute(
            "INSERT INTO cap_checks (trade_id, token_id, confirm_ts, end_ts, status, consecutive_ticks, first_pass_ts, price_at_pass, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![c.trade_id, c.token_id, c.confirm_ts, c.end_ts, ser_enum(&c.status), c.consecutive_ticks, c.first_pass_ts, c.price_at_pass, c.created_at],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn update(&self, c: &CapCheck) -> Result<(), MartinError> {
        let id = c.id.expect("cannot update a cap check without an id");
        self.conn.execute(
            "UPDATE cap_checks SET status = ?1, consecutive_ticks = ?2, first_pass_ts = ?3, price_at_pass = ?4 WHERE id = ?5",
            params![ser_enum(&c.status), c.consecutive_ticks, c.first_pass_ts, c.price_at_pass, id],
        )?;
        Ok(())
    }

    pub fn get_by_trade_id(&self, trade_id: i64) -> Result<Option<CapCheck>, MartinError> {
        self.conn
            .query_row(
                "SELECT id, trade_id, token_id, confirm_ts, end_ts, status, consecutive_ticks, first_pass_ts, price_at_pass, created_at
                 FROM cap_checks WHERE trade_id = ?1",
                params![trade_id],
                Self::from_row,
            )
            .optional()
            .map_err(MartinError::from)
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<CapCheck> {
        let status: String = row.get(5)?;
        Ok(CapCheck {
            id: row.get(0)?,
            trade_id: row.get(1)?,
            token_id: row.get(2)?,
            confirm_ts: row.get(3)?,
            end_ts: row.get(4)?,
            status: de_enum(&status),
            consecutive_ticks: row.get(6)?,
            first_pass_ts: row.get(7)?,
            price_at_pass: row.get(8)?,
            created_at: row.get(9)?,
        })
    }
}

pub struct StatsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> StatsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// `stats.id` is always 1; `CHECK (id = 1)` makes a second row a constraint error.
    pub fn upsert(&self, s: &Stats) -> Result<(), MartinError> {
        self.conn.execute(
            "INSERT INTO stats (id, trade_level_streak, night_streak, policy_mode, total_trades, total_wins, total_losses,
                                 last_strict_day_threshold, last_strict_night_threshold, last_quantile_update_ts,
                                 is_paused, day_only, night_only, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)
             ON CONFLICT(id) DO UPDATE SET
                trade_level_streak = excluded.trade_level_streak,
                night_streak = excluded.night_streak,
                policy_mode = excluded.policy_mode,
                total_trades = excluded.total_trades,
                total_wins = excluded.total_wins,
                total_losses = excluded.total_losses,
                last_strict_day_threshold = excluded.last_strict_day_threshold,
                last_strict_night_threshold = excluded.last_strict_night_threshold,
                last_quantile_update_ts = excluded.last_quantile_update_ts,
                is_paused = excluded.is_paused,
                day_only = excluded.day_only,
                night_only = excluded.night_only,
                updated_at = excluded.updated_at",
            params![
                s.id,
                s.trade_level_streak,
                s.night_streak,
                ser_enum(&s.policy_mode),
                s.total_trades,
                s.total_wins,
                s.total_losses,
                s.last_strict_day_threshold,
                s.last_strict_night_threshold,
                s.last_quantile_update_ts,
                s.is_paused,
                s.day_only,
                s.night_only,
                s.updated_at,
            ],
        )?;
        Ok(())
    }

    pub fn get(&self) -> Result<Stats, MartinError> {
        self.conn
            .query_row(
                "SELECT id, trade_level_streak, night_streak, policy_mode, total_trades, total_wins, total_losses,
                        last_strict_day_threshold, last_strict_night_threshold, last_quantile_update_ts,
                        is_paused, day_only, night_only, updated_at
                 FROM stats WHERE id = 1",
                [],
                Self::from_row,
            )
            .optional()
            .map(|maybe| maybe.unwrap_or_else(|| Stats::singleton(0)))
            .map_err(MartinError::from)
    }

    fn from_row(row: &rusqlite::Row) -> rusqlite::Result<Stats> {
        let policy_mode: String = row.get(3)?;
        Ok(Stats {
            id: row.get(0)?,
            trade_level_streak: row.get(1)?,
            night_streak: row.get(2)?,
            policy_mode: de_enum(&policy_mode),
            total_trades: row.get(4)?,
            total_wins: row.get(5)?,
            total_losses: row.get(6)?,
            last_strict_day_threshold: row.get(7)?,
            last_strict_night_threshold: row.get(8)?,
            last_quantile_update_ts: row.get(9)?,
            is_paused: row.get(10)?,
            day_only: row.get(11)?,
            night_only: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }
}

pub struct SettingsRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SettingsRepository<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn upsert(&self, s: &Settings) -> Result<(), MartinError> {
        self.conn.execute(
            "INSERT INTO settings (id, price_cap, stake_amount, is_paused, day_only, night_only, execution_mode, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                price_cap = excluded.price_cap,
                stake_amount = excluded.stake_amount,
                is_paused = excluded.is_paused,
                day_only = excluded.day_only,
                night_only = excluded.night_only,
                execution_mode = excluded.execution_mode,
                updated_at = excluded.updated_at",
            params![s.id, s.price_cap, s.stake_amount, s.is_paused, s.day_only, s.night_only, s.execution_mode, s.updated_at],
        )?;
        Ok(())
    }

    pub fn get(&self) -> Result<Settings, MartinError> {
        self.conn
            .query_row(
                "SELECT id, price_cap, stake_amount, is_paused, day_only, night_only, execution_mode, updated_at FROM settings WHERE id = 1",
                [],
                |row| {
                    Ok(Settings {
                        id: row.get(0)?,
                        price_cap: row.get(1)?,
                        stake_amount: row.get(2)?,
                        is_paused: row.get(3)?,
                        day_only: row.get(4)?,
                        night_only: row.get(5)?,
                        execution_mode: row.get(6)?,
                        updated_at: row.get(7)?,
                    })
                },
            )
            .optional()
            .map(|maybe| maybe.unwrap_or_else(|| Settings::empty(0)))
            .map_err(MartinError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::enums::{CancelReason, Decision, Direction, FillStatus, PolicyMode, TimeMode, TradeStatus};
    use crate::storage::Database;

    fn window(conn_db: &Database) -> i64 {
        let w = MarketWindow {
            id: None,
            asset: "BTC".into(),
            slug: "btc-1".into(),
            condition_id: "c1".into(),
            up_token_id: "up1".into(),
            down_token_id: "down1".into(),
            start_ts: 0,
            end_ts: 3600,
            outcome: None,
            created_at: 0,
        };
        conn_db.market_windows().insert(&w).unwrap()
    }

    #[test]
    fn market_window_round_trips_by_slug() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        window(&db);
        let fetched = db.market_windows().get_by_slug("btc-1").unwrap().unwrap();
        assert_eq!(fetched.asset, "BTC");
        assert_eq!(fetched.outcome, None);
    }

    #[test]
    fn trade_update_persists_status_and_cancel_reason() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let window_id = window(&db);
        let mut t = Trade::new(window_id, TimeMode::Day, PolicyMode::Base, (0, 0), 1000);
        t.id = Some(db.trades().insert(&t).unwrap());
        t.status = TradeStatus::Cancelled;
        t.cancel_reason = Some(CancelReason::NoSignal);
        t.decision = Decision::AutoSkip;
        db.trades().update(&t).unwrap();
        let fetched = db.trades().get_by_id(t.id.unwrap()).unwrap().unwrap();
        assert_eq!(fetched.status, TradeStatus::Cancelled);
        assert_eq!(fetched.cancel_reason, Some(CancelReason::NoSignal));
    }

    #[test]
    fn non_terminal_query_excludes_settled_and_cancelled() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let window_id = window(&db);
        let mut active = Trade::new(window_id, TimeMode::Day, PolicyMode::Base, (0, 0), 1000);
        db.trades().insert(&active).unwrap();
        let mut done = Trade::new(window_id, TimeMode::Day, PolicyMode::Base, (0, 0), 1000);
        done.status = TradeStatus::Settled;
        done.fill_status = FillStatus::Filled;
        db.trades().insert(&done).unwrap();
        let non_terminal = db.trades().get_non_terminal().unwrap();
        assert_eq!(non_terminal.len(), 1);
        active.status = TradeStatus::New;
        assert_eq!(non_terminal[0].status, active.status);
    }

    #[test]
    fn signal_round_trips_quality_breakdown() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let window_id = window(&db);
        let signal = Signal {
            id: None,
            window_id,
            direction: Direction::Up,
            signal_ts: 100,
            confirm_ts: 160,
            quality: 75.5,
            quality_breakdown: crate::domain::models::QualityBreakdown { final_quality: 75.5, ..Default::default() },
            anchor_bar_ts: 40,
            created_at: 100,
        };
        let id = db.signals().insert(&signal).unwrap();
        let fetched = db.signals().get_by_id(id).unwrap().unwrap();
        assert_eq!(fetched.quality_breakdown.final_quality, 75.5);
        assert_eq!(fetched.direction, Direction::Up);
    }

    #[test]
    fn settings_upsert_then_get_round_trips() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let mut s = Settings::empty(1000);
        s.price_cap = Some(0.6);
        db.settings().upsert(&s).unwrap();
        let fetched = db.settings().get().unwrap();
        assert_eq!(fetched.price_cap, Some(0.6));
    }
}
