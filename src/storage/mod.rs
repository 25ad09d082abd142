//! Persistent store: embedded SQLite (rusqlite, bundled), schema + per-entity repositories.

pub mod repositories;

use rusqlite::Connection;

pub use repositories::{CapCheckRepository, MarketWindowRepository, SettingsRepository, SignalRepository, StatsRepository, TradeRepository};

use crate::errors::MartinError;

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &str) -> Result<Self, MartinError> {
        Ok(Self { conn: Connection::open(path)? })
    }

    pub fn open_in_memory() -> Result<Self, MartinError> {
        Ok(Self { conn: Connection::open_in_memory()? })
    }

    pub fn init(&self) -> Result<(), MartinError> {
        self.conn.execute_batch(
            "BEGIN;
            CREATE TABLE IF NOT EXISTS migrations (
                version INTEGER PRIMARY KEY
            );

            CREATE TABLE IF NOT EXISTS market_windows (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                asset TEXT NOT NULL,
                slug TEXT NOT NULL UNIQUE,
                condition_id TEXT NOT NULL,
                up_token_id TEXT NOT NULL,
                down_token_id TEXT NOT NULL,
                start_ts INTEGER NOT NULL,
                end_ts INTEGER NOT NULL,
                outcome TEXT,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_market_windows_slug ON market_windows(slug);

            CREATE TABLE IF NOT EXISTS signals (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                window_id INTEGER NOT NULL REFERENCES market_windows(id),
                direction TEXT NOT NULL,
                signal_ts INTEGER NOT NULL,
                confirm_ts INTEGER NOT NULL,
                quality REAL NOT NULL,
                quality_breakdown TEXT NOT NULL,
                anchor_bar_ts INTEGER NOT NULL,
                created_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                window_id INTEGER NOT NULL REFERENCES market_windows(id),
                signal_id INTEGER REFERENCES signals(id),
                status TEXT NOT NULL,
                time_mode TEXT NOT NULL,
                policy_mode TEXT NOT NULL,
                decision TEXT NOT NULL,
                cancel_reason TEXT,
                token_id TEXT NOT NULL,
                order_id TEXT,
                fill_status TEXT NOT NULL,
                fill_price REAL,
                stake_amount REAL NOT NULL,
                pnl REAL,
                is_win INTEGER,
                trade_level_streak INTEGER NOT NULL,
                night_streak INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_trades_window_status ON trades(window_id, status);

            CREATE TABLE IF NOT EXISTS cap_checks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                trade_id INTEGER NOT NULL REFERENCES trades(id),
                token_id TEXT NOT NULL,
                confirm_ts INTEGER NOT NULL,
                end_ts INTEGER NOT NULL,
                status TEXT NOT NULL,
                consecutive_ticks INTEGER NOT NULL,
                first_pass_ts INTEGER,
                price_at_pass REAL,
                created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cap_checks_status ON cap_checks(status);

            CREATE TABLE IF NOT EXISTS stats (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                trade_level_streak INTEGER NOT NULL,
                night_streak INTEGER NOT NULL,
                policy_mode TEXT NOT NULL,
                total_trades INTEGER NOT NULL,
                total_wins INTEGER NOT NULL,
                total_losses INTEGER NOT NULL,
                last_strict_day_threshold REAL,
                last_strict_night_threshold REAL,
                last_quantile_update_ts INTEGER,
                is_paused INTEGER NOT NULL,
                day_only INTEGER NOT NULL,
                night_only INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS settings (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                price_cap REAL,
                stake_amount REAL,
                is_paused INTEGER,
                day_only INTEGER,
                night_only INTEGER,
                execution_mode TEXT,
                updated_at INTEGER NOT NULL
            );
            COMMIT;",
        )?;
        Ok(())
    }

    pub fn market_windows(&self) -> MarketWindowRepository<'_> {
        MarketWindowRepository::new(&self.conn)
    }

    pub fn signals(&self) -> SignalRepository<'_> {
        SignalRepository::new(&self.conn)
    }

    pub fn trades(&self) -> TradeRepository<'_> {
        TradeRepository::new(&self.conn)
    }

    pub fn cap_checks(&self) -> CapCheckRepository<'_> {
        CapCheckRepository::new(&self.conn)
    }

    pub fn stats(&self) -> StatsRepository<'_> {
        StatsRepository::new(&self.conn)
    }

    pub fn settings(&self) -> SettingsRepository<'_> {
        SettingsRepository::new(&self.conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db.init().unwrap();
    }

    #[test]
    fn stats_table_rejects_second_row() {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        let mut stats = crate::domain::models::Stats::singleton(1000);
        db.stats().upsert(&stats).unwrap();
        stats.id = 2;
        assert!(db.stats().upsert(&stats).is_err());
    }
}
