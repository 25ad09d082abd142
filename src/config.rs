//! Process configuration (§6): every recognized key is read from the environment with a
//! typed default, then validated once at startup. The DB-backed `Settings` row overrides
//! a subset of these fields per cycle — see `Config::apply_settings`.

use chrono_tz::Tz;

use crate::domain::enums::NightSessionMode;
use crate::domain::models::Settings;
use crate::errors::MartinError;
use crate::execution::ExecutionMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub timezone: Tz,
    pub assets: Vec<String>,
    pub price_cap: f64,
    pub confirm_delay_seconds: i64,
    pub cap_min_ticks: i64,
    pub window_seconds: i64,
    pub warmup_seconds: i64,
    pub day_start_hour: u32,
    pub day_end_hour: u32,
    pub base_day_min_quality: f64,
    pub base_night_min_quality: f64,
    pub switch_streak_at: i64,
    pub night_max_win_streak: i64,
    pub night_session_mode: NightSessionMode,
    pub night_autotrade_enabled: bool,
    pub reminder_minutes_before_day_end: i64,
    pub stake_base_amount_usdc: f64,
    pub execution_mode: ExecutionMode,
    /// Seconds a READY day-mode trade waits for a chat response before auto-skipping.
    /// `0` disables the auto-skip (wait forever).
    pub max_response_seconds: i64,
    pub rolling_days: i64,
    pub max_samples: usize,
    pub min_samples: usize,
    pub strict_fallback_mult: f64,
    pub db_path: String,
    pub gamma_base_url: String,
    pub binance_base_url: String,
    pub clob_base_url: String,
    /// Vault-encrypted CLOB API credentials; only required when `execution_mode` is `Live`.
    pub live_api_key_encrypted: Option<String>,
    pub live_api_secret_encrypted: Option<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_or_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes")).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self, MartinError> {
        let tz_name = env_or_string("APP_TIMEZONE", "UTC");
        let timezone: Tz = tz_name.parse().map_err(|_| MartinError::Config(format!("unrecognized app.timezone: {tz_name}")))?;

        let assets_raw = env_or_string("TRADING_ASSETS", "BTC,ETH");
        let assets: Vec<String> = assets_raw.split(',').map(|s| s.trim().to_uppercase()).filter(|s| !s.is_empty()).collect();

        let night_session_mode = match env_or_string("DAY_NIGHT_NIGHT_SESSION_MODE", "SOFT").to_uppercase().as_str() {
            "OFF" => NightSessionMode::Off,
            "SOFT" => NightSessionMode::Soft,
            "HARD" => NightSessionMode::Hard,
            other => return Err(MartinError::Config(format!("day_night.night_session_mode must be OFF, SOFT or HARD, got {other}"))),
        };

        let execution_mode = match env_or_string("EXECUTION_MODE", "paper").to_lowercase().as_str() {
            "paper" => ExecutionMode::Paper,
            "live" => ExecutionMode::Live,
            other => return Err(MartinError::Config(format!("execution.mode must be paper or live, got {other}"))),
        };

        let config = Self {
            timezone,
            assets,
            price_cap: env_or("TRADING_PRICE_CAP", 0.55),
            confirm_delay_seconds: env_or("TRADING_CONFIRM_DELAY_SECONDS", 120),
            cap_min_ticks: env_or("TRADING_CAP_MIN_TICKS", 5),
            window_seconds: env_or("TRADING_WINDOW_SECONDS", 3600),
            warmup_seconds: env_or("TA_WARMUP_SECONDS", 7200),
            day_start_hour: env_or("DAY_NIGHT_DAY_START_HOUR", 8),
            day_end_hour: env_or("DAY_NIGHT_DAY_END_HOUR", 22),
            base_day_min_quality: env_or("DAY_NIGHT_BASE_DAY_MIN_QUALITY", 50.0),
            base_night_min_quality: env_or("DAY_NIGHT_BASE_NIGHT_MIN_QUALITY", 60.0),
            switch_streak_at: env_or("DAY_NIGHT_SWITCH_STREAK_AT", 3),
            night_max_win_streak: env_or("DAY_NIGHT_NIGHT_MAX_WIN_STREAK", 5),
            night_session_mode,
            night_autotrade_enabled: env_bool("DAY_NIGHT_NIGHT_AUTOTRADE_ENABLED", false),
            reminder_minutes_before_day_end: env_or("DAY_NIGHT_REMINDER_MINUTES_BEFORE_DAY_END", 0),
            stake_base_amount_usdc: env_or("RISK_STAKE_BASE_AMOUNT_USDC", 5.0),
            execution_mode,
            max_response_seconds: env_or("DAY_NIGHT_MAX_RESPONSE_SECONDS", 600),
            rolling_days: env_or("ROLLING_QUANTILE_ROLLING_DAYS", 14),
            max_samples: env_or("ROLLING_QUANTILE_MAX_SAMPLES", 500),
            min_samples: env_or("ROLLING_QUANTILE_MIN_SAMPLES", 50),
            strict_fallback_mult: env_or("ROLLING_QUANTILE_STRICT_FALLBACK_MULT", 1.25),
            db_path: env_or_string("MARTIN_DB_PATH", "martin.db"),
            gamma_base_url: env_or_string("GAMMA_BASE_URL", "https://gamma-api.polymarket.com"),
            binance_base_url: env_or_string("BINANCE_BASE_URL", "https://api.binance.com"),
            clob_base_url: env_or_string("CLOB_BASE_URL", "https://clob.polymarket.com"),
            live_api_key_encrypted: std::env::var("LIVE_API_KEY_ENCRYPTED").ok(),
            live_api_secret_encrypted: std::env::var("LIVE_API_SECRET_ENCRYPTED").ok(),
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), MartinError> {
        if !(0.01..=0.99).contains(&self.price_cap) {
            return Err(MartinError::Config(format!("trading.price_cap {} outside [0.01, 0.99]", self.price_cap)));
        }
        if self.confirm_delay_seconds < 0 {
            return Err(MartinError::Config("trading.confirm_delay_seconds must be >= 0".to_string()));
        }
        if self.cap_min_ticks < 1 {
            return Err(MartinError::Config("trading.cap_min_ticks must be >= 1".to_string()));
        }
        if self.day_start_hour > 23 {
            return Err(MartinError::Config(format!("day_night.day_start_hour {} outside [0,23]", self.day_start_hour)));
        }
        if self.day_end_hour > 23 {
            return Err(MartinError::Config(format!("day_night.day_end_hour {} outside [0,23]", self.day_end_hour)));
        }
        if self.base_day_min_quality < 0.0 || self.base_night_min_quality < 0.0 {
            return Err(MartinError::Config("day_night base quality thresholds must be >= 0".to_string()));
        }
        if self.switch_streak_at < 1 {
            return Err(MartinError::Config("day_night.switch_streak_at must be >= 1".to_string()));
        }
        if self.night_max_win_streak < 1 {
            return Err(MartinError::Config("day_night.night_max_win_streak must be >= 1".to_string()));
        }
        if !(0..=180).contains(&self.reminder_minutes_before_day_end) {
            return Err(MartinError::Config("day_night.reminder_minutes_before_day_end outside [0,180]".to_string()));
        }
        if self.stake_base_amount_usdc < 0.01 {
            return Err(MartinError::Config("risk.stake.base_amount_usdc must be >= 0.01".to_string()));
        }
        if self.max_response_seconds < 0 {
            return Err(MartinError::Config("day_night.max_response_seconds must be >= 0 (0 disables auto-skip)".to_string()));
        }
        if self.assets.is_empty() {
            return Err(MartinError::Config("trading.assets must name at least one underlier".to_string()));
        }
        if self.execution_mode == ExecutionMode::Live && (self.live_api_key_encrypted.is_none() || self.live_api_secret_encrypted.is_none()) {
            return Err(MartinError::Config("execution.mode live requires LIVE_API_KEY_ENCRYPTED and LIVE_API_SECRET_ENCRYPTED".to_string()));
        }
        Ok(())
    }

    /// Applies the DB-backed override row. Per §6, "database value beats process config" —
    /// any field left `None` in `settings` falls through to the process value unchanged.
    pub fn apply_settings(&self, settings: &Settings) -> Self {
        let mut effective = self.clone();
        if let Some(price_cap) = settings.price_cap {
            effective.price_cap = price_cap;
        }
        if let Some(stake_amount) = settings.stake_amount {
            effective.stake_base_amount_usdc = stake_amount;
        }
        if let Some(mode) = &settings.execution_mode {
            effective.execution_mode = match mode.to_lowercase().as_str() {
                "live" => ExecutionMode::Live,
                _ => ExecutionMode::Paper,
            };
        }
        effective
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> Config {
        Config {
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
            night_session_mode: NightSessionMode::Soft,
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

    #[test]
    fn price_cap_out_of_range_is_rejected() {
        let mut c = base_config();
        c.price_cap = 1.5;
        assert!(matches!(c.validate(), Err(MartinError::Config(_))));
    }

    #[test]
    fn valid_config_passes() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn live_mode_without_credentials_is_rejected() {
        let mut c = base_config();
        c.execution_mode = ExecutionMode::Live;
        assert!(matches!(c.validate(), Err(MartinError::Config(_))));
    }

    #[test]
    fn live_mode_with_credentials_passes() {
        let mut c = base_config();
        c.execution_mode = ExecutionMode::Live;
        c.live_api_key_encrypted = Some("enc-key".to_string());
        c.live_api_secret_encrypted = Some("enc-secret".to_string());
        assert!(c.validate().is_ok());
    }

    #[test]
    fn settings_override_price_cap_and_execution_mode() {
        let config = base_config();
        let mut settings = Settings::empty(1000);
        settings.price_cap = Some(0.7);
        settings.execution_mode = Some("live".to_string());
        let effective = config.apply_settings(&settings);
        assert_eq!(effective.price_cap, 0.7);
        assert_eq!(effective.execution_mode, ExecutionMode::Live);
        assert_eq!(effective.stake_base_amount_usdc, config.stake_base_amount_usdc);
    }

    #[test]
    fn settings_with_no_overrides_leaves_config_unchanged() {
        let config = base_config();
        let settings = Settings::empty(1000);
        let effective = config.apply_settings(&settings);
        assert_eq!(effective.price_cap, config.price_cap);
    }
}
