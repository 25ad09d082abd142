//! Clock & time-mode service: civil timezone conversion, DAY/NIGHT classification.

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;

use crate::domain::enums::TimeMode;

pub struct TimeModeService {
    tz: Tz,
    day_start_hour: u32,
    day_end_hour: u32,
    night_autotrade_enabled: bool,
}

impl TimeModeService {
    pub fn new(tz: Tz, day_start_hour: u32, day_end_hour: u32, night_autotrade_enabled: bool) -> Self {
        Self { tz, day_start_hour, day_end_hour, night_autotrade_enabled }
    }

    fn local_hour(&self, ts: i64) -> u32 {
        let utc = Utc.timestamp_opt(ts, 0).single().expect("valid unix timestamp");
        utc.with_timezone(&self.tz).hour_component()
    }

    /// `day_start == day_end` is treated as 24h DAY. Otherwise DAY is `day_start <= hour <
    /// day_end` when not wrapping, or `hour >= day_start || hour < day_end` when
    /// `day_start > day_end` (wraps across midnight).
    pub fn get_current_mode(&self, ts: i64) -> TimeMode {
        if self.day_start_hour == self.day_end_hour {
            return TimeMode::Day;
        }
        let hour = self.local_hour(ts);
        let is_day = if self.day_start_hour < self.day_end_hour {
            hour >= self.day_start_hour && hour < self.day_end_hour
        } else {
            hour >= self.day_start_hour || hour < self.day_end_hour
        };
        if is_day { TimeMode::Day } else { TimeMode::Night }
    }

    pub fn is_night_autotrade_enabled(&self) -> bool {
        self.night_autotrade_enabled
    }
}

trait HourComponent {
    fn hour_component(&self) -> u32;
}

impl HourComponent for chrono::DateTime<Tz> {
    fn hour_component(&self) -> u32 {
        use chrono::Timelike;
        self.hour()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(day_start: u32, day_end: u32) -> TimeModeService {
        TimeModeService::new(chrono_tz::Europe::Zurich, day_start, day_end, false)
    }

    #[test]
    fn wrap_around_classifies_late_evening_as_day() {
        let svc = service(22, 6);
        let ts_2300_utc = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 23, 0, 0).unwrap().timestamp();
        assert_eq!(svc.get_current_mode(ts_2300_utc), TimeMode::Day);
    }

    #[test]
    fn wrap_around_classifies_early_morning_as_night() {
        let svc = service(22, 6);
        let ts_0500_utc = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap().timestamp();
        assert_eq!(svc.get_current_mode(ts_0500_utc), TimeMode::Night);
    }

    #[test]
    fn equal_start_and_end_is_always_day() {
        let svc = service(8, 8);
        let ts = chrono::Utc.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap().timestamp();
        assert_eq!(svc.get_current_mode(ts), TimeMode::Day);
    }
}
