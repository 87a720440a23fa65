use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

/// Abstraction over "current time" to make behavior deterministic in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Calendar date in the portal's timezone.
    fn today_in(&self, tz: Tz) -> NaiveDate {
        self.now().with_timezone(&tz).date_naive()
    }

    /// `YYYY-MM` month key in the portal's timezone.
    fn month_key_in(&self, tz: Tz) -> String {
        self.now().with_timezone(&tz).format("%Y-%m").to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone)]
pub struct FixedClock {
    now: DateTime<Utc>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self { now }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn month_key_follows_portal_timezone() {
        // 02:00 UTC on the 1st is still the previous day in Sao Paulo (UTC-3).
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 12, 1, 2, 0, 0).unwrap());
        let tz: Tz = "America/Sao_Paulo".parse().unwrap();

        assert_eq!(clock.month_key_in(tz), "2025-11");
        assert_eq!(clock.today_in(tz), NaiveDate::from_ymd_opt(2025, 11, 30).unwrap());
        assert_eq!(clock.month_key_in(Tz::UTC), "2025-12");
    }
}
