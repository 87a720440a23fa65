//! Decides whether a target should be retrieved today.
//!
//! The window is clamped to `[1, 31]` and does not model month length or
//! month/year wraparound: a billing day of 31 with tolerance 2 yields
//! `[29, 31]`, so on the 1st of the next month the target is not eligible.

use chrono::{Datelike, NaiveDate};

use crate::models::{Account, Target};

/// Inclusive day-of-month range around a billing day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EligibilityWindow {
    pub start: u32,
    pub end: u32,
}

impl EligibilityWindow {
    pub fn around(day: u32, tolerance_days: u32) -> Self {
        let day = i64::from(day);
        let tolerance = i64::from(tolerance_days);
        let clamp = |d: i64| d.clamp(1, 31) as u32;
        Self {
            start: clamp(day - tolerance),
            end: clamp(day + tolerance),
        }
    }

    pub fn contains(&self, day_of_month: u32) -> bool {
        (self.start..=self.end).contains(&day_of_month)
    }
}

/// `None` when the target has no billing day (always eligible).
pub fn window_for(target: &Target) -> Option<EligibilityWindow> {
    target
        .day
        .map(|day| EligibilityWindow::around(day, target.tolerance_days))
}

pub fn should_run(target: &Target, today: NaiveDate) -> bool {
    match window_for(target) {
        None => true,
        Some(window) => window.contains(today.day()),
    }
}

/// Targets of `account` that should run today, in configured order.
pub fn eligible_targets(account: &Account, today: NaiveDate) -> Vec<&Target> {
    account
        .targets()
        .iter()
        .filter(|t| should_run(t, today))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UcCode;

    fn target(day: Option<u32>, tolerance: u32) -> Target {
        Target::new(UcCode::parse("123").unwrap())
            .with_day(day)
            .with_tolerance(tolerance)
    }

    fn on(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    #[test]
    fn no_billing_day_is_always_eligible() {
        let t = target(None, 2);
        for day in 1..=31 {
            assert!(should_run(&t, on(day)), "day {day}");
        }
    }

    #[test]
    fn window_is_inclusive_around_billing_day() {
        let t = target(Some(15), 2);
        assert!(should_run(&t, on(13)));
        assert!(!should_run(&t, on(10)));
        assert!(should_run(&t, on(17)));
        assert!(!should_run(&t, on(18)));
        assert!(!should_run(&t, on(12)));
    }

    #[test]
    fn window_is_clamped_not_wrapped() {
        assert_eq!(
            EligibilityWindow::around(1, 3),
            EligibilityWindow { start: 1, end: 4 }
        );
        assert_eq!(
            EligibilityWindow::around(31, 2),
            EligibilityWindow { start: 29, end: 31 }
        );
        let late = target(Some(31), 2);
        assert!(!should_run(&late, NaiveDate::from_ymd_opt(2025, 4, 1).unwrap()));
    }

    #[test]
    fn huge_tolerance_covers_whole_month() {
        let t = target(Some(10), 40);
        assert_eq!(window_for(&t), Some(EligibilityWindow { start: 1, end: 31 }));
    }

    #[test]
    fn eligible_targets_filters_in_order() {
        use secrecy::SecretString;

        let account = Account::new("a", "A", "1", SecretString::from(String::new()))
            .with_target(Target::new(UcCode::parse("1").unwrap()).with_day(Some(5)))
            .with_target(Target::new(UcCode::parse("2").unwrap()))
            .with_target(Target::new(UcCode::parse("3").unwrap()).with_day(Some(20)));

        let eligible: Vec<&str> = eligible_targets(&account, on(6))
            .into_iter()
            .map(|t| t.uc.as_str())
            .collect();
        assert_eq!(eligible, vec!["1", "2"]);
    }
}
