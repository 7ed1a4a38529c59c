//! Recurrence rules for preventive schedules.
//!
//! [`next_due_date`] adds one frequency interval to an anchor date (the
//! completion date). Day-based frequencies add a fixed number of days.
//! Month-based frequencies use the month-end clamp rule:
//!
//! > Move the anchor forward by N calendar months, keeping the day of month.
//! > If that day does not exist in the target month, use the last day of the
//! > target month instead.
//!
//! So Jan 31 + 1 month is Feb 29 in a leap year and Feb 28 otherwise, and
//! Feb 29 + 1 year is Feb 28. The rule is applied to the anchor each time and
//! never accumulates: a schedule anchored on Mar 31 lands on Apr 30, and the
//! next completion anchored on Apr 30 lands on May 30.

use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Frequency {
    Daily,
    Weekly,
    Biweekly,
    #[default]
    Monthly,
    Quarterly,
    Semiannually,
    Yearly,
}

enum Interval {
    Days(i64),
    Months(u32),
}

impl Frequency {
    pub const ALL: [Frequency; 7] = [
        Frequency::Daily,
        Frequency::Weekly,
        Frequency::Biweekly,
        Frequency::Monthly,
        Frequency::Quarterly,
        Frequency::Semiannually,
        Frequency::Yearly,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly => "weekly",
            Frequency::Biweekly => "biweekly",
            Frequency::Monthly => "monthly",
            Frequency::Quarterly => "quarterly",
            Frequency::Semiannually => "semiannually",
            Frequency::Yearly => "yearly",
        }
    }

    /// Parse a stored or user-supplied value; unknown or missing values are monthly.
    pub fn from_name_or_default(name: Option<&str>) -> Frequency {
        name.and_then(|n| n.parse().ok()).unwrap_or_default()
    }

    fn interval(self) -> Interval {
        match self {
            Frequency::Daily => Interval::Days(1),
            Frequency::Weekly => Interval::Days(7),
            Frequency::Biweekly => Interval::Days(14),
            Frequency::Monthly => Interval::Months(1),
            Frequency::Quarterly => Interval::Months(3),
            Frequency::Semiannually => Interval::Months(6),
            Frequency::Yearly => Interval::Months(12),
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownFrequency(pub String);

impl fmt::Display for UnknownFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown frequency '{}'", self.0)
    }
}

impl std::error::Error for UnknownFrequency {}

impl FromStr for Frequency {
    type Err = UnknownFrequency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Frequency::ALL
            .into_iter()
            .find(|f| f.as_str() == normalized)
            .ok_or_else(|| UnknownFrequency(s.to_string()))
    }
}

/// Next due date after `anchor` for `frequency`.
///
/// Saturates at `NaiveDate::MAX` instead of failing for anchors at the end
/// of the representable range.
pub fn next_due_date(frequency: Frequency, anchor: NaiveDate) -> NaiveDate {
    match frequency.interval() {
        Interval::Days(days) => anchor
            .checked_add_signed(Duration::days(days))
            .unwrap_or(NaiveDate::MAX),
        Interval::Months(months) => add_months_clamped(anchor, months),
    }
}

fn add_months_clamped(anchor: NaiveDate, months: u32) -> NaiveDate {
    let month0 = anchor.month0() + months;
    let year = anchor.year() + (month0 / 12) as i32;
    let month = month0 % 12 + 1;
    let day = anchor.day().min(days_in_month(year, month));
    NaiveDate::from_ymd_opt(year, month, day).unwrap_or(NaiveDate::MAX)
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first_of_next| first_of_next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_day_based_frequencies() {
        assert_eq!(next_due_date(Frequency::Weekly, date(2024, 3, 4)), date(2024, 3, 11));
        assert_eq!(next_due_date(Frequency::Daily, date(2024, 12, 31)), date(2025, 1, 1));
        assert_eq!(next_due_date(Frequency::Biweekly, date(2024, 2, 20)), date(2024, 3, 5));
    }

    #[test]
    fn test_month_end_clamps_to_last_day() {
        assert_eq!(next_due_date(Frequency::Monthly, date(2024, 1, 31)), date(2024, 2, 29));
        assert_eq!(next_due_date(Frequency::Monthly, date(2023, 1, 31)), date(2023, 2, 28));
        assert_eq!(next_due_date(Frequency::Monthly, date(2024, 3, 31)), date(2024, 4, 30));
        assert_eq!(next_due_date(Frequency::Quarterly, date(2024, 11, 30)), date(2025, 2, 28));
        assert_eq!(next_due_date(Frequency::Semiannually, date(2024, 8, 31)), date(2025, 2, 28));
    }

    #[test]
    fn test_clamp_does_not_accumulate() {
        let first = next_due_date(Frequency::Monthly, date(2024, 3, 31));
        assert_eq!(first, date(2024, 4, 30));
        assert_eq!(next_due_date(Frequency::Monthly, first), date(2024, 5, 30));
    }

    #[test]
    fn test_yearly_from_leap_day() {
        assert_eq!(next_due_date(Frequency::Yearly, date(2024, 2, 29)), date(2025, 2, 28));
        assert_eq!(next_due_date(Frequency::Yearly, date(2023, 6, 15)), date(2024, 6, 15));
    }

    #[test]
    fn test_december_rolls_year() {
        assert_eq!(next_due_date(Frequency::Monthly, date(2024, 12, 15)), date(2025, 1, 15));
    }

    #[test]
    fn test_unknown_or_missing_frequency_is_monthly() {
        assert_eq!(Frequency::from_name_or_default(None), Frequency::Monthly);
        assert_eq!(Frequency::from_name_or_default(Some("fortnightly")), Frequency::Monthly);
        assert_eq!(Frequency::from_name_or_default(Some(" Weekly ")), Frequency::Weekly);
    }

    #[test]
    fn test_round_trips_names() {
        for f in Frequency::ALL {
            assert_eq!(f.as_str().parse::<Frequency>().unwrap(), f);
        }
    }
}
