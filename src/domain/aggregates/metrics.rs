//! Slip metrics for the admin dashboard.

use chrono::{Days, NaiveDate};
use serde::Serialize;

use crate::domain::value_objects::Money;

/// Days covered by `sales_by_day`, today included.
pub const SALES_WINDOW_DAYS: u64 = 14;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SlipTotals {
    /// Live slips; soft-deleted ones are not counted
    pub slips: u64,
    pub pending: u64,
    pub approved_revenue: Money,
}

/// APPROVED slips created on one UTC day.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct DailySales {
    pub date: NaiveDate,
    pub revenue: Money,
    pub approved: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlipMetrics {
    #[serde(flatten)]
    pub totals: SlipTotals,
    pub sales_by_day: Vec<DailySales>,
}

/// First day of the window ending on `today`.
pub fn window_start(today: NaiveDate) -> NaiveDate {
    today.checked_sub_days(Days::new(SALES_WINDOW_DAYS - 1)).unwrap_or(NaiveDate::MIN)
}

/// One bucket per day of the window, oldest first. Days with no sales get a
/// zero bucket; rows outside the window are dropped.
pub fn fill_window(today: NaiveDate, rows: &[DailySales]) -> Vec<DailySales> {
    window_start(today)
        .iter_days()
        .take_while(|d| *d <= today)
        .map(|date| {
            rows.iter().filter(|r| r.date == date).fold(
                DailySales { date, revenue: Money::zero(), approved: 0 },
                |acc, r| DailySales { date, revenue: acc.revenue + r.revenue, approved: acc.approved + r.approved },
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate { NaiveDate::from_ymd_opt(2026, 3, d).unwrap() }

    #[test]
    fn test_window_has_fourteen_days_ending_today() {
        let days = fill_window(day(20), &[]);
        assert_eq!(days.len(), 14);
        assert_eq!(days[0].date, day(7));
        assert_eq!(days[13].date, day(20));
        assert!(days.iter().all(|d| d.approved == 0 && d.revenue == Money::zero()));
    }

    #[test]
    fn test_rows_land_in_their_day() {
        let sale = |d, amount: &str, n| DailySales { date: day(d), revenue: Money::parse_positive(amount).unwrap(), approved: n };
        let days = fill_window(day(20), &[sale(20, "150.50", 2), sale(6, "999", 1), sale(10, "40", 1)]);
        assert_eq!(days[13], sale(20, "150.50", 2));
        assert_eq!(days[3], sale(10, "40", 1));
        assert_eq!(days.iter().map(|d| d.approved).sum::<u64>(), 3, "day 6 is outside the window");
    }
}
