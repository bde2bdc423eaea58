//! Contract expiry arithmetic: the 4th-Wednesday rule and the contract-month
//! series requested from the chain source.

use chrono::{Datelike, Duration, NaiveDate};

/// Quarterly contract months
const QUARTER_MONTHS: [u32; 4] = [3, 6, 9, 12];

/// Expiry date for a contract month: the 4th Wednesday of that calendar month.
///
/// `month` must be a valid calendar month (1-12); callers validate wire data
/// before reaching this.
pub fn expiry_date(year: i32, month: u32) -> NaiveDate {
    let first = NaiveDate::from_ymd_opt(year, month, 1).expect("month in 1..=12");
    // first Wednesday: weekday 0 = Monday, Wednesday = 2
    let offset = (2 + 7 - first.weekday().num_days_from_monday()) % 7;
    first + Duration::days(offset as i64 + 21)
}

/// Signed day count from `today` to `expiry`. Deliberately not clamped: an
/// already-expired contract yields a negative value, and rate computations
/// must floor the divisor (not this value) at 1.
pub fn days_to_maturity(expiry: NaiveDate, today: NaiveDate) -> i64 {
    (expiry - today).num_days()
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

fn month_code(year: i32, month: u32) -> String {
    format!("{:02}{:02}", year.rem_euclid(100), month)
}

/// First quarterly month on or after the given month
fn quarter_on_or_after(year: i32, month: u32) -> (i32, u32) {
    for q in QUARTER_MONTHS {
        if q >= month {
            return (year, q);
        }
    }
    (year + 1, QUARTER_MONTHS[0])
}

/// Quarterly month strictly after the given quarterly month
fn next_quarter(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, QUARTER_MONTHS[0])
    } else {
        (year, month + 3)
    }
}

/// The four YYMM contract months to request: current month, next month,
/// current quarter, next quarter.
///
/// The base month rolls forward once today is past this month's 4th Wednesday.
/// When the current-quarter code would duplicate either monthly code, both
/// quarter codes advance one quarter so the quarterly request never repeats a
/// month already covered.
pub fn contract_month_series(today: NaiveDate) -> [String; 4] {
    let (base_year, base_month) = if today <= expiry_date(today.year(), today.month()) {
        (today.year(), today.month())
    } else {
        next_month(today.year(), today.month())
    };
    let (ny, nm) = next_month(base_year, base_month);

    let (mut q1y, mut q1m) = quarter_on_or_after(base_year, base_month);
    let (mut q2y, mut q2m) = next_quarter(q1y, q1m);
    if (q1y, q1m) == (base_year, base_month) || (q1y, q1m) == (ny, nm) {
        (q1y, q1m) = (q2y, q2m);
        (q2y, q2m) = next_quarter(q2y, q2m);
    }

    [
        month_code(base_year, base_month),
        month_code(ny, nm),
        month_code(q1y, q1m),
        month_code(q2y, q2m),
    ]
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Weekday;

    // =========================================================================
    // expiry_date - 4th Wednesday rule
    // =========================================================================

    #[test]
    fn test_expiry_date_june_2025() {
        assert_eq!(expiry_date(2025, 6), NaiveDate::from_ymd_opt(2025, 6, 25).unwrap());
    }

    #[test]
    fn test_expiry_date_always_fourth_wednesday() {
        for year in 2024..=2027 {
            for month in 1..=12 {
                let expiry = expiry_date(year, month);
                assert_eq!(expiry.weekday(), Weekday::Wed, "{}-{:02}", year, month);
                // 4th Wednesday lands on day 22-28
                assert!((22..=28).contains(&expiry.day()), "{}-{:02}: {}", year, month, expiry);
            }
        }
    }

    #[test]
    fn test_expiry_date_month_starting_on_wednesday() {
        // 2025-01-01 is a Wednesday, so it is itself the first Wednesday
        assert_eq!(expiry_date(2025, 1), NaiveDate::from_ymd_opt(2025, 1, 22).unwrap());
    }

    // =========================================================================
    // days_to_maturity - signed, unclamped
    // =========================================================================

    #[test]
    fn test_days_to_maturity_signed() {
        let expiry = NaiveDate::from_ymd_opt(2025, 6, 25).unwrap();
        assert_eq!(days_to_maturity(expiry, NaiveDate::from_ymd_opt(2025, 6, 5).unwrap()), 20);
        assert_eq!(days_to_maturity(expiry, expiry), 0);
        assert_eq!(days_to_maturity(expiry, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()), -5);
    }

    // =========================================================================
    // contract_month_series
    // =========================================================================

    #[test]
    fn test_series_before_expiry_mid_quarter_month() {
        // 2025-06-05 is before the June expiry (2025-06-25); June is quarterly,
        // so the current-quarter code collides and both quarters advance.
        let today = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        assert_eq!(contract_month_series(today), ["2506", "2507", "2509", "2512"]);
    }

    #[test]
    fn test_series_rolls_base_after_expiry() {
        // Past the June expiry the base month is July
        let today = NaiveDate::from_ymd_opt(2025, 6, 26).unwrap();
        assert_eq!(contract_month_series(today), ["2507", "2508", "2509", "2512"]);
    }

    #[test]
    fn test_series_next_month_collision_advances_quarters() {
        // Base February: next month March is quarterly, so quarters advance
        let today = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap();
        assert_eq!(contract_month_series(today), ["2502", "2503", "2506", "2509"]);
    }

    #[test]
    fn test_series_no_collision_keeps_quarters() {
        // Base April: quarters June/September stand as computed
        let today = NaiveDate::from_ymd_opt(2025, 4, 1).unwrap();
        assert_eq!(contract_month_series(today), ["2504", "2505", "2506", "2509"]);
    }

    #[test]
    fn test_series_year_rollover() {
        // Past the December expiry (2025-12-24) the base rolls into January
        let today = NaiveDate::from_ymd_opt(2025, 12, 29).unwrap();
        assert_eq!(contract_month_series(today), ["2601", "2602", "2603", "2606"]);
    }

    #[test]
    fn test_series_never_contains_duplicates() {
        let mut day = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2026, 12, 31).unwrap();
        while day <= end {
            let series = contract_month_series(day);
            for i in 0..series.len() {
                for j in i + 1..series.len() {
                    assert_ne!(series[i], series[j], "duplicate on {}: {:?}", day, series);
                }
            }
            day += Duration::days(1);
        }
    }

    #[test]
    fn test_collision_advance_strictly_increases_quarter() {
        // Whenever quarters were advanced, the emitted current-quarter code is
        // strictly greater than the colliding one would have been.
        let today = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        let series = contract_month_series(today);
        assert!(series[2].as_str() > "2506");
        assert!(series[3].as_str() > series[2].as_str());
    }
}
