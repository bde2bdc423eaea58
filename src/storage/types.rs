//! Persisted history record type.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::display_code;
use crate::types::{round4, PremiumResult};

/// One persisted history row. Column names match the long-lived CSV header;
/// monetary and rate fields are rounded to 4 decimals before persisting so
/// re-runs produce stable textual diffs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub underlying_code: String,
    pub contract_month: String,
    pub strike: f64,
    pub discount_value: f64,
    pub annualized_rate: f64,
    pub days_to_maturity: i64,
    pub record_date: NaiveDate,
}

impl HistoryRow {
    /// Stamp a computed result with its record date, mapping the free-text
    /// underlying name to its short display code.
    pub fn from_result(result: &PremiumResult, date: NaiveDate) -> Self {
        Self {
            underlying_code: display_code(&result.underlying_name).to_string(),
            contract_month: result.month_code.clone(),
            strike: result.strike,
            discount_value: round4(result.discount_value),
            annualized_rate: round4(result.annualized_rate),
            days_to_maturity: result.days_to_maturity,
            record_date: date,
        }
    }
}
