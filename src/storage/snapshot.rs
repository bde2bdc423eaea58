//! Date-keyed history snapshots: merge today's results into the persisted CSV
//! and write back under optimistic concurrency.

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use super::remote::{VersionedStore, WriteError};
use super::types::HistoryRow;
use crate::types::PremiumResult;

/// UTF-8 byte-order mark carried by the history file
const BOM: &str = "\u{feff}";

/// Owns the persisted history. All mutation goes through `append`.
pub struct SnapshotStore {
    store: Arc<dyn VersionedStore>,
    path: String,
}

impl SnapshotStore {
    pub fn new(store: Arc<dyn VersionedStore>, path: impl Into<String>) -> Self {
        Self { store, path: path.into() }
    }

    /// Merge `results` into the history under `date`, replacing any rows
    /// already recorded for that date, and write back conflict-checked.
    ///
    /// A version conflict re-reads the latest content and retries the whole
    /// merge exactly once; a second conflict surfaces as an error with nothing
    /// written. Returns the number of rows recorded for the date.
    pub async fn append(&self, results: &[PremiumResult], date: NaiveDate) -> Result<usize> {
        let new_rows: Vec<HistoryRow> = results.iter().map(|r| HistoryRow::from_result(r, date)).collect();

        for attempt in 0..2 {
            let (prior, token) = match self.store.read(&self.path).await? {
                Some((content, token)) => (parse_history(&content), Some(token)),
                None => (Vec::new(), None),
            };

            let merged = merge_by_date(prior, &new_rows, date);
            let content = render_history(&merged)?;

            match self.store.write(&self.path, &content, token.as_ref()).await {
                Ok(()) => {
                    info!(
                        "[SNAPSHOT] saved {} rows for {} ({} total in history)",
                        new_rows.len(),
                        date,
                        merged.len()
                    );
                    return Ok(new_rows.len());
                }
                Err(WriteError::Conflict) if attempt == 0 => {
                    warn!("[SNAPSHOT] concurrent history update detected, re-reading and retrying once");
                    continue;
                }
                Err(WriteError::Conflict) => {
                    anyhow::bail!("history file changed twice during save; snapshot not written")
                }
                Err(WriteError::Other(e)) => return Err(e).context("history write failed"),
            }
        }
        unreachable!("append loop always returns within two attempts")
    }
}

/// Drop prior rows recorded for `date`, append the new ones, and keep the file
/// sorted by record date descending (stable, so same-date order is preserved).
fn merge_by_date(prior: Vec<HistoryRow>, new_rows: &[HistoryRow], date: NaiveDate) -> Vec<HistoryRow> {
    let mut merged: Vec<HistoryRow> = prior.into_iter().filter(|r| r.record_date != date).collect();
    merged.extend_from_slice(new_rows);
    merged.sort_by(|a, b| b.record_date.cmp(&a.record_date));
    merged
}

/// Parse the persisted history. Malformed content is treated as "no prior
/// history" (warned, never fatal): the next write starts a fresh file.
fn parse_history(content: &str) -> Vec<HistoryRow> {
    let content = content.strip_prefix(BOM).unwrap_or(content);
    if content.trim().is_empty() {
        return Vec::new();
    }

    let mut reader = csv::Reader::from_reader(content.as_bytes());
    let mut rows = Vec::new();
    for record in reader.deserialize::<HistoryRow>() {
        match record {
            Ok(row) => rows.push(row),
            Err(e) => {
                warn!("[SNAPSHOT] history file is malformed ({e}); starting a fresh history");
                return Vec::new();
            }
        }
    }
    rows
}

fn render_history(rows: &[HistoryRow]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row).context("failed to serialize history row")?;
    }
    let bytes = writer.into_inner().context("failed to flush history csv")?;
    let body = String::from_utf8(bytes).context("history csv was not valid UTF-8")?;
    Ok(format!("{BOM}{body}"))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn row(code: &str, month: &str, strike: f64, date: (i32, u32, u32)) -> HistoryRow {
        HistoryRow {
            underlying_code: code.to_string(),
            contract_month: month.to_string(),
            strike,
            discount_value: 0.02,
            annualized_rate: 0.0973,
            days_to_maturity: 20,
            record_date: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
        }
    }

    #[test]
    fn test_merge_replaces_same_date_rows() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 5).unwrap();
        let prior = vec![
            row("300ETF", "2506", 3.5, (2025, 6, 5)),
            row("300ETF", "2506", 3.5, (2025, 6, 4)),
        ];
        let new_rows = vec![row("300ETF", "2506", 3.6, (2025, 6, 5))];

        let merged = merge_by_date(prior, &new_rows, date);
        assert_eq!(merged.len(), 2);
        // today's old row is gone, yesterday's survives
        assert!(merged.iter().any(|r| r.strike == 3.6 && r.record_date == date));
        assert!(merged.iter().all(|r| !(r.strike == 3.5 && r.record_date == date)));
    }

    #[test]
    fn test_merge_sorted_by_date_descending() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 6).unwrap();
        let prior = vec![
            row("300ETF", "2506", 3.5, (2025, 6, 4)),
            row("300ETF", "2506", 3.5, (2025, 6, 5)),
        ];
        let merged = merge_by_date(prior, &[row("300ETF", "2506", 3.5, (2025, 6, 6))], date);
        let dates: Vec<_> = merged.iter().map(|r| r.record_date).collect();
        let mut sorted = dates.clone();
        sorted.sort_by(|a, b| b.cmp(a));
        assert_eq!(dates, sorted);
    }

    #[test]
    fn test_render_parse_roundtrip_with_bom() {
        let rows = vec![row("300ETF", "2506", 3.5, (2025, 6, 5)), row("500ETF", "2507", 5.75, (2025, 6, 4))];
        let content = render_history(&rows).unwrap();
        assert!(content.starts_with(BOM));
        assert!(content.contains(
            "underlying_code,contract_month,strike,discount_value,annualized_rate,days_to_maturity,record_date"
        ));
        assert_eq!(parse_history(&content), rows);
    }

    #[test]
    fn test_parse_malformed_is_empty_history() {
        assert!(parse_history("not,a,header\n1,2").is_empty());
        assert!(parse_history("").is_empty());
        let garbage = "underlying_code,contract_month,strike,discount_value,annualized_rate,days_to_maturity,record_date\nX,2506,not-a-number,0,0,0,2025-06-05";
        assert!(parse_history(garbage).is_empty());
    }
}
