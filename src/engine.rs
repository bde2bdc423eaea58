//! Premium computation core: one (underlying, month, strike) group in, one
//! `PremiumResult` (or a skip) out.

use std::collections::HashMap;

use anyhow::Result;
use chrono::NaiveDate;
use tracing::debug;

use crate::expiry::{days_to_maturity, expiry_date};
use crate::market::{QuoteFeed, QuoteField};
use crate::resolver::resolve_underlying_price;
use crate::types::{
    round4, ContractMap, LiveQuoteStats, OptionKind, OptionQuoteRow, PremiumResult, SpotPrices,
};

/// All chain rows sharing one (underlying, month, strike)
#[derive(Debug, Clone)]
pub struct QuoteGroup {
    pub underlying_name: String,
    pub month_code: String,
    pub strike: f64,
    pub rows: Vec<OptionQuoteRow>,
}

/// Group chain rows by (underlying, month, strike). Strike is keyed at 1e-4
/// resolution, matching the precision results are emitted at.
pub fn group_rows(rows: Vec<OptionQuoteRow>) -> Vec<QuoteGroup> {
    let mut groups: HashMap<(String, String, i64), QuoteGroup> = HashMap::new();
    for row in rows {
        let strike_key = (row.strike * 10_000.0).round() as i64;
        let key = (row.underlying_name.clone(), row.month_code.clone(), strike_key);
        groups
            .entry(key)
            .or_insert_with(|| QuoteGroup {
                underlying_name: row.underlying_name.clone(),
                month_code: row.month_code.clone(),
                strike: row.strike,
                rows: Vec::new(),
            })
            .rows
            .push(row);
    }
    groups.into_values().collect()
}

/// Live price with the shared fallback tier: preferred field (rejecting
/// non-positive quotes), then last-traded, then None for "no live price".
async fn live_price(feed: &dyn QuoteFeed, live_quote_id: &str, preferred: QuoteField) -> Option<f64> {
    match feed.fetch_live_option_field(live_quote_id, preferred).await {
        Ok(Some(p)) if p > 0.0 => return Some(p),
        _ => {}
    }
    match feed.fetch_live_option_field(live_quote_id, QuoteField::LastTraded).await {
        Ok(Some(p)) if p > 0.0 => Some(p),
        _ => None,
    }
}

/// Price one leg: live quote when the trade code routes to the live feed,
/// otherwise (or when every live tier fails) the static chain price.
/// Returns the price and whether a live quote was used.
async fn leg_price(
    feed: &dyn QuoteFeed,
    row: &OptionQuoteRow,
    mapping: &ContractMap,
    preferred: QuoteField,
) -> (f64, bool) {
    if let Some(entry) = mapping.get(&row.trade_code) {
        if let Some(p) = live_price(feed, &entry.live_quote_id, preferred).await {
            return (p, true);
        }
        debug!(
            "[ENGINE] live quote unavailable for {} ({}), using chain price",
            row.trade_code, entry.display_symbol
        );
    }
    (row.last_price, false)
}

/// Compute the premium for one group.
///
/// Ok(None) marks a skipped group: a missing leg, an unusable spot price, or
/// an already-expired contract. Per-leg fetch failures never surface; they
/// degrade through the fallback tiers. Err is reserved for malformed chain
/// data (unparseable month code).
pub async fn compute_group(
    feed: &dyn QuoteFeed,
    group: &QuoteGroup,
    mapping: &ContractMap,
    prices: &SpotPrices,
    today: NaiveDate,
    stats: &LiveQuoteStats,
) -> Result<Option<PremiumResult>> {
    use std::sync::atomic::Ordering;

    let call = group.rows.iter().find(|r| r.kind() == Some(OptionKind::Call));
    let put = group.rows.iter().find(|r| r.kind() == Some(OptionKind::Put));
    let (Some(call), Some(put)) = (call, put) else {
        return Ok(None);
    };

    stats.call_total.fetch_add(1, Ordering::Relaxed);
    stats.put_total.fetch_add(1, Ordering::Relaxed);

    // Call leg quotes at the ask, put leg at the bid
    let (call_price, call_live) = leg_price(feed, call, mapping, QuoteField::Ask).await;
    let (put_price, put_live) = leg_price(feed, put, mapping, QuoteField::Bid).await;
    if call_live {
        stats.call_hits.fetch_add(1, Ordering::Relaxed);
    }
    if put_live {
        stats.put_hits.fetch_add(1, Ordering::Relaxed);
    }

    let spot = resolve_underlying_price(&group.underlying_name, prices);
    if spot <= 0.0 {
        return Ok(None);
    }

    let (year, month) = parse_month_code(&group.month_code)?;
    let days = days_to_maturity(expiry_date(year, month), today);
    if days < 0 {
        debug!(
            "[ENGINE] {} {} strike {} already expired ({} days), skipping",
            group.underlying_name, group.month_code, group.strike, days
        );
        return Ok(None);
    }

    let synthetic = call_price - put_price + group.strike;
    let discount_value = synthetic - spot;
    let annualized_rate = (discount_value / spot) * (365.0 / days.max(1) as f64);

    Ok(Some(PremiumResult {
        underlying_name: group.underlying_name.clone(),
        month_code: group.month_code.clone(),
        strike: group.strike,
        discount_value: round4(discount_value),
        annualized_rate: round4(annualized_rate),
        days_to_maturity: days,
    }))
}

/// "2506" -> (2025, 6). First two digits are the year offset from 2000.
fn parse_month_code(code: &str) -> Result<(i32, u32)> {
    if code.len() != 4 || !code.bytes().all(|b| b.is_ascii_digit()) {
        anyhow::bail!("malformed month code {code:?}");
    }
    let year = 2000 + code[..2].parse::<i32>()?;
    let month = code[2..].parse::<u32>()?;
    if !(1..=12).contains(&month) {
        anyhow::bail!("month code {code:?} has calendar month {month}");
    }
    Ok((year, month))
}

// =============================================================================
// TESTS
// =============================================================================
