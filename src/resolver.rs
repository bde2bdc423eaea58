//! Symbol resolution: builds the trade-code -> live-quote map from the SSE
//! risk-indicator snapshots, and matches free-text underlying names to spot
//! prices.

use chrono::{Datelike, Duration, NaiveDate, Weekday};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::config::{MAPPING_LOOKBACK_DAYS, DEFAULT_FEED_SYMBOL, UNDERLYINGS};
use crate::market::QuoteFeed;
use crate::types::{ContractMap, ContractMapEntry, SpotPrices};

/// Prior business days (Mon-Fri), walking backward from (and excluding) `today`.
pub fn previous_business_days(today: NaiveDate, count: usize) -> Vec<NaiveDate> {
    let mut dates = Vec::with_capacity(count);
    let mut day = today;
    while dates.len() < count {
        day -= Duration::days(1);
        if !matches!(day.weekday(), Weekday::Sat | Weekday::Sun) {
            dates.push(day);
        }
    }
    dates
}

/// Build the contract map from the most recent usable risk-indicator snapshot.
///
/// Walks up to `MAPPING_LOOKBACK_DAYS` prior business days and takes the first
/// date with a non-empty, well-formed result. Returns an empty map when no day
/// qualifies; callers then price every leg from the static chain data.
/// Within one build, the first entry per trade code wins.
pub async fn build_contract_map(feed: &dyn QuoteFeed, today: NaiveDate) -> ContractMap {
    for date in previous_business_days(today, MAPPING_LOOKBACK_DAYS) {
        let rows = match feed.fetch_risk_indicator(date).await {
            Ok(rows) => rows,
            Err(e) => {
                debug!("[MAPPING] {} unavailable: {e:#}", date);
                continue;
            }
        };
        if rows.is_empty() {
            continue;
        }

        let mut map: ContractMap = FxHashMap::default();
        for row in rows {
            map.entry(row.contract_id).or_insert(ContractMapEntry {
                live_quote_id: row.security_id,
                display_symbol: row.contract_symbol,
            });
        }
        if !map.is_empty() {
            info!("[MAPPING] built {} contract entries from {}", map.len(), date);
            return map;
        }
    }

    warn!(
        "[MAPPING] no usable risk-indicator snapshot in the last {} business days; \
         falling back to chain prices everywhere",
        MAPPING_LOOKBACK_DAYS
    );
    ContractMap::default()
}

/// Spot price for a free-text underlying name.
///
/// Every configured keyword is matched as a substring; among all matches the
/// longest keyword wins, preferring the more specific underlying. A name that
/// matches nothing falls back to the default underlying's price. The chain
/// source carries no stable underlying key, hence this heuristic.
pub fn resolve_underlying_price(underlying_name: &str, prices: &SpotPrices) -> f64 {
    let mut best: Option<(usize, &str)> = None;
    for u in UNDERLYINGS {
        for keyword in u.keywords {
            if underlying_name.contains(keyword) && best.map_or(true, |(len, _)| keyword.len() > len) {
                best = Some((keyword.len(), u.feed_symbol));
            }
        }
    }

    let feed_symbol = match best {
        Some((_, symbol)) => symbol,
        None => {
            debug!(
                "[RESOLVE] '{}' matched no keyword, using default {}",
                underlying_name, DEFAULT_FEED_SYMBOL
            );
            DEFAULT_FEED_SYMBOL
        }
    };
    prices.get(feed_symbol).copied().unwrap_or(0.0)
}

// =============================================================================
// TESTS
// =============================================================================
