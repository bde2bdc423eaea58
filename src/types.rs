//! Core type definitions and shared application state for the premium monitor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

// === Market data types ===

/// Option kind, encoded by a 'C' or 'P' in the contract trade code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    Call,
    Put,
}

/// One row of the option chain for an (underlying, month) batch.
/// Immutable once fetched; discarded after the cycle's results are derived.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionQuoteRow {
    /// Free-text underlying name as the chain source reports it
    pub underlying_name: String,
    /// Contract trade code, e.g. "510300C2506M03500"
    pub trade_code: String,
    pub strike: f64,
    /// Static last price from the chain batch (final pricing fallback)
    pub last_price: f64,
    /// YYMM contract month, characters 8-11 (1-indexed) of the trade code
    pub month_code: String,
}

impl OptionQuoteRow {
    /// Option kind from the trade code; None when the code carries neither marker.
    pub fn kind(&self) -> Option<OptionKind> {
        if self.trade_code.contains('C') {
            Some(OptionKind::Call)
        } else if self.trade_code.contains('P') {
            Some(OptionKind::Put)
        } else {
            None
        }
    }
}

/// Extract the YYMM month code embedded in a contract trade code.
pub fn month_code_of(trade_code: &str) -> Option<&str> {
    trade_code.get(7..11).filter(|s| s.bytes().all(|b| b.is_ascii_digit()))
}

/// One row of the SSE risk-indicator snapshot used to build the contract map
#[derive(Debug, Clone)]
pub struct RiskIndicatorRow {
    pub security_id: String,
    pub contract_id: String,
    pub contract_symbol: String,
}

/// Live-quote routing for one contract trade code
#[derive(Debug, Clone)]
pub struct ContractMapEntry {
    /// Security id accepted by the live quote feed
    pub live_quote_id: String,
    /// Human-readable contract symbol (diagnostics only)
    pub display_symbol: String,
}

/// trade_code -> live-quote routing, rebuilt at most every 12 hours
pub type ContractMap = FxHashMap<String, ContractMapEntry>;

/// feed_symbol -> spot price; 0.0 is the "unusable" sentinel for failed fetches
pub type SpotPrices = HashMap<String, f64>;

// === Results ===

/// Premium computation output for one (underlying, month, strike) group
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PremiumResult {
    pub underlying_name: String,
    pub month_code: String,
    pub strike: f64,
    /// synthetic forward (call - put + strike) minus spot, 4 decimals
    pub discount_value: f64,
    /// discount / spot, annualized over 365 / max(days, 1), 4 decimals
    pub annualized_rate: f64,
    /// Calendar days to the 4th-Wednesday expiry; emitted rows are never negative
    pub days_to_maturity: i64,
}

/// Round to 4 decimal places (monetary and rate fields)
pub fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

// === Per-cycle live-quote counters ===

/// Shared counters mutated by the worker pool while a cycle runs
#[derive(Debug, Default)]
pub struct LiveQuoteStats {
    pub call_hits: AtomicUsize,
    pub call_total: AtomicUsize,
    pub put_hits: AtomicUsize,
    pub put_total: AtomicUsize,
}

impl LiveQuoteStats {
    pub fn snapshot(&self) -> RefreshStats {
        RefreshStats {
            call_hits: self.call_hits.load(Ordering::Relaxed),
            call_total: self.call_total.load(Ordering::Relaxed),
            put_hits: self.put_hits.load(Ordering::Relaxed),
            put_total: self.put_total.load(Ordering::Relaxed),
        }
    }
}

/// Frozen counter snapshot published with each successful refresh
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshStats {
    pub call_hits: usize,
    pub call_total: usize,
    pub put_hits: usize,
    pub put_total: usize,
}

// === Application state ===

/// Process-wide state shared between the scheduler, the store, and the display
/// layer. Created once at startup; the latest result set is replaced wholesale
/// by each successful refresh.
pub struct AppState {
    latest: RwLock<Vec<PremiumResult>>,
    last_refresh: RwLock<Option<DateTime<Utc>>>,
    last_stats: RwLock<RefreshStats>,
    manual_refresh: AtomicBool,
    auto_refresh: AtomicBool,
}

impl AppState {
    pub fn new(auto_refresh: bool) -> Self {
        Self {
            latest: RwLock::new(Vec::new()),
            last_refresh: RwLock::new(None),
            last_stats: RwLock::new(RefreshStats::default()),
            manual_refresh: AtomicBool::new(false),
            auto_refresh: AtomicBool::new(auto_refresh),
        }
    }

    /// Latest computed result set (empty before the first successful refresh)
    pub async fn last_computed_results(&self) -> Vec<PremiumResult> {
        self.latest.read().await.clone()
    }

    pub async fn last_refresh_at(&self) -> Option<DateTime<Utc>> {
        *self.last_refresh.read().await
    }

    pub async fn last_refresh_stats(&self) -> RefreshStats {
        *self.last_stats.read().await
    }

    /// Replace the published results; called only on a successful pipeline run
    pub async fn publish(&self, results: Vec<PremiumResult>, stats: RefreshStats, at: DateTime<Utc>) {
        *self.latest.write().await = results;
        *self.last_stats.write().await = stats;
        *self.last_refresh.write().await = Some(at);
    }

    /// One-shot manual refresh trigger (the UI's refresh button)
    pub fn request_manual_refresh(&self) {
        self.manual_refresh.store(true, Ordering::SeqCst);
    }

    /// Consume the manual trigger; clears the flag as it reads it
    pub fn take_manual_request(&self) -> bool {
        self.manual_refresh.swap(false, Ordering::SeqCst)
    }

    pub fn auto_refresh_enabled(&self) -> bool {
        self.auto_refresh.load(Ordering::SeqCst)
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.auto_refresh.store(enabled, Ordering::SeqCst);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_option_kind_from_trade_code() {
        let mut row = OptionQuoteRow {
            underlying_name: "华泰柏瑞沪深300ETF期权".to_string(),
            trade_code: "510300C2506M03500".to_string(),
            strike: 3.5,
            last_price: 0.1,
            month_code: "2506".to_string(),
        };
        assert_eq!(row.kind(), Some(OptionKind::Call));

        row.trade_code = "510300P2506M03500".to_string();
        assert_eq!(row.kind(), Some(OptionKind::Put));

        row.trade_code = "510300X2506M03500".to_string();
        assert_eq!(row.kind(), None);
    }

    #[test]
    fn test_month_code_extraction() {
        assert_eq!(month_code_of("510300C2506M03500"), Some("2506"));
        assert_eq!(month_code_of("510050P2512M02750"), Some("2512"));
        // too short / non-digit month slots
        assert_eq!(month_code_of("short"), None);
        assert_eq!(month_code_of("510300CM506X03500"), None);
    }

    #[test]
    fn test_round4() {
        assert_eq!(round4(0.09733333), 0.0973);
        assert_eq!(round4(1.25 - 0.98 + 3.5 - 3.75), 0.02);
        assert_eq!(round4(-0.00005), -0.0001);
        assert_eq!(round4(0.0), 0.0);
    }

    #[tokio::test]
    async fn test_manual_request_consumed_once() {
        let state = AppState::new(true);
        assert!(!state.take_manual_request());

        state.request_manual_refresh();
        assert!(state.take_manual_request());
        assert!(!state.take_manual_request(), "flag clears on consumption");
    }

    #[tokio::test]
    async fn test_publish_replaces_wholesale() {
        let state = AppState::new(true);
        let at = Utc.with_ymd_and_hms(2025, 6, 5, 3, 0, 0).unwrap();

        let row = PremiumResult {
            underlying_name: "华泰柏瑞沪深300ETF期权".to_string(),
            month_code: "2506".to_string(),
            strike: 3.5,
            discount_value: 0.02,
            annualized_rate: 0.0973,
            days_to_maturity: 20,
        };
        state.publish(vec![row.clone()], RefreshStats::default(), at).await;
        assert_eq!(state.last_computed_results().await.len(), 1);
        assert_eq!(state.last_refresh_at().await, Some(at));

        state.publish(Vec::new(), RefreshStats::default(), at).await;
        assert!(state.last_computed_results().await.is_empty());
    }
}
