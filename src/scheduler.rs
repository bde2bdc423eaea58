//! Refresh orchestration: when to invalidate caches and re-run the pipeline,
//! gated by the exchange trading window.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc, Weekday};
use tracing::{error, info};

use crate::config::{
    save_on_refresh_enabled, trading_close, trading_open, EXCHANGE_UTC_OFFSET_SECS,
    REFRESH_INTERVAL_SECS,
};
use crate::pipeline::PremiumPipeline;
use crate::storage::SnapshotStore;
use crate::types::AppState;

/// Exchange wall clock: fixed UTC+8, independent of the host timezone
pub fn exchange_now() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&exchange_offset())
}

/// Current date at the exchange
pub fn exchange_today() -> NaiveDate {
    exchange_now().date_naive()
}

fn exchange_offset() -> FixedOffset {
    FixedOffset::east_opt(EXCHANGE_UTC_OFFSET_SECS).expect("valid exchange offset")
}

/// Trading-window predicate: business day, 09:30-15:15 exchange time
pub fn within_trading_window(now: DateTime<FixedOffset>) -> bool {
    if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
        return false;
    }
    let t = now.time();
    t >= trading_open() && t <= trading_close()
}

/// What one scheduler tick does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Invalidate the 12-hour caches and run (manual trigger or timer)
    RefreshInvalidate(RefreshTrigger),
    /// Run without touching the caches (auto-refresh disabled)
    RefreshPlain,
    /// Do nothing; the cached result set stands
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    Manual,
    Timer,
}

/// Pure tick decision. `manual_pending` must already be consumed from the
/// one-shot flag; `elapsed` is the time since the last completed refresh.
pub fn decide(
    now: DateTime<FixedOffset>,
    manual_pending: bool,
    auto_enabled: bool,
    elapsed: Option<Duration>,
) -> TickAction {
    if manual_pending {
        return TickAction::RefreshInvalidate(RefreshTrigger::Manual);
    }
    if !auto_enabled {
        return TickAction::RefreshPlain;
    }
    let due = elapsed.map_or(true, |e| e >= Duration::from_secs(REFRESH_INTERVAL_SECS));
    if due && within_trading_window(now) {
        return TickAction::RefreshInvalidate(RefreshTrigger::Timer);
    }
    TickAction::Skip
}

/// Post-tick sleep: 10 s when the next scheduled refresh is less than a
/// minute away, otherwise 60 s. Avoids busy-polling without missing the slot.
pub fn pause_after(elapsed: Option<Duration>) -> Duration {
    let interval = Duration::from_secs(REFRESH_INTERVAL_SECS);
    let remaining = match elapsed {
        Some(e) if e < interval => interval - e,
        _ => Duration::ZERO,
    };
    if remaining <= Duration::from_secs(60) {
        Duration::from_secs(10)
    } else {
        Duration::from_secs(60)
    }
}

/// Cooperative refresh loop: one tick at a time, never overlapping cycles.
pub struct RefreshScheduler {
    pipeline: Arc<PremiumPipeline>,
    state: Arc<AppState>,
    snapshots: Arc<SnapshotStore>,
}

impl RefreshScheduler {
    pub fn new(pipeline: Arc<PremiumPipeline>, state: Arc<AppState>, snapshots: Arc<SnapshotStore>) -> Self {
        Self { pipeline, state, snapshots }
    }

    /// Run forever. A failed cycle keeps the previous results on display and
    /// the loop always continues to the next scheduled attempt.
    pub async fn run(&self) {
        loop {
            self.tick().await;
            let elapsed = self.elapsed_since_refresh().await;
            tokio::time::sleep(pause_after(elapsed)).await;
        }
    }

    /// Evaluate the transition rule once and act on it
    pub async fn tick(&self) -> TickAction {
        self.tick_at(exchange_now()).await
    }

    /// Tick against an explicit clock reading
    pub async fn tick_at(&self, now: DateTime<FixedOffset>) -> TickAction {
        let manual = self.state.take_manual_request();
        let auto = self.state.auto_refresh_enabled();
        let elapsed = self.elapsed_since_refresh().await;
        let action = decide(now, manual, auto, elapsed);

        match action {
            TickAction::RefreshInvalidate(trigger) => {
                info!("[SCHEDULER] refresh ({:?})", trigger);
                self.pipeline.invalidate_caches().await;
                self.run_cycle().await;
            }
            TickAction::RefreshPlain => {
                self.run_cycle().await;
            }
            TickAction::Skip => {}
        }
        action
    }

    async fn run_cycle(&self) {
        match self.pipeline.run(&self.state).await {
            Ok(results) => {
                if save_on_refresh_enabled() && !results.is_empty() {
                    if let Err(e) = self.snapshots.append(&results, exchange_today()).await {
                        error!("[SCHEDULER] snapshot save failed: {e:#}");
                    }
                }
            }
            Err(e) => {
                // previous cached results remain on display
                error!("[SCHEDULER] refresh cycle failed: {e:#}");
            }
        }
    }

    async fn elapsed_since_refresh(&self) -> Option<Duration> {
        self.state
            .last_refresh_at()
            .await
            .map(|at| (Utc::now() - at).to_std().unwrap_or(Duration::ZERO))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<FixedOffset> {
        exchange_offset().with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    // =========================================================================
    // within_trading_window
    // =========================================================================

    #[test]
    fn test_window_open_during_session() {
        // 2025-06-05 is a Thursday
        assert!(within_trading_window(at(2025, 6, 5, 10, 0)));
        assert!(within_trading_window(at(2025, 6, 5, 9, 30)));
        assert!(within_trading_window(at(2025, 6, 5, 15, 15)));
    }

    #[test]
    fn test_window_closed_outside_session() {
        assert!(!within_trading_window(at(2025, 6, 5, 9, 29)));
        assert!(!within_trading_window(at(2025, 6, 5, 15, 16)));
        assert!(!within_trading_window(at(2025, 6, 5, 3, 0)));
    }

    #[test]
    fn test_window_closed_on_weekends() {
        // 2025-06-07/08 are Sat/Sun
        assert!(!within_trading_window(at(2025, 6, 7, 10, 0)));
        assert!(!within_trading_window(at(2025, 6, 8, 10, 0)));
    }

    // =========================================================================
    // decide
    // =========================================================================

    const IN_WINDOW: (i32, u32, u32, u32, u32) = (2025, 6, 5, 10, 0);
    const OUT_OF_WINDOW: (i32, u32, u32, u32, u32) = (2025, 6, 5, 20, 0);

    fn now_in_window() -> DateTime<FixedOffset> {
        let (y, mo, d, h, mi) = IN_WINDOW;
        at(y, mo, d, h, mi)
    }

    fn now_out_of_window() -> DateTime<FixedOffset> {
        let (y, mo, d, h, mi) = OUT_OF_WINDOW;
        at(y, mo, d, h, mi)
    }

    #[test]
    fn test_manual_refresh_ignores_window() {
        let action = decide(now_out_of_window(), true, true, Some(Duration::from_secs(5)));
        assert_eq!(action, TickAction::RefreshInvalidate(RefreshTrigger::Manual));
    }

    #[test]
    fn test_timer_refresh_inside_window_when_due() {
        let action = decide(now_in_window(), false, true, Some(Duration::from_secs(300)));
        assert_eq!(action, TickAction::RefreshInvalidate(RefreshTrigger::Timer));
        // never refreshed yet counts as due
        let action = decide(now_in_window(), false, true, None);
        assert_eq!(action, TickAction::RefreshInvalidate(RefreshTrigger::Timer));
    }

    #[test]
    fn test_timer_not_due_skips() {
        let action = decide(now_in_window(), false, true, Some(Duration::from_secs(100)));
        assert_eq!(action, TickAction::Skip);
    }

    #[test]
    fn test_outside_window_skips_and_serves_cache() {
        let action = decide(now_out_of_window(), false, true, Some(Duration::from_secs(9999)));
        assert_eq!(action, TickAction::Skip);
    }

    #[test]
    fn test_auto_disabled_runs_every_tick() {
        let action = decide(now_out_of_window(), false, false, Some(Duration::from_secs(1)));
        assert_eq!(action, TickAction::RefreshPlain);
    }

    // =========================================================================
    // pause_after
    // =========================================================================

    #[test]
    fn test_pause_short_near_next_refresh() {
        // 250s elapsed -> next refresh in 50s -> short sleep
        assert_eq!(pause_after(Some(Duration::from_secs(250))), Duration::from_secs(10));
        // overdue -> short sleep
        assert_eq!(pause_after(Some(Duration::from_secs(400))), Duration::from_secs(10));
        assert_eq!(pause_after(None), Duration::from_secs(10));
    }

    #[test]
    fn test_pause_long_when_far_from_refresh() {
        // 30s elapsed -> next refresh in 270s -> long sleep
        assert_eq!(pause_after(Some(Duration::from_secs(30))), Duration::from_secs(60));
    }
}
