//! Bounded fan-out/fan-in of per-group premium computation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::config::WORKER_POOL_SIZE;
use crate::engine::{compute_group, QuoteGroup};
use crate::market::QuoteFeed;
use crate::types::{ContractMap, LiveQuoteStats, PremiumResult, SpotPrices};

/// Run every group through the worker pool (bound: `WORKER_POOL_SIZE`
/// concurrent workers) and collect the non-empty results, order unspecified.
///
/// Individual task failures are logged and counted as completed, never
/// retried. A pool-level failure (a join error: panic or external abort)
/// aborts the remaining concurrent tasks and finishes every not-yet-completed
/// group sequentially under the same per-task error policy.
pub async fn dispatch(
    feed: Arc<dyn QuoteFeed>,
    groups: Vec<QuoteGroup>,
    mapping: Arc<ContractMap>,
    prices: Arc<SpotPrices>,
    today: NaiveDate,
    stats: Arc<LiveQuoteStats>,
) -> Vec<PremiumResult> {
    let total = groups.len();
    let groups = Arc::new(groups);
    let completed = Arc::new(AtomicUsize::new(0));
    let semaphore = Arc::new(Semaphore::new(WORKER_POOL_SIZE));

    let mut tasks: JoinSet<(usize, Option<PremiumResult>)> = JoinSet::new();
    for idx in 0..total {
        let feed = feed.clone();
        let groups = groups.clone();
        let mapping = mapping.clone();
        let prices = prices.clone();
        let stats = stats.clone();
        let semaphore = semaphore.clone();
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(p) => p,
                Err(_) => return (idx, None),
            };
            let group = &groups[idx];
            match compute_group(feed.as_ref(), group, &mapping, &prices, today, &stats).await {
                Ok(res) => (idx, res),
                Err(e) => {
                    warn!(
                        "[DISPATCH] group {} {} strike {} failed: {e:#}",
                        group.underlying_name, group.month_code, group.strike
                    );
                    (idx, None)
                }
            }
        });
    }

    let mut done = vec![false; total];
    let mut results = Vec::with_capacity(total);
    let mut pool_failed = false;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, res)) => {
                record_completion(&completed, total, idx, res, &mut done, &mut results);
            }
            Err(e) => {
                warn!("[DISPATCH] worker pool failure: {e}; finishing remaining groups sequentially");
                pool_failed = true;
                tasks.abort_all();
                // collect whatever finished before the abort landed
                while let Some(joined) = tasks.join_next().await {
                    if let Ok((idx, res)) = joined {
                        record_completion(&completed, total, idx, res, &mut done, &mut results);
                    }
                }
                break;
            }
        }
    }

    if pool_failed {
        for idx in 0..total {
            if done[idx] {
                continue;
            }
            let group = &groups[idx];
            match compute_group(feed.as_ref(), group, &mapping, &prices, today, &stats).await {
                Ok(Some(r)) => results.push(r),
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        "[DISPATCH] group {} {} strike {} failed: {e:#}",
                        group.underlying_name, group.month_code, group.strike
                    );
                }
            }
            record_progress(&completed, total);
        }
    }

    info!("[DISPATCH] computed {} results from {} groups", results.len(), total);
    results
}

fn record_completion(
    completed: &AtomicUsize,
    total: usize,
    idx: usize,
    res: Option<PremiumResult>,
    done: &mut [bool],
    results: &mut Vec<PremiumResult>,
) {
    done[idx] = true;
    record_progress(completed, total);
    if let Some(r) = res {
        results.push(r);
    }
}

fn record_progress(completed: &AtomicUsize, total: usize) {
    let n = completed.fetch_add(1, Ordering::Relaxed) + 1;
    if n % 25 == 0 || n == total {
        debug!("[DISPATCH] progress {}/{}", n, total);
    }
}
