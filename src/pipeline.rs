//! One refresh cycle end to end: cached contract mapping and chain data,
//! fresh spot prices, grouping, fan-out, publish.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use chrono::Utc;
use futures_util::{stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::{SLOW_CACHE_TTL_SECS, UNDERLYINGS};
use crate::dispatcher::dispatch;
use crate::engine::group_rows;
use crate::expiry::contract_month_series;
use crate::market::QuoteFeed;
use crate::resolver::build_contract_map;
use crate::scheduler::exchange_today;
use crate::types::{AppState, ContractMap, LiveQuoteStats, OptionQuoteRow, PremiumResult, SpotPrices};

/// Concurrent (underlying, month) chain fetches in flight
const CHAIN_FETCH_CONCURRENCY: usize = 4;

/// Slot holding a value until its TTL lapses or it is invalidated
struct TtlSlot<T> {
    value: Option<(Instant, Arc<T>)>,
}

impl<T> TtlSlot<T> {
    fn empty() -> Self {
        Self { value: None }
    }

    fn fresh(&self, ttl: Duration) -> Option<Arc<T>> {
        self.value
            .as_ref()
            .filter(|(at, _)| at.elapsed() < ttl)
            .map(|(_, v)| v.clone())
    }

    fn put(&mut self, value: Arc<T>) {
        self.value = Some((Instant::now(), value));
    }

    fn clear(&mut self) {
        self.value = None;
    }
}

/// The premium pipeline: owns the collaborator handle and the 12-hour caches
/// for the contract mapping and the chain batches. Spot prices are never
/// cached.
pub struct PremiumPipeline {
    feed: Arc<dyn QuoteFeed>,
    mapping_cache: Mutex<TtlSlot<ContractMap>>,
    chain_cache: Mutex<TtlSlot<Vec<OptionQuoteRow>>>,
}

impl PremiumPipeline {
    pub fn new(feed: Arc<dyn QuoteFeed>) -> Self {
        Self {
            feed,
            mapping_cache: Mutex::new(TtlSlot::empty()),
            chain_cache: Mutex::new(TtlSlot::empty()),
        }
    }

    /// Drop the mapping and chain caches so the next run refetches both
    pub async fn invalidate_caches(&self) {
        self.mapping_cache.lock().await.clear();
        self.chain_cache.lock().await.clear();
    }

    /// Run one full refresh cycle and publish the results into `state`.
    ///
    /// Fails only on total chain unavailability; per-source failures degrade
    /// (missing combinations are omitted, missing live quotes fall back).
    pub async fn run(&self, state: &AppState) -> Result<Vec<PremiumResult>> {
        let started = Instant::now();
        let today = exchange_today();

        let mapping = self.mapping(today).await;
        let chain = self.chain(today).await?;
        let prices = Arc::new(self.spot_prices().await);

        let groups = group_rows(chain.as_ref().clone());
        let stats = Arc::new(LiveQuoteStats::default());
        let results = dispatch(
            self.feed.clone(),
            groups,
            mapping,
            prices,
            today,
            stats.clone(),
        )
        .await;

        let snapshot = stats.snapshot();
        info!(
            "[REFRESH] {} results in {:.1}s | live quotes: calls {}/{}, puts {}/{}",
            results.len(),
            started.elapsed().as_secs_f64(),
            snapshot.call_hits,
            snapshot.call_total,
            snapshot.put_hits,
            snapshot.put_total,
        );

        state.publish(results.clone(), snapshot, Utc::now()).await;
        Ok(results)
    }

    async fn mapping(&self, today: chrono::NaiveDate) -> Arc<ContractMap> {
        let ttl = Duration::from_secs(SLOW_CACHE_TTL_SECS);
        let mut slot = self.mapping_cache.lock().await;
        if let Some(cached) = slot.fresh(ttl) {
            return cached;
        }
        let mapping = Arc::new(build_contract_map(self.feed.as_ref(), today).await);
        slot.put(mapping.clone());
        mapping
    }

    /// Chain rows for every (underlying, contract month) combination. A failed
    /// combination is omitted with a warning; no rows at all aborts the cycle.
    async fn chain(&self, today: chrono::NaiveDate) -> Result<Arc<Vec<OptionQuoteRow>>> {
        let ttl = Duration::from_secs(SLOW_CACHE_TTL_SECS);
        {
            let slot = self.chain_cache.lock().await;
            if let Some(cached) = slot.fresh(ttl) {
                return Ok(cached);
            }
        }

        let months = contract_month_series(today);
        let requests: Vec<(&'static str, String)> = UNDERLYINGS
            .iter()
            .flat_map(|u| months.iter().map(|m| (u.name, m.clone())))
            .collect();

        let batches: Vec<(&'static str, String, Result<Vec<OptionQuoteRow>>)> = stream::iter(requests)
            .map(|(name, month)| {
                let feed = self.feed.clone();
                async move {
                    let rows = feed.fetch_option_chain(name, &month).await;
                    (name, month, rows)
                }
            })
            .buffer_unordered(CHAIN_FETCH_CONCURRENCY)
            .collect()
            .await;

        let mut all_rows = Vec::new();
        for (name, month, batch) in batches {
            match batch {
                Ok(rows) => all_rows.extend(rows),
                Err(e) => warn!("[CHAIN] {} {} unavailable: {e:#}", name, month),
            }
        }
        if all_rows.is_empty() {
            anyhow::bail!("no option chain data available for any underlying/month");
        }
        info!("[CHAIN] fetched {} rows across {} months", all_rows.len(), months.len());

        let rows = Arc::new(all_rows);
        self.chain_cache.lock().await.put(rows.clone());
        Ok(rows)
    }

    /// Fresh spot prices for every underlying; failures store the 0.0 sentinel
    async fn spot_prices(&self) -> SpotPrices {
        let mut prices = HashMap::new();
        for u in UNDERLYINGS {
            let price = match self.feed.fetch_underlying_spot(u.feed_symbol).await {
                Ok(Some(p)) if p > 0.0 => p,
                Ok(_) => {
                    warn!("[SPOT] {} price unavailable", u.display_code);
                    0.0
                }
                Err(e) => {
                    warn!("[SPOT] {} fetch failed: {e:#}", u.display_code);
                    0.0
                }
            };
            prices.insert(u.feed_symbol.to_string(), price);
        }

        let line = UNDERLYINGS
            .iter()
            .map(|u| format!("{}={:.4}", u.display_code, prices[u.feed_symbol]))
            .collect::<Vec<_>>()
            .join(" ");
        info!("[SPOT] {}", line);
        prices
    }
}
