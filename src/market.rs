//! Market-data collaborators: the `QuoteFeed` boundary trait and the real
//! client over the SSE query endpoint and the Sina quote feed.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{
    HTTP_TIMEOUT_SECS, QUOTE_RATE_LIMIT_PER_SEC, SINA_QUOTE_URL, SINA_REFERER, SSE_QUERY_URL,
    SSE_REFERER, UNDERLYINGS,
};
use crate::types::{month_code_of, OptionQuoteRow, RiskIndicatorRow};

/// Live quote field for an option contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuoteField {
    /// Sell-side quote (call-leg convention)
    Ask,
    /// Buy-side quote (put-leg convention)
    Bid,
    /// Last traded price (shared fallback tier)
    LastTraded,
}

/// Upstream market-data boundary. Every call may fail independently; callers
/// degrade per the fallback policy instead of aborting the cycle.
#[async_trait]
pub trait QuoteFeed: Send + Sync {
    /// Option chain rows for one (underlying, YYMM month) batch
    async fn fetch_option_chain(&self, underlying: &str, month: &str) -> Result<Vec<OptionQuoteRow>>;

    /// One live field for a contract; Ok(None) when the feed has no usable value
    async fn fetch_live_option_field(&self, live_quote_id: &str, field: QuoteField) -> Result<Option<f64>>;

    /// Current spot price for an underlying quote-feed symbol
    async fn fetch_underlying_spot(&self, feed_symbol: &str) -> Result<Option<f64>>;

    /// Risk-indicator snapshot for a business date (contract map source)
    async fn fetch_risk_indicator(&self, date: NaiveDate) -> Result<Vec<RiskIndicatorRow>>;
}

// === Sina quote payload field positions ===

// CON_OP_* option quote: comma-separated, bid price at 1, last at 2, ask at 3
const OPT_IDX_BID: usize = 1;
const OPT_IDX_LAST: usize = 2;
const OPT_IDX_ASK: usize = 3;

// ETF quote: name at 0, last traded price at 3
const ETF_IDX_LAST: usize = 3;

/// Real client: SSE commonQuery for chain and risk-indicator data, Sina for
/// live quotes. Quote calls are rate limited; the free feed throttles hard.
pub struct SseMarketClient {
    http: reqwest::Client,
    quote_limiter: DefaultDirectRateLimiter,
}

impl SseMarketClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .context("failed to build HTTP client")?;
        let per_sec = NonZeroU32::new(QUOTE_RATE_LIMIT_PER_SEC).context("rate limit must be nonzero")?;
        Ok(Self {
            http,
            quote_limiter: RateLimiter::direct(Quota::per_second(per_sec)),
        })
    }

    /// Underlying security code for the SSE chain query ("sh510300" -> "510300")
    fn product_code(underlying: &str) -> Option<&'static str> {
        UNDERLYINGS
            .iter()
            .find(|u| u.name == underlying)
            .map(|u| u.feed_symbol.trim_start_matches("sh"))
    }

    async fn sse_query(&self, params: &[(&str, &str)]) -> Result<Value> {
        let resp = self
            .http
            .get(SSE_QUERY_URL)
            .header("Referer", SSE_REFERER)
            .query(params)
            .send()
            .await
            .context("SSE query request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("SSE query returned status {}", resp.status());
        }
        resp.json::<Value>().await.context("SSE query returned invalid JSON")
    }

    /// Fetch one Sina quote line and split its comma-separated payload.
    /// The payload is GBK-encoded; every numeric field is ASCII, so a lossy
    /// decode is sufficient here.
    async fn sina_quote_fields(&self, symbol: &str) -> Result<Option<Vec<String>>> {
        self.quote_limiter.until_ready().await;

        let url = format!("{}{}", SINA_QUOTE_URL, symbol);
        let resp = self
            .http
            .get(&url)
            .header("Referer", SINA_REFERER)
            .send()
            .await
            .context("Sina quote request failed")?;
        if !resp.status().is_success() {
            anyhow::bail!("Sina quote returned status {}", resp.status());
        }
        let body = resp.bytes().await.context("Sina quote body unreadable")?;
        let text = String::from_utf8_lossy(&body);

        // var hq_str_XXX="f1,f2,...";
        let Some(start) = text.find('"') else { return Ok(None) };
        let Some(end) = text.rfind('"') else { return Ok(None) };
        if end <= start + 1 {
            return Ok(None);
        }
        let fields: Vec<String> = text[start + 1..end].split(',').map(|s| s.trim().to_string()).collect();
        Ok(Some(fields))
    }
}

fn field_f64(fields: &[String], idx: usize) -> Option<f64> {
    fields.get(idx).and_then(|s| s.parse::<f64>().ok())
}

fn json_str(row: &Value, key: &str) -> Option<String> {
    match row.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn json_f64(row: &Value, key: &str) -> Option<f64> {
    match row.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse::<f64>().ok(),
        _ => None,
    }
}

#[async_trait]
impl QuoteFeed for SseMarketClient {
    async fn fetch_option_chain(&self, underlying: &str, month: &str) -> Result<Vec<OptionQuoteRow>> {
        let Some(code) = Self::product_code(underlying) else {
            anyhow::bail!("unknown underlying {underlying}");
        };
        if month.len() != 4 || !month.bytes().all(|b| b.is_ascii_digit()) {
            anyhow::bail!("malformed contract month {month}");
        }
        let expire = format!("20{}-{}", &month[..2], &month[2..]);
        let body = self
            .sse_query(&[
                ("sqlId", "SSE_ZQPZ_YSP_GGQQZSXT_XXPL_DRHQ_SEARCH_L"),
                ("isPagination", "false"),
                ("SECURITY_ID", code),
                ("EXPIRE_DATE", &expire),
            ])
            .await?;

        let rows = body
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(trade_code) = json_str(row, "CONTRACT_ID") else { continue };
            let Some(strike) = json_f64(row, "EXERCISE_PRICE") else { continue };
            let Some(last_price) = json_f64(row, "LAST_PRICE") else { continue };
            let Some(month_code) = month_code_of(&trade_code).map(str::to_string) else {
                debug!("[CHAIN] skipping malformed trade code {}", trade_code);
                continue;
            };
            out.push(OptionQuoteRow {
                underlying_name: underlying.to_string(),
                trade_code,
                strike,
                last_price,
                month_code,
            });
        }
        debug!("[CHAIN] {} {}: {} rows", underlying, month, out.len());
        Ok(out)
    }

    async fn fetch_live_option_field(&self, live_quote_id: &str, field: QuoteField) -> Result<Option<f64>> {
        let symbol = format!("CON_OP_{}", live_quote_id);
        let Some(fields) = self.sina_quote_fields(&symbol).await? else {
            return Ok(None);
        };
        let idx = match field {
            QuoteField::Ask => OPT_IDX_ASK,
            QuoteField::Bid => OPT_IDX_BID,
            QuoteField::LastTraded => OPT_IDX_LAST,
        };
        Ok(field_f64(&fields, idx))
    }

    async fn fetch_underlying_spot(&self, feed_symbol: &str) -> Result<Option<f64>> {
        let Some(fields) = self.sina_quote_fields(feed_symbol).await? else {
            return Ok(None);
        };
        Ok(field_f64(&fields, ETF_IDX_LAST))
    }

    async fn fetch_risk_indicator(&self, date: NaiveDate) -> Result<Vec<RiskIndicatorRow>> {
        let trade_date = date.format("%Y%m%d").to_string();
        let body = self
            .sse_query(&[
                ("sqlId", "SSE_ZQPZ_YSP_GGQQZSXT_FXZB_SEARCH_L"),
                ("isPagination", "false"),
                ("TRADE_DATE", &trade_date),
            ])
            .await?;

        let rows = body
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let (Some(security_id), Some(contract_id), Some(contract_symbol)) = (
                json_str(row, "SECURITY_ID"),
                json_str(row, "CONTRACT_ID"),
                json_str(row, "CONTRACT_SYMBOL"),
            ) else {
                // a single short row does not invalidate the snapshot
                warn!("[MAPPING] risk-indicator row missing required fields on {}", trade_date);
                continue;
            };
            out.push(RiskIndicatorRow {
                security_id,
                contract_id,
                contract_symbol,
            });
        }
        Ok(out)
    }
}

// =============================================================================
// TESTS
// =============================================================================
