//! System configuration: endpoints, refresh timing, trading window, and the
//! underlying-ETF registry.

use chrono::NaiveTime;

/// SSE commonQuery endpoint (option chain + risk-indicator snapshots)
pub const SSE_QUERY_URL: &str = "https://query.sse.com.cn/commonQuery.do";

/// Referer required by the SSE query endpoint
pub const SSE_REFERER: &str = "https://www.sse.com.cn/";

/// Sina quote endpoint (live option fields and ETF spot prices)
pub const SINA_QUOTE_URL: &str = "https://hq.sinajs.cn/list=";

/// Referer required by the Sina quote endpoint
pub const SINA_REFERER: &str = "https://stock.finance.sina.com.cn/";

/// HTTP timeout for all collaborator calls (seconds)
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// Sina rate limit: quote requests per second (free feed, throttles aggressively)
pub const QUOTE_RATE_LIMIT_PER_SEC: u32 = 20;

/// Auto-refresh interval (seconds)
pub const REFRESH_INTERVAL_SECS: u64 = 300;

/// Bounded worker pool size for per-group premium computation
pub const WORKER_POOL_SIZE: usize = 10;

/// TTL for the contract mapping and option chain caches (12 hours)
pub const SLOW_CACHE_TTL_SECS: u64 = 12 * 60 * 60;

/// How many prior business days to probe for a usable risk-indicator snapshot
pub const MAPPING_LOOKBACK_DAYS: usize = 10;

/// Exchange local time is fixed UTC+8, independent of host timezone
pub const EXCHANGE_UTC_OFFSET_SECS: i32 = 8 * 3600;

/// Trading window open (exchange local time)
pub fn trading_open() -> NaiveTime {
    NaiveTime::from_hms_opt(9, 30, 0).expect("valid open time")
}

/// Trading window close (exchange local time)
pub fn trading_close() -> NaiveTime {
    NaiveTime::from_hms_opt(15, 15, 0).expect("valid close time")
}

/// Default history file path (matches the long-lived production log name)
pub const DEFAULT_HISTORY_PATH: &str = "All_SSE_ETF_Option_Premium_Log.csv";

/// One monitored underlying ETF: chain-source display name, quote-feed symbol,
/// short code used in the persisted history, and the free-text keywords the
/// chain source's underlying name is matched against.
#[derive(Debug, Clone, Copy)]
pub struct UnderlyingConfig {
    pub name: &'static str,
    pub feed_symbol: &'static str,
    pub display_code: &'static str,
    pub keywords: &'static [&'static str],
}

/// All monitored underlyings. Keyword matching prefers the longest keyword, so
/// more specific entries (科创板50ETF vs 科创50ETF) win over shorter overlaps.
pub const UNDERLYINGS: &[UnderlyingConfig] = &[
    UnderlyingConfig {
        name: "华泰柏瑞沪深300ETF期权",
        feed_symbol: "sh510300",
        display_code: "300ETF",
        keywords: &["沪深300", "300ETF"],
    },
    UnderlyingConfig {
        name: "南方中证500ETF期权",
        feed_symbol: "sh510500",
        display_code: "500ETF",
        keywords: &["中证500", "500ETF"],
    },
    UnderlyingConfig {
        name: "华夏上证50ETF期权",
        feed_symbol: "sh510050",
        display_code: "50ETF",
        keywords: &["上证50", "50ETF"],
    },
    UnderlyingConfig {
        name: "华夏科创50ETF期权",
        feed_symbol: "sh588000",
        display_code: "科创50ETF",
        keywords: &["华夏科创50", "科创50ETF"],
    },
    UnderlyingConfig {
        name: "易方达科创50ETF期权",
        feed_symbol: "sh588080",
        display_code: "科创板50ETF",
        keywords: &["易方达科创50", "科创板50ETF", "易方达"],
    },
];

/// Fallback feed symbol when an underlying name matches no keyword
pub const DEFAULT_FEED_SYMBOL: &str = "sh510300";

/// Short display code for a chain-source underlying name (the name itself when
/// the registry does not know it).
pub fn display_code(underlying_name: &str) -> &str {
    UNDERLYINGS
        .iter()
        .find(|u| u.name == underlying_name)
        .map(|u| u.display_code)
        .unwrap_or(underlying_name)
}

/// History file path (PREMIUM_LOG_PATH to override)
pub fn history_path() -> String {
    std::env::var("PREMIUM_LOG_PATH").unwrap_or_else(|_| DEFAULT_HISTORY_PATH.to_string())
}

/// Auto-refresh enabled at startup (AUTO_REFRESH=0 to disable)
pub fn auto_refresh_default() -> bool {
    static CACHED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *CACHED.get_or_init(|| {
        std::env::var("AUTO_REFRESH")
            .map(|v| v != "0" && v.to_lowercase() != "false")
            .unwrap_or(true)
    })
}

/// Persist a snapshot after every successful refresh (SAVE_ON_REFRESH=1)
pub fn save_on_refresh_enabled() -> bool {
    static CACHED: std::sync::OnceLock<bool> = std::sync::OnceLock::new();
    *CACHED.get_or_init(|| {
        std::env::var("SAVE_ON_REFRESH")
            .map(|v| v == "1" || v.to_lowercase() == "true")
            .unwrap_or(false)
    })
}
