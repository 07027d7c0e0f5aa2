use crate::config::SourceConfig;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// A single candlestick data point (OHLCV).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candle {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// One provider row before validation. Any field may be missing or non-finite.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawBar {
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: Option<f64>,
}

impl RawBar {
    fn to_candle(&self) -> Option<Candle> {
        let finite = |v: Option<f64>| v.filter(|x| x.is_finite());
        Some(Candle {
            date: Utc.timestamp_opt(self.timestamp, 0).single()?,
            open: finite(self.open)?,
            high: finite(self.high)?,
            low: finite(self.low)?,
            close: finite(self.close)?,
            volume: finite(self.volume)?,
        })
    }
}

/// Cleaned, strictly time-ordered quote history for one symbol.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuoteSeries {
    pub symbol: String,
    pub history: Vec<Candle>,
}

impl QuoteSeries {
    /// Keeps only rows whose required fields are all numeric and whose
    /// timestamp is strictly after the previously kept row.
    pub fn from_raw(symbol: &str, raw: &[RawBar]) -> Self {
        let mut history: Vec<Candle> = Vec::with_capacity(raw.len());
        let mut dropped = 0usize;

        for bar in raw {
            match bar.to_candle() {
                Some(candle) if history.last().is_none_or(|prev| candle.date > prev.date) => {
                    history.push(candle)
                }
                _ => dropped += 1,
            }
        }

        if dropped > 0 {
            debug!("Dropped {} invalid or out-of-order rows for {}", dropped, symbol);
        }

        Self {
            symbol: symbol.to_uppercase(),
            history,
        }
    }

    /// Daily bars with the given closes; open/high/low track the close.
    pub fn from_closes(symbol: &str, closes: &[f64]) -> Self {
        let start = Utc.timestamp_opt(1_700_000_000, 0).single().unwrap_or_else(Utc::now);
        let history = closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                date: start + Duration::days(i as i64),
                open: close,
                high: close,
                low: close,
                close,
                volume: 1_000.0,
            })
            .collect();
        Self {
            symbol: symbol.to_uppercase(),
            history,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.history.iter().map(|c| c.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.history.last().map(|c| c.close)
    }

    /// The last `n` bars (all of them if the series is shorter).
    pub fn tail(&self, n: usize) -> &[Candle] {
        let start = self.history.len().saturating_sub(n);
        &self.history[start..]
    }
}

/// Historical quote provider.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Rows for `symbol` covering `period` at bar size `interval`. An empty
    /// vector means the provider knows nothing about the symbol.
    async fn fetch(&self, symbol: &str, period: &str, interval: &str) -> Result<Vec<RawBar>>;

    /// Human-readable company name for `symbol`.
    async fn display_name(&self, symbol: &str) -> Result<String>;
}

// ── Yahoo Finance ──────────────────────────────────────────────────────────

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooChart {
    #[serde(default)]
    result: Option<Vec<YahooResult>>,
    #[serde(default)]
    error: Option<YahooError>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooResult {
    #[serde(default)]
    meta: YahooMeta,
    #[serde(default)]
    timestamp: Option<Vec<i64>>,
    #[serde(default)]
    indicators: YahooIndicators,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooMeta {
    #[serde(rename = "longName", default)]
    long_name: Option<String>,
    #[serde(rename = "shortName", default)]
    short_name: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooIndicators {
    #[serde(default)]
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
struct YahooQuote {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

impl YahooChartResponse {
    /// Data and "Not Found" misses may be cached; other chart errors may not.
    fn is_cacheable(&self) -> bool {
        match &self.chart.error {
            None => true,
            Some(err) => err
                .code
                .as_deref()
                .is_some_and(|code| code.eq_ignore_ascii_case("not found")),
        }
    }

    /// Flattens the nested `indicators.quote[0]` block into rows. Columns
    /// shorter than the timestamp axis produce missing values.
    fn into_raw_bars(self) -> Result<Vec<RawBar>> {
        if let Some(err) = &self.chart.error {
            let code = err.code.as_deref().unwrap_or("");
            if !code.eq_ignore_ascii_case("not found") {
                return Err(anyhow::anyhow!(
                    "Yahoo chart error {}: {}",
                    code,
                    err.description.as_deref().unwrap_or("no description")
                ));
            }
        }

        let Some(result) = self.chart.result.and_then(|r| r.into_iter().next()) else {
            return Ok(Vec::new());
        };
        let timestamps = result.timestamp.unwrap_or_default();
        let Some(quote) = result.indicators.quote.into_iter().next() else {
            return Ok(Vec::new());
        };

        let at = |col: &[Option<f64>], i: usize| col.get(i).copied().flatten();
        Ok(timestamps
            .iter()
            .enumerate()
            .map(|(i, &timestamp)| RawBar {
                timestamp,
                open: at(&quote.open, i),
                high: at(&quote.high, i),
                low: at(&quote.low, i),
                close: at(&quote.close, i),
                volume: at(&quote.volume, i),
            })
            .collect())
    }

    fn display_name(&self) -> Option<String> {
        let meta = &self.chart.result.as_ref()?.first()?.meta;
        meta.long_name
            .clone()
            .or_else(|| meta.short_name.clone())
            .filter(|name| !name.trim().is_empty())
    }
}

/// Yahoo Finance v8 chart API with a small on-disk JSON cache.
pub struct YahooSource {
    client: reqwest::Client,
    config: SourceConfig,
}

impl YahooSource {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn cache_path(&self, symbol: &str, period: &str, interval: &str) -> PathBuf {
        self.config
            .cache_dir
            .join(format!("{}_{}_{}.json", symbol, period, interval))
    }

    async fn fetch_from_api(&self, symbol: &str, period: &str, interval: &str) -> Result<YahooChartResponse> {
        let url = format!(
            "https://query1.finance.yahoo.com/v8/finance/chart/{}?range={}&interval={}",
            symbol, period, interval
        );

        let max_attempts = self.config.fetch_attempts.max(1);
        let mut attempts = 0;

        loop {
            attempts += 1;
            let outcome = match self
                .client
                .get(&url)
                .header("User-Agent", "Mozilla/5.0")
                .send()
                .await
            {
                Ok(resp) => resp.json::<YahooChartResponse>().await.map_err(anyhow::Error::from),
                Err(e) => Err(e.into()),
            };

            match outcome {
                Ok(resp_json) => return Ok(resp_json),
                Err(e) if attempts >= max_attempts => return Err(e),
                Err(e) => {
                    warn!(
                        "Failed to fetch data for {} (attempt {}/{}): {}",
                        symbol, attempts, max_attempts, e
                    );
                }
            }

            tokio::time::sleep(std::time::Duration::from_secs(2)).await;
        }
    }

    fn read_cache(&self, path: &Path) -> Option<YahooChartResponse> {
        if self.config.cache_ttl_secs == 0 {
            return None;
        }
        let age = std::fs::metadata(path)
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| std::time::SystemTime::now().duration_since(modified).ok())?;
        if age.as_secs() >= self.config.cache_ttl_secs {
            info!("Cache expired for {}, fetching...", path.display());
            return None;
        }

        let file = std::fs::File::open(path).ok()?;
        match serde_json::from_reader::<_, YahooChartResponse>(std::io::BufReader::new(file)) {
            Ok(resp) if resp.is_cacheable() => Some(resp),
            Ok(_) => {
                warn!("Ignoring cached error payload {}", path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
                None
            }
        }
    }

    fn write_cache(&self, path: &Path, response: &YahooChartResponse) -> Result<()> {
        std::fs::create_dir_all(&self.config.cache_dir)?;
        let file = std::fs::File::create(path)?;
        let writer = std::io::BufWriter::new(file);
        serde_json::to_writer(writer, response)?;
        Ok(())
    }
}

#[async_trait]
impl MarketDataSource for YahooSource {
    async fn fetch(&self, symbol: &str, period: &str, interval: &str) -> Result<Vec<RawBar>> {
        let cache_file = self.cache_path(symbol, period, interval);

        let response = match self.read_cache(&cache_file) {
            Some(cached) => {
                info!("Loading {} ({} @ {}) from cache...", symbol, period, interval);
                cached
            }
            None => {
                info!("Fetching {} ({} @ {}) from Yahoo Finance...", symbol, period, interval);
                let fresh = self.fetch_from_api(symbol, period, interval).await?;
                if self.config.cache_ttl_secs > 0 && fresh.is_cacheable() {
                    if let Err(e) = self.write_cache(&cache_file, &fresh) {
                        warn!("Failed to write cache {}: {}", cache_file.display(), e);
                    }
                }
                fresh
            }
        };

        response.into_raw_bars()
    }

    async fn display_name(&self, symbol: &str) -> Result<String> {
        let response = self.fetch_from_api(symbol, "1d", "1d").await?;
        response
            .display_name()
            .ok_or_else(|| anyhow::anyhow!("No display name published for {}", symbol))
    }
}

// ── Synthetic ──────────────────────────────────────────────────────────────

/// Seeded random-walk bars for offline runs.
pub struct SyntheticSource {
    bars: usize,
    seed: u64,
}

impl SyntheticSource {
    pub fn new(bars: usize, seed: u64) -> Self {
        Self { bars, seed }
    }
}

/// Bar length for a provider interval string such as `5m`, `60m`, `1d`,
/// `1wk` or `1mo`. Unrecognised intervals are treated as daily.
fn interval_step(interval: &str) -> Duration {
    let trimmed = interval.trim().to_ascii_lowercase();
    let parse_num = |s: &str| s.parse::<i64>().ok().filter(|v| *v > 0);

    if let Some(v) = trimmed.strip_suffix("mo").and_then(parse_num) {
        return Duration::days(30 * v);
    }
    if let Some(v) = trimmed.strip_suffix("wk").and_then(parse_num) {
        return Duration::weeks(v);
    }
    if let Some(v) = trimmed.strip_suffix('m').and_then(parse_num) {
        return Duration::minutes(v);
    }
    if let Some(v) = trimmed.strip_suffix('h').and_then(parse_num) {
        return Duration::hours(v);
    }
    if let Some(v) = trimmed.strip_suffix('d').and_then(parse_num) {
        return Duration::days(v);
    }
    Duration::days(1)
}

#[async_trait]
impl MarketDataSource for SyntheticSource {
    async fn fetch(&self, symbol: &str, _period: &str, interval: &str) -> Result<Vec<RawBar>> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let step = interval_step(interval);
        let mut current_date = i32::try_from(self.bars)
            .ok()
            .and_then(|n| step.checked_mul(n))
            .and_then(|span| Utc::now().checked_sub_signed(span))
            .ok_or_else(|| {
                anyhow::anyhow!("{} bars of {} do not fit in the calendar", self.bars, interval)
            })?;
        let mut current_price: f64 = 100.0;
        let mut bars = Vec::with_capacity(self.bars);

        for _ in 0..self.bars {
            let volatility = 0.02;
            let change_pct: f64 = rng.gen_range(-volatility..volatility);
            let open = current_price;
            let close = open * (1.0 + change_pct);
            let high = open.max(close) * (1.0 + rng.gen_range(0.0..0.01));
            let low = open.min(close) * (1.0 - rng.gen_range(0.0..0.01));
            let volume = rng.gen_range(1000.0..10000.0);

            bars.push(RawBar {
                timestamp: current_date.timestamp(),
                open: Some(open),
                high: Some(high),
                low: Some(low),
                close: Some(close),
                volume: Some(volume),
            });

            current_price = close;
            current_date += step;
        }

        debug!("Generated {} synthetic bars for {}", bars.len(), symbol);
        Ok(bars)
    }

    async fn display_name(&self, symbol: &str) -> Result<String> {
        Ok(format!("{} (synthetic)", symbol.to_uppercase()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(ts: i64, close: Option<f64>) -> RawBar {
        RawBar {
            timestamp: ts,
            open: Some(1.0),
            high: Some(1.0),
            low: Some(1.0),
            close,
            volume: Some(10.0),
        }
    }

    #[test]
    fn test_from_raw_drops_missing_and_non_finite_rows() {
        let raw = vec![
            bar(1, Some(1.0)),
            bar(2, None),
            bar(3, Some(f64::NAN)),
            bar(4, Some(f64::INFINITY)),
            bar(5, Some(2.0)),
        ];
        let series = QuoteSeries::from_raw("abc", &raw);
        assert_eq!(series.symbol, "ABC");
        assert_eq!(series.closes(), vec![1.0, 2.0]);
    }

    #[test]
    fn test_from_raw_enforces_strictly_increasing_timestamps() {
        let raw = vec![
            bar(10, Some(1.0)),
            bar(10, Some(9.0)),
            bar(5, Some(9.0)),
            bar(11, Some(2.0)),
        ];
        let series = QuoteSeries::from_raw("X", &raw);
        assert_eq!(series.closes(), vec![1.0, 2.0]);
        assert!(series.history.windows(2).all(|w| w[0].date < w[1].date));
    }

    #[test]
    fn test_tail_is_clamped_to_series_length() {
        let series = QuoteSeries::from_closes("T", &[1.0, 2.0, 3.0]);
        assert_eq!(series.tail(2).len(), 2);
        assert_eq!(series.tail(2)[1].close, 3.0);
        assert_eq!(series.tail(80).len(), 3);
        assert_eq!(series.last_close(), Some(3.0));
    }

    #[test]
    fn test_yahoo_payload_is_flattened_into_rows() {
        let payload = r#"{
            "chart": {
                "result": [{
                    "meta": {"longName": "Apple Inc.", "shortName": "Apple"},
                    "timestamp": [100, 200, 300],
                    "indicators": {
                        "quote": [{
                            "open": [1.0, 2.0, 3.0],
                            "high": [1.5, 2.5, 3.5],
                            "low": [0.5, 1.5, 2.5],
                            "close": [1.2, null, 3.2],
                            "volume": [10, 20]
                        }]
                    }
                }],
                "error": null
            }
        }"#;
        let response: YahooChartResponse = serde_json::from_str(payload).unwrap();
        assert_eq!(response.display_name().as_deref(), Some("Apple Inc."));

        let rows = response.into_raw_bars().unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].close, Some(1.2));
        assert_eq!(rows[1].close, None);
        assert_eq!(rows[2].volume, None);

        let series = QuoteSeries::from_raw("AAPL", &rows);
        assert_eq!(series.len(), 1);
    }

    #[test]
    fn test_yahoo_not_found_is_empty_not_an_error() {
        let payload = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found, symbol may be delisted"}}}"#;
        let response: YahooChartResponse = serde_json::from_str(payload).unwrap();
        assert!(response.display_name().is_none());
        assert!(response.into_raw_bars().unwrap().is_empty());
    }

    #[test]
    fn test_yahoo_other_errors_are_reported() {
        let payload = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"Invalid input - interval=7m is not supported"}}}"#;
        let response: YahooChartResponse = serde_json::from_str(payload).unwrap();
        assert!(response.into_raw_bars().is_err());
    }

    #[test]
    fn test_interval_step_parsing() {
        assert_eq!(interval_step("5m"), Duration::minutes(5));
        assert_eq!(interval_step("60m"), Duration::minutes(60));
        assert_eq!(interval_step("1wk"), Duration::weeks(1));
        assert_eq!(interval_step("1mo"), Duration::days(30));
        assert_eq!(interval_step("1d"), Duration::days(1));
        assert_eq!(interval_step("weird"), Duration::days(1));
    }

    #[tokio::test]
    async fn test_synthetic_source_is_reproducible() {
        let source = SyntheticSource::new(50, 7);
        let a = source.fetch("spy", "3mo", "1d").await.unwrap();
        let b = source.fetch("spy", "3mo", "1d").await.unwrap();
        assert_eq!(a.len(), 50);
        let closes_a: Vec<_> = a.iter().map(|r| r.close).collect();
        let closes_b: Vec<_> = b.iter().map(|r| r.close).collect();
        assert_eq!(closes_a, closes_b);
        assert_eq!(QuoteSeries::from_raw("spy", &a).len(), 50);
    }

    #[tokio::test]
    async fn test_synthetic_source_rejects_spans_past_the_calendar() {
        let source = SyntheticSource::new(100_000_000, 1);
        assert!(source.fetch("spy", "max", "1mo").await.is_err());

        let source = SyntheticSource::new(usize::MAX, 1);
        assert!(source.fetch("spy", "max", "1d").await.is_err());
    }

    #[tokio::test]
    async fn test_yahoo_cache_roundtrip_and_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let source = YahooSource::new(SourceConfig {
            cache_dir: dir.path().to_path_buf(),
            cache_ttl_secs: 3600,
            fetch_attempts: 1,
        });
        let path = source.cache_path("AAPL", "3mo", "1d");
        let response = YahooChartResponse {
            chart: YahooChart {
                result: Some(vec![YahooResult {
                    timestamp: Some(vec![1, 2]),
                    indicators: YahooIndicators {
                        quote: vec![YahooQuote {
                            open: vec![Some(1.0), Some(2.0)],
                            high: vec![Some(1.0), Some(2.0)],
                            low: vec![Some(1.0), Some(2.0)],
                            close: vec![Some(1.0), Some(2.0)],
                            volume: vec![Some(1.0), Some(2.0)],
                        }],
                    },
                    ..Default::default()
                }]),
                error: None,
            },
        };
        source.write_cache(&path, &response).unwrap();

        let cached = source.read_cache(&path).expect("fresh cache should be used");
        assert_eq!(cached.into_raw_bars().unwrap().len(), 2);

        let disabled = YahooSource::new(SourceConfig {
            cache_dir: dir.path().to_path_buf(),
            cache_ttl_secs: 0,
            fetch_attempts: 1,
        });
        assert!(disabled.read_cache(&path).is_none());
    }

    #[test]
    fn test_cached_chart_error_is_not_served() {
        let dir = tempfile::tempdir().unwrap();
        let source = YahooSource::new(SourceConfig {
            cache_dir: dir.path().to_path_buf(),
            cache_ttl_secs: 3600,
            fetch_attempts: 1,
        });
        let payload = r#"{"chart":{"result":null,"error":{"code":"Internal Server Error","description":"try later"}}}"#;
        let response: YahooChartResponse = serde_json::from_str(payload).unwrap();
        assert!(!response.is_cacheable());

        let path = source.cache_path("AAPL", "3mo", "1d");
        source.write_cache(&path, &response).unwrap();
        assert!(source.read_cache(&path).is_none());
        assert!(source.read_cache(&path).is_none());
    }

    #[test]
    fn test_cached_not_found_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let source = YahooSource::new(SourceConfig {
            cache_dir: dir.path().to_path_buf(),
            cache_ttl_secs: 3600,
            fetch_attempts: 1,
        });
        let payload = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let response: YahooChartResponse = serde_json::from_str(payload).unwrap();
        assert!(response.is_cacheable());

        let path = source.cache_path("GONE", "3mo", "1d");
        source.write_cache(&path, &response).unwrap();
        let cached = source.read_cache(&path).expect("misses are cached");
        assert!(cached.into_raw_bars().unwrap().is_empty());
    }
}
