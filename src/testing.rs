//! Fakes shared by the unit tests.

use crate::config::ForecastConfig;
use crate::data::{MarketDataSource, QuoteSeries, RawBar};
use crate::forecast::ForecastOutcome;
use crate::metrics::AccuracyMetrics;
use crate::pipeline::{PipelineStage, SeriesForecaster};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub fn small_config(seed: u64) -> ForecastConfig {
    ForecastConfig {
        units: 8,
        epochs: 3,
        batch_size: 32,
        seed: Some(seed),
        ..Default::default()
    }
}

/// `n` daily rows with closes `start, start + step, ...`.
pub fn ramp_rows(n: usize, start: f64, step: f64) -> Vec<RawBar> {
    (0..n)
        .map(|i| {
            let close = start + i as f64 * step;
            RawBar {
                timestamp: 1_700_000_000 + i as i64 * 86_400,
                open: Some(close),
                high: Some(close),
                low: Some(close),
                close: Some(close),
                volume: Some(1_000.0),
            }
        })
        .collect()
}

/// Returns canned rows and records every call.
#[derive(Default)]
pub struct ScriptedSource {
    pub rows: Vec<RawBar>,
    pub fail_fetch: bool,
    pub fail_name: bool,
    pub panic_on_fetch: bool,
    pub delay: Option<Duration>,
    pub fetch_calls: AtomicUsize,
    pub name_calls: AtomicUsize,
    pub requests: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedSource {
    pub fn with_rows(rows: Vec<RawBar>) -> Self {
        Self {
            rows,
            ..Default::default()
        }
    }
}

#[async_trait]
impl MarketDataSource for ScriptedSource {
    async fn fetch(&self, symbol: &str, period: &str, interval: &str) -> Result<Vec<RawBar>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((symbol.to_string(), period.to_string(), interval.to_string()));
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.panic_on_fetch {
            panic!("source exploded");
        }
        if self.fail_fetch {
            return Err(anyhow::anyhow!("connection reset by peer"));
        }
        Ok(self.rows.clone())
    }

    async fn display_name(&self, symbol: &str) -> Result<String> {
        self.name_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_name {
            return Err(anyhow::anyhow!("quote lookup for {} timed out", symbol));
        }
        Ok("Test Corp".to_string())
    }
}

/// Skips training and returns a fixed prediction (or a fixed error).
pub struct FixedForecaster {
    predicted: f64,
    error: Option<String>,
    pub calls: AtomicUsize,
}

impl FixedForecaster {
    pub fn new(predicted: f64) -> Self {
        Self {
            predicted,
            error: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            predicted: 0.0,
            error: Some(message.to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl SeriesForecaster for FixedForecaster {
    fn forecast(
        &self,
        series: &QuoteSeries,
        on_stage: &mut dyn FnMut(PipelineStage),
    ) -> Result<ForecastOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        on_stage(PipelineStage::Training);
        if let Some(message) = &self.error {
            return Err(anyhow::anyhow!("{}", message));
        }
        on_stage(PipelineStage::Scoring);
        on_stage(PipelineStage::Predicting);
        Ok(ForecastOutcome {
            predicted_price: self.predicted,
            metrics: AccuracyMetrics::default(),
            seq_len: series.len() / 3,
            train_windows: 0,
            test_windows: 0,
        })
    }
}
