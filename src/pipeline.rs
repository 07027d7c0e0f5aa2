use crate::config::{ForecastConfig, MIN_DATA_POINTS};
use crate::data::{MarketDataSource, QuoteSeries};
use crate::forecast::{ForecastOutcome, LstmForecaster};
use crate::metrics::AccuracyMetrics;
use crate::ranges::RangeProfile;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

/// Failure taxonomy of a prediction request. Every variant is terminal for
/// the request it belongs to.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("No data for {symbol}")]
    NoData { symbol: String },

    #[error("Insufficient data for {symbol} (need at least {min_required} points); try a longer range")]
    InsufficientData { symbol: String, min_required: usize },

    #[error("Prediction failed: {0}")]
    Prediction(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum PipelineStage {
    Idle,
    Loading,
    Validating,
    Training,
    Scoring,
    Predicting,
    Completed,
    Failed,
}

/// Coarse progress reported to the caller while a request runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum Milestone {
    Loading,
    Calculating,
    Done,
}

impl Milestone {
    pub fn label(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Calculating => "calculating",
            Self::Done => "done",
        }
    }
}

/// Trains on a cleaned series and forecasts the next close.
///
/// Runs on a blocking thread; `on_stage` is told when training, scoring and
/// prediction start.
pub trait SeriesForecaster: Send + Sync {
    fn forecast(
        &self,
        series: &QuoteSeries,
        on_stage: &mut dyn FnMut(PipelineStage),
    ) -> anyhow::Result<ForecastOutcome>;
}

/// Payload of one successful request.
#[derive(Clone, Debug, Serialize)]
pub struct PredictionResult {
    pub symbol: String,
    pub company_name: String,
    pub range: RangeProfile,
    pub current_price: f64,
    pub predicted_price: f64,
    pub metrics: AccuracyMetrics,
    pub seq_len: usize,
    pub series: QuoteSeries,
}

impl PredictionResult {
    /// Predicted move relative to the current price, in percent.
    pub fn change_pct(&self) -> f64 {
        if self.current_price == 0.0 {
            return 0.0;
        }
        (self.predicted_price - self.current_price) / self.current_price * 100.0
    }
}

/// Fetch → validate → train → score → predict for one symbol.
pub struct PredictionPipeline {
    source: Arc<dyn MarketDataSource>,
    forecaster: Arc<dyn SeriesForecaster>,
}

fn enter(symbol: &str, stage: PipelineStage) {
    info!("[{}] stage -> {:?}", symbol, stage);
}

fn fail(symbol: &str, stage: PipelineStage, err: anyhow::Error) -> PipelineError {
    error!("[{}] prediction failed during {:?}: {:?}", symbol, stage, err);
    enter(symbol, PipelineStage::Failed);
    PipelineError::Prediction(format!("{:#}", err))
}

impl PredictionPipeline {
    pub fn new(source: Arc<dyn MarketDataSource>, forecaster: Arc<dyn SeriesForecaster>) -> Self {
        Self { source, forecaster }
    }

    pub fn with_lstm(source: Arc<dyn MarketDataSource>, config: ForecastConfig) -> Self {
        Self::new(source, Arc::new(LstmForecaster::new(config)))
    }

    pub async fn run(&self, symbol: &str, range_key: &str) -> Result<PredictionResult, PipelineError> {
        self.run_with_progress(symbol, range_key, |_| {}).await
    }

    pub async fn run_with_progress<F>(
        &self,
        symbol: &str,
        range_key: &str,
        mut on_milestone: F,
    ) -> Result<PredictionResult, PipelineError>
    where
        F: FnMut(Milestone) + Send,
    {
        let symbol = symbol.trim().to_uppercase();
        if symbol.is_empty() {
            return Err(PipelineError::Prediction("No symbol given".to_string()));
        }
        let profile = RangeProfile::resolve(range_key);
        info!(
            "[{}] prediction requested: range={} (period={}, interval={})",
            symbol, profile.key, profile.period, profile.interval
        );

        enter(&symbol, PipelineStage::Loading);
        on_milestone(Milestone::Loading);
        let raw = self
            .source
            .fetch(&symbol, profile.period, profile.interval)
            .await
            .map_err(|e| fail(&symbol, PipelineStage::Loading, e))?;
        if raw.is_empty() {
            warn!("[{}] source returned no rows", symbol);
            enter(&symbol, PipelineStage::Failed);
            return Err(PipelineError::NoData { symbol });
        }

        enter(&symbol, PipelineStage::Validating);
        let series = QuoteSeries::from_raw(&symbol, &raw);
        if series.len() < MIN_DATA_POINTS {
            warn!(
                "[{}] only {} of {} rows are valid (need {})",
                symbol,
                series.len(),
                raw.len(),
                MIN_DATA_POINTS
            );
            enter(&symbol, PipelineStage::Failed);
            return Err(PipelineError::InsufficientData {
                symbol,
                min_required: MIN_DATA_POINTS,
            });
        }

        let company_name = self.company_name(&symbol).await;

        on_milestone(Milestone::Calculating);
        let forecaster = Arc::clone(&self.forecaster);
        let task_symbol = symbol.clone();
        let (series, stage, outcome) = tokio::task::spawn_blocking(move || {
            let mut stage = PipelineStage::Validating;
            let outcome = forecaster.forecast(&series, &mut |next| {
                enter(&task_symbol, next);
                stage = next;
            });
            (series, stage, outcome)
        })
        .await
        .map_err(|e| {
            fail(
                &symbol,
                PipelineStage::Training,
                anyhow::anyhow!("forecast task aborted: {}", e),
            )
        })?;
        let outcome = outcome.map_err(|e| fail(&symbol, stage, e))?;

        let current_price = series.last_close().ok_or_else(|| {
            fail(&symbol, PipelineStage::Predicting, anyhow::anyhow!("series has no closes"))
        })?;

        enter(&symbol, PipelineStage::Completed);
        on_milestone(Milestone::Done);
        info!(
            "[{}] current={:.4} predicted={:.4} accuracy={:.2}% rmse={:.4} mape={:.2}%",
            symbol,
            current_price,
            outcome.predicted_price,
            outcome.metrics.accuracy,
            outcome.metrics.rmse,
            outcome.metrics.mape
        );

        Ok(PredictionResult {
            symbol,
            company_name,
            range: profile,
            current_price,
            predicted_price: outcome.predicted_price,
            metrics: outcome.metrics,
            seq_len: outcome.seq_len,
            series,
        })
    }

    /// Display name for `symbol`; falls back to the ticker on any failure.
    async fn company_name(&self, symbol: &str) -> String {
        match self.source.display_name(symbol).await {
            Ok(name) if !name.trim().is_empty() => name,
            Ok(_) => symbol.to_string(),
            Err(e) => {
                warn!("[{}] display name unavailable: {}", symbol, e);
                symbol.to_string()
            }
        }
    }
}
