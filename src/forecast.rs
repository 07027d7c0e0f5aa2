use crate::config::{get_device, ForecastConfig};
use crate::data::QuoteSeries;
use crate::dataset::{prepare, MinMaxScaler};
use crate::metrics::{evaluate, AccuracyMetrics};
use crate::models::lstm::LstmRegressor;
use crate::pipeline::{PipelineStage, SeriesForecaster};
use anyhow::Result;
use candle_core::{DType, Device, Tensor};
use candle_nn::{Optimizer, VarBuilder, VarMap};
use rand::prelude::*;
use rand::rngs::StdRng;
use std::time::Instant;
use tracing::{debug, info, warn};

/// A model that maps scaled windows to the next scaled value.
pub trait WindowRegressor {
    fn predict_scaled(&self, windows: &[Vec<f64>]) -> Result<Vec<f64>>;

    /// Scaler fit when the windows were prepared.
    fn scaler(&self) -> &MinMaxScaler;
}

/// One-step-ahead LSTM forecaster for a single scaled column.
///
/// Owns its weights and the scaler of the run it was built for; nothing is
/// shared between instances.
pub struct ForecastModel {
    config: ForecastConfig,
    device: Device,
    varmap: VarMap,
    net: LstmRegressor,
    seq_len: usize,
    scaler: MinMaxScaler,
    rng: StdRng,
}

impl ForecastModel {
    pub fn build(seq_len: usize, scaler: MinMaxScaler, config: &ForecastConfig) -> Result<Self> {
        if seq_len == 0 {
            return Err(anyhow::anyhow!("Window length must be at least 1"));
        }

        let device = get_device(config.use_cuda);
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let net = LstmRegressor::new(1, config.units, vb.pp("model"))?;

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        if config.seed.is_some() {
            reseed_variables(&varmap, config.units, &mut rng, &device)?;
        }

        Ok(Self {
            config: config.clone(),
            device,
            varmap,
            net,
            seq_len,
            scaler,
            rng,
        })
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// `[rows, seq_len, 1]` input tensor from a set of windows.
    fn input_tensor<'a>(&self, windows: impl IntoIterator<Item = &'a [f64]>) -> Result<Tensor> {
        let mut flat: Vec<f32> = Vec::new();
        let mut rows = 0usize;
        for window in windows {
            if window.len() != self.seq_len {
                return Err(anyhow::anyhow!(
                    "Window has {} values, model expects {}",
                    window.len(),
                    self.seq_len
                ));
            }
            flat.extend(window.iter().map(|&v| v as f32));
            rows += 1;
        }
        Ok(Tensor::from_vec(flat, (rows, self.seq_len, 1), &self.device)?)
    }

    /// Fits the network for the configured number of epochs. Returns the
    /// mean loss of the last epoch.
    pub fn train(&mut self, x_train: &[Vec<f64>], y_train: &[f64]) -> Result<f64> {
        if x_train.len() != y_train.len() {
            return Err(anyhow::anyhow!(
                "Training windows ({}) and targets ({}) differ in length",
                x_train.len(),
                y_train.len()
            ));
        }
        if x_train.is_empty() {
            warn!("No training windows; the model keeps its initial weights");
            return Ok(0.0);
        }

        let params = candle_nn::ParamsAdamW {
            lr: self.config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        };
        let mut opt = candle_nn::AdamW::new(self.varmap.all_vars(), params)?;
        let batch_size = self.config.batch_size.max(1);
        let mut indices: Vec<usize> = (0..x_train.len()).collect();
        let started = Instant::now();
        let mut last_loss = 0.0;

        for epoch in 0..self.config.epochs {
            indices.shuffle(&mut self.rng);
            let mut total_loss = 0.0;
            let mut batches = 0usize;

            for batch in indices.chunks(batch_size) {
                let x = self.input_tensor(batch.iter().map(|&i| x_train[i].as_slice()))?;
                let targets: Vec<f32> = batch.iter().map(|&i| y_train[i] as f32).collect();
                let y = Tensor::from_vec(targets, (batch.len(), 1), &self.device)?;

                let pred = self.net.forward(&x)?;
                let loss = (pred - y)?.sqr()?.mean_all()?;
                opt.backward_step(&loss)?;
                total_loss += loss.to_scalar::<f32>()? as f64;
                batches += 1;
            }

            last_loss = total_loss / batches.max(1) as f64;
            debug!("Epoch {}/{}: loss={:.6}", epoch + 1, self.config.epochs, last_loss);
        }

        info!(
            "Trained on {} windows for {} epochs in {:.2}s (final loss {:.6})",
            x_train.len(),
            self.config.epochs,
            started.elapsed().as_secs_f64(),
            last_loss
        );
        Ok(last_loss)
    }

    /// Predicts the value following `scaled` in price units, using the last
    /// `seq_len` points of the full scaled series.
    pub fn predict_next(&self, scaled: &[f64], seq_len: usize) -> Result<f64> {
        if seq_len != self.seq_len {
            return Err(anyhow::anyhow!(
                "Model was built for windows of {}, asked for {}",
                self.seq_len,
                seq_len
            ));
        }
        if scaled.len() < seq_len {
            return Err(anyhow::anyhow!(
                "Need at least {} scaled points to predict, got {}",
                seq_len,
                scaled.len()
            ));
        }

        let last_window = &scaled[scaled.len() - seq_len..];
        let x = self.input_tensor([last_window])?;
        let out = self.net.forward(&x)?.flatten_all()?.to_vec1::<f32>()?;
        let next_scaled = out
            .first()
            .copied()
            .ok_or_else(|| anyhow::anyhow!("Model produced no output"))?;
        Ok(self.scaler.inverse_transform(next_scaled as f64))
    }
}

impl WindowRegressor for ForecastModel {
    fn predict_scaled(&self, windows: &[Vec<f64>]) -> Result<Vec<f64>> {
        if windows.is_empty() {
            return Ok(Vec::new());
        }
        let x = self.input_tensor(windows.iter().map(|w| w.as_slice()))?;
        let out = self.net.forward(&x)?.flatten_all()?.to_vec1::<f32>()?;
        Ok(out.into_iter().map(|v| v as f64).collect())
    }

    fn scaler(&self) -> &MinMaxScaler {
        &self.scaler
    }
}

/// Overwrites every variable from a seeded RNG so training is reproducible.
/// Weights are uniform in `±1/sqrt(units)`, biases start at zero.
fn reseed_variables(varmap: &VarMap, units: usize, rng: &mut StdRng, device: &Device) -> Result<()> {
    let data = varmap
        .data()
        .lock()
        .map_err(|_| anyhow::anyhow!("Variable map lock poisoned"))?;

    let mut names: Vec<&String> = data.keys().collect();
    names.sort();

    let bound = 1.0 / (units.max(1) as f32).sqrt();
    for name in names {
        let var = &data[name];
        let dims = var.dims().to_vec();
        let numel: usize = dims.iter().product();
        let values: Vec<f32> = if name.contains("bias") {
            vec![0.0; numel]
        } else {
            (0..numel).map(|_| rng.gen_range(-bound..bound)).collect()
        };
        let init = Tensor::from_vec(values, dims.as_slice(), device)?;
        var.set(&init)?;
    }
    Ok(())
}

/// Result of one prepare → train → score → predict run.
#[derive(Clone, Debug)]
pub struct ForecastOutcome {
    pub predicted_price: f64,
    pub metrics: AccuracyMetrics,
    pub seq_len: usize,
    pub train_windows: usize,
    pub test_windows: usize,
}

/// Default forecaster: a freshly built [`ForecastModel`] per call.
pub struct LstmForecaster {
    config: ForecastConfig,
}

impl LstmForecaster {
    pub fn new(config: ForecastConfig) -> Self {
        Self { config }
    }
}

impl SeriesForecaster for LstmForecaster {
    fn forecast(
        &self,
        series: &QuoteSeries,
        on_stage: &mut dyn FnMut(PipelineStage),
    ) -> Result<ForecastOutcome> {
        let cfg = &self.config;
        let prepared = prepare(series, cfg.min_seq_len, cfg.train_split)?;
        let windows = &prepared.windows;
        info!(
            "Prepared {} windows of {} for {} ({} train / {} test)",
            windows.len(),
            prepared.seq_len,
            series.symbol,
            windows.x_train.len(),
            windows.x_test.len()
        );

        on_stage(PipelineStage::Training);
        let mut model = ForecastModel::build(prepared.seq_len, prepared.scaler, cfg)?;
        model.train(&windows.x_train, &windows.y_train)?;

        on_stage(PipelineStage::Scoring);
        let metrics = evaluate(&model, &windows.x_test, &windows.y_test)?;

        on_stage(PipelineStage::Predicting);
        let predicted_price = model.predict_next(&prepared.scaled, prepared.seq_len)?;
        if !predicted_price.is_finite() {
            return Err(anyhow::anyhow!("Model produced a non-finite prediction"));
        }

        Ok(ForecastOutcome {
            predicted_price,
            metrics,
            seq_len: prepared.seq_len,
            train_windows: windows.x_train.len(),
            test_windows: windows.x_test.len(),
        })
    }
}
