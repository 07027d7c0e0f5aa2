use crate::forecast::WindowRegressor;
use anyhow::Result;
use serde::Serialize;

/// Hold-out error of one training run, in price units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct AccuracyMetrics {
    /// `max(0, 100 - mape)`, always within `[0, 100]`.
    pub accuracy: f64,
    pub rmse: f64,
    /// Mean absolute percentage error, in percent.
    pub mape: f64,
}

pub fn rmse(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let mse = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).powi(2))
        .sum::<f64>()
        / n as f64;
    mse.sqrt()
}

/// MAPE in percent. The denominator is floored at machine epsilon so a zero
/// actual value yields a huge error instead of a division by zero.
pub fn mape(actual: &[f64], predicted: &[f64]) -> f64 {
    let n = actual.len().min(predicted.len());
    if n == 0 {
        return 0.0;
    }
    let total = actual
        .iter()
        .zip(predicted)
        .map(|(a, p)| (a - p).abs() / a.abs().max(f64::EPSILON))
        .sum::<f64>();
    100.0 * total / n as f64
}

/// Scores unscaled predictions against unscaled truth.
pub fn score(actual: &[f64], predicted: &[f64]) -> AccuracyMetrics {
    let rmse = rmse(actual, predicted);
    let mape = mape(actual, predicted);
    let accuracy = if mape.is_finite() {
        (100.0 - mape).clamp(0.0, 100.0)
    } else {
        0.0
    };
    AccuracyMetrics { accuracy, rmse, mape }
}

/// Runs the model over the test windows and scores it in price units.
///
/// An empty test set is not an error: it scores all zeros.
pub fn evaluate<M: WindowRegressor + ?Sized>(
    model: &M,
    x_test: &[Vec<f64>],
    y_test: &[f64],
) -> Result<AccuracyMetrics> {
    if x_test.is_empty() {
        return Ok(AccuracyMetrics::default());
    }
    if x_test.len() != y_test.len() {
        return Err(anyhow::anyhow!(
            "Test windows ({}) and targets ({}) differ in length",
            x_test.len(),
            y_test.len()
        ));
    }

    let predictions = model.predict_scaled(x_test)?;
    let scaler = model.scaler();
    let actual = scaler.inverse_transform_all(y_test);
    let predicted = scaler.inverse_transform_all(&predictions);
    Ok(score(&actual, &predicted))
}
