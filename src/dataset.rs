use crate::data::QuoteSeries;
use anyhow::Result;

/// Min-max scaler mapping a column into `[0, 1]`.
///
/// A constant column has no range; it is scaled with a unit range so every
/// value maps to `0` and inverts back to the constant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MinMaxScaler {
    min: f64,
    max: f64,
}

impl MinMaxScaler {
    pub fn fit(values: &[f64]) -> Result<Self> {
        if values.is_empty() {
            return Err(anyhow::anyhow!("Cannot fit a scaler on an empty column"));
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if !min.is_finite() || !max.is_finite() {
            return Err(anyhow::anyhow!("Cannot fit a scaler on non-finite values"));
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    fn range(&self) -> f64 {
        let range = self.max - self.min;
        if range == 0.0 { 1.0 } else { range }
    }

    pub fn transform(&self, value: f64) -> f64 {
        (value - self.min) / self.range()
    }

    pub fn inverse_transform(&self, scaled: f64) -> f64 {
        scaled * self.range() + self.min
    }

    pub fn transform_all(&self, values: &[f64]) -> Vec<f64> {
        values.iter().map(|&v| self.transform(v)).collect()
    }

    pub fn inverse_transform_all(&self, scaled: &[f64]) -> Vec<f64> {
        scaled.iter().map(|&v| self.inverse_transform(v)).collect()
    }
}

/// Sliding windows over the scaled close, split chronologically.
#[derive(Clone, Debug, Default)]
pub struct WindowSet {
    pub x_train: Vec<Vec<f64>>,
    pub y_train: Vec<f64>,
    pub x_test: Vec<Vec<f64>>,
    pub y_test: Vec<f64>,
}

impl WindowSet {
    pub fn len(&self) -> usize {
        self.x_train.len() + self.x_test.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Output of [`prepare`]: everything one training run needs.
#[derive(Clone, Debug)]
pub struct PreparedData {
    pub windows: WindowSet,
    pub seq_len: usize,
    /// The whole close column in scaled units, train and test alike.
    pub scaled: Vec<f64>,
    pub scaler: MinMaxScaler,
}

/// Window length for a series of `n` bars: `min(min_seq_len, n / 3)`.
pub fn effective_seq_len(n: usize, min_seq_len: usize) -> usize {
    min_seq_len.min(n / 3)
}

/// Scales the close column, cuts it into windows and splits them.
///
/// The scaler is fit on the full series before the split, so the test
/// windows share its range with training.
pub fn prepare(series: &QuoteSeries, min_seq_len: usize, train_split: f64) -> Result<PreparedData> {
    let closes = series.closes();
    let seq_len = effective_seq_len(closes.len(), min_seq_len);
    if seq_len == 0 {
        return Err(anyhow::anyhow!(
            "Series of {} bars is too short to build windows",
            closes.len()
        ));
    }

    let scaler = MinMaxScaler::fit(&closes)?;
    let scaled = scaler.transform_all(&closes);

    let n_windows = scaled.len() - seq_len;
    let mut x = Vec::with_capacity(n_windows);
    let mut y = Vec::with_capacity(n_windows);
    for i in 0..n_windows {
        x.push(scaled[i..i + seq_len].to_vec());
        y.push(scaled[i + seq_len]);
    }

    let train_size = ((n_windows as f64) * train_split.clamp(0.0, 1.0)).floor() as usize;
    let x_test = x.split_off(train_size);
    let y_test = y.split_off(train_size);

    Ok(PreparedData {
        windows: WindowSet {
            x_train: x,
            y_train: y,
            x_test,
            y_test,
        },
        seq_len,
        scaled,
        scaler,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(n: usize) -> QuoteSeries {
        let closes: Vec<f64> = (0..n).map(|i| 1.0 + i as f64 * 0.01).collect();
        QuoteSeries::from_closes("RAMP", &closes)
    }

    #[test]
    fn test_seq_len_policy() {
        for n in [30usize, 31, 45, 89, 90, 91, 100, 500] {
            let prepared = prepare(&ramp(n), 30, 0.8).unwrap();
            assert_eq!(prepared.seq_len, 30.min(n / 3));
            assert!(prepared.seq_len >= 1);
        }
        assert_eq!(effective_seq_len(100, 30), 30);
        assert_eq!(effective_seq_len(60, 30), 20);
        assert_eq!(effective_seq_len(2, 30), 0);
    }

    #[test]
    fn test_window_and_split_counts() {
        for (n, split) in [(30usize, 0.8), (100, 0.8), (100, 0.5), (73, 0.33), (250, 0.9)] {
            let prepared = prepare(&ramp(n), 30, split).unwrap();
            let w = &prepared.windows;
            assert_eq!(w.len(), n - prepared.seq_len);
            assert_eq!(w.x_train.len(), w.y_train.len());
            assert_eq!(w.x_test.len(), w.y_test.len());
            assert_eq!(w.x_train.len(), ((w.len() as f64) * split).floor() as usize);
            assert_eq!(w.x_train.len() + w.x_test.len(), w.len());
            assert_eq!(prepared.scaled.len(), n);
        }
    }

    #[test]
    fn test_windows_are_contiguous_and_chronological() {
        let prepared = prepare(&ramp(60), 30, 0.8).unwrap();
        let w = &prepared.windows;
        let seq_len = prepared.seq_len;

        assert!(w.x_train.iter().all(|x| x.len() == seq_len));
        assert_eq!(w.x_train[0], prepared.scaled[0..seq_len].to_vec());
        assert_eq!(w.y_train[0], prepared.scaled[seq_len]);

        let first_test_idx = w.x_train.len();
        assert_eq!(
            w.x_test[0],
            prepared.scaled[first_test_idx..first_test_idx + seq_len].to_vec()
        );
        assert_eq!(*w.y_test.last().unwrap(), *prepared.scaled.last().unwrap());
    }

    #[test]
    fn test_scaler_roundtrip_and_bounds() {
        let series = QuoteSeries::from_closes("RT", &[12.5, 9.75, 101.0, 55.5, 9.75, 64.25]);
        let closes = series.closes();
        let prepared = prepare(&series, 30, 0.8).unwrap();

        assert!(prepared.scaled.iter().all(|v| (0.0..=1.0).contains(v)));
        let restored = prepared.scaler.inverse_transform_all(&prepared.scaled);
        for (a, b) in closes.iter().zip(&restored) {
            assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
        }
        assert_eq!(prepared.scaler.min(), 9.75);
        assert_eq!(prepared.scaler.max(), 101.0);
    }

    #[test]
    fn test_scaler_is_fit_on_the_whole_series_including_test_windows() {
        let mut closes: Vec<f64> = (0..60).map(|i| 10.0 + i as f64 * 0.1).collect();
        closes[50] = 0.5;
        closes[55] = 500.0;
        let series = QuoteSeries::from_closes("PEAK", &closes);

        let prepared = prepare(&series, 30, 0.8).unwrap();
        let w = &prepared.windows;
        // 60 bars, seq_len 20 -> 40 windows, 32 train; test targets are bars 52..60
        assert_eq!(prepared.seq_len, 20);
        assert_eq!(w.x_train.len(), 32);

        assert_eq!(prepared.scaler.max(), 500.0);
        assert_eq!(prepared.scaler.min(), 0.5);
        assert!(prepared.scaled.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(w.y_train.iter().all(|v| *v < 1.0));
        assert!(w.y_test.contains(&1.0));
        assert!(w.x_test.iter().flatten().any(|v| *v == 0.0));
    }

    #[test]
    fn test_constant_series_scales_to_zero() {
        let scaler = MinMaxScaler::fit(&[5.0; 10]).unwrap();
        assert_eq!(scaler.transform(5.0), 0.0);
        assert_eq!(scaler.inverse_transform(0.0), 5.0);
    }

    #[test]
    fn test_full_train_split_leaves_no_test_windows() {
        let prepared = prepare(&ramp(40), 30, 1.0).unwrap();
        assert!(prepared.windows.x_test.is_empty());
        assert_eq!(prepared.windows.x_train.len(), 40 - prepared.seq_len);
    }

    #[test]
    fn test_too_short_series_is_rejected() {
        assert!(prepare(&ramp(2), 30, 0.8).is_err());
        assert!(MinMaxScaler::fit(&[]).is_err());
    }
}
