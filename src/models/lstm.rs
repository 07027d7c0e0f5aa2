use candle_core::{Module, Result, Tensor};
use candle_nn::{LSTMConfig, Linear, VarBuilder, LSTM, RNN};

/// Single-layer LSTM regressor: `[batch, seq_len, 1]` -> `[batch, 1]`.
///
/// The last hidden state is projected by one linear unit onto the next
/// scaled close.
pub struct LstmRegressor {
    lstm: LSTM,
    head: Linear,
}

impl LstmRegressor {
    pub fn new(input_dim: usize, hidden_dim: usize, vb: VarBuilder) -> Result<Self> {
        let cfg = LSTMConfig {
            layer_idx: 0,
            ..Default::default()
        };
        let lstm = candle_nn::lstm(input_dim, hidden_dim, cfg, vb.pp("lstm"))?;
        let head = candle_nn::linear(hidden_dim, 1, vb.pp("head"))?;
        Ok(Self { lstm, head })
    }

    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let states = self.lstm.seq(x)?;
        let h_t = &states
            .last()
            .ok_or_else(|| candle_core::Error::Msg("Empty LSTM sequence".into()))?
            .h;
        self.head.forward(h_t)
    }
}
