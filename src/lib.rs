//! One-step-ahead stock price prediction with a small LSTM.
//!
//! A [`pipeline::PredictionPipeline`] fetches quotes from a
//! [`data::MarketDataSource`], trains a fresh model on the scaled closes and
//! forecasts the next bar. [`worker::PredictionController`] runs requests off
//! the caller's task and reports progress and a single outcome per request.

pub mod config;
pub mod data;
pub mod dataset;
pub mod forecast;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod ranges;
pub mod report;
pub mod worker;

#[cfg(test)]
mod testing;
