use candle_core::Device;
use rayon::ThreadPoolBuilder;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing::{info, warn};

static RAYON_INIT: OnceLock<()> = OnceLock::new();

// ── Model Hyperparameters ──────────────────────────────────────────────────
/// Hidden width of the single LSTM layer.
pub const UNITS: usize = 64;
pub const EPOCHS: usize = 20;
pub const BATCH_SIZE: usize = 32;
/// Fraction of windows used for training; the remainder is the hold-out.
pub const TRAIN_SPLIT: f64 = 0.8;
/// Upper bound on the window length. Short series use `len / 3` instead.
pub const MIN_SEQ_LEN: usize = 30;
pub const LEARNING_RATE: f64 = 1e-3;

// ── Data Validation ────────────────────────────────────────────────────────
/// Minimum number of clean bars required before any training happens.
pub const MIN_DATA_POINTS: usize = 30;

// ── Data Source ────────────────────────────────────────────────────────────
pub const DEFAULT_RANGE: &str = "15m";
pub const CACHE_DIR: &str = ".cache";
pub const CACHE_TTL_SECS: u64 = 300;
pub const FETCH_ATTEMPTS: usize = 1;
pub const SYNTHETIC_BARS: usize = 200;

pub fn init_cpu_parallelism() {
    RAYON_INIT.get_or_init(|| {
        let num_threads = num_cpus::get().max(1);
        match ThreadPoolBuilder::new().num_threads(num_threads).build_global() {
            Ok(_) => info!(
                "Initialized Rayon thread pool with {} threads (all logical CPU cores)",
                num_threads
            ),
            Err(e) => warn!(
                "Rayon thread pool already initialized or unavailable ({}). Using existing configuration.",
                e
            ),
        }
    });
}

pub fn get_device(use_cuda: bool) -> Device {
    if use_cuda {
        #[cfg(feature = "cuda")]
        {
            match Device::new_cuda(0) {
                Ok(device) => {
                    info!("Using CUDA device 0");
                    return device;
                }
                Err(e) => {
                    warn!("Failed to initialize CUDA: {}. Falling back to CPU.", e);
                }
            }
        }
        #[cfg(not(feature = "cuda"))]
        {
            warn!("CUDA requested but binary was compiled without the 'cuda' feature. Falling back to CPU.");
        }
    }

    Device::Cpu
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env_value(name)?;
    match raw.parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring invalid {}={}", name, raw);
            None
        }
    }
}

/// Hyperparameters of one forecasting run.
///
/// Fixed by default; tests and the CLI override them (smaller networks, fewer
/// epochs, a seed for reproducible training).
#[derive(Clone, Debug, PartialEq)]
pub struct ForecastConfig {
    pub units: usize,
    pub epochs: usize,
    pub batch_size: usize,
    pub train_split: f64,
    pub min_seq_len: usize,
    pub learning_rate: f64,
    pub seed: Option<u64>,
    pub use_cuda: bool,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            units: UNITS,
            epochs: EPOCHS,
            batch_size: BATCH_SIZE,
            train_split: TRAIN_SPLIT,
            min_seq_len: MIN_SEQ_LEN,
            learning_rate: LEARNING_RATE,
            seed: None,
            use_cuda: false,
        }
    }
}

impl ForecastConfig {
    /// Defaults overridden by `PRICECAST_*` environment variables.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(v) = env_parse::<usize>("PRICECAST_UNITS").filter(|v| *v > 0) {
            cfg.units = v;
        }
        if let Some(v) = env_parse::<usize>("PRICECAST_EPOCHS") {
            cfg.epochs = v;
        }
        if let Some(v) = env_parse::<usize>("PRICECAST_BATCH_SIZE").filter(|v| *v > 0) {
            cfg.batch_size = v;
        }
        if let Some(v) = env_parse::<f64>("PRICECAST_TRAIN_SPLIT") {
            cfg.train_split = v.clamp(0.0, 1.0);
        }
        if let Some(v) = env_parse::<usize>("PRICECAST_MIN_SEQ_LEN").filter(|v| *v > 0) {
            cfg.min_seq_len = v;
        }
        if let Some(v) = env_parse::<f64>("PRICECAST_LEARNING_RATE").filter(|v| *v > 0.0) {
            cfg.learning_rate = v;
        }
        if let Some(v) = env_parse::<u64>("PRICECAST_SEED") {
            cfg.seed = Some(v);
        }
        cfg
    }
}

/// Settings of the historical quote provider.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceConfig {
    pub cache_dir: PathBuf,
    /// Zero disables the on-disk cache.
    pub cache_ttl_secs: u64,
    pub fetch_attempts: usize,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(CACHE_DIR),
            cache_ttl_secs: CACHE_TTL_SECS,
            fetch_attempts: FETCH_ATTEMPTS,
        }
    }
}

impl SourceConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(dir) = env_value("PRICECAST_CACHE_DIR") {
            cfg.cache_dir = PathBuf::from(dir);
        }
        if let Some(v) = env_parse::<u64>("PRICECAST_CACHE_TTL_SECS") {
            cfg.cache_ttl_secs = v;
        }
        if let Some(v) = env_parse::<usize>("PRICECAST_FETCH_ATTEMPTS") {
            cfg.fetch_attempts = v.clamp(1, 8);
        }
        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_fixed_hyperparameters() {
        let cfg = ForecastConfig::default();
        assert_eq!(cfg.units, 64);
        assert_eq!(cfg.epochs, 20);
        assert_eq!(cfg.batch_size, 32);
        assert_eq!(cfg.min_seq_len, 30);
        assert!((cfg.train_split - 0.8).abs() < 1e-12);
        assert!(cfg.seed.is_none());
    }

    #[test]
    fn test_env_parse_rejects_garbage() {
        // SAFETY: the variable name is unique to this test.
        unsafe { std::env::set_var("PRICECAST_TEST_GARBAGE", "not-a-number") };
        assert_eq!(env_parse::<usize>("PRICECAST_TEST_GARBAGE"), None);
        unsafe { std::env::set_var("PRICECAST_TEST_GARBAGE", " 42 ") };
        assert_eq!(env_parse::<usize>("PRICECAST_TEST_GARBAGE"), Some(42));
        unsafe { std::env::remove_var("PRICECAST_TEST_GARBAGE") };
    }
}
