use anyhow::Result;
use clap::Parser;
use pricecast::config::{self, ForecastConfig, SourceConfig, DEFAULT_RANGE, SYNTHETIC_BARS};
use pricecast::data::{MarketDataSource, SyntheticSource, YahooSource};
use pricecast::pipeline::PredictionPipeline;
use pricecast::report;
use pricecast::worker::{PredictionController, PredictionEvent};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "pricecast: one-step-ahead stock price prediction with a small LSTM",
    after_help = "EXAMPLES:
    # Predict the next 15-minute bar for NVDA
    cargo run --release -- --symbol NVDA

    # Daily bars, reproducible training
    cargo run --release -- --symbol AAPL --range 1d --seed 7

    # No network: synthetic random-walk quotes
    cargo run --release -- --symbol DEMO --offline --epochs 5

    # Show the available ranges
    cargo run --release -- --list-ranges"
)]
struct Args {
    /// Ticker symbol (case-insensitive)
    #[arg(long, short)]
    symbol: Option<String>,

    /// Range key: 5m | 15m | 1h | 1d | 7d | 30d. Unknown keys use the default.
    #[arg(long, short, default_value = DEFAULT_RANGE)]
    range: String,

    /// List the range profiles and exit
    #[arg(long)]
    list_ranges: bool,

    /// Number of training epochs (default: 20)
    #[arg(long)]
    epochs: Option<usize>,

    /// Mini-batch size (default: 32)
    #[arg(long)]
    batch_size: Option<usize>,

    /// LSTM hidden units (default: 64)
    #[arg(long)]
    units: Option<usize>,

    /// Fraction of windows used for training (default: 0.8)
    #[arg(long)]
    train_split: Option<f64>,

    /// Seed for weight initialisation and batch order
    #[arg(long)]
    seed: Option<u64>,

    /// Use synthetic quotes instead of Yahoo Finance
    #[arg(long)]
    offline: bool,

    /// Number of synthetic bars with --offline
    #[arg(long, default_value_t = SYNTHETIC_BARS)]
    bars: usize,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,

    /// Use CUDA GPU acceleration (requires --features cuda at compile time)
    #[arg(long)]
    cuda: bool,
}

impl Args {
    fn forecast_config(&self) -> ForecastConfig {
        let mut cfg = ForecastConfig::from_env();
        if let Some(v) = self.epochs {
            cfg.epochs = v;
        }
        if let Some(v) = self.batch_size.filter(|v| *v > 0) {
            cfg.batch_size = v;
        }
        if let Some(v) = self.units.filter(|v| *v > 0) {
            cfg.units = v;
        }
        if let Some(v) = self.train_split {
            cfg.train_split = v.clamp(0.0, 1.0);
        }
        if self.seed.is_some() {
            cfg.seed = self.seed;
        }
        cfg.use_cuda = self.cuda;
        cfg
    }
}

fn ensure_cuda_available(requested: bool, compiled_in: bool) -> Result<()> {
    if requested && !compiled_in {
        error!(
            "--cuda was requested, but this binary was compiled without CUDA support. Re-run with: cargo run --release --features cuda -- --cuda"
        );
        return Err(anyhow::anyhow!("CUDA support not compiled in"));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    config::init_cpu_parallelism();

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("pricecast=info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
    let args = Args::parse();

    if args.list_ranges {
        print!("{}", report::render_ranges());
        return Ok(());
    }

    let Some(symbol) = args.symbol.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
        error!("No symbol given. Example: --symbol NVDA");
        return Err(anyhow::anyhow!("missing --symbol"));
    };

    ensure_cuda_available(args.cuda, cfg!(feature = "cuda"))?;

    let forecast_config = args.forecast_config();
    info!(
        "Configuration: units={}, epochs={}, batch_size={}, train_split={}, seed={:?}",
        forecast_config.units,
        forecast_config.epochs,
        forecast_config.batch_size,
        forecast_config.train_split,
        forecast_config.seed
    );

    let source: Arc<dyn MarketDataSource> = if args.offline {
        Arc::new(SyntheticSource::new(args.bars, args.seed.unwrap_or(0)))
    } else {
        Arc::new(YahooSource::new(SourceConfig::from_env()))
    };
    let pipeline = Arc::new(PredictionPipeline::with_lstm(source, forecast_config));
    let mut controller = PredictionController::new(pipeline);
    controller.submit(symbol, &args.range);

    while let Some(event) = controller.next_event().await {
        match event {
            PredictionEvent::Progress(milestone) => info!("Progress: {}", milestone.label()),
            PredictionEvent::Completed(result) => {
                if args.json {
                    println!("{}", serde_json::to_string_pretty(&result)?);
                } else {
                    print!("{}", report::render(&result));
                }
            }
            PredictionEvent::Failed(e) => {
                error!("{}", e);
                return Err(e.into());
            }
        }
    }

    Ok(())
}
