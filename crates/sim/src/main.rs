//! Candle Feedback: drive the prediction feedback loop over a synthetic feed
//!
//! Usage:
//!   candle-feedback run --symbol BTCUSDT --bars 2000 --seed 7   Stream bars and report metrics
//!   candle-feedback config --config feedback.json              Print the effective configuration

use std::io::Write;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use engine::{
    FeedbackConfig, FeedbackLoop, Forecaster, LoopSnapshot, PatternScanner, SyntheticFeed,
    TechnicalForecaster, ValidationStatus,
};
use tracing::info;

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));
const CONFIG_ENV: &str = "CANDLE_FEEDBACK_CONFIG";

#[derive(Parser)]
#[command(name = "candle-feedback")]
#[command(about = "Prediction validation and online learning over a bar stream", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream synthetic bars through the feedback loop
    Run {
        /// Instrument to simulate
        #[arg(long, default_value = "BTCUSDT")]
        symbol: String,
        /// Number of bars to stream
        #[arg(long, default_value_t = 1000)]
        bars: usize,
        /// RNG seed for the feed, forecaster and learner
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Register a forecast every N bars
        #[arg(long, default_value_t = 1)]
        every: usize,
        /// JSON configuration file (falls back to $CANDLE_FEEDBACK_CONFIG)
        #[arg(long)]
        config: Option<String>,
        /// Optional JSON export path for the final snapshot
        #[arg(long)]
        export: Option<String>,
    },
    /// Print the effective configuration as JSON
    Config {
        /// JSON configuration file (falls back to $CANDLE_FEEDBACK_CONFIG)
        #[arg(long)]
        config: Option<String>,
    },
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,candle_feedback=debug")
    } else {
        EnvFilter::new("info,engine=info,candle_feedback=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Run {
            symbol,
            bars,
            seed,
            every,
            config,
            export,
        } => {
            cmd_run(&symbol, bars, seed, every, config, export)?;
        }
        Commands::Config { config } => {
            cmd_config(config)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<String>) -> anyhow::Result<FeedbackConfig> {
    let path = path.or_else(|| std::env::var(CONFIG_ENV).ok());
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path))?;
            let config = FeedbackConfig::from_json(&raw)
                .with_context(|| format!("Invalid config file {}", path))?;
            info!(path = %path, "Configuration loaded");
            Ok(config)
        }
        None => Ok(FeedbackConfig::default()),
    }
}

// ============================================================================
// Config command
// ============================================================================

fn cmd_config(path: Option<String>) -> anyhow::Result<()> {
    let config = load_config(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

// ============================================================================
// Run command
// ============================================================================

fn cmd_run(
    symbol: &str,
    bars: usize,
    seed: u64,
    every: usize,
    config: Option<String>,
    export: Option<String>,
) -> anyhow::Result<()> {
    println!("\n=== Candle Feedback v{} ===", APP_VERSION);

    let mut config = load_config(config)?;
    if config.learner.seed.is_none() {
        config.learner.seed = Some(seed);
    }
    let every = every.max(1);

    println!(
        "Symbol: {} | Bars: {} | Seed: {} | Forecast every {} bar(s) | Delay: {} bars",
        symbol, bars, seed, every, config.validator.confirmation_delay
    );
    println!();

    let mut feedback = FeedbackLoop::new(config)?;
    let mut forecaster = TechnicalForecaster::new(Some(seed))?;
    let scanner = PatternScanner::new();

    let start_ms = Utc::now().timestamp_millis() - bars as i64 * engine::feed::BAR_INTERVAL_MS;
    let feed = SyntheticFeed::new(symbol, seed, start_ms);

    info!(symbol = %symbol, forecaster = forecaster.name(), "Streaming bars");

    let mut registered = 0usize;
    let mut validated = 0usize;
    let mut failed = 0usize;

    for (i, bar) in feed.take(bars).enumerate() {
        for result in feedback.on_bar(bar) {
            match result.status() {
                ValidationStatus::Validated => validated += 1,
                ValidationStatus::Failed => failed += 1,
            }
        }

        let prediction = forecaster.on_bar(&bar);
        if i % every == 0 && prediction.confidence > 0.0 {
            let recent = feedback.bars();
            let patterns = scanner.scan_at(recent, recent.len().saturating_sub(1));
            let context = if patterns.is_empty() {
                None
            } else {
                Some(patterns)
            };
            feedback.register_prediction(prediction, context);
            registered += 1;
        }

        if bars >= 10 && (i + 1) % (bars / 10) == 0 {
            let pct = (i + 1) * 100 / bars;
            let bar_len = 30;
            let filled = pct * bar_len / 100;
            let progress: String = "=".repeat(filled) + &" ".repeat(bar_len - filled);
            print!("\r  Streaming [{}] {:>3}% ({}/{})", progress, pct, i + 1, bars);
            std::io::stdout().flush().ok();
        }
    }
    println!(
        "\r  Complete! {} forecasts registered, {} validated, {} failed                ",
        registered, validated, failed
    );

    let snapshot = feedback.snapshot();
    print_summary(&snapshot);

    if let Some(export_path) = export {
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&export_path, &json)
            .with_context(|| format!("Failed to write {}", export_path))?;
        println!("\nSnapshot exported to {}", export_path);
    }

    Ok(())
}

fn print_summary(s: &LoopSnapshot) {
    let v = &s.validation;
    println!("\nValidation:");
    println!(
        "  {:<24} {:>8}   {:<24} {:>8}",
        "Validations", v.total_validations, "Pending", v.pending
    );
    println!(
        "  {:<24} {:>7.1}%   {:<24} {:>7.1}%",
        "Price accuracy",
        v.price_accuracy * 100.0,
        "Signal accuracy",
        v.signal_accuracy * 100.0
    );
    println!(
        "  {:<24} {:>7.1}%   {:<24} {:>8.2}",
        "Pattern success",
        v.pattern_success_rate * 100.0,
        "Average delay",
        v.average_delay
    );
    println!(
        "  {:<24} {:>8}   {:<24} {:>7.1}%",
        "Conflicts",
        v.conflicts.total_conflicts,
        "Resolution accuracy",
        v.conflicts.resolution_accuracy * 100.0
    );
    println!(
        "  {:<24} {:>8}   {:<24} {:>8}",
        "Recent trend",
        format!("{:?}", v.recent.trend),
        "Stale evictions",
        v.stale_evictions
    );

    let e = &s.error_learning;
    println!("\nLearning:");
    println!(
        "  {:<24} {:>8.4}   {:<24} {:>8.4}",
        "Learning rate", e.learning_rate, "Average error", e.average_error
    );
    println!(
        "  {:<24} {:>+8.3}   {:<24} {:>8}",
        "Convergence", e.convergence_rate, "Reservoir", s.online_learning.reservoir_size
    );

    let b = &s.buffer;
    println!("\nBuffer:");
    println!(
        "  {:<24} {:>7.1}%   {:<24} {:>8}",
        "Utilization",
        b.utilization * 100.0,
        "Market trend",
        format!("{:?}", s.market_trend)
    );
    println!(
        "  {:<24} {:>8.4}   {:<24} {:>8}",
        "Volatility",
        s.volatility.average,
        "Volatility trend",
        format!("{:?}", s.volatility.trend)
    );
}
