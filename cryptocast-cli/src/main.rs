//! Cryptocast CLI: refresh, forecast, watch, and model commands.
//!
//! Commands:
//! - `series`: refresh one asset and print its cached series
//! - `forecast`: refresh one asset and print a forecast bundle
//! - `forecast-all`: refresh and forecast every asset
//! - `watch`: run the timer-driven refresh loop and log status
//! - `models`: list the model registry

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use cryptocast_core::config::PipelineConfig;
use cryptocast_core::data::{CoinGeckoProvider, MarketDataProvider, SyntheticProvider};
use cryptocast_core::domain::{AssetId, Horizon};
use cryptocast_core::model::{ModelKind, ModelRegistry};
use cryptocast_pipeline::{
    export_forecast_csv, export_forecast_json, export_series_csv, export_series_json, write_file,
    MarketPipeline, RefreshMode, RefreshOutcome,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "cryptocast",
    about = "Cryptocast CLI: cached crypto market data and model forecasts"
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GlobalArgs {
    /// TOML config file. Defaults apply when omitted; CRYPTOCAST_* env vars override either.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Use the seeded synthetic provider instead of CoinGecko.
    #[arg(long, global = true, default_value_t = false)]
    synthetic: bool,

    /// Seed for the synthetic provider.
    #[arg(long, global = true, default_value_t = 42)]
    seed: u64,

    /// Model artifact directory (overrides the config).
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Refresh one asset and print its series.
    Series {
        /// Asset ticker or coin id (ETH, btc, solana, ...).
        asset: AssetId,

        /// Print CSV instead of a summary.
        #[arg(long, default_value_t = false)]
        csv: bool,

        /// Print JSON instead of a summary.
        #[arg(long, default_value_t = false, conflicts_with = "csv")]
        json: bool,

        /// Write the output to this file instead of stdout.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Refresh one asset and print a forecast bundle as JSON.
    Forecast {
        asset: AssetId,

        /// Forecast horizon in days (e.g. 7 or 7d).
        #[arg(long, default_value = "7")]
        horizon: Horizon,

        /// Print the predicted points as CSV.
        #[arg(long, default_value_t = false)]
        csv: bool,

        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Refresh and forecast every asset.
    ForecastAll {
        #[arg(long, default_value = "7")]
        horizon: Horizon,
    },
    /// Run the timer-driven refresh loop, logging status periodically.
    Watch {
        /// Stop after this many seconds.
        #[arg(long, default_value_t = 600)]
        seconds: u64,

        /// Seconds between status reports.
        #[arg(long, default_value_t = 30)]
        report_every: u64,
    },
    /// List loaded models and load failures.
    Models,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli.global)?;

    match cli.command {
        Commands::Series {
            asset,
            csv,
            json,
            output,
        } => run_series(&cli.global, &config, asset, csv, json, output.as_deref()),
        Commands::Forecast {
            asset,
            horizon,
            csv,
            output,
        } => run_forecast(&cli.global, &config, asset, horizon, csv, output.as_deref()),
        Commands::ForecastAll { horizon } => run_forecast_all(&cli.global, &config, horizon),
        Commands::Watch {
            seconds,
            report_every,
        } => run_watch(&cli.global, &config, seconds, report_every),
        Commands::Models => run_models(&config),
    }
}

// ─── Setup ───────────────────────────────────────────────────────────

fn load_config(global: &GlobalArgs) -> Result<PipelineConfig> {
    let config = match &global.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let mut config = config
        .with_env_overrides()
        .context("invalid CRYPTOCAST_* environment override")?;
    if let Some(dir) = &global.model_dir {
        config.model_dir = dir.clone();
    }
    Ok(config)
}

fn start_pipeline(global: &GlobalArgs, config: &PipelineConfig, mode: RefreshMode) -> Result<MarketPipeline> {
    let provider: Arc<dyn MarketDataProvider> = if global.synthetic {
        Arc::new(SyntheticProvider::new(global.seed))
    } else {
        Arc::new(CoinGeckoProvider::from_config(config)?)
    };
    let registry = ModelRegistry::load_dir(&config.model_dir);
    MarketPipeline::start(config, provider, registry, mode).context("failed to start refresh worker")
}

fn report_outcome(asset: AssetId, outcome: &RefreshOutcome) {
    match outcome {
        RefreshOutcome::Merged { snapshot_id, points, .. } => {
            info!(asset = %asset, %snapshot_id, points, "refreshed")
        }
        other => warn!(asset = %asset, outcome = ?other, "refresh did not merge; serving cached data"),
    }
}

fn emit(text: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            write_file(path, text)?;
            info!(path = %path.display(), "written");
            Ok(())
        }
        None => {
            println!("{}", text.trim_end());
            Ok(())
        }
    }
}

// ─── Commands ────────────────────────────────────────────────────────

fn run_series(
    global: &GlobalArgs,
    config: &PipelineConfig,
    asset: AssetId,
    csv: bool,
    json: bool,
    output: Option<&Path>,
) -> Result<()> {
    let pipeline = start_pipeline(global, config, RefreshMode::OnDemand)?;
    report_outcome(asset, &pipeline.refresh_now(asset));
    let entry = pipeline.get_series(asset);

    if csv {
        return emit(&export_series_csv(&entry.series)?, output);
    }
    if json {
        return emit(&export_series_json(&entry)?, output);
    }

    let series = &entry.series;
    let mut summary = format!(
        "{} ({})\n  state:          {}\n  snapshot:       {}\n  points:         {}\n",
        asset.display_name(),
        asset,
        entry.state.label(),
        series.snapshot_id(),
        series.len(),
    );
    if let (Some(first), Some(last)) = (series.first(), series.last()) {
        summary.push_str(&format!(
            "  range:          {} .. {}\n  last close:     {:.4}\n",
            first.timestamp.date_naive(),
            last.timestamp.date_naive(),
            last.close
        ));
    }
    if let Some(refreshed) = series.last_refreshed() {
        summary.push_str(&format!("  last refreshed: {}\n", refreshed.to_rfc3339()));
    }
    if let Some(quote) = pipeline.get_quote(asset) {
        summary.push_str(&format!("  spot price:     {:.4} {}\n", quote.price, config.vs_currency));
        if let Some(change) = quote.change_24h_pct {
            summary.push_str(&format!("  24h change:     {change:+.2}%\n"));
        }
    }
    emit(&summary, output)
}

fn run_forecast(
    global: &GlobalArgs,
    config: &PipelineConfig,
    asset: AssetId,
    horizon: Horizon,
    csv: bool,
    output: Option<&Path>,
) -> Result<()> {
    let pipeline = start_pipeline(global, config, RefreshMode::OnDemand)?;
    report_outcome(asset, &pipeline.refresh_now(asset));

    let bundle = match pipeline.get_forecast(asset, horizon) {
        Ok(bundle) => bundle,
        Err(e) => bail!("forecast failed: {e}"),
    };
    if bundle.stale_source {
        warn!(asset = %asset, "forecast computed from stale data");
    }
    let text = if csv {
        export_forecast_csv(&bundle)?
    } else {
        export_forecast_json(&bundle)?
    };
    emit(&text, output)
}

fn run_forecast_all(global: &GlobalArgs, config: &PipelineConfig, horizon: Horizon) -> Result<()> {
    let pipeline = start_pipeline(global, config, RefreshMode::OnDemand)?;
    for (asset, outcome) in pipeline.refresh_all() {
        report_outcome(asset, &outcome);
    }

    let mut doc = serde_json::Map::new();
    for (asset, result) in pipeline.forecast_all(horizon) {
        let value = match result {
            Ok(bundle) => serde_json::to_value(&bundle).context("failed to serialize bundle")?,
            Err(e) => serde_json::json!({ "error": e.to_string() }),
        };
        doc.insert(asset.ticker().to_string(), value);
    }
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

fn run_watch(global: &GlobalArgs, config: &PipelineConfig, seconds: u64, report_every: u64) -> Result<()> {
    let pipeline = start_pipeline(global, config, RefreshMode::Periodic)?;
    let deadline = Instant::now() + Duration::from_secs(seconds);
    let report_every = Duration::from_secs(report_every.max(1));

    info!(seconds, interval_secs = config.refresh_interval_secs, "watching");
    while Instant::now() < deadline {
        std::thread::sleep(report_every.min(deadline.saturating_duration_since(Instant::now())));
        for s in pipeline.status() {
            info!(
                asset = %s.asset,
                state = s.state.label(),
                snapshot = s.snapshot_id.0,
                points = s.points,
                failures = s.consecutive_failures,
                next_in_secs = s.next_attempt_in_secs,
                "status"
            );
        }
    }
    pipeline.shutdown();
    println!("{}", serde_json::to_string_pretty(&pipeline.status())?);
    Ok(())
}

fn run_models(config: &PipelineConfig) -> Result<()> {
    let registry = ModelRegistry::load_dir(&config.model_dir);
    println!("model directory: {}", config.model_dir.display());
    for asset in AssetId::ALL {
        match registry.model(asset) {
            Some(model) => {
                let artifact = model.artifact();
                let kind = match &artifact.kind {
                    ModelKind::Drift { window } => format!("drift(window={window})"),
                    ModelKind::Autoregressive { coefficients, .. } => {
                        format!("autoregressive(p={})", coefficients.len())
                    }
                };
                println!(
                    "  {:<4} {:<24} {:<26} horizons {}..={}d, min history {}",
                    asset.ticker(),
                    model.model_version(),
                    kind,
                    artifact.min_horizon_days,
                    artifact.max_horizon_days,
                    artifact.min_history,
                );
            }
            None => println!("  {:<4} (no model)", asset.ticker()),
        }
    }
    for failure in registry.load_failures() {
        println!("  ! {failure}");
    }
    if registry.available().is_empty() {
        bail!("no models could be loaded from {}", config.model_dir.display());
    }
    Ok(())
}
