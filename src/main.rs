use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mixsort::classifier::{Orchestrator, OrchestratorConfig, RetryPolicy, RunReport, TrackRecord};
use mixsort::config::{self, AppConfig};
use mixsort::llm::{create_provider, CompletionOptions, ProviderKind};
use mixsort::output::{self, RunMetadata};
use mixsort::spotify::SpotifyClient;

#[derive(Parser, Debug)]
#[command(about = "Classify a Spotify library into genre buckets using an LLM")]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI
    /// arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// LLM provider to use.
    #[clap(long, value_enum)]
    pub provider: Option<ProviderKind>,

    /// Model to use (defaults to the provider's standard model).
    #[clap(long)]
    pub model: Option<String>,

    /// Number of tracks to classify per LLM request.
    #[clap(long, default_value_t = 25)]
    pub batch_size: usize,

    /// Total attempt budget per batch, initial call included.
    #[clap(long, default_value_t = 3)]
    pub max_retries: u32,

    /// Number of batches to run concurrently.
    #[clap(long, default_value_t = 1)]
    pub parallelism: usize,

    /// Output file for classification results (default: auto-generated).
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Directory for exported playlist files.
    #[clap(long, default_value = "playlists")]
    pub playlist_dir: PathBuf,

    /// Skip creating playlist files.
    #[clap(long)]
    pub no_playlists: bool,

    /// Only fetch and report tracks, without classification.
    #[clap(long)]
    pub tracks_only: bool,
}

/// Convert CLI args to CliConfig for config resolution.
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            provider: args.provider,
            model: args.model.clone(),
            batch_size: args.batch_size,
            max_retries: args.max_retries,
            parallelism: args.parallelism,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .init();

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading configuration from {:?}", path);
            Some(config::FileConfig::load(path)?)
        }
        None => None,
    };

    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = AppConfig::resolve(&cli_config, file_config)?;

    let spotify = SpotifyClient::new((&app_config.spotify).into());
    let records = spotify
        .fetch_library()
        .await
        .context("failed to fetch Spotify library")?;

    if records.is_empty() {
        warn!("No tracks found in the library, nothing to classify");
        return Ok(());
    }
    info!(tracks = records.len(), "Library ready");

    if cli_args.tracks_only {
        report_sample(&records);
        return Ok(());
    }

    let report = classify(&app_config, &records).await?;
    report_summary(&report);

    let metadata = RunMetadata {
        provider: format!("{:?}", app_config.llm.provider).to_lowercase(),
        model: app_config.llm.model.clone(),
        batch_size: app_config.classifier.batch_size,
    };
    output::save_results(cli_args.output.as_deref(), &records, &report, &metadata)?;

    if !cli_args.no_playlists {
        output::export_playlists(&cli_args.playlist_dir, &records, &report)?;
    }

    Ok(())
}

async fn classify(app_config: &AppConfig, records: &[TrackRecord]) -> Result<RunReport> {
    let provider = create_provider(&app_config.llm);

    let orchestrator_config = OrchestratorConfig {
        batch_size: app_config.classifier.batch_size,
        parallelism: app_config.classifier.parallelism,
        retry: RetryPolicy {
            max_attempts: app_config.classifier.max_retries,
            initial_backoff: Duration::from_millis(app_config.classifier.initial_backoff_ms),
            backoff_multiplier: app_config.classifier.backoff_multiplier,
        },
        completion: CompletionOptions {
            temperature: app_config.llm.temperature,
            max_tokens: app_config.llm.max_tokens,
            timeout: Duration::from_secs(app_config.llm.timeout_secs),
        },
    };
    let orchestrator = Orchestrator::new(provider, orchestrator_config);

    // Ctrl+C cancels the run; batches merged so far are kept as a partial
    // result rather than discarded.
    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received Ctrl+C, finishing with partial results");
            signal_token.cancel();
        }
    });

    orchestrator
        .run(records, &cancel)
        .await
        .context("classification run failed")
}

fn report_summary(report: &RunReport) {
    let summary = &report.summary;
    info!("Classification summary:");
    info!("  total tracks: {}", summary.total_tracks);
    for (category, count) in &summary.categories {
        let percentage = if summary.total_tracks > 0 {
            *count as f64 / summary.total_tracks as f64 * 100.0
        } else {
            0.0
        };
        info!("  {}: {} tracks ({:.1}%)", category, count, percentage);
    }
    info!("  unclassified: {}", summary.unclassified);
    info!("  success rate: {:.1}%", summary.success_rate * 100.0);
    if report.aborted {
        warn!("Run was cancelled; results cover only part of the library");
    }
}

fn report_sample(records: &[TrackRecord]) {
    let Some(sample) = records.first() else {
        return;
    };
    info!("Sample track:");
    info!("  name: {}", sample.name);
    info!("  artists: {}", sample.artists.join(", "));
    info!("  genres: {}", sample.genres.join(", "));
    info!("  tempo: {:?}", sample.features.tempo);
    info!("  energy: {:?}", sample.features.energy);
    info!("  danceability: {:?}", sample.features.danceability);
}
