use simfake::{
    as_error,
    conf::{load_dotenv, AppConfig, BackgroundModel, SchemaErrorPolicy},
    pipeline::{run, write_outputs, PipelineError},
    utils::{enums::FilterPreset, o11y::logging::build_subscriber},
};

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::process::ExitCode;
use tracing::{info, instrument, warn};

const DEFAULT_CONFIG_PATH: &str = "config.yaml";

#[derive(Parser)]
#[command(version, about = "Extract light-curve features from simulated supernova catalogs")]
struct Cli {
    /// Path to the gzip-compressed catalog
    input: String,

    /// Path to the configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<String>,

    /// Where to write the feature table (JSON Lines)
    #[arg(long, value_name = "PATH")]
    features_out: Option<String>,

    /// Where to write the labels (CSV)
    #[arg(long, value_name = "PATH")]
    labels_out: Option<String>,

    /// Filter preset, overriding the configured filter list
    #[arg(long, value_enum)]
    filters: Option<FilterPreset>,

    /// Background model (noisy or deterministic-offset)
    #[arg(long)]
    model: Option<BackgroundModel>,

    /// Seed of the background generator
    #[arg(long)]
    seed: Option<u64>,

    /// Skip objects whose record is malformed instead of aborting
    #[arg(long)]
    skip_invalid: bool,

    /// Show a progress bar while transforming
    #[arg(long)]
    progress: bool,
}

impl Cli {
    fn load_config(&self) -> Result<AppConfig, PipelineError> {
        let mut config = match &self.config {
            Some(path) => AppConfig::from_path(path)?,
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => AppConfig::from_default_path()?,
            None => {
                warn!(
                    "no config file provided and no {} found, using defaults",
                    DEFAULT_CONFIG_PATH
                );
                AppConfig::default()
            }
        };

        if let Some(path) = &self.features_out {
            config.output.features = path.clone();
        }
        if let Some(path) = &self.labels_out {
            config.output.labels = path.clone();
        }
        if let Some(preset) = self.filters {
            config.filters.preset = preset.as_str().to_string();
            config.filters.names = None;
        }
        if let Some(model) = self.model {
            config.background.model = model;
        }
        if let Some(seed) = self.seed {
            config.background.seed = seed;
        }
        if self.skip_invalid {
            config.features.on_schema_error = SchemaErrorPolicy::Skip;
        }
        Ok(config)
    }

    fn progress_bar(&self) -> ProgressBar {
        if !self.progress {
            return ProgressBar::hidden();
        }
        ProgressBar::new(0)
            .with_message("Transforming objects")
            .with_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} {msg} {wide_bar} {pos}/{len} ({eta})")
                    .expect("invalid progress bar template"),
            )
    }
}

#[instrument(skip_all, fields(input = %args.input))]
fn execute(args: &Cli) -> Result<(), PipelineError> {
    let config = args
        .load_config()
        .inspect_err(as_error!("failed to load the configuration"))?;
    let output = run(&args.input, &config, &args.progress_bar())
        .inspect_err(as_error!("pipeline failed"))?;
    write_outputs(&output, &config.output).inspect_err(as_error!("failed to write outputs"))?;

    for skipped in &output.skipped {
        warn!(object_id = %skipped.object_id, "skipped: {}", skipped.reason);
    }
    info!(
        objects = output.features.len(),
        skipped = output.skipped.len(),
        positives = output.labels.positives(),
        features = %config.output.features,
        labels = %config.output.labels,
        "done"
    );
    Ok(())
}

fn main() -> ExitCode {
    // Load environment variables from .env file before anything else
    load_dotenv();

    let args = Cli::parse();

    let subscriber = build_subscriber().expect("failed to build subscriber");
    tracing::subscriber::set_global_default(subscriber).expect("failed to install subscriber");

    match execute(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}
