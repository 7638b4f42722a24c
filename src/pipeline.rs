//! End-to-end entry points: load a catalog, transform it, tabulate it and
//! split off the labels.
use crate::loader::{load_catalog, FormatError};
use crate::table::{extract_labels, FeatureTable, LabelError, Labels, OutputError};
use crate::transform::{SkippedObject, TransformError, Transformer};
use indicatif::ProgressBar;
use simfake_config::{AppConfig, OutputConfig, SimfakeConfigError};
use std::path::Path;
use tracing::{info, instrument};

#[derive(thiserror::Error, Debug)]
pub enum PipelineError {
    #[error("invalid configuration")]
    Config(#[from] SimfakeConfigError),
    #[error("could not read the catalog")]
    Format(#[from] FormatError),
    #[error("could not transform the catalog")]
    Transform(#[from] TransformError),
    #[error("could not extract labels")]
    Label(#[from] LabelError),
    #[error("could not write outputs")]
    Output(#[from] OutputError),
}

#[derive(Debug)]
pub struct PipelineOutput {
    pub features: FeatureTable,
    pub labels: Labels,
    pub skipped: Vec<SkippedObject>,
}

/// Runs the whole pipeline on the catalog at `path`, reporting progress on
/// `progress`.
#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
pub fn run(
    path: impl AsRef<Path>,
    config: &AppConfig,
    progress: &ProgressBar,
) -> Result<PipelineOutput, PipelineError> {
    let catalog = load_catalog(path.as_ref())?;
    let transformer = Transformer::from_config(config)?;
    let output = transformer.transform_with_progress(&catalog, progress)?;

    let table = FeatureTable::from_objects(&output.objects);
    let (features, labels) = extract_labels(table, &config.label)?;
    info!(
        rows = features.len(),
        columns = features.columns().len(),
        positives = labels.positives(),
        "built feature table"
    );

    Ok(PipelineOutput {
        features,
        labels,
        skipped: output.skipped,
    })
}

/// Reads the catalog at `path` and returns its feature table and labels.
///
/// Objects dropped under the skip policy are absent from both.
pub fn read_data(
    path: impl AsRef<Path>,
    config: &AppConfig,
) -> Result<(FeatureTable, Labels), PipelineError> {
    let output = run(path, config, &ProgressBar::hidden())?;
    Ok((output.features, output.labels))
}

/// Writes the feature table and labels to the configured paths.
#[instrument(skip_all, fields(features = %config.features, labels = %config.labels), err)]
pub fn write_outputs(output: &PipelineOutput, config: &OutputConfig) -> Result<(), PipelineError> {
    output.features.write_jsonl_path(&config.features)?;
    output.labels.write_csv_path(&config.labels)?;
    info!("wrote outputs");
    Ok(())
}
