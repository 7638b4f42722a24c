//! Per-object feature extraction.
//!
//! Every object and every filter is processed independently: the background
//! is drawn from a generator dedicated to the (object, filter) pair, the
//! derived series are computed and the quality cut is applied. The raw record
//! is never modified; a new [`ObjectFeatures`] is built from it.
pub mod background;
pub mod features;

pub use background::{Background, BackgroundDraw, NoiseModelError, NoiseSource, SeededNoise};
pub use features::{
    derive_features, BrightestEpoch, DerivedFilterFeatures, FeatureParams, FilterFeatures,
    FluxPeak, QualityCut,
};

use crate::loader::{RawCatalog, RawObjectRecord, SchemaError};
use crate::utils::enums::{resolve_filters, FilterListError};
use indicatif::ProgressBar;
use serde_json::{Map, Value};
use simfake_config::{AppConfig, MagobsMode, SchemaErrorPolicy};
use tracing::{debug, info, instrument, warn};

#[derive(thiserror::Error, Debug)]
pub enum TransformError {
    #[error("invalid record")]
    Schema(#[from] SchemaError),
    #[error("invalid background model")]
    NoiseModel(#[from] NoiseModelError),
    #[error("invalid filter list")]
    Filters(#[from] FilterListError),
    #[error("no filters to process")]
    NoFilters,
}

/// Features of one object, with its header.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectFeatures {
    pub object_id: String,
    pub type_code: f64,
    pub header: Map<String, Value>,
    /// one entry per configured filter, in filter order
    pub filters: Vec<(String, FilterFeatures)>,
}

impl ObjectFeatures {
    pub fn filter(&self, filter: &str) -> Option<&FilterFeatures> {
        self.filters
            .iter()
            .find(|(name, _)| name == filter)
            .map(|(_, features)| features)
    }
}

/// An object left out of the output under the skip policy.
#[derive(Debug)]
pub struct SkippedObject {
    pub object_id: String,
    pub reason: SchemaError,
}

#[derive(Debug, Default)]
pub struct TransformOutput {
    pub objects: Vec<ObjectFeatures>,
    pub skipped: Vec<SkippedObject>,
}

impl TransformOutput {
    pub fn skipped_ids(&self) -> Vec<&str> {
        self.skipped.iter().map(|s| s.object_id.as_str()).collect()
    }
}

pub struct Transformer<N = SeededNoise> {
    filters: Vec<String>,
    background: Background,
    params: FeatureParams,
    policy: SchemaErrorPolicy,
    noise: N,
}

impl Transformer<SeededNoise> {
    /// Builds a transformer with the filters and seed of the configuration.
    pub fn from_config(config: &AppConfig) -> Result<Self, TransformError> {
        let filters = resolve_filters(&config.filters)?;
        Transformer::new(config, filters, SeededNoise::from_config(&config.background))
    }
}

impl<N: NoiseSource> Transformer<N> {
    pub fn new(config: &AppConfig, filters: Vec<String>, noise: N) -> Result<Self, TransformError> {
        if filters.is_empty() {
            return Err(TransformError::NoFilters);
        }
        let background = Background::new(&config.background)?;
        let params = FeatureParams {
            zero_point: config.background.zero_point,
            magerr_clip: config.quality.magerr_clip,
            mag_flux: config.features.mag_flux,
            magobs: config.features.magobs,
            cut: QualityCut::new(&config.quality, background.model()),
        };

        if params.magobs == MagobsMode::MedianCadence {
            warn!("magobs is filled with the median cadence, not an observed magnitude");
        }
        debug!(
            model = %background.model(),
            mu = background.flux().mu,
            sigma = background.flux().sigma,
            "background model"
        );

        Ok(Transformer {
            filters,
            background,
            params,
            policy: config.features.on_schema_error,
            noise,
        })
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub fn background(&self) -> &Background {
        &self.background
    }

    pub fn params(&self) -> &FeatureParams {
        &self.params
    }

    pub fn noise(&self) -> &N {
        &self.noise
    }

    /// Derives the features of a single object in every configured filter.
    pub fn transform_object(&self, record: &RawObjectRecord) -> Result<ObjectFeatures, SchemaError> {
        let type_code = record.type_code()?;
        let header = record.header()?.clone();

        let mut filters = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let features = match record.filter_series(filter)? {
                None => FilterFeatures::NoData,
                Some(series) => {
                    let draw = self.background.draw(&self.noise, &record.id, filter);
                    let n_epochs = series.len();
                    let features = derive_features(series, &draw, &self.params);
                    debug!(
                        object_id = %record.id,
                        filter = %filter,
                        n_epochs,
                        n_kept = features.fluxcal.len(),
                        "derived filter features"
                    );
                    FilterFeatures::Observed(features)
                }
            };
            filters.push((filter.clone(), features));
        }

        Ok(ObjectFeatures {
            object_id: record.id.clone(),
            type_code,
            header,
            filters,
        })
    }

    fn transform_all(
        &self,
        records: &[RawObjectRecord],
        progress: &ProgressBar,
    ) -> Vec<Result<ObjectFeatures, SchemaError>> {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            records
                .par_iter()
                .map(|record| {
                    let result = self.transform_object(record);
                    progress.inc(1);
                    result
                })
                .collect()
        }
        #[cfg(not(feature = "parallel"))]
        {
            records
                .iter()
                .map(|record| {
                    let result = self.transform_object(record);
                    progress.inc(1);
                    result
                })
                .collect()
        }
    }

    pub fn transform(&self, catalog: &RawCatalog) -> Result<TransformOutput, TransformError> {
        self.transform_with_progress(catalog, &ProgressBar::hidden())
    }

    /// Transforms every object of the catalog, in catalog order.
    ///
    /// With the `fail` policy the first invalid object (in catalog order)
    /// aborts the run; with `skip` it is logged, recorded and left out.
    #[instrument(skip_all, fields(n_objects = catalog.len(), policy = %self.policy), err)]
    pub fn transform_with_progress(
        &self,
        catalog: &RawCatalog,
        progress: &ProgressBar,
    ) -> Result<TransformOutput, TransformError> {
        progress.set_length(catalog.len() as u64);
        let results = self.transform_all(&catalog.records, progress);
        progress.finish();

        let mut output = TransformOutput::default();
        for result in results {
            match result {
                Ok(object) => output.objects.push(object),
                Err(reason) => match self.policy {
                    SchemaErrorPolicy::Fail => return Err(reason.into()),
                    SchemaErrorPolicy::Skip => {
                        warn!(object_id = %reason.object_id(), error = %reason, "skipping object");
                        output.skipped.push(SkippedObject {
                            object_id: reason.object_id().to_string(),
                            reason,
                        });
                    }
                },
            }
        }

        let no_data = output
            .objects
            .iter()
            .flat_map(|object| object.filters.iter())
            .filter(|(_, features)| features.observed().is_none())
            .count();
        let kept_epochs: usize = output
            .objects
            .iter()
            .flat_map(|object| object.filters.iter())
            .filter_map(|(_, features)| features.observed())
            .map(|features| features.fluxcal.len())
            .sum();
        info!(
            transformed = output.objects.len(),
            skipped = output.skipped.len(),
            filters_without_data = no_data,
            kept_epochs,
            "transformed catalog"
        );

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use simfake_config::BackgroundModel;

    fn catalog(value: Value) -> RawCatalog {
        RawCatalog::from_value(value).unwrap()
    }

    fn block(fluxcal: Vec<f64>) -> Value {
        let n = fluxcal.len();
        json!({
            "mjd": (0..n).map(|i| 60000.0 + i as f64).collect::<Vec<f64>>(),
            "fluxcal": fluxcal,
            "fluxcalerr": vec![20.0; n],
            "photflag": vec![4096; n],
            "photprob": vec![1.0; n],
            "psf_sig1": vec![1.5; n],
            "sky_sig": vec![30.0; n],
            "zeropt": vec![31.4; n],
        })
    }

    fn offset_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.background.model = BackgroundModel::DeterministicOffset;
        config
    }

    #[test]
    fn test_transform_object_in_filter_order() {
        let transformer = Transformer::new(
            &offset_config(),
            vec!["r".to_string(), "g".to_string()],
            SeededNoise::from_config(&offset_config().background),
        )
        .unwrap();
        let catalog = catalog(json!({
            "7": {"header": {"type": 1, "z": 0.2}, "g": block(vec![500.0]), "r": {"mjd": null}}
        }));

        let object = transformer.transform_object(&catalog.records[0]).unwrap();
        assert_eq!(object.type_code, 1.0);
        let names: Vec<&str> = object.filters.iter().map(|(f, _)| f.as_str()).collect();
        assert_eq!(names, vec!["r", "g"]);
        assert_eq!(object.filter("r"), Some(&FilterFeatures::NoData));
        let g = object.filter("g").unwrap().observed().unwrap();
        assert_eq!(g.fluxcal, vec![1500.0]);
    }

    #[test]
    fn test_fail_policy_aborts() {
        let transformer = Transformer::new(
            &AppConfig::default(),
            vec!["g".to_string()],
            SeededNoise::from_config(&AppConfig::default().background),
        )
        .unwrap();
        let catalog = catalog(json!({
            "1": {"header": {"type": 0}, "g": block(vec![5000.0])},
            "2": {"header": {"type": 0}},
        }));
        let err = transformer.transform(&catalog).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Schema(SchemaError::MissingFilter { .. })
        ));
    }

    #[test]
    fn test_skip_policy_records_skipped_objects() {
        let mut config = AppConfig::default();
        config.features.on_schema_error = SchemaErrorPolicy::Skip;
        let transformer = Transformer::new(
            &config,
            vec!["g".to_string()],
            SeededNoise::from_config(&config.background),
        )
        .unwrap();
        let catalog = catalog(json!({
            "1": {"header": {"type": 0}, "g": block(vec![5000.0])},
            "2": {"g": block(vec![5000.0])},
            "3": {"header": {"type": 2}, "g": {"mjd": [1.0]}},
        }));
        let output = transformer.transform(&catalog).unwrap();
        assert_eq!(output.objects.len(), 1);
        assert_eq!(output.objects[0].object_id, "1");
        assert_eq!(output.skipped_ids(), vec!["2", "3"]);
        assert!(matches!(
            output.skipped[0].reason,
            SchemaError::MissingHeader { .. }
        ));
    }

    #[test]
    fn test_empty_filter_list_is_rejected() {
        let result = Transformer::new(
            &AppConfig::default(),
            Vec::new(),
            SeededNoise::from_config(&AppConfig::default().background),
        );
        assert!(matches!(result, Err(TransformError::NoFilters)));
    }
}
