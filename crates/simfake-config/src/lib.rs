use config::{Config, File, Map, Value};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, info, warn};

#[derive(thiserror::Error, Debug)]
pub enum SimfakeConfigError {
    #[error("failed to load config")]
    InvalidConfigError(#[from] config::ConfigError),
    #[error("could not find config file")]
    ConfigFileNotFound,
    #[error("missing key in config")]
    MissingKeyError,
    #[error("invalid value '{value}' for key '{key}'")]
    InvalidValue { key: String, value: String },
    #[error("environment variable expansion error")]
    EnvExpansionError(#[from] ExpandError),
}

#[derive(thiserror::Error, Debug)]
pub enum ExpandError {
    #[error("Missing environment variable '{var_name}' for placeholder '{placeholder}'")]
    MissingVariable {
        var_name: String,
        placeholder: String,
    },
}

fn invalid(key: &str, value: impl ToString) -> SimfakeConfigError {
    SimfakeConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

const DOTENV_PATHS: [&str; 2] = [".env", "../.env"];

/// Loads the first `.env` file found in the working directory or its parent.
///
/// Called by the binary before the configuration is read, so that
/// `SIMFAKE_*` variables referenced by `config.yaml` can live in a file.
pub fn load_dotenv() {
    let Some(path) = DOTENV_PATHS.iter().find(|path| Path::new(path).exists()) else {
        debug!("no .env file found, using the process environment only");
        return;
    };
    match dotenvy::from_path(path) {
        Ok(()) => info!("loaded environment variables from {}", path),
        Err(e) => warn!("could not load {}: {}", path, e),
    }
}

/// Replaces `${VAR}` and `${VAR:-default}` placeholders with values from the
/// environment, in a single pass over `input`.
///
/// `config.yaml` uses them for the seed, the background model and the output
/// paths, e.g. `seed: ${SIMFAKE_SEED:-42}`. A placeholder without default
/// whose variable is unset is an error.
pub fn expand_env_vars(input: &str) -> Result<String, ExpandError> {
    let re = Regex::new(r"\$\{([^}:]+)(?::-(.*?))?\}").expect("placeholder regex is valid");
    let mut expanded = String::with_capacity(input.len());
    let mut last = 0;

    for capture in re.captures_iter(input) {
        let Some(placeholder) = capture.get(0) else {
            continue;
        };
        let var_name = &capture[1];
        let value = match (env::var(var_name), capture.get(2)) {
            (Ok(value), _) => {
                debug!("expanded {}", var_name);
                value
            }
            (Err(_), Some(default)) => {
                debug!("{} is unset, using its default", var_name);
                default.as_str().to_string()
            }
            (Err(_), None) => {
                return Err(ExpandError::MissingVariable {
                    var_name: var_name.to_string(),
                    placeholder: placeholder.as_str().to_string(),
                })
            }
        };
        expanded.push_str(&input[last..placeholder.start()]);
        expanded.push_str(&value);
        last = placeholder.end();
    }
    expanded.push_str(&input[last..]);

    Ok(expanded)
}

/// Core function to load configuration with environment variable expansion
pub fn load_config(filepath: &str) -> Result<Config, SimfakeConfigError> {
    let path = Path::new(filepath);

    if !path.exists() {
        return Err(SimfakeConfigError::ConfigFileNotFound);
    }

    // placeholders are expanded on the raw text, before the YAML is parsed
    let file_content =
        std::fs::read_to_string(filepath).map_err(|e| config::ConfigError::Foreign(Box::new(e)))?;

    let expanded_content = expand_env_vars(&file_content)?;

    // the config crate infers the format from the extension, so keep it
    let suffix = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext))
        .unwrap_or_else(|| ".yaml".to_string());
    let temp_file = tempfile::Builder::new()
        .suffix(&suffix)
        .tempfile()
        .map_err(|e| config::ConfigError::Foreign(Box::new(e)))?;

    std::fs::write(temp_file.path(), expanded_content)
        .map_err(|e| config::ConfigError::Foreign(Box::new(e)))?;

    let conf = Config::builder()
        .add_source(File::from(temp_file.path()))
        .build()?;

    Ok(conf)
}

/// Returns the table stored under `key`, or `None` if the section is absent.
fn optional_table(
    config: &Config,
    key: &str,
) -> Result<Option<Map<String, Value>>, SimfakeConfigError> {
    match config.get_table(key) {
        Ok(table) => Ok(Some(table)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn get_float(table: &Map<String, Value>, key: &str) -> Result<Option<f64>, SimfakeConfigError> {
    Ok(table.get(key).map(|v| v.clone().into_float()).transpose()?)
}

fn get_string(
    table: &Map<String, Value>,
    key: &str,
) -> Result<Option<String>, SimfakeConfigError> {
    Ok(table.get(key).map(|v| v.clone().into_string()).transpose()?)
}

fn get_parsed<T: FromStr>(
    table: &Map<String, Value>,
    section: &str,
    key: &str,
) -> Result<Option<T>, SimfakeConfigError> {
    match get_string(table, key)? {
        Some(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| invalid(&format!("{}.{}", section, key), raw)),
        None => Ok(None),
    }
}

macro_rules! config_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
                    $($text => Ok($name::$variant),)+
                    other => Err(other.to_string()),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

config_enum!(
    /// How synthetic background flux is added to the simulated light curves.
    BackgroundModel {
        Noisy => "noisy",
        DeterministicOffset => "deterministic_offset",
    }
);

config_enum!(
    /// How the background generator is seeded for each object/filter unit.
    Reseed {
        Fixed => "fixed",
        PerUnit => "per_unit",
    }
);

config_enum!(
    /// Which flux the magnitude is computed from.
    MagFlux {
        Adjusted => "adjusted",
        Raw => "raw",
    }
);

config_enum!(
    /// What to emit in the `magobs` column.
    MagobsMode {
        MedianCadence => "median_cadence",
        Omit => "omit",
    }
);

config_enum!(
    /// What to do with an object whose record does not match the expected schema.
    SchemaErrorPolicy {
        Fail => "fail",
        Skip => "skip",
    }
);

/// Filters (passbands) to process, either a named preset or an explicit list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    pub preset: String,
    pub names: Option<Vec<String>>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            preset: "lsst".to_string(),
            names: None,
        }
    }
}

impl FilterConfig {
    pub fn from_config(config: &Config) -> Result<Self, SimfakeConfigError> {
        let mut filters = FilterConfig::default();
        let Some(table) = optional_table(config, "filters")? else {
            return Ok(filters);
        };

        if let Some(preset) = get_string(&table, "preset")? {
            filters.preset = preset;
        }

        filters.names = table
            .get("names")
            .map(|names| {
                names
                    .clone()
                    .into_array()?
                    .into_iter()
                    .map(|name| name.into_string())
                    .collect::<Result<Vec<String>, _>>()
            })
            .transpose()?;

        if let Some(names) = &filters.names {
            if names.is_empty() {
                return Err(invalid("filters.names", "[]"));
            }
        }

        Ok(filters)
    }
}

/// Configuration of the synthetic background
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundConfig {
    pub model: BackgroundModel,
    pub reference_mag: f64,
    pub zero_point: f64,
    pub seed: u64,
    pub reseed: Reseed,
}

impl Default for BackgroundConfig {
    fn default() -> Self {
        BackgroundConfig {
            model: BackgroundModel::Noisy,
            reference_mag: 20.0,
            zero_point: 27.5,
            seed: 42,
            reseed: Reseed::Fixed,
        }
    }
}

impl BackgroundConfig {
    pub fn from_config(config: &Config) -> Result<Self, SimfakeConfigError> {
        let mut background = BackgroundConfig::default();
        let Some(table) = optional_table(config, "background")? else {
            return Ok(background);
        };

        if let Some(model) = get_parsed(&table, "background", "model")? {
            background.model = model;
        }
        if let Some(reference_mag) = get_float(&table, "reference_mag")? {
            if !reference_mag.is_finite() {
                return Err(invalid("background.reference_mag", reference_mag));
            }
            background.reference_mag = reference_mag;
        }
        if let Some(zero_point) = get_float(&table, "zero_point")? {
            if !zero_point.is_finite() {
                return Err(invalid("background.zero_point", zero_point));
            }
            background.zero_point = zero_point;
        }
        if let Some(seed) = table.get("seed") {
            let seed = seed.clone().into_int()?;
            background.seed = u64::try_from(seed).map_err(|_| invalid("background.seed", seed))?;
        }
        if let Some(reseed) = get_parsed(&table, "background", "reseed")? {
            background.reseed = reseed;
        }

        Ok(background)
    }
}

/// Thresholds of the per-epoch quality cut
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityConfig {
    pub snr_threshold: f64,
    /// only applied with the noisy background model
    pub mag_threshold: f64,
    pub magerr_clip: f64,
}

impl Default for QualityConfig {
    fn default() -> Self {
        QualityConfig {
            snr_threshold: 5.0,
            mag_threshold: 21.5,
            magerr_clip: 0.5,
        }
    }
}

impl QualityConfig {
    pub fn from_config(config: &Config) -> Result<Self, SimfakeConfigError> {
        let mut quality = QualityConfig::default();
        let Some(table) = optional_table(config, "quality")? else {
            return Ok(quality);
        };

        if let Some(snr_threshold) = get_float(&table, "snr_threshold")? {
            if snr_threshold.is_nan() {
                return Err(invalid("quality.snr_threshold", snr_threshold));
            }
            quality.snr_threshold = snr_threshold;
        }
        if let Some(mag_threshold) = get_float(&table, "mag_threshold")? {
            if mag_threshold.is_nan() {
                return Err(invalid("quality.mag_threshold", mag_threshold));
            }
            quality.mag_threshold = mag_threshold;
        }
        if let Some(magerr_clip) = get_float(&table, "magerr_clip")? {
            if !(magerr_clip > 0.0) {
                return Err(invalid("quality.magerr_clip", magerr_clip));
            }
            quality.magerr_clip = magerr_clip;
        }

        Ok(quality)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureConfig {
    pub mag_flux: MagFlux,
    pub magobs: MagobsMode,
    pub on_schema_error: SchemaErrorPolicy,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        FeatureConfig {
            mag_flux: MagFlux::Adjusted,
            magobs: MagobsMode::MedianCadence,
            on_schema_error: SchemaErrorPolicy::Fail,
        }
    }
}

impl FeatureConfig {
    pub fn from_config(config: &Config) -> Result<Self, SimfakeConfigError> {
        let mut features = FeatureConfig::default();
        let Some(table) = optional_table(config, "features")? else {
            return Ok(features);
        };

        if let Some(mag_flux) = get_parsed(&table, "features", "mag_flux")? {
            features.mag_flux = mag_flux;
        }
        if let Some(magobs) = get_parsed(&table, "features", "magobs")? {
            features.magobs = magobs;
        }
        if let Some(policy) = get_parsed(&table, "features", "on_schema_error")? {
            features.on_schema_error = policy;
        }

        Ok(features)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelConfig {
    pub prefix: String,
    pub positive_type: i64,
}

impl Default for LabelConfig {
    fn default() -> Self {
        LabelConfig {
            prefix: "SNIax".to_string(),
            positive_type: 0,
        }
    }
}

impl LabelConfig {
    pub fn from_config(config: &Config) -> Result<Self, SimfakeConfigError> {
        let mut label = LabelConfig::default();
        let Some(table) = optional_table(config, "label")? else {
            return Ok(label);
        };

        if let Some(prefix) = get_string(&table, "prefix")? {
            if prefix.is_empty() {
                return Err(invalid("label.prefix", ""));
            }
            label.prefix = prefix;
        }
        if let Some(positive_type) = table.get("positive_type") {
            label.positive_type = positive_type.clone().into_int()?;
        }

        Ok(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub features: String,
    pub labels: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            features: "features.jsonl".to_string(),
            labels: "labels.csv".to_string(),
        }
    }
}

impl OutputConfig {
    pub fn from_config(config: &Config) -> Result<Self, SimfakeConfigError> {
        let mut output = OutputConfig::default();
        let Some(table) = optional_table(config, "output")? else {
            return Ok(output);
        };

        if let Some(features) = get_string(&table, "features")? {
            output.features = features;
        }
        if let Some(labels) = get_string(&table, "labels")? {
            output.labels = labels;
        }

        Ok(output)
    }
}

/// Main application configuration that combines all sub-configurations
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppConfig {
    pub filters: FilterConfig,
    pub background: BackgroundConfig,
    pub quality: QualityConfig,
    pub features: FeatureConfig,
    pub label: LabelConfig,
    pub output: OutputConfig,
}

impl AppConfig {
    pub fn from_default_path() -> Result<Self, SimfakeConfigError> {
        Self::from_path("config.yaml")
    }

    pub fn from_path(config_path: &str) -> Result<Self, SimfakeConfigError> {
        let config = load_config(config_path)?;
        Self::from_config(&config)
    }

    pub fn from_config(config: &Config) -> Result<Self, SimfakeConfigError> {
        Ok(AppConfig {
            filters: FilterConfig::from_config(config)?,
            background: BackgroundConfig::from_config(config)?,
            quality: QualityConfig::from_config(config)?,
            features: FeatureConfig::from_config(config)?,
            label: LabelConfig::from_config(config)?,
            output: OutputConfig::from_config(config)?,
        })
    }
}
