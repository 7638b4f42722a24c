use serde::Serialize;
use simfake_config::FilterConfig;

/// Survey passband sets the filter list can be taken from.
#[derive(clap::ValueEnum, Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FilterPreset {
    Lsst,
    Ztf,
}

impl FilterPreset {
    pub fn as_str(&self) -> &str {
        match self {
            FilterPreset::Lsst => "lsst",
            FilterPreset::Ztf => "ztf",
        }
    }

    pub fn filters(&self) -> &'static [&'static str] {
        match self {
            FilterPreset::Lsst => &["u", "g", "r", "i", "z", "Y"],
            FilterPreset::Ztf => &["g", "r", "i"],
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum FilterListError {
    #[error("unknown filter preset {0}")]
    UnknownPreset(String),
    #[error("filter {0} is listed more than once")]
    Duplicate(String),
    #[error("filter names must not be empty")]
    EmptyName,
}

/// Resolves the ordered list of filters to process.
///
/// An explicit `names` list takes precedence over the preset.
pub fn resolve_filters(config: &FilterConfig) -> Result<Vec<String>, FilterListError> {
    let filters: Vec<String> = match &config.names {
        Some(names) => names.clone(),
        None => {
            let preset = <FilterPreset as clap::ValueEnum>::from_str(&config.preset, true)
                .map_err(|_| FilterListError::UnknownPreset(config.preset.clone()))?;
            preset.filters().iter().map(|f| f.to_string()).collect()
        }
    };

    for (i, filter) in filters.iter().enumerate() {
        if filter.is_empty() {
            return Err(FilterListError::EmptyName);
        }
        if filters[..i].contains(filter) {
            return Err(FilterListError::Duplicate(filter.clone()));
        }
    }

    Ok(filters)
}
