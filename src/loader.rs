//! Reading of simulated light-curve catalogs.
//!
//! The input is a gzip-compressed JSON document mapping object ids to records.
//! Each record carries a `header` of scalar metadata and one block of raw
//! time series per filter:
//!
//! ```json
//! {
//!   "1234": {
//!     "header": {"type": 0, "SNID": 1234, "REDSHIFT_FINAL": 0.1},
//!     "g": {"mjd": [...], "fluxcal": [...], "fluxcalerr": [...], "photflag": [...],
//!           "photprob": [...], "psf_sig1": [...], "sky_sig": [...], "zeropt": [...]},
//!     "r": {"mjd": null}
//!   }
//! }
//! ```
//!
//! Loading only checks that the document is a mapping of records. The content
//! of headers and filter blocks is validated lazily, per object, so that the
//! transformer can apply its schema error policy.
use flate2::read::MultiGzDecoder;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info, instrument};

pub const HEADER_KEY: &str = "header";
pub const TYPE_KEY: &str = "type";

#[derive(thiserror::Error, Debug)]
pub enum FormatError {
    #[error("failed to open input file")]
    Io(#[from] std::io::Error),
    #[error("failed to decompress gzip stream")]
    Decompress(#[source] std::io::Error),
    #[error("failed to deserialize catalog")]
    Deserialize(#[from] serde_json::Error),
    #[error("catalog is not a mapping of object id to record")]
    NotAMapping,
    #[error("record for object {object_id} is not a mapping")]
    InvalidRecord { object_id: String },
}

#[derive(thiserror::Error, Debug)]
pub enum SchemaError {
    #[error("object {object_id} has no header")]
    MissingHeader { object_id: String },
    #[error("object {object_id} has no numeric type in its header")]
    InvalidType { object_id: String },
    #[error("object {object_id} has no block for filter {filter}")]
    MissingFilter { object_id: String, filter: String },
    #[error("object {object_id}, filter {filter}: missing field {field}")]
    MissingField {
        object_id: String,
        filter: String,
        field: &'static str,
    },
    #[error("object {object_id}, filter {filter}: malformed block")]
    InvalidBlock {
        object_id: String,
        filter: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("object {object_id}, filter {filter}: {field} has {found} values, expected {expected}")]
    LengthMismatch {
        object_id: String,
        filter: String,
        field: &'static str,
        expected: usize,
        found: usize,
    },
}

impl SchemaError {
    pub fn object_id(&self) -> &str {
        match self {
            SchemaError::MissingHeader { object_id }
            | SchemaError::InvalidType { object_id }
            | SchemaError::MissingFilter { object_id, .. }
            | SchemaError::MissingField { object_id, .. }
            | SchemaError::InvalidBlock { object_id, .. }
            | SchemaError::LengthMismatch { object_id, .. } => object_id,
        }
    }
}

/// Raw per-filter block as found in the input, every series optional.
#[derive(Debug, Default, Deserialize)]
struct RawFilterBlock {
    mjd: Option<Vec<f64>>,
    fluxcal: Option<Vec<f64>>,
    fluxcalerr: Option<Vec<f64>>,
    photflag: Option<Vec<i64>>,
    photprob: Option<Vec<f64>>,
    psf_sig1: Option<Vec<f64>>,
    sky_sig: Option<Vec<f64>>,
    zeropt: Option<Vec<f64>>,
}

/// Index-aligned raw time series of one object in one filter.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFilterSeries {
    pub mjd: Vec<f64>,
    pub fluxcal: Vec<f64>,
    pub fluxcalerr: Vec<f64>,
    pub photflag: Vec<i64>,
    pub photprob: Vec<f64>,
    pub psf_sig1: Vec<f64>,
    pub sky_sig: Vec<f64>,
    pub zeropt: Vec<f64>,
}

impl RawFilterSeries {
    pub fn len(&self) -> usize {
        self.mjd.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mjd.is_empty()
    }
}

/// One simulated transient, as read from the catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct RawObjectRecord {
    pub id: String,
    header: Option<Value>,
    blocks: Map<String, Value>,
}

impl RawObjectRecord {
    pub fn new(id: impl Into<String>, mut fields: Map<String, Value>) -> Self {
        let header = fields.remove(HEADER_KEY);
        RawObjectRecord {
            id: id.into(),
            header,
            blocks: fields,
        }
    }

    pub fn header(&self) -> Result<&Map<String, Value>, SchemaError> {
        self.header
            .as_ref()
            .and_then(Value::as_object)
            .ok_or_else(|| SchemaError::MissingHeader {
                object_id: self.id.clone(),
            })
    }

    /// Numeric class code stored under `header.type`.
    ///
    /// Codes are usually integers but any number is accepted; it only has to
    /// compare against the positive class.
    pub fn type_code(&self) -> Result<f64, SchemaError> {
        let header = self.header()?;
        header
            .get(TYPE_KEY)
            .and_then(Value::as_f64)
            .ok_or_else(|| SchemaError::InvalidType {
                object_id: self.id.clone(),
            })
    }

    /// Names of the filter blocks present in the record.
    pub fn block_names(&self) -> impl Iterator<Item = &str> {
        self.blocks.keys().map(String::as_str)
    }

    /// Parses the block of `filter`.
    ///
    /// Returns `Ok(None)` when the object has no data in this filter, which is
    /// signaled by a null `mjd` (or a null block).
    pub fn filter_series(&self, filter: &str) -> Result<Option<RawFilterSeries>, SchemaError> {
        let block = self
            .blocks
            .get(filter)
            .ok_or_else(|| SchemaError::MissingFilter {
                object_id: self.id.clone(),
                filter: filter.to_string(),
            })?;

        let fields = match block {
            Value::Null => return Ok(None),
            Value::Object(fields) => fields,
            _ => {
                return Err(SchemaError::InvalidBlock {
                    object_id: self.id.clone(),
                    filter: filter.to_string(),
                    source: serde::de::Error::custom("expected a mapping of series"),
                })
            }
        };
        if !fields.contains_key("mjd") {
            return Err(self.missing(filter, "mjd"));
        }

        let raw = RawFilterBlock::deserialize(block).map_err(|source| SchemaError::InvalidBlock {
            object_id: self.id.clone(),
            filter: filter.to_string(),
            source,
        })?;

        let Some(mjd) = raw.mjd else {
            return Ok(None);
        };
        let expected = mjd.len();
        let series = RawFilterSeries {
            fluxcal: self.aligned(filter, "fluxcal", raw.fluxcal, expected)?,
            fluxcalerr: self.aligned(filter, "fluxcalerr", raw.fluxcalerr, expected)?,
            photflag: self.aligned(filter, "photflag", raw.photflag, expected)?,
            photprob: self.aligned(filter, "photprob", raw.photprob, expected)?,
            psf_sig1: self.aligned(filter, "psf_sig1", raw.psf_sig1, expected)?,
            sky_sig: self.aligned(filter, "sky_sig", raw.sky_sig, expected)?,
            zeropt: self.aligned(filter, "zeropt", raw.zeropt, expected)?,
            mjd,
        };

        Ok(Some(series))
    }

    fn missing(&self, filter: &str, field: &'static str) -> SchemaError {
        SchemaError::MissingField {
            object_id: self.id.clone(),
            filter: filter.to_string(),
            field,
        }
    }

    fn aligned<T>(
        &self,
        filter: &str,
        field: &'static str,
        values: Option<Vec<T>>,
        expected: usize,
    ) -> Result<Vec<T>, SchemaError> {
        let values = values.ok_or_else(|| self.missing(filter, field))?;
        if values.len() != expected {
            return Err(SchemaError::LengthMismatch {
                object_id: self.id.clone(),
                filter: filter.to_string(),
                field,
                expected,
                found: values.len(),
            });
        }
        Ok(values)
    }
}

/// All objects of one input file, in file order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCatalog {
    pub records: Vec<RawObjectRecord>,
}

impl RawCatalog {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Builds a catalog from an already deserialized document.
    pub fn from_value(value: Value) -> Result<Self, FormatError> {
        let Value::Object(objects) = value else {
            return Err(FormatError::NotAMapping);
        };

        let records = objects
            .into_iter()
            .map(|(object_id, record)| match record {
                Value::Object(fields) => Ok(RawObjectRecord::new(object_id, fields)),
                _ => Err(FormatError::InvalidRecord { object_id }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(RawCatalog { records })
    }
}

/// Decompresses and deserializes a catalog from a gzip stream.
///
/// Every gzip member of the stream is read, not only the first one.
pub fn read_catalog<R: Read>(reader: R) -> Result<RawCatalog, FormatError> {
    let mut decoder = MultiGzDecoder::new(reader);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(FormatError::Decompress)?;
    debug!("decompressed {} bytes", decompressed.len());

    let value: Value = serde_json::from_slice(&decompressed)?;
    RawCatalog::from_value(value)
}

/// Loads the catalog stored in the gzip-compressed file at `path`.
#[instrument(skip_all, fields(path = %path.as_ref().display()), err)]
pub fn load_catalog(path: impl AsRef<Path>) -> Result<RawCatalog, FormatError> {
    let file = File::open(path.as_ref())?;
    let catalog = read_catalog(BufReader::new(file))?;
    info!("loaded {} objects", catalog.len());
    Ok(catalog)
}
