// Utility for unit and integration tests
use flate2::{write::GzEncoder, Compression};
use serde_json::{json, Map, Value};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const TEST_CONFIG_FILE: &str = "tests/config.test.yaml";

/// Builds the block of raw series of one filter.
///
/// Series not given explicitly are filled with constant, plausible values of
/// the same length as `mjd`.
#[derive(Debug, Clone)]
pub struct FilterBlockBuilder {
    mjd: Vec<f64>,
    fluxcal: Vec<f64>,
    fluxcalerr: Vec<f64>,
    photflag: Option<Vec<i64>>,
    photprob: Option<Vec<f64>>,
    zeropt: Option<Vec<f64>>,
}

impl FilterBlockBuilder {
    pub fn new(mjd: &[f64], fluxcal: &[f64], fluxcalerr: &[f64]) -> Self {
        FilterBlockBuilder {
            mjd: mjd.to_vec(),
            fluxcal: fluxcal.to_vec(),
            fluxcalerr: fluxcalerr.to_vec(),
            photflag: None,
            photprob: None,
            zeropt: None,
        }
    }

    /// Evenly spaced epochs, one per day from `start`, with a constant error.
    pub fn daily(start: f64, fluxcal: &[f64], fluxcalerr: f64) -> Self {
        let mjd: Vec<f64> = (0..fluxcal.len()).map(|i| start + i as f64).collect();
        FilterBlockBuilder::new(&mjd, fluxcal, &vec![fluxcalerr; fluxcal.len()])
    }

    pub fn photflag(mut self, photflag: &[i64]) -> Self {
        self.photflag = Some(photflag.to_vec());
        self
    }

    pub fn photprob(mut self, photprob: &[f64]) -> Self {
        self.photprob = Some(photprob.to_vec());
        self
    }

    pub fn zeropt(mut self, zeropt: &[f64]) -> Self {
        self.zeropt = Some(zeropt.to_vec());
        self
    }

    pub fn build(self) -> Value {
        let n = self.mjd.len();
        json!({
            "mjd": self.mjd,
            "fluxcal": self.fluxcal,
            "fluxcalerr": self.fluxcalerr,
            "photflag": self.photflag.unwrap_or_else(|| vec![4096; n]),
            "photprob": self.photprob.unwrap_or_else(|| vec![1.0; n]),
            "psf_sig1": vec![1.8; n],
            "sky_sig": vec![25.0; n],
            "zeropt": self.zeropt.unwrap_or_else(|| vec![31.2; n]),
        })
    }
}

/// A filter block with no observations.
pub fn null_block() -> Value {
    json!({"mjd": null})
}

/// Builds an object record with the given header and filter blocks.
#[derive(Debug, Clone, Default)]
pub struct ObjectRecordBuilder {
    header: Map<String, Value>,
    blocks: Vec<(String, Value)>,
}

impl ObjectRecordBuilder {
    pub fn new(type_code: i64) -> Self {
        let mut header = Map::new();
        header.insert("type".to_string(), json!(type_code));
        ObjectRecordBuilder {
            header,
            blocks: Vec::new(),
        }
    }

    pub fn header_field(mut self, key: &str, value: Value) -> Self {
        self.header.insert(key.to_string(), value);
        self
    }

    pub fn block(mut self, filter: &str, block: Value) -> Self {
        self.blocks.push((filter.to_string(), block));
        self
    }

    /// Adds an empty block for every filter not given yet.
    pub fn fill_missing(mut self, filters: &[&str]) -> Self {
        for filter in filters {
            if !self.blocks.iter().any(|(name, _)| name == filter) {
                self.blocks.push((filter.to_string(), null_block()));
            }
        }
        self
    }

    pub fn build(self) -> Value {
        let mut record = Map::new();
        record.insert("header".to_string(), Value::Object(self.header));
        for (filter, block) in self.blocks {
            record.insert(filter, block);
        }
        Value::Object(record)
    }
}

/// Assembles a catalog from `(object id, record)` pairs, keeping their order.
pub fn catalog_value(records: Vec<(&str, Value)>) -> Value {
    let catalog: Map<String, Value> = records
        .into_iter()
        .map(|(id, record)| (id.to_string(), record))
        .collect();
    Value::Object(catalog)
}

pub fn gzip_json_bytes(value: &Value) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    serde_json::to_writer(&mut encoder, value)?;
    encoder.finish()
}

/// Writes `value` as gzip-compressed JSON at `path`.
pub fn write_gzip_json(value: &Value, path: impl AsRef<Path>) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
    serde_json::to_writer(&mut encoder, value)?;
    encoder.finish()?.flush()
}
