use serde_json::Value;
use simfake::conf::{AppConfig, FilterConfig, SchemaErrorPolicy};
use simfake::loader::SchemaError;
use simfake::pipeline::{read_data, run, write_outputs, PipelineError};
use simfake::table::Cell;
use simfake::transform::TransformError;
use simfake::utils::testing::{
    catalog_value, null_block, write_gzip_json, FilterBlockBuilder, ObjectRecordBuilder,
};
use std::path::{Path, PathBuf};

const FLUXES: [f64; 5] = [5000.0, 12000.0, 20000.0, 15000.0, 8000.0];

fn single_filter_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.filters = FilterConfig {
        names: Some(vec!["g".to_string()]),
        ..FilterConfig::default()
    };
    config
}

/// Object A is observed five times with a high SNR, object B has no data.
fn write_two_objects(dir: &Path) -> PathBuf {
    let path = dir.join("two_objects.json.gz");
    let catalog = catalog_value(vec![
        (
            "A",
            ObjectRecordBuilder::new(0)
                .header_field("SNID", Value::from(101))
                .header_field("REDSHIFT_FINAL", Value::from(0.12))
                .block("g", FilterBlockBuilder::daily(60100.0, &FLUXES, 50.0).build())
                .build(),
        ),
        (
            "B",
            ObjectRecordBuilder::new(3)
                .header_field("SNID", Value::from(102))
                .header_field("REDSHIFT_FINAL", Value::from(0.4))
                .block("g", null_block())
                .build(),
        ),
    ]);
    write_gzip_json(&catalog, &path).unwrap();
    path
}

#[test]
fn test_two_object_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_two_objects(dir.path());

    let (table, labels) = read_data(&path, &single_filter_config()).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(labels.len(), 2);

    let a = table.row("A").unwrap();
    let fluxcal = a.get("fluxcal_g").unwrap().as_floats().unwrap();
    assert_eq!(fluxcal.len(), 5);
    for column in ["mag_g", "snr_g", "magerr_g", "mjd_g", "fluxcalerr_g", "photflag_g"] {
        assert_eq!(a.get(column).unwrap().len(), Some(5), "{}", column);
    }
    // one background draw per filter keeps the shape of the light curve
    assert_eq!(a.get("maxfluxidx_g"), Some(&Cell::Int(2)));
    let maxflux = a.get("maxflux_g").unwrap().as_f64().unwrap();
    assert_eq!(maxflux, fluxcal[2]);
    assert!(fluxcal.iter().all(|flux| *flux <= maxflux));
    assert_eq!(a.get("SNID"), Some(&Cell::Int(101)));

    let b = table.row("B").unwrap();
    assert!(b.get("fluxcal_g").unwrap().is_empty());
    assert!(b.get("fluxcalerr_g").unwrap().is_empty());
    assert!(!b.contains("mag_g"));
    assert!(!b.contains("maxflux_g"));
    assert_eq!(b.get("REDSHIFT_FINAL"), Some(&Cell::Float(0.4)));

    assert!(!table.has_column("type"));
    assert!(table.rows().iter().all(|row| !row.contains("type")));
    assert_eq!(labels.column(), "SNIax_True");
    assert_eq!(labels.get("A"), Some(true));
    assert_eq!(labels.get("B"), Some(false));
}

#[test]
fn test_runs_are_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_two_objects(dir.path());
    let config = single_filter_config();

    let (first, _) = read_data(&path, &config).unwrap();
    let (second, _) = read_data(&path, &config).unwrap();
    let mut a = Vec::new();
    let mut b = Vec::new();
    first.write_jsonl(&mut a).unwrap();
    second.write_jsonl(&mut b).unwrap();
    assert_eq!(a, b);
}

#[test]
fn test_write_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_two_objects(dir.path());
    let mut config = single_filter_config();
    config.output.features = dir.path().join("features.jsonl").display().to_string();
    config.output.labels = dir.path().join("labels.csv").display().to_string();

    let output = run(&path, &config, &indicatif::ProgressBar::hidden()).unwrap();
    write_outputs(&output, &config.output).unwrap();

    let features = std::fs::read_to_string(&config.output.features).unwrap();
    let lines: Vec<&str> = features.lines().collect();
    assert_eq!(lines.len(), 2);
    let first: serde_json::Map<String, Value> = serde_json::from_str(lines[0]).unwrap();
    assert_eq!(first.keys().next().map(String::as_str), Some("object_id"));
    assert_eq!(first["object_id"], Value::from("A"));
    assert!(!first.contains_key("type"));
    let second: serde_json::Map<String, Value> = serde_json::from_str(lines[1]).unwrap();
    assert_eq!(second["fluxcal_g"], Value::Array(Vec::new()));

    let labels = std::fs::read_to_string(&config.output.labels).unwrap();
    assert_eq!(labels, "object_id,SNIax_True\nA,true\nB,false\n");
}

#[test]
fn test_schema_error_policies() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json.gz");
    let catalog = catalog_value(vec![
        (
            "good",
            ObjectRecordBuilder::new(0)
                .block("g", FilterBlockBuilder::daily(1.0, &[9000.0, 9500.0], 40.0).build())
                .build(),
        ),
        (
            "bad",
            ObjectRecordBuilder::new(1)
                .block("g", serde_json::json!({"mjd": [1.0, 2.0], "fluxcal": [1.0, 2.0]}))
                .build(),
        ),
    ]);
    write_gzip_json(&catalog, &path).unwrap();

    let mut config = single_filter_config();
    let err = read_data(&path, &config).unwrap_err();
    assert!(matches!(
        err,
        PipelineError::Transform(TransformError::Schema(SchemaError::MissingField {
            field: "fluxcalerr",
            ..
        }))
    ));

    config.features.on_schema_error = SchemaErrorPolicy::Skip;
    let output = run(&path, &config, &indicatif::ProgressBar::hidden()).unwrap();
    assert_eq!(output.features.len(), 1);
    assert_eq!(output.labels.len(), 1);
    assert_eq!(output.skipped.len(), 1);
    assert_eq!(output.skipped[0].object_id, "bad");
}

#[test]
fn test_corrupt_input_is_a_format_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("corrupt.json.gz");
    std::fs::write(&path, b"definitely not gzip").unwrap();
    let err = read_data(&path, &single_filter_config()).unwrap_err();
    assert!(matches!(err, PipelineError::Format(_)));
}
