//! Flat feature table and label vector.
//!
//! Each object becomes one row. Per-filter features are flattened into
//! `{field}_{filter}` columns, followed by the header fields. Values are kept
//! as they are computed: arrays stay arrays and missing scalars stay empty.
use crate::loader::TYPE_KEY;
use crate::transform::ObjectFeatures;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::Value;
use simfake_config::LabelConfig;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::{info, instrument};

pub const OBJECT_ID_COLUMN: &str = "object_id";
/// Column holding a header field named like [`OBJECT_ID_COLUMN`].
pub const HEADER_OBJECT_ID_COLUMN: &str = "header_object_id";

#[derive(thiserror::Error, Debug)]
pub enum LabelError {
    #[error("object {0} has no type column")]
    MissingType(String),
    #[error("object {0} has a non-numeric type")]
    InvalidType(String),
}

#[derive(thiserror::Error, Debug)]
pub enum OutputError {
    #[error("failed to write output")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize feature row")]
    Json(#[from] serde_json::Error),
    #[error("failed to write labels")]
    Csv(#[from] csv::Error),
}

/// A single value of the feature table.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Ints(Vec<i64>),
    Floats(Vec<f64>),
    /// A scalar feature that could not be computed, written as `[]`
    Empty,
    Null,
    /// Non-scalar header value, passed through untouched
    Json(Value),
}

impl Cell {
    /// Converts a header value, keeping integers as integers.
    pub fn from_json(value: &Value) -> Cell {
        match value {
            Value::Null => Cell::Null,
            Value::Bool(b) => Cell::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Cell::Int(i),
                None => n.as_f64().map(Cell::Float).unwrap_or(Cell::Null),
            },
            Value::String(s) => Cell::Text(s.clone()),
            other => Cell::Json(other.clone()),
        }
    }

    /// Number of elements of an array cell.
    pub fn len(&self) -> Option<usize> {
        match self {
            Cell::Ints(values) => Some(values.len()),
            Cell::Floats(values) => Some(values.len()),
            Cell::Empty => Some(0),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Int(i) => Some(*i as f64),
            Cell::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Cell::Floats(values) => Some(values),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }
}

impl Serialize for Cell {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Cell::Int(i) => serializer.serialize_i64(*i),
            Cell::Float(f) => serializer.serialize_f64(*f),
            Cell::Bool(b) => serializer.serialize_bool(*b),
            Cell::Text(s) => serializer.serialize_str(s),
            Cell::Ints(values) => values.serialize(serializer),
            Cell::Floats(values) => values.serialize(serializer),
            Cell::Empty => serializer.serialize_seq(Some(0))?.end(),
            Cell::Null => serializer.serialize_unit(),
            Cell::Json(value) => value.serialize(serializer),
        }
    }
}

/// One object of the feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatFeatureRow {
    pub object_id: String,
    cells: Vec<(String, Cell)>,
}

impl FlatFeatureRow {
    pub fn new(object_id: impl Into<String>) -> Self {
        FlatFeatureRow {
            object_id: object_id.into(),
            cells: Vec::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, cell)| cell)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.get(column).is_some()
    }

    /// Sets a column, replacing the value in place if it already exists.
    pub fn insert(&mut self, column: impl Into<String>, cell: Cell) {
        let column = column.into();
        match self.cells.iter_mut().find(|(name, _)| *name == column) {
            Some((_, existing)) => *existing = cell,
            None => self.cells.push((column, cell)),
        }
    }

    pub fn remove(&mut self, column: &str) -> Option<Cell> {
        let position = self.cells.iter().position(|(name, _)| name == column)?;
        Some(self.cells.remove(position).1)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.iter().map(|(name, _)| name.as_str())
    }

    pub fn cells(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(name, cell)| (name.as_str(), cell))
    }

    /// Flattens an object: filter features first, then header fields.
    pub fn from_object(object: &ObjectFeatures) -> Self {
        let mut row = FlatFeatureRow::new(object.object_id.clone());
        for (filter, features) in &object.filters {
            for (field, cell) in features.cells() {
                row.insert(format!("{}_{}", field, filter), cell);
            }
        }
        // the row id is reserved, a header field of the same name is renamed
        for (key, value) in &object.header {
            let column = if key == OBJECT_ID_COLUMN {
                HEADER_OBJECT_ID_COLUMN.to_string()
            } else {
                key.clone()
            };
            row.insert(column, Cell::from_json(value));
        }
        row
    }
}

impl Serialize for FlatFeatureRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.cells.len() + 1))?;
        map.serialize_entry(OBJECT_ID_COLUMN, &self.object_id)?;
        for (name, cell) in &self.cells {
            map.serialize_entry(name, cell)?;
        }
        map.end()
    }
}

/// Feature matrix, one row per object, in input order.
///
/// Rows are ragged: a column only exists in the rows that have a value for it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureTable {
    columns: Vec<String>,
    rows: Vec<FlatFeatureRow>,
}

impl FeatureTable {
    /// Columns are ordered by first appearance across rows.
    pub fn from_rows(rows: Vec<FlatFeatureRow>) -> Self {
        let mut seen = HashSet::new();
        let mut columns = Vec::new();
        for row in &rows {
            for column in row.columns() {
                if seen.insert(column.to_string()) {
                    columns.push(column.to_string());
                }
            }
        }
        FeatureTable { columns, rows }
    }

    pub fn from_objects(objects: &[ObjectFeatures]) -> Self {
        FeatureTable::from_rows(objects.iter().map(FlatFeatureRow::from_object).collect())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c == column)
    }

    pub fn rows(&self) -> &[FlatFeatureRow] {
        &self.rows
    }

    pub fn row(&self, object_id: &str) -> Option<&FlatFeatureRow> {
        self.rows.iter().find(|row| row.object_id == object_id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Removes a column from every row, returning the removed values row by row.
    pub fn drop_column(&mut self, column: &str) -> Vec<Option<Cell>> {
        self.columns.retain(|c| c != column);
        self.rows.iter_mut().map(|row| row.remove(column)).collect()
    }

    /// Writes one JSON object per row.
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> Result<(), OutputError> {
        for row in &self.rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
    pub fn write_jsonl_path(&self, path: impl AsRef<Path>) -> Result<(), OutputError> {
        let file = File::create(path.as_ref())?;
        self.write_jsonl(BufWriter::new(file))?;
        info!("wrote {} feature rows", self.len());
        Ok(())
    }
}

/// Binary class label of each object, row-aligned with the feature table.
#[derive(Debug, Clone, PartialEq)]
pub struct Labels {
    column: String,
    values: Vec<(String, bool)>,
}

impl Labels {
    /// Name of the label column, `<prefix>_True`.
    pub fn column(&self) -> &str {
        &self.column
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, object_id: &str) -> Option<bool> {
        self.values
            .iter()
            .find(|(id, _)| id == object_id)
            .map(|(_, label)| *label)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, bool)> {
        self.values.iter().map(|(id, label)| (id.as_str(), *label))
    }

    pub fn positives(&self) -> usize {
        self.values.iter().filter(|(_, label)| *label).count()
    }

    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), OutputError> {
        let mut writer = csv::Writer::from_writer(writer);
        writer.write_record([OBJECT_ID_COLUMN, self.column.as_str()])?;
        for (object_id, label) in &self.values {
            writer.serialize((object_id, label))?;
        }
        writer.flush()?;
        Ok(())
    }

    #[instrument(skip(self, path), fields(path = %path.as_ref().display()), err)]
    pub fn write_csv_path(&self, path: impl AsRef<Path>) -> Result<(), OutputError> {
        let file = File::create(path.as_ref())?;
        self.write_csv(BufWriter::new(file))?;
        info!("wrote {} labels", self.len());
        Ok(())
    }
}

/// Splits the `type` column off the table into a boolean label per row.
///
/// A row is labeled `true` when its type equals `positive_type`.
pub fn extract_labels(
    mut table: FeatureTable,
    config: &LabelConfig,
) -> Result<(FeatureTable, Labels), LabelError> {
    let object_ids: Vec<String> = table.rows.iter().map(|row| row.object_id.clone()).collect();
    let types = table.drop_column(TYPE_KEY);

    let values = object_ids
        .into_iter()
        .zip(types)
        .map(|(object_id, cell)| {
            let code = match cell {
                None => return Err(LabelError::MissingType(object_id)),
                Some(cell) => cell.as_f64(),
            };
            match code {
                Some(code) => Ok((object_id, code == config.positive_type as f64)),
                None => Err(LabelError::InvalidType(object_id)),
            }
        })
        .collect::<Result<Vec<_>, _>>()?;

    let labels = Labels {
        column: format!("{}_True", config.prefix),
        values,
    };
    Ok((table, labels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::FilterFeatures;
    use serde_json::json;

    fn row(object_id: &str, cells: Vec<(&str, Cell)>) -> FlatFeatureRow {
        let mut row = FlatFeatureRow::new(object_id);
        for (name, cell) in cells {
            row.insert(name, cell);
        }
        row
    }

    #[test]
    fn test_cell_from_json() {
        assert_eq!(Cell::from_json(&json!(3)), Cell::Int(3));
        assert_eq!(Cell::from_json(&json!(0.25)), Cell::Float(0.25));
        assert_eq!(Cell::from_json(&json!("SN")), Cell::Text("SN".to_string()));
        assert_eq!(Cell::from_json(&json!(null)), Cell::Null);
        assert_eq!(Cell::from_json(&json!([1, 2])), Cell::Json(json!([1, 2])));
    }

    #[test]
    fn test_cell_serialization() {
        let cells = vec![
            Cell::Empty,
            Cell::Floats(vec![1.5, f64::NAN]),
            Cell::Ints(vec![]),
            Cell::Int(-4),
            Cell::Null,
        ];
        assert_eq!(
            serde_json::to_string(&cells).unwrap(),
            "[[],[1.5,null],[],-4,null]"
        );
    }

    #[test]
    fn test_columns_in_first_appearance_order() {
        let table = FeatureTable::from_rows(vec![
            row("a", vec![("x", Cell::Int(1)), ("y", Cell::Int(2))]),
            row("b", vec![("z", Cell::Int(3)), ("x", Cell::Int(4))]),
        ]);
        assert_eq!(table.columns(), &["x", "y", "z"]);
        assert!(table.row("b").unwrap().get("y").is_none());
    }

    #[test]
    fn test_insert_replaces_in_place() {
        let mut r = row("a", vec![("x", Cell::Int(1)), ("y", Cell::Int(2))]);
        r.insert("x", Cell::Int(5));
        let columns: Vec<&str> = r.columns().collect();
        assert_eq!(columns, vec!["x", "y"]);
        assert_eq!(r.get("x"), Some(&Cell::Int(5)));
    }

    #[test]
    fn test_extract_labels() {
        let table = FeatureTable::from_rows(vec![
            row("a", vec![("x", Cell::Int(1)), ("type", Cell::Int(0))]),
            row("b", vec![("type", Cell::Int(1)), ("x", Cell::Int(4))]),
            row("c", vec![("type", Cell::Float(0.0))]),
        ]);
        let (table, labels) = extract_labels(table, &LabelConfig::default()).unwrap();
        assert!(!table.has_column("type"));
        assert!(table.rows().iter().all(|r| !r.contains("type")));
        assert_eq!(labels.column(), "SNIax_True");
        assert_eq!(labels.len(), 3);
        assert_eq!(labels.get("a"), Some(true));
        assert_eq!(labels.get("b"), Some(false));
        assert_eq!(labels.get("c"), Some(true));
        assert_eq!(labels.positives(), 2);
    }

    #[test]
    fn test_header_object_id_does_not_replace_row_id() {
        let mut header = serde_json::Map::new();
        header.insert("type".to_string(), json!(0));
        header.insert("object_id".to_string(), json!("SN2020abc"));
        let object = ObjectFeatures {
            object_id: "1".to_string(),
            type_code: 0.0,
            header,
            filters: vec![("g".to_string(), FilterFeatures::NoData)],
        };

        let row = FlatFeatureRow::from_object(&object);
        assert_eq!(row.object_id, "1");
        assert_eq!(
            row.get(HEADER_OBJECT_ID_COLUMN),
            Some(&Cell::Text("SN2020abc".to_string()))
        );
        assert!(!row.contains(OBJECT_ID_COLUMN));

        let table = FeatureTable::from_rows(vec![row]);
        let mut out = Vec::new();
        table.write_jsonl(&mut out).unwrap();
        let line = String::from_utf8(out).unwrap();
        assert_eq!(line.matches("\"object_id\"").count(), 1);
        let parsed: Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(parsed["object_id"], json!("1"));
        assert_eq!(parsed["header_object_id"], json!("SN2020abc"));
    }

    #[test]
    fn test_fractional_type_is_a_negative_label() {
        let table = FeatureTable::from_rows(vec![
            row("a", vec![("type", Cell::Float(0.5))]),
            row("b", vec![("type", Cell::Float(0.0))]),
        ]);
        let (_, labels) = extract_labels(table, &LabelConfig::default()).unwrap();
        assert_eq!(labels.get("a"), Some(false));
        assert_eq!(labels.get("b"), Some(true));
    }

    #[test]
    fn test_extract_labels_requires_type() {
        let table = FeatureTable::from_rows(vec![row("a", vec![("x", Cell::Int(1))])]);
        assert!(matches!(
            extract_labels(table, &LabelConfig::default()),
            Err(LabelError::MissingType(id)) if id == "a"
        ));

        let table =
            FeatureTable::from_rows(vec![row("a", vec![("type", Cell::Text("Ia".into()))])]);
        assert!(matches!(
            extract_labels(table, &LabelConfig::default()),
            Err(LabelError::InvalidType(_))
        ));
    }

    #[test]
    fn test_writers() {
        let table = FeatureTable::from_rows(vec![
            row("a", vec![("type", Cell::Int(0)), ("maxflux_g", Cell::Empty)]),
            row("b", vec![("type", Cell::Int(3)), ("maxflux_g", Cell::Float(2.5))]),
        ]);
        let (table, labels) = extract_labels(table, &LabelConfig::default()).unwrap();

        let mut features = Vec::new();
        table.write_jsonl(&mut features).unwrap();
        assert_eq!(
            String::from_utf8(features).unwrap(),
            "{\"object_id\":\"a\",\"maxflux_g\":[]}\n{\"object_id\":\"b\",\"maxflux_g\":2.5}\n"
        );

        let mut csv_out = Vec::new();
        labels.write_csv(&mut csv_out).unwrap();
        assert_eq!(
            String::from_utf8(csv_out).unwrap(),
            "object_id,SNIax_True\na,true\nb,false\n"
        );
    }
}
