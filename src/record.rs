//! Row representations on both sides of validation.
//!
//! A [RawRecord] holds one CSV row as close as possible to its file form,
//! like the raw layer of a GTFS reader; a [ValidatedRecord] is the typed,
//! schema-ordered form the loader consumes. Rows that fail validation become
//! [Rejection]s bound for the dead-letter table.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use crate::geometry::Geometry;

/// One CSV row, headers paired with raw string values, scoped to one file.
///
/// Discarded after validation unless the row is rejected, in which case it is
/// carried verbatim into the [Rejection] for inspection.
#[derive(Debug, Clone, Default)]
pub struct RawRecord {
    fields: Vec<(String, String)>,
}

impl RawRecord {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        RawRecord { fields }
    }

    /// Raw value under `name`, if the column was present in the file
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// The row as a JSON object, for dead-letter persistence
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::Value::Object(
            self.fields
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect(),
        )
    }
}

impl FromIterator<(String, String)> for RawRecord {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        RawRecord::new(iter.into_iter().collect())
    }
}

/// A typed field value after coercion
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    /// Absent optional field
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    /// A service day, parsed from `YYYYMMDD`
    Date(NaiveDate),
    /// Seconds since midnight, parsed from `H:MM:SS` or `HH:MM:SS`.
    /// May exceed 24h for trips running past midnight
    Time(u32),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// A typed row in schema field order, ready for the bulk loader.
///
/// Field order always follows the [crate::schema::EntitySchema], never the
/// CSV column order; missing optional fields are [Value::Null].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedRecord {
    values: Vec<(&'static str, Value)>,
    /// Derived geometry, when the schema declares a point spec and the
    /// coordinates were usable
    pub geometry: Option<Geometry>,
}

impl ValidatedRecord {
    pub fn new(values: Vec<(&'static str, Value)>) -> Self {
        ValidatedRecord {
            values,
            geometry: None,
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Values in schema order, without the field names
    pub fn into_values(self) -> Vec<Value> {
        self.values.into_iter().map(|(_, v)| v).collect()
    }

    pub fn values(&self) -> impl Iterator<Item = (&'static str, &Value)> {
        self.values.iter().map(|(k, v)| (*k, v))
    }
}

/// One field-level validation failure
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FieldError {
    /// Schema field name, or `<record>` for record-level rule failures
    pub field: String,
    pub reason: String,
}

impl FieldError {
    pub fn new(field: &str, reason: impl Into<String>) -> Self {
        FieldError {
            field: field.to_owned(),
            reason: reason.into(),
        }
    }
}

/// A row that failed validation, bound for the dead-letter table.
///
/// Never mutated after construction; persisted inside the run transaction so
/// dead-letter entries only survive if the run commits.
#[derive(Debug, Clone)]
pub struct Rejection {
    /// Feed file the row came from
    pub filename: String,
    /// The original raw row
    pub record: RawRecord,
    /// Every field error found; never empty
    pub errors: Vec<FieldError>,
    pub rejected_at: DateTime<Utc>,
}

impl Rejection {
    pub fn new(filename: &str, record: RawRecord, errors: Vec<FieldError>) -> Self {
        Rejection {
            filename: filename.to_owned(),
            record,
            errors,
            rejected_at: Utc::now(),
        }
    }

    /// The error list as JSON text for the dead-letter row
    pub fn errors_json(&self) -> String {
        serde_json::to_string(&self.errors).unwrap_or_else(|_| "[]".to_owned())
    }
}
