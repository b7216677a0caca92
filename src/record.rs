//! Dynamic field-map records and record cleaning.
//!
//! A [`Record`] is an insertion-ordered map from field names to scalar
//! values. Field order is preserved across decode, cleaning, and encode so
//! output files line up column-for-column with the input.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field names treated as integer-valued during cleaning unless the caller
/// overrides them.
pub const DEFAULT_INTEGER_FIELDS: &[&str] = &["AnnualRevenue", "NumberOfEmployees"];

/// A single record: an ordered map of field name to scalar value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(Map<String, Value>);

impl Record {
    /// Creates an empty record.
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Wraps an existing field map.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Returns the value of a field, if present.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Sets a field, preserving position if the field already exists.
    pub fn insert(&mut self, field: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(field.into(), value)
    }

    /// Removes a field and returns its previous value.
    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    /// The record identifier, when the `Id` field holds a string.
    pub fn id(&self) -> Option<&str> {
        self.field_str("Id")
    }

    /// The value of a field as a string slice, when it is a string.
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// Iterates fields in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a copy of this record with one field removed.
    pub fn without_field(&self, field: &str) -> Record {
        let mut copy = self.clone();
        copy.remove(field);
        copy
    }

    /// Consumes the record, returning the underlying map.
    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    /// Borrows the underlying map.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Whether a string is one of the sentinel spellings of "no value".
fn is_missing_sentinel(s: &str) -> bool {
    let trimmed = s.trim();
    trimmed.is_empty()
        || matches!(
            trimmed.to_ascii_lowercase().as_str(),
            "nan" | "n/a" | "na" | "null" | "#n/a" | "none"
        )
}

/// Normalizes one record for upload.
///
/// Sentinel strings (`NaN`, `N/A`, `null`, blank, and so on) become `0` in
/// the designated integer fields and `null` everywhere else. Floats that are
/// mathematically whole become integers in the designated fields. The input
/// is not modified; cleaning the output again is a no-op.
pub fn clean_record(record: &Record, integer_fields: &[&str]) -> Record {
    let mut out = Map::with_capacity(record.len());
    for (field, value) in record.iter() {
        let is_integer_field = integer_fields.contains(&field.as_str());
        let cleaned = clean_value(value, is_integer_field);
        out.insert(field.clone(), cleaned);
    }
    Record(out)
}

fn clean_value(value: &Value, is_integer_field: bool) -> Value {
    match value {
        Value::String(s) if is_missing_sentinel(s) => {
            if is_integer_field {
                Value::from(0)
            } else {
                Value::Null
            }
        }
        Value::Null if is_integer_field => Value::from(0),
        Value::Number(n) if is_integer_field => {
            match n.as_f64() {
                // NaN never survives serde_json parsing, but a whole float
                // like 250000.0 does and the service wants an integer there.
                Some(f) if f.fract() == 0.0 && f.is_finite() => Value::from(f as i64),
                _ => value.clone(),
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_sentinel_strings_become_null() {
        let rec = record(&[
            ("Name", json!("Acme")),
            ("Industry", json!("NaN")),
            ("Phone", json!("  ")),
            ("Site", json!("N/A")),
        ]);
        let cleaned = clean_record(&rec, DEFAULT_INTEGER_FIELDS);
        assert_eq!(cleaned.get("Name"), Some(&json!("Acme")));
        assert_eq!(cleaned.get("Industry"), Some(&Value::Null));
        assert_eq!(cleaned.get("Phone"), Some(&Value::Null));
        assert_eq!(cleaned.get("Site"), Some(&Value::Null));
    }

    #[test]
    fn test_sentinels_become_zero_in_integer_fields() {
        let rec = record(&[
            ("AnnualRevenue", json!("NaN")),
            ("NumberOfEmployees", json!("")),
        ]);
        let cleaned = clean_record(&rec, DEFAULT_INTEGER_FIELDS);
        assert_eq!(cleaned.get("AnnualRevenue"), Some(&json!(0)));
        assert_eq!(cleaned.get("NumberOfEmployees"), Some(&json!(0)));
    }

    #[test]
    fn test_whole_floats_become_integers_in_integer_fields() {
        let rec = record(&[
            ("AnnualRevenue", json!(250000.0)),
            ("NumberOfEmployees", json!(42.0)),
            ("Score", json!(99.5)),
        ]);
        let cleaned = clean_record(&rec, DEFAULT_INTEGER_FIELDS);
        assert_eq!(cleaned.get("AnnualRevenue"), Some(&json!(250000)));
        assert_eq!(cleaned.get("NumberOfEmployees"), Some(&json!(42)));
        assert_eq!(cleaned.get("Score"), Some(&json!(99.5)));
    }

    #[test]
    fn test_non_whole_floats_survive_in_integer_fields() {
        let rec = record(&[("AnnualRevenue", json!(1234.56))]);
        let cleaned = clean_record(&rec, DEFAULT_INTEGER_FIELDS);
        assert_eq!(cleaned.get("AnnualRevenue"), Some(&json!(1234.56)));
    }

    #[test]
    fn test_cleaning_is_idempotent() {
        let rec = record(&[
            ("Name", json!("Acme")),
            ("AnnualRevenue", json!("n/a")),
            ("Industry", json!("null")),
            ("NumberOfEmployees", json!(7.0)),
        ]);
        let once = clean_record(&rec, DEFAULT_INTEGER_FIELDS);
        let twice = clean_record(&once, DEFAULT_INTEGER_FIELDS);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_cleaning_preserves_field_order() {
        let rec = record(&[
            ("Zeta", json!("1")),
            ("Alpha", json!("2")),
            ("Mid", json!("3")),
        ]);
        let cleaned = clean_record(&rec, DEFAULT_INTEGER_FIELDS);
        let fields: Vec<&str> = cleaned.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(fields, vec!["Zeta", "Alpha", "Mid"]);
    }

    #[test]
    fn test_cleaning_does_not_mutate_input() {
        let rec = record(&[("Industry", json!("NaN"))]);
        let _ = clean_record(&rec, DEFAULT_INTEGER_FIELDS);
        assert_eq!(rec.get("Industry"), Some(&json!("NaN")));
    }

    #[test]
    fn test_id_accessor() {
        let rec = record(&[("Id", json!("001xx000003DGbY")), ("Name", json!("Acme"))]);
        assert_eq!(rec.id(), Some("001xx000003DGbY"));
        assert_eq!(rec.without_field("Id").id(), None);
    }
}
