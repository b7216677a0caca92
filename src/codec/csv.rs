//! CSV record codec.

use serde_json::Value;

use crate::error::Error;
use crate::record::Record;

/// Parses a CSV cell into the narrowest scalar that represents it.
///
/// Empty cells are null; `true`/`false` are booleans; otherwise integers,
/// then floats, then the raw string.
pub(crate) fn infer_scalar(cell: &str) -> Value {
    if cell.is_empty() {
        return Value::Null;
    }
    match cell {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = cell.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = cell.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    Value::String(cell.to_string())
}

pub(crate) fn decode(data: &[u8]) -> Result<Vec<Record>, Error> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(data);
    let headers = reader
        .headers()
        .map_err(|e| Error::Codec(e.to_string()))?
        .clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row.map_err(|e| Error::Codec(e.to_string()))?;
        let record: Record = headers
            .iter()
            .zip(row.iter())
            .map(|(header, cell)| (header.to_string(), infer_scalar(cell)))
            .collect();
        records.push(record);
    }
    Ok(records)
}

pub(crate) fn encode(records: &[Record]) -> Result<Vec<u8>, Error> {
    encode_with_null(records, "")
}

/// Encodes with an explicit spelling for null cells. Bulk ingest payloads
/// use `#N/A`, which the service reads as "set the field to null"; an empty
/// cell there means "leave the field unchanged". A record that lacks the
/// column entirely always gets an empty cell.
pub(crate) fn encode_with_null(records: &[Record], null_cell: &str) -> Result<Vec<u8>, Error> {
    // Header is the union of all field names in first-seen order, so
    // records with differing shapes still land in consistent columns.
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        for (field, _) in record.iter() {
            if !columns.iter().any(|c| c == field) {
                columns.push(field.clone());
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&columns)
        .map_err(|e| Error::Codec(e.to_string()))?;
    for record in records {
        let row: Vec<String> = columns
            .iter()
            .map(|column| match record.get(column) {
                None => String::new(),
                Some(Value::Null) => null_cell.to_string(),
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            })
            .collect();
        writer
            .write_record(&row)
            .map_err(|e| Error::Codec(e.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|e| Error::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_infers_scalars() {
        let data = b"Name,NumberOfEmployees,AnnualRevenue,Active,Notes\nAcme,250,1234.5,true,\n";
        let records = decode(data).unwrap();
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert_eq!(rec.get("Name"), Some(&json!("Acme")));
        assert_eq!(rec.get("NumberOfEmployees"), Some(&json!(250)));
        assert_eq!(rec.get("AnnualRevenue"), Some(&json!(1234.5)));
        assert_eq!(rec.get("Active"), Some(&json!(true)));
        assert_eq!(rec.get("Notes"), Some(&Value::Null));
    }

    #[test]
    fn test_decode_preserves_row_order() {
        let data = b"Name\nfirst\nsecond\nthird\n";
        let records = decode(data).unwrap();
        let names: Vec<&str> = records.iter().filter_map(|r| r.field_str("Name")).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_encode_unions_headers_in_first_seen_order() {
        let records = vec![
            [("A".to_string(), json!(1)), ("B".to_string(), json!(2))]
                .into_iter()
                .collect::<Record>(),
            [("B".to_string(), json!(3)), ("C".to_string(), json!(4))]
                .into_iter()
                .collect::<Record>(),
        ];
        let bytes = encode(&records).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("A,B,C"));
        assert_eq!(lines.next(), Some("1,2,"));
        assert_eq!(lines.next(), Some(",3,4"));
    }

    #[test]
    fn test_encode_quotes_embedded_delimiters() {
        let records = vec![[("Name".to_string(), json!("Acme, Inc."))]
            .into_iter()
            .collect::<Record>()];
        let bytes = encode(&records).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("\"Acme, Inc.\""));
        let decoded = decode(text.as_bytes()).unwrap();
        assert_eq!(decoded[0].field_str("Name"), Some("Acme, Inc."));
    }

    #[test]
    fn test_null_token_marks_explicit_nulls_only() {
        let records = vec![
            [
                ("Name".to_string(), json!("Acme")),
                ("Phone".to_string(), Value::Null),
            ]
            .into_iter()
            .collect::<Record>(),
            // No Phone field at all: the cell stays empty.
            [("Name".to_string(), json!("Globex"))]
                .into_iter()
                .collect::<Record>(),
        ];
        let bytes = encode_with_null(&records, "#N/A").unwrap();
        let text = String::from_utf8(bytes).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Name,Phone"));
        assert_eq!(lines.next(), Some("Acme,#N/A"));
        assert_eq!(lines.next(), Some("Globex,"));
    }

    #[test]
    fn test_invalid_utf8_is_a_codec_error() {
        let data = b"Name\n\xff\xfe\n";
        let err = decode(data).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }
}
