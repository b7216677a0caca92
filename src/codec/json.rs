//! JSON record codec.
//!
//! Accepts a top-level array of objects, a `{"records": [...]}` wrapper, or
//! a single object. Encodes as a plain array.

use serde_json::Value;

use crate::error::Error;
use crate::record::Record;

pub(crate) fn decode(data: &[u8]) -> Result<Vec<Record>, Error> {
    let value: Value =
        serde_json::from_slice(data).map_err(|e| Error::Codec(e.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("records") {
            Some(Value::Array(items)) => items,
            Some(other) => {
                return Err(Error::Codec(format!(
                    "expected \"records\" to be an array, got {}",
                    type_name(&other)
                )))
            }
            // A single bare object is one record.
            None => return Ok(vec![Record::from_map(map)]),
        },
        other => {
            return Err(Error::Codec(format!(
                "expected an array or object at the top level, got {}",
                type_name(&other)
            )))
        }
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(Record::from_map(map)),
            other => Err(Error::Codec(format!(
                "expected each record to be an object, got {}",
                type_name(&other)
            ))),
        })
        .collect()
}

pub(crate) fn encode(records: &[Record]) -> Result<Vec<u8>, Error> {
    serde_json::to_vec_pretty(records).map_err(|e| Error::Codec(e.to_string()))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
