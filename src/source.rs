//! Normalizes file-based or payload-based input into record sequences.

use std::path::PathBuf;

use crate::codec::{self, Format};
use crate::error::Error;
use crate::record::Record;

/// Where a run's records come from.
#[derive(Debug, Clone)]
pub enum RecordSource {
    /// Records already in memory.
    Records(Vec<Record>),
    /// A file on disk; format inferred from the extension.
    Path(PathBuf),
    /// Raw bytes in a known format.
    Bytes {
        data: Vec<u8>,
        format: Format,
    },
}

impl RecordSource {
    /// Loads the records, preserving input order.
    pub fn load(self) -> Result<Vec<Record>, Error> {
        match self {
            RecordSource::Records(records) => Ok(records),
            RecordSource::Path(path) => {
                let format = Format::from_path(&path).ok_or_else(|| {
                    Error::Config(format!(
                        "cannot infer record format from path {:?}; expected a .csv, .json, or .xml extension",
                        path
                    ))
                })?;
                let data = std::fs::read(&path)?;
                codec::decode(&data, format)
            }
            RecordSource::Bytes { data, format } => codec::decode(&data, format),
        }
    }
}
