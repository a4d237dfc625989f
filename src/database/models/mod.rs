//! Database Records
//!
//! Row types for the source registry and the derived rules index. JSON
//! columns are kept as raw strings on the records and decoded on demand.

mod index;
mod source;

pub use index::*;
pub use source::*;

use serde::de::DeserializeOwned;

/// Decode a JSON text column.
pub(crate) fn decode_json<T: DeserializeOwned>(raw: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Decode a nullable JSON text column.
pub(crate) fn decode_optional_json<T: DeserializeOwned>(
    raw: Option<&str>,
) -> Result<Option<T>, serde_json::Error> {
    raw.map(serde_json::from_str).transpose()
}
