//! Canonical table contract: the boundary between ingestion and analysis.
//!
//! Defines the exact column names, data types and naming rules that the
//! normalizer produces and the validator checks.
//!
//! - Columns: timestamp, open, high, low, close, volume (no others)
//! - Timestamp: naive datetime in milliseconds (offset inputs converted to UTC)
//! - Numeric columns: Float64
//! - Sort order: strictly ascending by timestamp

use polars::prelude::*;

pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// The five numeric columns in canonical order.
pub const NUMERIC_COLUMNS: [&str; 5] = ["open", "high", "low", "close", "volume"];

/// All canonical columns in canonical order.
pub const CANONICAL_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Source column names that mean "timestamp" once trimmed and lower-cased.
pub const TIMESTAMP_SYNONYMS: [&str; 3] = ["date", "datetime", "time"];

/// Dtype of the canonical timestamp column.
pub fn timestamp_dtype() -> DataType {
    DataType::Datetime(TimeUnit::Milliseconds, None)
}

/// Normalize a source column name: trim, lower-case, apply the synonym map.
///
/// Unrecognized names are returned lower-cased and otherwise untouched.
pub fn canonical_name(raw: &str) -> String {
    let name = raw.trim().to_lowercase();
    if TIMESTAMP_SYNONYMS.contains(&name.as_str()) {
        TIMESTAMP_COLUMN.to_string()
    } else {
        name
    }
}

pub fn is_canonical_column(name: &str) -> bool {
    CANONICAL_COLUMNS.contains(&name)
}
