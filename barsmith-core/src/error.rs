//! Structured pipeline errors.
//!
//! Every failure names the violated invariant together with the column, row and
//! offending value, so a bad row can be located without re-running with extra
//! logging. Row numbers are zero-based positions in the table being processed.

use polars::prelude::PolarsError;
use thiserror::Error;

/// The abstract failure kinds of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Parse,
    Type,
    Order,
    Range,
    Frame,
}

/// Wrong column shape or column set.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SchemaError {
    #[error("missing required column '{0}'")]
    MissingColumn(String),

    #[error("missing required columns {0:?}")]
    MissingColumns(Vec<String>),

    #[error("unexpected columns {0:?}")]
    ExtraColumns(Vec<String>),

    #[error("expected a column header depth of 2, got {0}")]
    UnsupportedHeaderDepth(usize),

    #[error("expected a single instrument per table, found {0:?}")]
    MultipleInstruments(Vec<String>),

    #[error("instrument level of the column header is blank")]
    MissingInstrument,

    #[error("column '{0}' appears more than once after renaming")]
    DuplicateColumn(String),
}

/// A value is present but cannot be converted to the required type.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("row {row}: cannot parse timestamp from '{value}'")]
    Timestamp { row: usize, value: String },

    #[error("row {row}: cannot parse column '{column}' as a number from '{value}'")]
    Numeric {
        column: String,
        row: usize,
        value: String,
    },

    #[error("column '{column}' has unsupported type {dtype}")]
    UnsupportedDtype { column: String, dtype: String },
}

/// A column's declared element type does not match the contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TypeError {
    #[error("column '{column}' must be temporal, got {dtype}")]
    NotTemporal { column: String, dtype: String },

    #[error("column '{column}' must be numeric, got {dtype}")]
    NotNumeric { column: String, dtype: String },

    #[error("row {row}: column '{column}' holds a null")]
    NullValue { column: String, row: usize },
}

/// Timestamps are not strictly increasing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OrderError {
    #[error("row {row}: timestamp {current} is earlier than the previous {previous}")]
    NotIncreasing {
        row: usize,
        previous: String,
        current: String,
    },

    #[error("row {row}: duplicate timestamp {value}")]
    Duplicate { row: usize, value: String },
}

/// A numeric value lies outside its valid range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeError {
    #[error("row {row}: column '{column}' holds negative value {value}")]
    Negative {
        column: String,
        row: usize,
        value: f64,
    },

    #[error("row {row}: column '{column}' holds non-finite value {value}")]
    NonFinite {
        column: String,
        row: usize,
        value: f64,
    },
}

/// Any failure of the normalization or validation pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("type error: {0}")]
    Type(#[from] TypeError),

    #[error("order error: {0}")]
    Order(#[from] OrderError),

    #[error("range error: {0}")]
    Range(#[from] RangeError),

    #[error("table operation failed: {0}")]
    Frame(#[from] PolarsError),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Schema(_) => ErrorKind::Schema,
            PipelineError::Parse(_) => ErrorKind::Parse,
            PipelineError::Type(_) => ErrorKind::Type,
            PipelineError::Order(_) => ErrorKind::Order,
            PipelineError::Range(_) => ErrorKind::Range,
            PipelineError::Frame(_) => ErrorKind::Frame,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
