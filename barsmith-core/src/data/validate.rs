//! Validator: confirms a frame satisfies the canonical contract.
//!
//! Works on any `DataFrame`, whatever produced it, and shares no logic with
//! the normalizer. Checks run in order and stop at the first failure. Nothing
//! is ever repaired.

use crate::data::canonical::CanonicalTable;
use crate::error::{OrderError, PipelineError, RangeError, Result, SchemaError, TypeError};
use crate::schema::{timestamp_dtype, CANONICAL_COLUMNS, NUMERIC_COLUMNS, TIMESTAMP_COLUMN};
use polars::prelude::*;
use tracing::debug;

/// Stateless validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct Validator;

impl Validator {
    /// Run every check, failing on the first violation.
    pub fn validate(df: &DataFrame) -> Result<()> {
        Self::check_columns(df)?;
        Self::check_timestamp(df)?;
        Self::check_numeric(df)?;
        debug!(rows = df.height(), "frame passed validation");
        Ok(())
    }

    pub fn validate_table(table: &CanonicalTable) -> Result<()> {
        Self::validate(table.frame())
    }

    /// The column set must be exactly the six canonical names.
    ///
    /// Missing columns are reported before extra ones.
    pub fn check_columns(df: &DataFrame) -> Result<()> {
        let present: Vec<String> = df
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();

        let missing: Vec<String> = CANONICAL_COLUMNS
            .iter()
            .filter(|c| !present.iter().any(|p| p == *c))
            .map(|c| c.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(SchemaError::MissingColumns(missing).into());
        }

        let extra: Vec<String> = present
            .into_iter()
            .filter(|p| !CANONICAL_COLUMNS.contains(&p.as_str()))
            .collect();
        if !extra.is_empty() {
            return Err(SchemaError::ExtraColumns(extra).into());
        }
        Ok(())
    }

    /// Timestamp must be temporal, non-null and strictly increasing.
    ///
    /// A decrease anywhere in the column is reported ahead of a repeat.
    pub fn check_timestamp(df: &DataFrame) -> Result<()> {
        let column = df
            .column(TIMESTAMP_COLUMN)
            .map_err(|_| PipelineError::from(SchemaError::MissingColumn(TIMESTAMP_COLUMN.into())))?;

        if !matches!(column.dtype(), DataType::Datetime(_, _) | DataType::Date) {
            return Err(TypeError::NotTemporal {
                column: TIMESTAMP_COLUMN.to_string(),
                dtype: column.dtype().to_string(),
            }
            .into());
        }

        // compare in the column's own unit; only dates are widened
        let physical = match column.dtype() {
            DataType::Date => column.cast(&timestamp_dtype())?.cast(&DataType::Int64)?,
            _ => column.cast(&DataType::Int64)?,
        };
        let mut values = Vec::with_capacity(physical.len());
        for (row, value) in physical.i64()?.iter().enumerate() {
            match value {
                Some(v) => values.push(v),
                None => {
                    return Err(TypeError::NullValue {
                        column: TIMESTAMP_COLUMN.to_string(),
                        row,
                    }
                    .into())
                }
            }
        }

        if let Some(row) = (1..values.len()).find(|&i| values[i] < values[i - 1]) {
            return Err(OrderError::NotIncreasing {
                row,
                previous: describe(column, row - 1),
                current: describe(column, row),
            }
            .into());
        }
        if let Some(row) = (1..values.len()).find(|&i| values[i] == values[i - 1]) {
            return Err(OrderError::Duplicate {
                row,
                value: describe(column, row),
            }
            .into());
        }
        Ok(())
    }

    /// Each OHLCV column must be numeric, non-null, finite and non-negative.
    ///
    /// Nulls and NaNs anywhere in a column fail the type check before any
    /// value in that column is range-checked.
    pub fn check_numeric(df: &DataFrame) -> Result<()> {
        for name in NUMERIC_COLUMNS {
            let column = df
                .column(name)
                .map_err(|_| PipelineError::from(SchemaError::MissingColumn(name.into())))?;
            let dtype = column.dtype();
            if !(dtype.is_float() || dtype.is_integer()) {
                return Err(TypeError::NotNumeric {
                    column: name.to_string(),
                    dtype: dtype.to_string(),
                }
                .into());
            }

            let floats = column.cast(&DataType::Float64)?;
            let values = floats.f64()?;
            if let Some(row) = values.iter().position(|v| v.map_or(true, f64::is_nan)) {
                return Err(TypeError::NullValue {
                    column: name.to_string(),
                    row,
                }
                .into());
            }

            for (row, value) in values.into_no_null_iter().enumerate() {
                if !value.is_finite() {
                    return Err(RangeError::NonFinite {
                        column: name.to_string(),
                        row,
                        value,
                    }
                    .into());
                }
                if value < 0.0 {
                    return Err(RangeError::Negative {
                        column: name.to_string(),
                        row,
                        value,
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}

fn describe(column: &Column, row: usize) -> String {
    column
        .get(row)
        .map(|v| v.to_string())
        .unwrap_or_else(|_| format!("<row {row}>"))
}
