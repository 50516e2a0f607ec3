//! The canonical table produced by normalization.

use crate::data::raw::{ColumnHeader, RawTable};
use crate::data::timestamp::{format_timestamp, from_epoch_millis};
use crate::domain::Bar;
use crate::error::{ParseError, PipelineError, Result, SchemaError, TypeError};
use crate::schema::{timestamp_dtype, CANONICAL_COLUMNS, NUMERIC_COLUMNS, TIMESTAMP_COLUMN};
use chrono::NaiveDateTime;
use polars::prelude::*;

/// A table that claims the canonical shape.
///
/// The normalizer is the usual producer; [`crate::data::Validator`] confirms
/// the claim. The frame is only exposed read-only.
#[derive(Debug, Clone)]
pub struct CanonicalTable {
    frame: DataFrame,
    instrument: Option<String>,
}

impl CanonicalTable {
    pub fn new(frame: DataFrame, instrument: Option<String>) -> Self {
        Self { frame, instrument }
    }

    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn instrument(&self) -> Option<&str> {
        self.instrument.as_deref()
    }

    pub fn height(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    /// Materialize the rows as [`Bar`] values.
    pub fn bars(&self) -> Result<Vec<Bar>> {
        let timestamps = timestamp_millis(&self.frame)?;
        let mut numeric = Vec::with_capacity(NUMERIC_COLUMNS.len());
        for name in NUMERIC_COLUMNS {
            numeric.push(float_values(&self.frame, name)?);
        }

        timestamps
            .into_iter()
            .enumerate()
            .map(|(row, ms)| -> Result<Bar> {
                let timestamp = from_epoch_millis(ms).ok_or_else(|| ParseError::Timestamp {
                    row,
                    value: ms.to_string(),
                })?;
                Ok(Bar {
                    timestamp,
                    open: numeric[0][row],
                    high: numeric[1][row],
                    low: numeric[2][row],
                    close: numeric[3][row],
                    volume: numeric[4][row],
                })
            })
            .collect()
    }

    /// First and last timestamp, or `None` for an empty table.
    pub fn timestamp_range(&self) -> Result<Option<(NaiveDateTime, NaiveDateTime)>> {
        let millis = timestamp_millis(&self.frame)?;
        let first = millis.first().copied().and_then(from_epoch_millis);
        let last = millis.last().copied().and_then(from_epoch_millis);
        Ok(first.zip(last))
    }

    /// Render the table back into a flat raw table with canonical headers.
    pub fn to_raw(&self) -> Result<RawTable> {
        let header = ColumnHeader::Flat(CANONICAL_COLUMNS.iter().map(|c| c.to_string()).collect());
        let rows = self
            .bars()?
            .into_iter()
            .map(|bar| {
                vec![
                    Some(format_timestamp(bar.timestamp)),
                    Some(bar.open.to_string()),
                    Some(bar.high.to_string()),
                    Some(bar.low.to_string()),
                    Some(bar.close.to_string()),
                    Some(bar.volume.to_string()),
                ]
            })
            .collect();
        let raw = RawTable::from_trusted(header, rows);
        Ok(match &self.instrument {
            Some(symbol) => raw.with_instrument(symbol.clone()),
            None => raw,
        })
    }
}

fn require_column<'a>(df: &'a DataFrame, name: &str) -> Result<&'a Column> {
    df.column(name)
        .map_err(|_| PipelineError::from(SchemaError::MissingColumn(name.to_string())))
}

fn timestamp_millis(df: &DataFrame) -> Result<Vec<i64>> {
    let column = require_column(df, TIMESTAMP_COLUMN)?;
    if !matches!(column.dtype(), DataType::Datetime(_, _) | DataType::Date) {
        return Err(TypeError::NotTemporal {
            column: TIMESTAMP_COLUMN.to_string(),
            dtype: column.dtype().to_string(),
        }
        .into());
    }
    let physical = column.cast(&timestamp_dtype())?.cast(&DataType::Int64)?;
    physical
        .i64()?
        .iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| {
                PipelineError::from(TypeError::NullValue {
                    column: TIMESTAMP_COLUMN.to_string(),
                    row,
                })
            })
        })
        .collect()
}

fn float_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = require_column(df, name)?;
    let dtype = column.dtype();
    if !(dtype.is_float() || dtype.is_integer()) {
        return Err(TypeError::NotNumeric {
            column: name.to_string(),
            dtype: dtype.to_string(),
        }
        .into());
    }
    let floats = column.cast(&DataType::Float64)?;
    floats
        .f64()?
        .iter()
        .enumerate()
        .map(|(row, v)| {
            v.ok_or_else(|| {
                PipelineError::from(TypeError::NullValue {
                    column: name.to_string(),
                    row,
                })
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn sample_frame() -> DataFrame {
        let timestamps = Column::new("timestamp".into(), &[1668470400000i64, 1668556800000])
            .cast(&timestamp_dtype())
            .unwrap();
        DataFrame::new(vec![
            timestamps,
            Column::new("open".into(), &[100.0, 102.0]),
            Column::new("high".into(), &[105.0, 103.0]),
            Column::new("low".into(), &[99.0, 100.0]),
            Column::new("close".into(), &[102.0, 101.5]),
            Column::new("volume".into(), &[1000.0, 1100.0]),
        ])
        .unwrap()
    }

    #[test]
    fn bars_follow_rows() {
        let table = CanonicalTable::new(sample_frame(), Some("SPY".into()));
        let bars = table.bars().unwrap();
        assert_eq!(bars.len(), 2);
        assert_eq!(
            bars[0].timestamp,
            NaiveDate::from_ymd_opt(2022, 11, 15)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap()
        );
        assert_eq!(bars[1].close, 101.5);
        assert_eq!(bars[1].volume, 1100.0);
    }

    #[test]
    fn timestamp_range_spans_first_and_last_rows() {
        let table = CanonicalTable::new(sample_frame(), None);
        let (first, last) = table.timestamp_range().unwrap().unwrap();
        assert!(first < last);
        assert_eq!(last.date(), NaiveDate::from_ymd_opt(2022, 11, 16).unwrap());
    }

    #[test]
    fn to_raw_renders_canonical_header_and_instrument() {
        let table = CanonicalTable::new(sample_frame(), Some("SPY".into()));
        let raw = table.to_raw().unwrap();
        assert_eq!(raw.instrument(), Some("SPY"));
        assert_eq!(raw.header().level(0).unwrap(), CANONICAL_COLUMNS);
        assert_eq!(raw.rows()[1][4].as_deref(), Some("101.5"));
        assert_eq!(raw.rows()[0][0].as_deref(), Some("2022-11-15T00:00:00.000"));
    }

    #[test]
    fn bars_require_numeric_columns() {
        let frame = sample_frame().drop("volume").unwrap();
        let table = CanonicalTable::new(frame, None);
        let err = table.bars().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Schema);
    }
}
