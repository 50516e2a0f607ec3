//! Normalizer: raw table of unknown shape → canonical table.
//!
//! The pipeline is a fixed sequence of pure steps. Each step takes one table
//! value and returns a new one, so any intermediate table can be inspected on
//! its own:
//!
//! 1. [`flatten_columns`]: collapse a field × instrument header to one level
//! 2. [`normalize_column_names`]: trim, lower-case, map timestamp synonyms
//! 3. [`parse_timestamp`]: all-or-nothing parse to the canonical datetime
//! 4. [`coerce_numeric`]: all-or-nothing parse of the OHLCV columns to `f64`
//! 5. [`clean`]: drop partial rows, sort by timestamp, keep first duplicate
//!
//! A successful run is then handed to the attached [`ArtifactStore`], if any.
//! Persistence is best-effort: its failure is logged and never returned.

use crate::data::canonical::CanonicalTable;
use crate::data::raw::{ColumnHeader, FlatTable, RawTable};
use crate::data::store::ArtifactStore;
use crate::data::timestamp::{self, to_epoch_millis};
use crate::error::{ParseError, PipelineError, Result, SchemaError};
use crate::schema::{
    canonical_name, is_canonical_column, timestamp_dtype, CANONICAL_COLUMNS, NUMERIC_COLUMNS,
    TIMESTAMP_COLUMN,
};
use polars::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Stateless normalizer with an optional artifact store.
#[derive(Default, Clone)]
pub struct Normalizer {
    store: Option<Arc<dyn ArtifactStore>>,
}

impl Normalizer {
    /// A normalizer that does not persist its output.
    pub fn new() -> Self {
        Self { store: None }
    }

    /// A normalizer that persists every table it produces to `store`.
    pub fn with_store(store: Arc<dyn ArtifactStore>) -> Self {
        Self { store: Some(store) }
    }

    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// Run every step in order. No table is returned if any step fails.
    pub fn normalize(&self, raw: RawTable) -> Result<CanonicalTable> {
        let raw_rows = raw.height();
        let flat = flatten_columns(raw)?;
        let renamed = normalize_column_names(&flat)?;
        let instrument = renamed.instrument().map(str::to_string);

        let frame = renamed.to_frame()?;
        let parsed = parse_timestamp(&frame)?;
        let coerced = coerce_numeric(&parsed)?;
        let cleaned = clean(&coerced)?;

        let table = CanonicalTable::new(cleaned, instrument);
        info!(
            instrument = table.instrument().unwrap_or("unknown"),
            raw_rows,
            rows = table.height(),
            "normalized table"
        );

        self.persist(&table);
        Ok(table)
    }

    fn persist(&self, table: &CanonicalTable) {
        let Some(store) = &self.store else {
            return;
        };
        match store.persist(table) {
            Ok(path) => debug!(path = %path.display(), "persisted canonical table"),
            Err(e) => warn!(error = %e, "failed to persist canonical table"),
        }
    }
}

impl std::fmt::Debug for Normalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Normalizer")
            .field("store", &self.store.is_some())
            .finish()
    }
}

/// Step 1: collapse the header to its field level.
///
/// Flat headers pass through. Hierarchical headers must be exactly two levels
/// deep and name exactly one instrument; blank instrument labels (such as the
/// one pandas writes above the timestamp column) are skipped, but at least one
/// label must be present.
pub fn flatten_columns(raw: RawTable) -> Result<FlatTable> {
    let (columns, instrument) = match raw.header() {
        ColumnHeader::Flat(names) => (names.clone(), None),
        ColumnHeader::Hierarchical(levels) => {
            if levels.len() != 2 {
                return Err(SchemaError::UnsupportedHeaderDepth(levels.len()).into());
            }
            let mut instruments: Vec<String> = Vec::new();
            for label in levels[1].iter().map(|l| l.trim()) {
                if !label.is_empty() && !instruments.iter().any(|i| i == label) {
                    instruments.push(label.to_string());
                }
            }
            if instruments.len() > 1 {
                return Err(SchemaError::MultipleInstruments(instruments).into());
            }
            let Some(instrument) = instruments.pop() else {
                return Err(SchemaError::MissingInstrument.into());
            };
            debug!(%instrument, "flattened two-level header");
            (levels[0].clone(), Some(instrument))
        }
    };
    Ok(raw.into_flat(columns, instrument))
}

/// Step 2: trim and lower-case names, then map timestamp synonyms.
pub fn normalize_column_names(table: &FlatTable) -> Result<FlatTable> {
    let columns: Vec<String> = table.columns().iter().map(|c| canonical_name(c)).collect();

    let mut seen = HashSet::new();
    for name in &columns {
        if !seen.insert(name.as_str()) {
            return Err(SchemaError::DuplicateColumn(name.clone()).into());
        }
    }

    Ok(table.with_columns(columns))
}

/// Step 3: parse the timestamp column into the canonical datetime dtype.
///
/// Missing cells stay null; any present value that does not parse fails the
/// whole column.
pub fn parse_timestamp(df: &DataFrame) -> Result<DataFrame> {
    let column = df
        .column(TIMESTAMP_COLUMN)
        .map_err(|_| PipelineError::from(SchemaError::MissingColumn(TIMESTAMP_COLUMN.into())))?;

    let parsed = match column.dtype() {
        DataType::String => {
            let values = column.str()?;
            let mut millis = Vec::with_capacity(values.len());
            for (row, value) in values.iter().enumerate() {
                let Some(text) = value else {
                    millis.push(None);
                    continue;
                };
                match timestamp::parse_timestamp(text) {
                    Some(ts) => millis.push(Some(to_epoch_millis(ts))),
                    None => {
                        return Err(ParseError::Timestamp {
                            row,
                            value: text.to_string(),
                        }
                        .into())
                    }
                }
            }
            Column::new(TIMESTAMP_COLUMN.into(), millis).cast(&timestamp_dtype())?
        }
        DataType::Datetime(_, _) | DataType::Date => column.cast(&timestamp_dtype())?,
        other => {
            return Err(ParseError::UnsupportedDtype {
                column: TIMESTAMP_COLUMN.to_string(),
                dtype: other.to_string(),
            }
            .into())
        }
    };

    let mut out = df.clone();
    out.with_column(parsed)?;
    Ok(out)
}

/// Step 4: coerce the five OHLCV columns to `Float64`.
///
/// Sign and finiteness are not checked here. A parsed NaN counts as missing.
pub fn coerce_numeric(df: &DataFrame) -> Result<DataFrame> {
    let mut out = df.clone();
    for name in NUMERIC_COLUMNS {
        let column = df
            .column(name)
            .map_err(|_| PipelineError::from(SchemaError::MissingColumn(name.into())))?;
        let coerced = coerce_column(name, column)?;
        out.with_column(coerced)?;
    }
    Ok(out)
}

fn coerce_column(name: &str, column: &Column) -> Result<Column> {
    let dtype = column.dtype();
    if dtype.is_float() || dtype.is_integer() {
        return Ok(column.cast(&DataType::Float64)?);
    }
    if dtype != &DataType::String {
        return Err(ParseError::UnsupportedDtype {
            column: name.to_string(),
            dtype: dtype.to_string(),
        }
        .into());
    }

    let values = column.str()?;
    let mut floats = Vec::with_capacity(values.len());
    for (row, value) in values.iter().enumerate() {
        let Some(text) = value else {
            floats.push(None);
            continue;
        };
        match text.trim().parse::<f64>() {
            Ok(v) if v.is_nan() => floats.push(None),
            Ok(v) => floats.push(Some(v)),
            Err(_) => {
                return Err(ParseError::Numeric {
                    column: name.to_string(),
                    row,
                    value: text.to_string(),
                }
                .into())
            }
        }
    }
    Ok(Column::new(name.into(), floats))
}

/// Step 5: drop rows with any null, sort ascending by timestamp and keep the
/// first row of each timestamp.
///
/// The sort is stable, so "first in sorted order" is also "first in the
/// original order". Canonical columns come first in canonical order, any
/// unrecognized columns follow in their source order.
pub fn clean(df: &DataFrame) -> Result<DataFrame> {
    let complete = df.drop_nulls::<String>(None)?;
    let dropped = df.height() - complete.height();

    let deduped = complete
        .lazy()
        .sort(
            [TIMESTAMP_COLUMN],
            SortMultipleOptions::default().with_maintain_order(true),
        )
        .unique_stable(
            Some(vec![TIMESTAMP_COLUMN.into()]),
            UniqueKeepStrategy::First,
        )
        .collect()?;

    debug!(
        null_rows = dropped,
        duplicate_rows = df.height() - dropped - deduped.height(),
        "cleaned rows"
    );

    Ok(deduped.select(column_order(&deduped))?)
}

fn column_order(df: &DataFrame) -> Vec<String> {
    let present: Vec<String> = df
        .get_column_names()
        .iter()
        .map(|n| n.to_string())
        .collect();
    let mut order: Vec<String> = CANONICAL_COLUMNS
        .iter()
        .filter(|c| present.iter().any(|p| p == *c))
        .map(|c| c.to_string())
        .collect();
    order.extend(present.into_iter().filter(|p| !is_canonical_column(p)));
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn flat(columns: &[&str], rows: &[Vec<&str>]) -> RawTable {
        let header = ColumnHeader::Flat(columns.iter().map(|c| c.to_string()).collect());
        RawTable::from_text(header, rows).unwrap()
    }

    fn two_level(fields: &[&str], tickers: &[&str], rows: &[Vec<&str>]) -> RawTable {
        let header = ColumnHeader::Hierarchical(vec![
            fields.iter().map(|c| c.to_string()).collect(),
            tickers.iter().map(|c| c.to_string()).collect(),
        ]);
        RawTable::from_text(header, rows).unwrap()
    }

    fn ohlcv(rows: &[Vec<&str>]) -> RawTable {
        flat(&["Date", "Open", "High", "Low", "Close", "Volume"], rows)
    }

    fn frame_of(raw: RawTable) -> DataFrame {
        let flat = flatten_columns(raw).unwrap();
        normalize_column_names(&flat).unwrap().to_frame().unwrap()
    }

    // ── flatten ──────────────────────────────────────────────────────

    #[test]
    fn flat_header_passes_through() {
        let raw = ohlcv(&[vec!["2022-11-15", "1", "2", "0.5", "1.5", "10"]]);
        let table = flatten_columns(raw).unwrap();
        assert_eq!(table.columns()[0], "Date");
        assert_eq!(table.instrument(), None);
        assert_eq!(table.height(), 1);
    }

    #[test]
    fn two_level_header_collapses_to_fields() {
        let raw = two_level(
            &["Date", "Close", "Volume"],
            &["", "BTC-USD", "BTC-USD"],
            &[vec!["2022-11-15", "16884.6", "100"]],
        );
        let table = flatten_columns(raw).unwrap();
        assert_eq!(table.columns(), ["Date", "Close", "Volume"]);
        assert_eq!(table.instrument(), Some("BTC-USD"));
    }

    #[test]
    fn two_instruments_are_rejected() {
        let raw = two_level(
            &["Close", "Close"],
            &["BTC-USD", "ETH-USD"],
            &[vec!["1", "2"]],
        );
        let err = flatten_columns(raw).unwrap_err();
        match err {
            PipelineError::Schema(SchemaError::MultipleInstruments(found)) => {
                assert_eq!(found, vec!["BTC-USD", "ETH-USD"]);
            }
            other => panic!("expected MultipleInstruments, got {other:?}"),
        }
    }

    #[test]
    fn blank_instrument_level_is_rejected() {
        let raw = two_level(
            &["Date", "Close", "Volume"],
            &["", " ", ""],
            &[vec!["2022-11-15", "16884.6", "100"]],
        );
        let err = flatten_columns(raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Schema);
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::MissingInstrument)
        ));
    }

    #[test]
    fn three_level_header_is_rejected() {
        let header = ColumnHeader::Hierarchical(vec![
            vec!["close".into()],
            vec!["SPY".into()],
            vec!["extra".into()],
        ]);
        let raw = RawTable::from_text(header, &[vec!["1"]]).unwrap();
        let err = flatten_columns(raw).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::UnsupportedHeaderDepth(3))
        ));
    }

    // ── rename ───────────────────────────────────────────────────────

    #[test]
    fn names_are_trimmed_lowercased_and_mapped() {
        let raw = flat(&[" DateTime ", "OPEN", "Adj Close"], &[]);
        let flat = flatten_columns(raw).unwrap();
        let renamed = normalize_column_names(&flat).unwrap();
        assert_eq!(renamed.columns(), ["timestamp", "open", "adj close"]);
        // the input table is untouched
        assert_eq!(flat.columns()[0], " DateTime ");
    }

    #[test]
    fn colliding_synonyms_are_rejected() {
        let raw = flat(&["Date", "Time"], &[]);
        let flat = flatten_columns(raw).unwrap();
        let err = normalize_column_names(&flat).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::DuplicateColumn(ref c)) if c == "timestamp"
        ));
    }

    // ── timestamp ────────────────────────────────────────────────────

    #[test]
    fn timestamp_column_is_required() {
        let df = frame_of(flat(&["open"], &[vec!["1"]]));
        let err = parse_timestamp(&df).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::MissingColumn(ref c)) if c == "timestamp"
        ));
    }

    #[test]
    fn timestamp_parses_to_datetime() {
        let df = frame_of(flat(&["date"], &[vec!["2022-11-15"], vec![""]]));
        let parsed = parse_timestamp(&df).unwrap();
        let column = parsed.column("timestamp").unwrap();
        assert_eq!(column.dtype(), &timestamp_dtype());
        assert_eq!(column.null_count(), 1);
        // the input frame keeps its string column
        assert_eq!(df.column("timestamp").unwrap().dtype(), &DataType::String);
    }

    #[test]
    fn unparseable_timestamp_fails_whole_column() {
        let df = frame_of(flat(
            &["date"],
            &[vec!["2022-11-15"], vec!["yesterday"], vec!["2022-11-17"]],
        ));
        let err = parse_timestamp(&df).unwrap_err();
        match err {
            PipelineError::Parse(ParseError::Timestamp { row, value }) => {
                assert_eq!(row, 1);
                assert_eq!(value, "yesterday");
            }
            other => panic!("expected timestamp parse error, got {other:?}"),
        }
    }

    // ── numeric ──────────────────────────────────────────────────────

    #[test]
    fn numeric_columns_are_required() {
        let df = frame_of(flat(
            &["date", "open", "high", "low", "close"],
            &[vec!["2022-11-15", "1", "2", "0.5", "1.5"]],
        ));
        let err = coerce_numeric(&df).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema(SchemaError::MissingColumn(ref c)) if c == "volume"
        ));
    }

    #[test]
    fn numeric_text_is_coerced_without_sign_checks() {
        let df = frame_of(ohlcv(&[vec!["2022-11-15", "1", "2", "0.5", "-1.5", "NaN"]]));
        let coerced = coerce_numeric(&df).unwrap();
        for name in NUMERIC_COLUMNS {
            assert_eq!(coerced.column(name).unwrap().dtype(), &DataType::Float64);
        }
        let close = coerced.column("close").unwrap().f64().unwrap().get(0);
        assert_eq!(close, Some(-1.5));
        assert_eq!(coerced.column("volume").unwrap().null_count(), 1);
    }

    #[test]
    fn non_numeric_text_fails() {
        let df = frame_of(ohlcv(&[
            vec!["2022-11-15", "1", "2", "0.5", "1.5", "10"],
            vec!["2022-11-16", "1", "two", "0.5", "1.5", "10"],
        ]));
        let err = coerce_numeric(&df).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
        assert!(err.to_string().contains("'two'"));
        assert!(err.to_string().contains("high"));
    }

    // ── clean ────────────────────────────────────────────────────────

    #[test]
    fn clean_drops_partial_rows_sorts_and_dedupes() {
        let df = frame_of(ohlcv(&[
            vec!["2022-11-17", "3", "3", "3", "3", "30"],
            vec!["2022-11-15", "1", "1", "1", "1", "10"],
            vec!["2022-11-16", "2", "2", "2", "", "20"],
            vec!["2022-11-15", "9", "9", "9", "9", "90"],
        ]));
        let typed = coerce_numeric(&parse_timestamp(&df).unwrap()).unwrap();
        let cleaned = clean(&typed).unwrap();

        assert_eq!(cleaned.height(), 2);
        let opens: Vec<Option<f64>> = cleaned.column("open").unwrap().f64().unwrap().iter().collect();
        assert_eq!(opens, vec![Some(1.0), Some(3.0)]);
        assert_eq!(typed.height(), 4);
    }

    #[test]
    fn clean_orders_canonical_columns_first() {
        let df = frame_of(flat(
            &["Volume", "Adj Close", "Close", "Low", "High", "Open", "Date"],
            &[vec!["10", "1", "1", "1", "1", "1", "2022-11-15"]],
        ));
        let typed = coerce_numeric(&parse_timestamp(&df).unwrap()).unwrap();
        let cleaned = clean(&typed).unwrap();
        let names: Vec<String> = cleaned
            .get_column_names()
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(
            names,
            ["timestamp", "open", "high", "low", "close", "volume", "adj close"]
        );
    }

    // ── end to end ───────────────────────────────────────────────────

    #[test]
    fn normalize_produces_canonical_table() {
        let raw = ohlcv(&[
            vec!["2022-11-16", "102", "103", "100", "101", "1100"],
            vec!["2022-11-15", "100", "105", "99", "102", "1000"],
        ])
        .with_instrument("SPY");
        let table = Normalizer::new().normalize(raw).unwrap();

        assert_eq!(table.instrument(), Some("SPY"));
        assert_eq!(table.height(), 2);
        let bars = table.bars().unwrap();
        assert!(bars[0].timestamp < bars[1].timestamp);
        assert_eq!(bars[0].close, 102.0);
    }

    #[test]
    fn normalize_keeps_header_instrument_over_tag() {
        let raw = two_level(
            &["Date", "Open", "High", "Low", "Close", "Volume"],
            &["", "QQQ", "QQQ", "QQQ", "QQQ", "QQQ"],
            &[vec!["2022-11-15", "1", "2", "0.5", "1.5", "10"]],
        )
        .with_instrument("SPY");
        let table = Normalizer::new().normalize(raw).unwrap();
        assert_eq!(table.instrument(), Some("QQQ"));
    }

    #[test]
    fn empty_input_yields_empty_table() {
        let table = Normalizer::new().normalize(ohlcv(&[])).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.frame().width(), 6);
    }
}
