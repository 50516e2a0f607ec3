//! Raw tables as received from a data source.
//!
//! A [`RawTable`] keeps every cell as optional text and records the header
//! shape as an explicit [`ColumnHeader`] variant, detected once when the table
//! is read. Vendors disagree on header layout: most write a single row of
//! names, pandas writes one row per column level when a frame has
//! field × ticker columns.
//!
//! Rows are shared behind an `Arc`, so header-only transformations produce new
//! tables without copying cell data.

use csv::{ReaderBuilder, WriterBuilder};
use polars::prelude::*;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Cell contents treated as missing (compared after trimming).
pub const MISSING_TOKENS: [&str; 13] = [
    "", "NA", "N/A", "n/a", "NaN", "nan", "-nan", "-NaN", "null", "NULL", "None", "<NA>", "#N/A",
];

pub fn is_missing(cell: &str) -> bool {
    MISSING_TOKENS.contains(&cell.trim())
}

type Rows = Arc<Vec<Vec<Option<String>>>>;

/// Errors produced while building or reading a raw table.
#[derive(Debug, Error)]
pub enum RawTableError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("header_rows must be at least 1")]
    InvalidHeaderRows,

    #[error("input has no header row")]
    NoHeader,

    #[error("header row {level} has {found} columns, expected {expected}")]
    RaggedHeader {
        level: usize,
        expected: usize,
        found: usize,
    },

    #[error("data row {row} has {found} cells, expected {expected}")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
}

/// Shape of a raw table's column header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnHeader {
    /// One header row of column names.
    Flat(Vec<String>),
    /// Two or more header rows, indexed `levels[depth][column]`.
    ///
    /// Level 0 is the field level (open/high/...), level 1 the instrument level.
    Hierarchical(Vec<Vec<String>>),
}

impl ColumnHeader {
    /// Detect the header shape from the header rows of a source file.
    pub fn detect(mut rows: Vec<Vec<String>>) -> Result<Self, RawTableError> {
        match rows.len() {
            0 => Err(RawTableError::NoHeader),
            1 => Ok(ColumnHeader::Flat(rows.remove(0))),
            _ => {
                let expected = rows[0].len();
                for (level, row) in rows.iter().enumerate().skip(1) {
                    if row.len() != expected {
                        return Err(RawTableError::RaggedHeader {
                            level,
                            expected,
                            found: row.len(),
                        });
                    }
                }
                Ok(ColumnHeader::Hierarchical(rows))
            }
        }
    }

    /// Number of header levels.
    pub fn depth(&self) -> usize {
        match self {
            ColumnHeader::Flat(_) => 1,
            ColumnHeader::Hierarchical(levels) => levels.len(),
        }
    }

    /// Number of columns.
    pub fn width(&self) -> usize {
        match self {
            ColumnHeader::Flat(names) => names.len(),
            ColumnHeader::Hierarchical(levels) => levels.first().map_or(0, Vec::len),
        }
    }

    /// The names on one header level.
    pub fn level(&self, depth: usize) -> Option<&[String]> {
        match (self, depth) {
            (ColumnHeader::Flat(names), 0) => Some(names),
            (ColumnHeader::Flat(_), _) => None,
            (ColumnHeader::Hierarchical(levels), d) => levels.get(d).map(Vec::as_slice),
        }
    }

    fn rows(&self) -> Vec<&[String]> {
        match self {
            ColumnHeader::Flat(names) => vec![names.as_slice()],
            ColumnHeader::Hierarchical(levels) => levels.iter().map(Vec::as_slice).collect(),
        }
    }
}

/// A table of optional text cells with an arbitrary header shape.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    header: ColumnHeader,
    rows: Rows,
    instrument: Option<String>,
}

impl RawTable {
    /// Build a table, checking that every row matches the header width.
    pub fn new(
        header: ColumnHeader,
        rows: Vec<Vec<Option<String>>>,
    ) -> Result<Self, RawTableError> {
        let expected = header.width();
        for (row, cells) in rows.iter().enumerate() {
            if cells.len() != expected {
                return Err(RawTableError::RaggedRow {
                    row,
                    expected,
                    found: cells.len(),
                });
            }
        }
        Ok(Self {
            header,
            rows: Arc::new(rows),
            instrument: None,
        })
    }

    /// Build a table whose rows are known to match the header width.
    pub(crate) fn from_trusted(header: ColumnHeader, rows: Vec<Vec<Option<String>>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == header.width()));
        Self {
            header,
            rows: Arc::new(rows),
            instrument: None,
        }
    }

    /// Build a table from text cells, mapping missing-value tokens to `None`.
    pub fn from_text<S: AsRef<str>>(
        header: ColumnHeader,
        rows: &[Vec<S>],
    ) -> Result<Self, RawTableError> {
        let cells = rows
            .iter()
            .map(|row| row.iter().map(|c| text_cell(c.as_ref())).collect())
            .collect();
        Self::new(header, cells)
    }

    /// Read a CSV document whose first `header_rows` records form the header.
    pub fn from_reader<R: Read>(reader: R, header_rows: usize) -> Result<Self, RawTableError> {
        if header_rows == 0 {
            return Err(RawTableError::InvalidHeaderRows);
        }

        let mut rdr = ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        let mut header = Vec::with_capacity(header_rows);
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record?;
            if header.len() < header_rows {
                header.push(record.iter().map(str::to_string).collect());
            } else {
                rows.push(record.iter().map(text_cell).collect());
            }
        }

        if header.len() < header_rows {
            return Err(RawTableError::NoHeader);
        }

        Self::new(ColumnHeader::detect(header)?, rows)
    }

    /// Read a CSV file whose first `header_rows` records form the header.
    pub fn from_path(path: &Path, header_rows: usize) -> Result<Self, RawTableError> {
        let file = fs::File::open(path)?;
        Self::from_reader(file, header_rows)
    }

    /// Attach the instrument identifier this table describes.
    pub fn with_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    pub fn header(&self) -> &ColumnHeader {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<Option<String>>] {
        &self.rows
    }

    pub fn instrument(&self) -> Option<&str> {
        self.instrument.as_deref()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn width(&self) -> usize {
        self.header.width()
    }

    /// Write the table as CSV: header rows first, missing cells left empty.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), RawTableError> {
        let mut wtr = WriterBuilder::new().has_headers(false).from_writer(writer);
        for level in self.header.rows() {
            wtr.write_record(level)?;
        }
        for row in self.rows.iter() {
            wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Write the table to a CSV file, creating parent directories.
    pub fn write_csv_path(&self, path: &Path) -> Result<(), RawTableError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.write_csv(fs::File::create(path)?)
    }

    /// Replace the header with a flat one of the same width, sharing the rows.
    ///
    /// An instrument found in the header takes precedence over the one the
    /// table was tagged with.
    pub(crate) fn into_flat(self, columns: Vec<String>, instrument: Option<String>) -> FlatTable {
        debug_assert_eq!(columns.len(), self.header.width());
        FlatTable {
            columns,
            rows: self.rows,
            instrument: instrument.or(self.instrument),
        }
    }
}

fn text_cell(cell: &str) -> Option<String> {
    if is_missing(cell) {
        None
    } else {
        Some(cell.to_string())
    }
}

/// A raw table whose header has been collapsed to a single level.
#[derive(Debug, Clone, PartialEq)]
pub struct FlatTable {
    columns: Vec<String>,
    rows: Rows,
    instrument: Option<String>,
}

impl FlatTable {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn instrument(&self) -> Option<&str> {
        self.instrument.as_deref()
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// A new table with different column names over the same rows.
    pub fn with_columns(&self, columns: Vec<String>) -> FlatTable {
        debug_assert_eq!(columns.len(), self.columns.len());
        FlatTable {
            columns,
            rows: Arc::clone(&self.rows),
            instrument: self.instrument.clone(),
        }
    }

    /// Convert to a frame of `String` columns, one per header entry.
    ///
    /// Column names must be unique.
    pub fn to_frame(&self) -> PolarsResult<DataFrame> {
        let columns = self
            .columns
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let values: Vec<Option<&str>> =
                    self.rows.iter().map(|row| row[idx].as_deref()).collect();
                Column::new(name.as_str().into(), values)
            })
            .collect();
        DataFrame::new(columns)
    }
}
