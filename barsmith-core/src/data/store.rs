//! Artifact store for canonical tables.
//!
//! Layout: `{root}/instrument={INSTRUMENT}/{YYYY}_{MM}_{DD}_{HH}_clean.csv`
//!
//! - Atomic writes (write to .tmp, rename into place)
//! - Metadata sidecar per artifact (row count, timestamp range, hash)
//! - Injectable clock, so artifact names are reproducible under test

use crate::data::canonical::CanonicalTable;
use crate::data::raw::{RawTable, RawTableError};
use crate::data::timestamp::format_timestamp;
use crate::error::PipelineError;
use chrono::NaiveDateTime;
use polars::prelude::*;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

/// Directory label for tables without an instrument.
pub const UNKNOWN_INSTRUMENT: &str = "unknown";

const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("artifact write failed: {0}")]
    Write(String),

    #[error("artifact serialization failed: {0}")]
    Serialize(String),

    #[error("artifact metadata read failed: {0}")]
    MetaRead(String),

    #[error("instrument label '{0}' cannot name a directory")]
    InvalidInstrument(String),

    #[error("artifact read failed: {0}")]
    Read(#[from] RawTableError),

    #[error(transparent)]
    Table(#[from] PipelineError),
}

/// Destination for canonical tables produced by the normalizer.
pub trait ArtifactStore: Send + Sync {
    /// Persist `table`, returning the path of the written artifact.
    fn persist(&self, table: &CanonicalTable) -> Result<PathBuf, StoreError>;
}

/// Metadata sidecar for one artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactMeta {
    pub instrument: String,
    pub rows: usize,
    pub first_timestamp: Option<NaiveDateTime>,
    pub last_timestamp: Option<NaiveDateTime>,
    pub data_hash: String,
    pub processed_at: NaiveDateTime,
}

pub type Clock = Arc<dyn Fn() -> NaiveDateTime + Send + Sync>;

/// Writes canonical tables as CSV files partitioned by instrument.
pub struct CsvArtifactStore {
    root: PathBuf,
    clock: Clock,
}

impl CsvArtifactStore {
    /// A store under `root` using the local wall clock.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            clock: Arc::new(|| chrono::Local::now().naive_local()),
        }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Directory for one instrument: `{root}/instrument={INSTRUMENT}/`
    fn instrument_dir(&self, instrument: Option<&str>) -> Result<PathBuf, StoreError> {
        let label = instrument_label(instrument)?;
        Ok(self.root.join(format!("instrument={label}")))
    }

    /// Path of the artifact written for `instrument` at time `at`.
    ///
    /// The instrument always maps to a single directory directly under the
    /// root; path separators in the label are replaced with `_`.
    pub fn artifact_path(
        &self,
        instrument: Option<&str>,
        at: NaiveDateTime,
    ) -> Result<PathBuf, StoreError> {
        Ok(self
            .instrument_dir(instrument)?
            .join(format!("{}_clean.csv", at.format("%Y_%m_%d_%H"))))
    }

    /// Sidecar path for an artifact: `…_clean.csv` → `…_clean.meta.json`.
    pub fn meta_path(artifact: &Path) -> PathBuf {
        artifact.with_extension("meta.json")
    }

    pub fn load_meta(artifact: &Path) -> Result<ArtifactMeta, StoreError> {
        let text = fs::read_to_string(Self::meta_path(artifact))
            .map_err(|e| StoreError::MetaRead(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| StoreError::Serialize(format!("meta parse: {e}")))
    }

    /// Re-read an artifact as a flat raw table.
    pub fn load(artifact: &Path) -> Result<RawTable, StoreError> {
        Ok(RawTable::from_path(artifact, 1)?)
    }
}

impl ArtifactStore for CsvArtifactStore {
    fn persist(&self, table: &CanonicalTable) -> Result<PathBuf, StoreError> {
        let now = (self.clock)();
        let path = self.artifact_path(table.instrument(), now)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .map_err(|e| StoreError::Write(format!("failed to create dir: {e}")))?;
        }

        let bytes = encode_csv(table.frame())?;
        write_atomic(&path, &bytes)?;

        let range = table.timestamp_range()?;
        let meta = ArtifactMeta {
            instrument: table
                .instrument()
                .unwrap_or(UNKNOWN_INSTRUMENT)
                .to_string(),
            rows: table.height(),
            first_timestamp: range.map(|(first, _)| first),
            last_timestamp: range.map(|(_, last)| last),
            data_hash: blake3::hash(&bytes).to_hex().to_string(),
            processed_at: now,
        };
        let meta_json = serde_json::to_string_pretty(&meta)
            .map_err(|e| StoreError::Serialize(format!("meta serialization: {e}")))?;
        write_atomic(&Self::meta_path(&path), meta_json.as_bytes())?;

        tracing::info!(
            path = %path.display(),
            rows = meta.rows,
            first = ?meta.first_timestamp.map(format_timestamp),
            "wrote artifact"
        );
        Ok(path)
    }
}

impl std::fmt::Debug for CsvArtifactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsvArtifactStore")
            .field("root", &self.root)
            .finish()
    }
}

/// Directory-safe form of an instrument label.
fn instrument_label(instrument: Option<&str>) -> Result<String, StoreError> {
    let raw = instrument.map(str::trim).unwrap_or(UNKNOWN_INSTRUMENT);
    let label: String = raw
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect();
    if label.is_empty() || label == "." || label == ".." {
        return Err(StoreError::InvalidInstrument(raw.to_string()));
    }
    Ok(label)
}

fn encode_csv(df: &DataFrame) -> Result<Vec<u8>, StoreError> {
    let mut buf = Vec::new();
    CsvWriter::new(&mut buf)
        .include_header(true)
        .with_datetime_format(Some(DATETIME_FORMAT.to_string()))
        .finish(&mut df.clone())
        .map_err(|e| StoreError::Serialize(format!("csv encode: {e}")))?;
    Ok(buf)
}

/// Write to `{path}.tmp`, then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp_path = PathBuf::from(tmp);

    fs::write(&tmp_path, bytes).map_err(|e| StoreError::Write(format!("{e}")))?;
    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        StoreError::Write(format!("atomic rename failed: {e}"))
    })
}
