//! Barsmith Core: OHLCV ingestion, normalization and validation.
//!
//! This crate turns vendor bar tables of unknown shape into one canonical
//! table per instrument:
//! - Raw tables with flat or field × instrument headers
//! - Normalizer: flatten, rename, parse timestamps, coerce numerics, clean
//! - Validator: independent check of the canonical contract
//! - Artifact store for cleaned tables, with metadata sidecars
//! - Upstream sources (Yahoo Finance chart API)

pub mod config;
pub mod data;
pub mod domain;
pub mod error;
pub mod schema;

pub use config::{ConfigError, PipelineConfig};
pub use data::{
    CanonicalTable, ColumnHeader, IngestPipeline, Normalizer, RawTable, RawTableSource, Validator,
};
pub use error::{ErrorKind, PipelineError, Result};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: pipeline types are Send + Sync.
    ///
    /// Callers normalize different instruments on different threads; if any of
    /// these stops being shareable the build breaks here.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<data::RawTable>();
        require_sync::<data::RawTable>();
        require_send::<data::FlatTable>();
        require_sync::<data::FlatTable>();
        require_send::<data::CanonicalTable>();
        require_sync::<data::CanonicalTable>();
        require_send::<domain::Bar>();
        require_sync::<domain::Bar>();

        require_send::<data::Normalizer>();
        require_sync::<data::Normalizer>();
        require_send::<data::Validator>();
        require_sync::<data::Validator>();
        require_send::<data::IngestPipeline>();
        require_sync::<data::IngestPipeline>();
        require_send::<data::CsvArtifactStore>();
        require_sync::<data::CsvArtifactStore>();
        require_send::<data::YahooProvider>();
        require_sync::<data::YahooProvider>();

        require_send::<PipelineConfig>();
        require_sync::<PipelineConfig>();
        require_send::<PipelineError>();
        require_sync::<PipelineError>();
    }

    /// The store and the source are used behind trait objects.
    #[test]
    fn seams_are_object_safe() {
        fn _store(_: &dyn data::ArtifactStore) {}
        fn _source(_: &dyn data::RawTableSource) {}
    }
}
