//! Raw table ingestion, normalization, validation and persistence

pub mod canonical;
pub mod normalize;
pub mod pipeline;
pub mod provider;
pub mod raw;
pub mod store;
pub mod timestamp;
pub mod validate;
pub mod yahoo;

pub use canonical::CanonicalTable;
pub use normalize::Normalizer;
pub use pipeline::IngestPipeline;
pub use provider::{FetchRequest, Interval, ProviderError, RawTableSource};
pub use raw::{ColumnHeader, FlatTable, RawTable, RawTableError};
pub use store::{ArtifactMeta, ArtifactStore, CsvArtifactStore, StoreError};
pub use validate::Validator;
pub use yahoo::YahooProvider;
