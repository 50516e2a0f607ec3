//! Ingest pipeline: normalize, then validate.

use crate::config::PipelineConfig;
use crate::data::canonical::CanonicalTable;
use crate::data::normalize::Normalizer;
use crate::data::raw::RawTable;
use crate::data::validate::Validator;
use crate::error::Result;
use tracing::info_span;

/// Normalizes a raw table and confirms the result before handing it out.
#[derive(Debug, Default, Clone)]
pub struct IngestPipeline {
    normalizer: Normalizer,
}

impl IngestPipeline {
    pub fn new(normalizer: Normalizer) -> Self {
        Self { normalizer }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.normalizer())
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn run(&self, raw: RawTable) -> Result<CanonicalTable> {
        let span = info_span!("ingest", instrument = raw.instrument().unwrap_or("unknown"));
        let _guard = span.enter();

        let table = self.normalizer.normalize(raw)?;
        Validator::validate_table(&table)?;
        Ok(table)
    }
}
