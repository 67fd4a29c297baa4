//! Idempotent upsert pipeline from raw records into a search index.

use crate::engine::{BulkReport, DocumentFailure, EngineError, IndexSchema, SearchEngine};
use crate::normalizer::{Document, Normalizer, RawRecord};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

/// Documents sent per bulk request unless configured otherwise.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Target index and batching for one indexing run.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Index name, e.g. `newsindex`.
    pub index: String,
    /// Mapping used when the index has to be created.
    pub schema: IndexSchema,
    /// Documents per bulk round trip (at least one).
    pub batch_size: usize,
    /// Record to document mapping.
    pub normalizer: Normalizer,
}

impl IndexSettings {
    /// Settings for `index` with the default schema and batch size.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            schema: IndexSchema::documents(),
            batch_size: DEFAULT_BATCH_SIZE,
            normalizer: Normalizer::default(),
        }
    }
}

/// The index could not be verified or created. Aborts the run.
#[derive(Debug, Error)]
pub enum IndexProvisionError {
    /// The existence check failed.
    #[error("failed to check index {index}: {source}")]
    Check {
        /// Index name.
        index: String,
        /// Engine failure.
        #[source]
        source: EngineError,
    },
    /// The create request was refused.
    #[error("failed to create index {index}: {source}")]
    Create {
        /// Index name.
        index: String,
        /// Engine failure.
        #[source]
        source: EngineError,
    },
}

/// A single document could not be written.
#[derive(Debug, Error)]
#[error("failed to upsert {id}: {source}")]
pub struct UpsertError {
    /// Identity of the document.
    pub id: String,
    /// Engine failure.
    #[source]
    pub source: EngineError,
}

/// Counts reported at the end of [`IndexPipeline::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexRunSummary {
    /// Records that became documents.
    pub normalized: usize,
    /// Records rejected by the normalizer.
    pub dropped: usize,
    /// Documents the engine accepted.
    pub indexed: usize,
    /// Documents the engine rejected.
    pub failed: Vec<DocumentFailure>,
}

/// Writes normalized documents into one index through an injected engine.
pub struct IndexPipeline {
    engine: Arc<dyn SearchEngine>,
    settings: IndexSettings,
}

impl IndexPipeline {
    /// Creates a pipeline over `engine`.
    pub fn new(engine: Arc<dyn SearchEngine>, settings: IndexSettings) -> Self {
        Self { engine, settings }
    }

    /// Creates the index when it does not exist yet.
    pub async fn ensure_index(&self) -> Result<(), IndexProvisionError> {
        let index = &self.settings.index;
        let exists = self
            .engine
            .index_exists(index)
            .await
            .map_err(|source| IndexProvisionError::Check {
                index: index.clone(),
                source,
            })?;
        if exists {
            debug!(index = %index, "index already exists");
            return Ok(());
        }
        self.engine
            .create_index(index, &self.settings.schema)
            .await
            .map_err(|source| IndexProvisionError::Create {
                index: index.clone(),
                source,
            })?;
        info!(index = %index, "created index");
        Ok(())
    }

    /// Creates or replaces one document by id.
    pub async fn upsert(&self, document: &Document) -> Result<(), UpsertError> {
        self.engine
            .upsert(&self.settings.index, document)
            .await
            .map_err(|source| UpsertError {
                id: document.id.clone(),
                source,
            })
    }

    /// Writes one batch, reporting every document's outcome.
    ///
    /// A failed round trip marks the whole batch failed.
    pub async fn bulk_upsert(&self, documents: &[Document]) -> BulkReport {
        if documents.is_empty() {
            return BulkReport::default();
        }
        match self.engine.bulk_upsert(&self.settings.index, documents).await {
            Ok(report) => {
                for failure in &report.failed {
                    warn!(index = %self.settings.index, id = %failure.id, reason = %failure.reason, "document rejected");
                }
                report
            }
            Err(err) => {
                warn!(index = %self.settings.index, documents = documents.len(), error = %err, "bulk request failed");
                BulkReport::all_failed(documents, &err.to_string())
            }
        }
    }

    /// Ensures the index, normalizes `records` and upserts them in batches.
    pub async fn run<I>(&self, records: I) -> Result<IndexRunSummary, IndexProvisionError>
    where
        I: IntoIterator<Item = RawRecord>,
    {
        if let Err(err) = self.ensure_index().await {
            error!(error = %err, "index provisioning failed");
            return Err(err);
        }

        let batch_size = self.settings.batch_size.max(1);
        let mut summary = IndexRunSummary::default();
        let mut batch = Vec::with_capacity(batch_size);
        for record in records {
            match self.settings.normalizer.normalize(record) {
                Ok(document) => {
                    summary.normalized += 1;
                    batch.push(document);
                }
                Err(err) => {
                    summary.dropped += 1;
                    warn!(error = %err, "dropping record");
                }
            }
            if batch.len() >= batch_size {
                self.flush(&mut batch, &mut summary).await;
            }
        }
        self.flush(&mut batch, &mut summary).await;

        info!(
            index = %self.settings.index,
            normalized = summary.normalized,
            dropped = summary.dropped,
            indexed = summary.indexed,
            failed = summary.failed.len(),
            "indexing finished"
        );
        Ok(summary)
    }

    async fn flush(&self, batch: &mut Vec<Document>, summary: &mut IndexRunSummary) {
        if batch.is_empty() {
            return;
        }
        let report = self.bulk_upsert(batch).await;
        debug!(index = %self.settings.index, succeeded = report.succeeded.len(), failed = report.failed.len(), "batch written");
        summary.indexed += report.succeeded.len();
        summary.failed.extend(report.failed);
        batch.clear();
    }
}
