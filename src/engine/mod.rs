//! Search engine abstraction shared by the indexer and the query service.
//!
//! Both paths hold an `Arc<dyn SearchEngine>` built once at startup; nothing
//! here is global.

pub mod elastic;
pub mod memory;

use crate::normalizer::Document;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Failures reported by an engine adapter.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Adapter configuration is unusable.
    #[error("invalid engine configuration: {0}")]
    Config(String),
    /// Transport failure talking to the engine.
    #[error("engine request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The engine answered with an error status.
    #[error("engine returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        body: String,
    },
    /// The engine response could not be decoded.
    #[error("failed to decode engine response: {0}")]
    Decode(#[from] serde_json::Error),
    /// The engine refused the operation.
    #[error("engine rejected request: {0}")]
    Rejected(String),
    /// The target index does not exist.
    #[error("index {0} not found")]
    IndexNotFound(String),
}

/// Mapping type of an indexed field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Analyzed full text.
    Text,
    /// Exact-match keyword.
    Keyword,
}

/// One field of an index mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMapping {
    /// Field name in the document source.
    pub name: String,
    /// Mapping type.
    pub kind: FieldKind,
}

/// Field mapping an index is created with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    /// Declared fields.
    pub fields: Vec<FieldMapping>,
    /// Analyzer applied to text fields; engine default when `None`.
    pub text_analyzer: Option<String>,
}

impl IndexSchema {
    /// Mapping for [`Document`]: `title`/`content` analyzed, the rest keywords.
    pub fn documents() -> Self {
        let field = |name: &str, kind| FieldMapping {
            name: name.to_string(),
            kind,
        };
        Self {
            fields: vec![
                field("id", FieldKind::Keyword),
                field("title", FieldKind::Text),
                field("content", FieldKind::Text),
                field("url", FieldKind::Keyword),
                field("date", FieldKind::Keyword),
            ],
            text_analyzer: None,
        }
    }

    /// Uses `analyzer` for every text field.
    pub fn with_text_analyzer(mut self, analyzer: Option<String>) -> Self {
        self.text_analyzer = analyzer;
        self
    }

    /// Elasticsearch create-index body.
    pub fn to_mapping(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            let mapping = match field.kind {
                FieldKind::Text => match &self.text_analyzer {
                    Some(analyzer) => json!({"type": "text", "analyzer": analyzer}),
                    None => json!({"type": "text"}),
                },
                FieldKind::Keyword => json!({"type": "keyword"}),
            };
            properties.insert(field.name.clone(), mapping);
        }
        json!({"mappings": {"properties": properties}})
    }
}

impl Default for IndexSchema {
    fn default() -> Self {
        Self::documents()
    }
}

/// A full-text match over one or more fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchQuery {
    /// Free text as typed by the user.
    pub text: String,
    /// Fields to match, optionally boosted as `name^boost`.
    pub fields: Vec<String>,
    /// Maximum hits returned.
    pub size: usize,
}

/// One ranked hit with its undecoded source payload.
#[derive(Debug, Clone, PartialEq)]
pub struct RawHit {
    /// Engine document id.
    pub id: String,
    /// Relevance score when the engine reports one.
    pub score: Option<f64>,
    /// Stored document source.
    pub source: Value,
}

/// Why a single document of a bulk write failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentFailure {
    /// Identity of the failed document.
    pub id: String,
    /// Engine-reported reason.
    pub reason: String,
}

/// Per-document outcome of a bulk write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkReport {
    /// Ids written successfully.
    pub succeeded: Vec<String>,
    /// Ids the engine rejected.
    pub failed: Vec<DocumentFailure>,
}

impl BulkReport {
    /// Marks every document failed for the same reason.
    pub fn all_failed(documents: &[Document], reason: &str) -> Self {
        Self {
            succeeded: Vec::new(),
            failed: documents
                .iter()
                .map(|doc| DocumentFailure {
                    id: doc.id.clone(),
                    reason: reason.to_string(),
                })
                .collect(),
        }
    }

    /// True when no document failed.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Operations the indexer and query service need from a search engine.
///
/// Upserts are create-or-replace by `Document::id`.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Whether `index` exists.
    async fn index_exists(&self, index: &str) -> Result<bool, EngineError>;

    /// Creates `index` with `schema`.
    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<(), EngineError>;

    /// Writes one document keyed by its id.
    async fn upsert(&self, index: &str, document: &Document) -> Result<(), EngineError>;

    /// Writes many documents in one round trip, reporting each outcome.
    ///
    /// `Err` means the round trip itself failed and nothing is known per document.
    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[Document],
    ) -> Result<BulkReport, EngineError>;

    /// Runs a match query, returning hits in ranking order.
    async fn search(&self, index: &str, query: &MatchQuery) -> Result<Vec<RawHit>, EngineError>;
}
