//! Query service: turns a raw query string into ranked documents.

use crate::engine::{EngineError, MatchQuery, SearchEngine};
use crate::normalizer::Document;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Query-side configuration.
#[derive(Debug, Clone)]
pub struct SearchSettings {
    /// Index queried.
    pub index: String,
    /// Fields matched, optionally boosted as `name^boost`.
    pub fields: Vec<String>,
    /// Maximum documents per response.
    pub max_results: usize,
}

impl SearchSettings {
    /// Matches `content` only, returning up to ten hits.
    pub fn new(index: impl Into<String>) -> Self {
        Self {
            index: index.into(),
            fields: vec!["content".to_string()],
            max_results: 10,
        }
    }

    /// Adds `title` to the matched fields.
    pub fn with_title(mut self) -> Self {
        if !self.fields.iter().any(|f| f == "title") {
            self.fields.push("title".to_string());
        }
        self
    }
}

/// Reasons a search request fails.
#[derive(Debug, Error)]
pub enum SearchError {
    /// No query text was supplied.
    #[error("missing query parameter")]
    MissingQuery,
    /// The engine could not answer.
    #[error("search backend failed: {0}")]
    Backend(#[from] EngineError),
}

/// Runs match queries against one index through an injected engine.
#[derive(Clone)]
pub struct SearchService {
    engine: Arc<dyn SearchEngine>,
    settings: SearchSettings,
}

impl SearchService {
    /// Creates the service. The engine handle is shared read-only by all requests.
    pub fn new(engine: Arc<dyn SearchEngine>, settings: SearchSettings) -> Self {
        Self { engine, settings }
    }

    /// Answers one query; blank input is rejected before reaching the engine.
    pub async fn handle_search(&self, raw_query: Option<&str>) -> Result<Vec<Document>, SearchError> {
        let text = raw_query
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .ok_or(SearchError::MissingQuery)?;
        let query = MatchQuery {
            text: text.to_string(),
            fields: self.settings.fields.clone(),
            size: self.settings.max_results,
        };
        let hits = self.engine.search(&self.settings.index, &query).await?;
        debug!(index = %self.settings.index, query = %text, hits = hits.len(), "search answered");

        let documents = hits
            .into_iter()
            .filter_map(|hit| match decode_hit(hit.id.as_str(), hit.source) {
                Ok(document) => Some(document),
                Err(err) => {
                    warn!(id = %hit.id, error = %err, "dropping undecodable hit");
                    None
                }
            })
            .collect();
        Ok(documents)
    }
}

/// Decodes a hit's source. Sources written without an `id` field take the
/// engine's document id.
fn decode_hit(id: &str, mut source: Value) -> Result<Document, serde_json::Error> {
    if let Value::Object(fields) = &mut source {
        fields
            .entry("id")
            .or_insert_with(|| Value::String(id.to_string()));
    }
    serde_json::from_value(source)
}
