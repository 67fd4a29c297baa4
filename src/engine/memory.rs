//! In-process engine with create-or-replace upserts and term-overlap ranking.
//!
//! Useful for local runs without a cluster and as the engine behind the
//! integration tests. Ranking is a plain term-frequency score, not BM25.

use super::{BulkReport, DocumentFailure, EngineError, IndexSchema, MatchQuery, RawHit, SearchEngine};
use crate::normalizer::Document;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{PoisonError, RwLock};

/// Longest id accepted, matching the Elasticsearch `_id` limit.
const MAX_ID_BYTES: usize = 512;

#[derive(Default)]
struct MemoryIndex {
    schema: IndexSchema,
    documents: BTreeMap<String, Document>,
}

/// Thread-safe in-memory [`SearchEngine`].
#[derive(Default)]
pub struct MemoryEngine {
    indices: RwLock<HashMap<String, MemoryIndex>>,
}

impl MemoryEngine {
    /// Creates an engine with no indices.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents stored in `index`.
    pub fn len(&self, index: &str) -> usize {
        self.read(|indices| indices.get(index).map(|idx| idx.documents.len()).unwrap_or(0))
    }

    /// True when `index` holds no documents.
    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    /// Fetches one document by id.
    pub fn get(&self, index: &str, id: &str) -> Option<Document> {
        self.read(|indices| indices.get(index)?.documents.get(id).cloned())
    }

    /// Schema the index was created with.
    pub fn schema(&self, index: &str) -> Option<IndexSchema> {
        self.read(|indices| indices.get(index).map(|idx| idx.schema.clone()))
    }

    fn read<T>(&self, f: impl FnOnce(&HashMap<String, MemoryIndex>) -> T) -> T {
        let guard = self.indices.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write<T>(&self, f: impl FnOnce(&mut HashMap<String, MemoryIndex>) -> T) -> T {
        let mut guard = self.indices.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

fn validate(document: &Document) -> Result<(), String> {
    if document.id.is_empty() {
        return Err("document id must not be empty".into());
    }
    if document.id.len() > MAX_ID_BYTES {
        return Err(format!(
            "id is too long, must be no longer than {MAX_ID_BYTES} bytes"
        ));
    }
    Ok(())
}

#[async_trait]
impl SearchEngine for MemoryEngine {
    async fn index_exists(&self, index: &str) -> Result<bool, EngineError> {
        Ok(self.read(|indices| indices.contains_key(index)))
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<(), EngineError> {
        self.write(|indices| {
            if indices.contains_key(index) {
                return Err(EngineError::Rejected(format!("index {index} already exists")));
            }
            indices.insert(
                index.to_string(),
                MemoryIndex {
                    schema: schema.clone(),
                    documents: BTreeMap::new(),
                },
            );
            Ok(())
        })
    }

    async fn upsert(&self, index: &str, document: &Document) -> Result<(), EngineError> {
        validate(document).map_err(EngineError::Rejected)?;
        self.write(|indices| {
            indices
                .entry(index.to_string())
                .or_default()
                .documents
                .insert(document.id.clone(), document.clone());
        });
        Ok(())
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[Document],
    ) -> Result<BulkReport, EngineError> {
        let mut report = BulkReport::default();
        self.write(|indices| {
            let target = indices.entry(index.to_string()).or_default();
            for document in documents {
                match validate(document) {
                    Ok(()) => {
                        target
                            .documents
                            .insert(document.id.clone(), document.clone());
                        report.succeeded.push(document.id.clone());
                    }
                    Err(reason) => report.failed.push(DocumentFailure {
                        id: document.id.clone(),
                        reason,
                    }),
                }
            }
        });
        Ok(report)
    }

    async fn search(&self, index: &str, query: &MatchQuery) -> Result<Vec<RawHit>, EngineError> {
        let terms = tokenize(&query.text);
        let fields: Vec<(&str, f64)> = query.fields.iter().map(|f| parse_field(f)).collect();
        let mut scored = self.read(|indices| {
            let target = indices
                .get(index)
                .ok_or_else(|| EngineError::IndexNotFound(index.to_string()))?;
            let mut scored = Vec::new();
            for document in target.documents.values() {
                let score = score(document, &terms, &fields);
                if score > 0.0 {
                    scored.push((score, document.clone()));
                }
            }
            Ok::<_, EngineError>(scored)
        })?;
        scored.sort_by(|(a_score, a), (b_score, b)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(query.size);
        scored
            .into_iter()
            .map(|(score, document)| {
                Ok(RawHit {
                    id: document.id.clone(),
                    score: Some(score),
                    source: serde_json::to_value(&document)?,
                })
            })
            .collect()
    }
}

fn parse_field(spec: &str) -> (&str, f64) {
    match spec.split_once('^') {
        Some((name, boost)) => (name, boost.parse().unwrap_or(1.0)),
        None => (spec, 1.0),
    }
}

fn field_text<'a>(document: &'a Document, field: &str) -> Option<&'a str> {
    match field {
        "id" => Some(&document.id),
        "content" => Some(&document.content),
        "title" => document.title.as_deref(),
        "url" => document.url.as_deref(),
        "date" => document.date.as_deref(),
        _ => None,
    }
}

fn score(document: &Document, terms: &[String], fields: &[(&str, f64)]) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let mut total = 0.0;
    for &(field, boost) in fields {
        let Some(text) = field_text(document, field) else {
            continue;
        };
        let tokens = tokenize(text);
        if tokens.is_empty() {
            continue;
        }
        let hits = terms
            .iter()
            .map(|term| tokens.iter().filter(|token| *token == term).count())
            .sum::<usize>();
        total += boost * hits as f64 / (tokens.len() as f64).sqrt();
    }
    total
}

fn is_cjk(ch: char) -> bool {
    matches!(ch,
        '\u{3040}'..='\u{30FF}'
        | '\u{3400}'..='\u{4DBF}'
        | '\u{4E00}'..='\u{9FFF}'
        | '\u{AC00}'..='\u{D7AF}'
        | '\u{F900}'..='\u{FAFF}')
}

/// Lowercased alphanumeric runs; CJK ideographs become one token each.
fn tokenize(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if is_cjk(ch) {
            if !current.is_empty() {
                tokens.push(std::mem::take(&mut current));
            }
            tokens.push(ch.to_string());
        } else if ch.is_alphanumeric() {
            current.extend(ch.to_lowercase());
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
