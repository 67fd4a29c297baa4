//! Elasticsearch REST client.

use super::{BulkReport, DocumentFailure, EngineError, IndexSchema, MatchQuery, RawHit, SearchEngine};
use crate::normalizer::Document;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

const MAX_ERROR_BODY: usize = 512;

/// Async client for an Elasticsearch 7+/8 cluster.
#[derive(Clone, Debug)]
pub struct ElasticClient {
    client: Client,
    base: Url,
}

impl ElasticClient {
    /// Builds a client for the cluster at `endpoint`, e.g. `http://localhost:9200`.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, EngineError> {
        let base = Url::parse(endpoint.trim())
            .map_err(|err| EngineError::Config(format!("invalid endpoint {endpoint}: {err}")))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(EngineError::Config(
                "elasticsearch endpoint must be an http(s) URL".into(),
            ));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, EngineError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| EngineError::Config(format!("{} cannot be a base URL", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn error_status(response: Response) -> EngineError {
    let status = response.status().as_u16();
    let mut body = response
        .text()
        .await
        .unwrap_or_else(|_| "<body unavailable>".to_string());
    if body.len() > MAX_ERROR_BODY {
        let mut cut = MAX_ERROR_BODY;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
    }
    EngineError::Status { status, body }
}

#[async_trait]
impl SearchEngine for ElasticClient {
    async fn index_exists(&self, index: &str) -> Result<bool, EngineError> {
        let response = self.client.head(self.endpoint(&[index])?).send().await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(error_status(response).await),
        }
    }

    async fn create_index(&self, index: &str, schema: &IndexSchema) -> Result<(), EngineError> {
        let response = self
            .client
            .put(self.endpoint(&[index])?)
            .json(&schema.to_mapping())
            .send()
            .await?;
        if !response.status().is_success() {
            let err = error_status(response).await;
            return match err {
                EngineError::Status { status: 400, ref body }
                    if body.contains("resource_already_exists_exception") =>
                {
                    Ok(())
                }
                other => Err(other),
            };
        }
        let ack: Acknowledged = response.json().await?;
        if ack.acknowledged {
            Ok(())
        } else {
            Err(EngineError::Rejected(format!(
                "creation of index {index} was not acknowledged"
            )))
        }
    }

    async fn upsert(&self, index: &str, document: &Document) -> Result<(), EngineError> {
        if document.id.is_empty() {
            return Err(EngineError::Rejected("document id must not be empty".into()));
        }
        let response = self
            .client
            .put(self.endpoint(&[index, "_doc", &document.id])?)
            .json(document)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(error_status(response).await)
        }
    }

    async fn bulk_upsert(
        &self,
        index: &str,
        documents: &[Document],
    ) -> Result<BulkReport, EngineError> {
        if documents.is_empty() {
            return Ok(BulkReport::default());
        }
        let body = bulk_body(index, documents)?;
        let response = self
            .client
            .post(self.endpoint(&["_bulk"])?)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"))
            .body(body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_status(response).await);
        }
        let parsed: BulkResponse = response.json().await?;
        Ok(bulk_report(documents, parsed))
    }

    async fn search(&self, index: &str, query: &MatchQuery) -> Result<Vec<RawHit>, EngineError> {
        let response = self
            .client
            .post(self.endpoint(&[index, "_search"])?)
            .json(&search_body(query))
            .send()
            .await?;
        match response.status() {
            status if status.is_success() => {
                let parsed: SearchResponse = response.json().await?;
                Ok(parsed.into_hits())
            }
            StatusCode::NOT_FOUND => Err(EngineError::IndexNotFound(index.to_string())),
            _ => Err(error_status(response).await),
        }
    }
}

/// NDJSON body for `_bulk`: one `index` action per document, so repeated ids replace.
pub(crate) fn bulk_body(index: &str, documents: &[Document]) -> Result<String, serde_json::Error> {
    let mut body = String::new();
    for document in documents {
        let action = json!({"index": {"_index": index, "_id": document.id}});
        body.push_str(&serde_json::to_string(&action)?);
        body.push('\n');
        body.push_str(&serde_json::to_string(document)?);
        body.push('\n');
    }
    Ok(body)
}

pub(crate) fn search_body(query: &MatchQuery) -> Value {
    json!({
        "size": query.size,
        "query": {
            "multi_match": {
                "query": query.text,
                "fields": query.fields,
            }
        }
    })
}

#[derive(Debug, Deserialize)]
struct Acknowledged {
    #[serde(default)]
    acknowledged: bool,
}

#[derive(Debug, Deserialize)]
pub(crate) struct BulkResponse {
    #[serde(default)]
    items: Vec<HashMap<String, BulkItem>>,
}

#[derive(Debug, Deserialize)]
struct BulkItem {
    #[serde(default)]
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

impl BulkItem {
    fn failure_reason(&self) -> Option<String> {
        match &self.error {
            Some(error) => {
                let kind = error.get("type").and_then(Value::as_str).unwrap_or("error");
                let reason = error
                    .get("reason")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                Some(format!("{kind}: {reason}"))
            }
            None if self.status >= 300 => Some(format!("status {}", self.status)),
            None => None,
        }
    }
}

/// Pairs bulk items with the submitted documents; Elasticsearch keeps request order.
pub(crate) fn bulk_report(documents: &[Document], response: BulkResponse) -> BulkReport {
    let mut report = BulkReport::default();
    let mut items = response.items.into_iter();
    for document in documents {
        let outcome = items
            .next()
            .and_then(|item| item.into_values().next())
            .map(|item| item.failure_reason());
        match outcome {
            Some(None) => report.succeeded.push(document.id.clone()),
            Some(Some(reason)) => report.failed.push(DocumentFailure {
                id: document.id.clone(),
                reason,
            }),
            None => report.failed.push(DocumentFailure {
                id: document.id.clone(),
                reason: "missing from bulk response".to_string(),
            }),
        }
    }
    report
}

#[derive(Debug, Deserialize)]
pub(crate) struct SearchResponse {
    hits: HitsEnvelope,
}

#[derive(Debug, Deserialize)]
struct HitsEnvelope {
    #[serde(default)]
    hits: Vec<EsHit>,
}

#[derive(Debug, Deserialize)]
struct EsHit {
    #[serde(rename = "_id")]
    id: String,
    #[serde(rename = "_score", default)]
    score: Option<f64>,
    #[serde(rename = "_source", default)]
    source: Value,
}

impl SearchResponse {
    fn into_hits(self) -> Vec<RawHit> {
        self.hits
            .hits
            .into_iter()
            .map(|hit| RawHit {
                id: hit.id,
                score: hit.score,
                source: hit.source,
            })
            .collect()
    }
}
