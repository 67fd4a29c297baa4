//! Maps crawl records and relational rows onto the canonical indexed document.

use crate::html::Anchor;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The canonical indexed unit, addressed by `id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identity: the source URL.
    pub id: String,
    /// Optional short title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Primary searchable text.
    pub content: String,
    /// Canonical source location.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Publication date, kept as the source wrote it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
}

impl Document {
    /// Builds a document with only identity and content set.
    pub fn new(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: None,
            content: content.into(),
            url: None,
            date: None,
        }
    }
}

/// Serialized anchor inside a crawl record; `href` is already absolute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlLink {
    /// Absolute link target.
    pub href: String,
    /// Visible link text.
    pub text: String,
}

impl From<Anchor> for CrawlLink {
    fn from(anchor: Anchor) -> Self {
        Self {
            href: anchor.href,
            text: anchor.text,
        }
    }
}

/// One fetched page as emitted by the crawler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlRecord {
    /// Page the record was extracted from.
    pub url: String,
    /// Page title; empty when the page has none.
    #[serde(default)]
    pub title: String,
    /// Selector-scoped links found on the page.
    #[serde(default)]
    pub anchors: Vec<CrawlLink>,
}

/// One row of the relational source. Every column may be null.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationalRow {
    /// `title` column.
    pub title: Option<String>,
    /// `content` column.
    pub content: Option<String>,
    /// `url` column, used as identity.
    pub url: Option<String>,
    /// `date` column as text.
    pub date: Option<String>,
}

/// Source-tagged input to the normalizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawRecord {
    /// Produced by the crawler.
    Crawl(CrawlRecord),
    /// Produced by the relational source.
    Relational(RelationalRow),
}

/// How crawl records fill `Document::content`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum CrawlContent {
    /// Only the page title.
    #[default]
    Title,
    /// Title followed by each anchor text on its own line.
    TitleAndAnchors,
}

/// Records that cannot become an indexable document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizationError {
    /// No URL or key to derive an id from.
    #[error("record has no identity (url)")]
    MissingIdentity,
    /// Nothing to search.
    #[error("record {id} has no content")]
    EmptyContent {
        /// Identity of the rejected record.
        id: String,
    },
}

/// Pure mapping from raw records to documents.
#[derive(Debug, Clone, Copy, Default)]
pub struct Normalizer {
    crawl_content: CrawlContent,
}

impl Normalizer {
    /// Builds a normalizer.
    pub fn new(crawl_content: CrawlContent) -> Self {
        Self { crawl_content }
    }

    /// Normalizes any raw record.
    pub fn normalize(&self, record: RawRecord) -> Result<Document, NormalizationError> {
        match record {
            RawRecord::Crawl(record) => self.normalize_crawl(record),
            RawRecord::Relational(row) => normalize_row(row),
        }
    }

    fn normalize_crawl(&self, record: CrawlRecord) -> Result<Document, NormalizationError> {
        let id = non_blank(Some(record.url)).ok_or(NormalizationError::MissingIdentity)?;
        let title = non_blank(Some(record.title));
        let mut content = title.clone().unwrap_or_default();
        if self.crawl_content == CrawlContent::TitleAndAnchors {
            for anchor in record.anchors.iter().filter(|a| !a.text.trim().is_empty()) {
                if !content.is_empty() {
                    content.push('\n');
                }
                content.push_str(anchor.text.trim());
            }
        }
        if content.is_empty() {
            return Err(NormalizationError::EmptyContent { id });
        }
        Ok(Document {
            url: Some(id.clone()),
            id,
            title,
            content,
            date: None,
        })
    }
}

fn normalize_row(row: RelationalRow) -> Result<Document, NormalizationError> {
    let id = non_blank(row.url).ok_or(NormalizationError::MissingIdentity)?;
    let content = match row.content {
        Some(content) if !content.trim().is_empty() => content,
        _ => return Err(NormalizationError::EmptyContent { id }),
    };
    Ok(Document {
        url: Some(id.clone()),
        id,
        title: row.title,
        content,
        date: row.date,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CrawlRecord {
        CrawlRecord {
            url: "https://news.test/".into(),
            title: "Front page".into(),
            anchors: vec![
                CrawlLink {
                    href: "https://news.test/a".into(),
                    text: "Football scores".into(),
                },
                CrawlLink {
                    href: "https://news.test/b".into(),
                    text: "  ".into(),
                },
            ],
        }
    }

    #[test]
    fn crawl_record_keyed_by_url() {
        let doc = Normalizer::default()
            .normalize(RawRecord::Crawl(record()))
            .expect("normalize");
        assert_eq!(doc.id, "https://news.test/");
        assert_eq!(doc.url.as_deref(), Some("https://news.test/"));
        assert_eq!(doc.title.as_deref(), Some("Front page"));
        assert_eq!(doc.content, "Front page");
        assert!(doc.date.is_none());
    }

    #[test]
    fn crawl_content_can_include_anchor_text() {
        let doc = Normalizer::new(CrawlContent::TitleAndAnchors)
            .normalize(RawRecord::Crawl(record()))
            .expect("normalize");
        assert_eq!(doc.content, "Front page\nFootball scores");
    }

    #[test]
    fn untitled_page_without_anchors_rejected() {
        let mut untitled = record();
        untitled.title.clear();
        let err = Normalizer::default()
            .normalize(RawRecord::Crawl(untitled.clone()))
            .expect_err("empty content");
        assert_eq!(
            err,
            NormalizationError::EmptyContent {
                id: "https://news.test/".into()
            }
        );

        let doc = Normalizer::new(CrawlContent::TitleAndAnchors)
            .normalize(RawRecord::Crawl(untitled))
            .expect("anchor text is content");
        assert_eq!(doc.title, None);
        assert_eq!(doc.content, "Football scores");
    }

    #[test]
    fn relational_row_copied_verbatim() {
        let row = RelationalRow {
            title: Some("Notice".into()),
            content: Some("Campus closed  Monday".into()),
            url: Some("https://school.test/n/1".into()),
            date: Some("2023-09-01".into()),
        };
        let doc = Normalizer::default()
            .normalize(RawRecord::Relational(row))
            .expect("normalize");
        assert_eq!(doc.id, "https://school.test/n/1");
        assert_eq!(doc.title.as_deref(), Some("Notice"));
        assert_eq!(doc.content, "Campus closed  Monday");
        assert_eq!(doc.date.as_deref(), Some("2023-09-01"));
    }

    #[test]
    fn rows_without_identity_or_content_rejected() {
        let normalizer = Normalizer::default();
        let missing_url = RelationalRow {
            content: Some("body".into()),
            ..RelationalRow::default()
        };
        assert_eq!(
            normalizer.normalize(RawRecord::Relational(missing_url)),
            Err(NormalizationError::MissingIdentity)
        );
        assert_eq!(
            normalizer.normalize(RawRecord::Relational(RelationalRow::default())),
            Err(NormalizationError::MissingIdentity)
        );
        let blank = RelationalRow {
            url: Some("https://school.test/x".into()),
            content: Some(" ".into()),
            ..RelationalRow::default()
        };
        assert!(matches!(
            normalizer.normalize(RawRecord::Relational(blank)),
            Err(NormalizationError::EmptyContent { .. })
        ));
    }

    #[test]
    fn document_json_omits_absent_fields() {
        let json = serde_json::to_value(Document::new("a", "football scores")).expect("json");
        assert_eq!(json, serde_json::json!({"id": "a", "content": "football scores"}));
    }
}
