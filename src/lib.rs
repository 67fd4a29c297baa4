#![warn(missing_docs)]
//! Core library entry points for the newsindex crawler, indexer and search service.

pub mod artifact;
pub mod controls;
pub mod crawler;
pub mod engine;
pub mod fetch;
pub mod frontier;
pub mod html;
pub mod indexer;
pub mod normalizer;
pub mod rate;
pub mod search;
pub mod server;
pub mod source;

pub use artifact::{read_records, ArtifactError, ArtifactWriter};
pub use controls::{CrawlCli, CrawlControls, DomainScope};
pub use crawler::{
    crawl, CrawlAction, CrawlError, CrawlMetrics, CrawlReport, FetchPlan, Pipeline, ResponseVerdict,
};
pub use engine::elastic::ElasticClient;
pub use engine::memory::MemoryEngine;
pub use engine::{
    BulkReport, DocumentFailure, EngineError, IndexSchema, MatchQuery, RawHit, SearchEngine,
};
pub use fetch::{ClientError, FetchConfig, FetchError, FetchedPage, Fetcher, HeaderProfile};
pub use frontier::{EnqueueOutcome, Frontier, FrontierEntry};
pub use html::{Anchor, ExtractError, ExtractedPage, LinkSelector};
pub use indexer::{IndexPipeline, IndexProvisionError, IndexRunSummary, IndexSettings, UpsertError};
pub use normalizer::{
    CrawlContent, CrawlLink, CrawlRecord, Document, NormalizationError, Normalizer, RawRecord, RelationalRow,
};
pub use rate::{DispatchPermit, RateBudget};
pub use search::{SearchError, SearchService, SearchSettings};
pub use server::{router, ServerConfig};
pub use source::{PostgresSource, RowSource, SourceError, TableName};

/// Installs the `tracing` subscriber shared by every binary.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies.
pub fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
