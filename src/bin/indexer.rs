use anyhow::{Context, Result};
use clap::Parser;
use newsindex::source::DEFAULT_TABLES;
use newsindex::{
    init_tracing, read_records, CrawlContent, ElasticClient, IndexPipeline, IndexSchema,
    IndexSettings, Normalizer, PostgresSource, RawRecord, RowSource, SearchEngine,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(
    name = "newsindex-indexer",
    about = "Normalize crawl artifacts and database rows and upsert them into Elasticsearch"
)]
struct IndexerCli {
    /// Elasticsearch endpoint
    #[arg(long, env = "NEWSINDEX_ELASTIC_URL", default_value = "http://localhost:9200")]
    elastic_url: String,

    /// Target index name
    #[arg(long, env = "NEWSINDEX_INDEX", default_value = "newsindex")]
    index: String,

    /// Crawl artifact (JSON lines) to index
    #[arg(long, env = "NEWSINDEX_ARTIFACT")]
    artifact: Option<PathBuf>,

    /// Postgres connection string for the relational source
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Tables read from the relational source (repeatable, `schema.table` allowed)
    #[arg(
        long = "table",
        env = "NEWSINDEX_TABLES",
        value_delimiter = ',',
        default_values = DEFAULT_TABLES
    )]
    tables: Vec<String>,

    /// Documents per bulk request
    #[arg(long, env = "NEWSINDEX_BATCH_SIZE", default_value_t = 500)]
    batch_size: usize,

    /// How crawl records fill the document content
    #[arg(long, value_enum, default_value_t = CrawlContent::Title)]
    content: CrawlContent,

    /// Analyzer for text fields when the index is created (e.g. ik_max_word)
    #[arg(long, env = "NEWSINDEX_TEXT_ANALYZER")]
    text_analyzer: Option<String>,

    /// Seconds before engine requests time out
    #[arg(long, env = "NEWSINDEX_ELASTIC_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = IndexerCli::parse();
    anyhow::ensure!(
        cli.artifact.is_some() || cli.database_url.is_some(),
        "nothing to index: pass --artifact and/or --database-url"
    );

    let mut records = Vec::new();
    if let Some(path) = &cli.artifact {
        let crawled = read_records(path)?;
        info!(path = %path.display(), records = crawled.len(), "loaded crawl artifact");
        records.extend(crawled.into_iter().map(RawRecord::Crawl));
    }
    if let Some(database_url) = &cli.database_url {
        let source = PostgresSource::connect(database_url, &cli.tables)
            .await
            .context("failed to open relational source")?;
        let rows = source.load().await.context("failed to load relational rows")?;
        info!(tables = ?cli.tables, rows = rows.len(), "loaded relational rows");
        records.extend(rows.into_iter().map(RawRecord::Relational));
    }

    let engine: Arc<dyn SearchEngine> = Arc::new(
        ElasticClient::new(&cli.elastic_url, Duration::from_secs(cli.timeout_secs.max(1)))
            .context("invalid elasticsearch endpoint")?,
    );
    let settings = IndexSettings {
        index: cli.index.clone(),
        schema: IndexSchema::documents().with_text_analyzer(cli.text_analyzer.clone()),
        batch_size: cli.batch_size.max(1),
        normalizer: Normalizer::new(cli.content),
    };
    let pipeline = IndexPipeline::new(engine, settings);
    let summary = pipeline
        .run(records)
        .await
        .with_context(|| format!("failed to provision index {}", cli.index))?;

    if !summary.failed.is_empty() {
        warn!(
            failed = summary.failed.len(),
            "some documents were rejected; see the warnings above"
        );
    }
    Ok(())
}
