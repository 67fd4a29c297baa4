use anyhow::{Context, Result};
use clap::Parser;
use newsindex::{
    init_tracing, router, ElasticClient, SearchEngine, SearchService, SearchSettings,
    ServerConfig,
};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "newsindex-search",
    about = "HTTP API answering full-text queries against the news index"
)]
struct SearchCli {
    /// Address to bind the HTTP server to (host:port).
    #[arg(long, env = "NEWSINDEX_BIND", default_value = "127.0.0.1:8080")]
    bind: String,

    /// Elasticsearch endpoint.
    #[arg(long, env = "NEWSINDEX_ELASTIC_URL", default_value = "http://localhost:9200")]
    elastic_url: String,

    /// Index queried.
    #[arg(long, env = "NEWSINDEX_INDEX", default_value = "newsindex")]
    index: String,

    /// Maximum documents per response.
    #[arg(long, env = "NEWSINDEX_MAX_RESULTS", default_value_t = 10)]
    max_results: usize,

    /// Also match the title field.
    #[arg(long, env = "NEWSINDEX_MATCH_TITLE", default_value_t = false)]
    match_title: bool,

    /// Directory served for non-API paths.
    #[arg(long, env = "NEWSINDEX_STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Allowed CORS origin (repeatable).
    #[arg(long = "cors-origin", env = "NEWSINDEX_CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    /// Seconds before engine requests time out.
    #[arg(long, env = "NEWSINDEX_ELASTIC_TIMEOUT_SECS", default_value_t = 10)]
    timeout_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = SearchCli::parse();

    let engine: Arc<dyn SearchEngine> = Arc::new(
        ElasticClient::new(&cli.elastic_url, Duration::from_secs(cli.timeout_secs.max(1)))
            .context("invalid elasticsearch endpoint")?,
    );
    let mut settings = SearchSettings::new(cli.index.clone());
    settings.max_results = cli.max_results.max(1);
    if cli.match_title {
        settings = settings.with_title();
    }
    let service = SearchService::new(engine, settings);
    let config = ServerConfig {
        static_dir: cli.static_dir.clone(),
        cors_origins: cli.cors_origins.clone(),
    };
    let app = router(service, &config);

    let addr: SocketAddr = cli
        .bind
        .parse()
        .with_context(|| format!("invalid bind address {}", cli.bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, index = %cli.index, "newsindex-search listening");
    axum::serve(listener, app).await.context("server shutdown")?;
    Ok(())
}
