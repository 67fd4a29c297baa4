use anyhow::{Context, Result};
use clap::Parser;
use newsindex::{crawl, init_tracing, ArtifactWriter, CrawlCli, CrawlRecord};
use tokio::sync::mpsc;
use tracing::info;

const SINK_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");
    let cli = CrawlCli::parse();
    let controls = cli.build_controls().context("invalid crawl controls")?;
    let mut writer = ArtifactWriter::create(&cli.output)?;

    let (sink, mut records) = mpsc::channel::<CrawlRecord>(SINK_CAPACITY);
    let writer_task = tokio::spawn(async move {
        while let Some(record) = records.recv().await {
            writer.write(&record)?;
        }
        let written = writer.written();
        writer.finish()?;
        Ok::<_, newsindex::ArtifactError>(written)
    });

    let report = crawl(controls, &cli.seeds, sink)
        .await
        .context("failed to start crawl")?;
    let written = writer_task
        .await
        .context("artifact writer task failed")?
        .with_context(|| format!("failed to write {:?}", cli.output))?;

    info!(
        output = %cli.output.display(),
        records = written,
        pages = report.pages_fetched,
        errors = report.fetch_errors + report.extract_errors,
        dropped = report.records_dropped,
        "crawl artifact written"
    );
    Ok(())
}
