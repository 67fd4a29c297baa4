//! Crawl artifact to index to query, without a live cluster.

use newsindex::{
    read_records, ArtifactWriter, CrawlContent, CrawlLink, CrawlRecord, IndexPipeline,
    IndexSchema, IndexSettings, MemoryEngine, Normalizer, RawRecord, RelationalRow,
    SearchService, SearchSettings,
};
use std::sync::Arc;

fn crawl_record(url: &str, title: &str, headlines: &[&str]) -> CrawlRecord {
    CrawlRecord {
        url: url.into(),
        title: title.into(),
        anchors: headlines
            .iter()
            .enumerate()
            .map(|(idx, text)| CrawlLink {
                href: format!("{url}story/{idx}"),
                text: (*text).into(),
            })
            .collect(),
    }
}

#[tokio::test]
async fn artifact_records_become_searchable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("news_data.jsonl");
    let mut writer = ArtifactWriter::create(&path).unwrap();
    writer
        .write(&crawl_record(
            "https://news.test/",
            "Morning headlines",
            &["Football scores roundup", "Weather today: rain"],
        ))
        .unwrap();
    writer
        .write(&crawl_record("https://news.test/sport/", "Football transfer news", &[]))
        .unwrap();
    writer.write(&crawl_record("https://news.test/empty/", "", &[])).unwrap();
    writer.finish().unwrap();

    let engine = Arc::new(MemoryEngine::new());
    let settings = IndexSettings {
        index: "newsindex".into(),
        schema: IndexSchema::documents(),
        batch_size: 2,
        normalizer: Normalizer::new(CrawlContent::TitleAndAnchors),
    };
    let pipeline = IndexPipeline::new(engine.clone(), settings);
    let records: Vec<RawRecord> = read_records(&path)
        .unwrap()
        .into_iter()
        .map(RawRecord::Crawl)
        .collect();
    let summary = pipeline.run(records).await.unwrap();
    assert_eq!(summary.normalized, 2);
    assert_eq!(summary.dropped, 1);
    assert_eq!(summary.indexed, 2);

    let service = SearchService::new(engine, SearchSettings::new("newsindex"));
    let mut ids: Vec<_> = service
        .handle_search(Some("football"))
        .await
        .unwrap()
        .into_iter()
        .map(|doc| doc.id)
        .collect();
    ids.sort();
    assert_eq!(ids, ["https://news.test/", "https://news.test/sport/"]);

    let weather = service.handle_search(Some("rain")).await.unwrap();
    assert_eq!(weather.len(), 1);
    assert_eq!(weather[0].url.as_deref(), Some("https://news.test/"));
}

#[tokio::test]
async fn rerunning_the_same_input_is_idempotent() {
    let engine = Arc::new(MemoryEngine::new());
    let pipeline = IndexPipeline::new(engine.clone(), IndexSettings::new("newsindex"));
    let rows = || {
        vec![
            RawRecord::Relational(RelationalRow {
                title: Some("Notice".into()),
                content: Some("Library hours extended".into()),
                url: Some("https://school.test/notice/1".into()),
                date: Some("2023-09-01".into()),
            }),
            RawRecord::Relational(RelationalRow {
                title: Some("Lecture".into()),
                content: Some("Guest lecture on Friday".into()),
                url: Some("https://school.test/news/7".into()),
                date: None,
            }),
        ]
    };
    pipeline.run(rows()).await.unwrap();
    let second = pipeline.run(rows()).await.unwrap();
    assert_eq!(second.indexed, 2);
    assert_eq!(engine.len("newsindex"), 2);

    let doc = engine.get("newsindex", "https://school.test/notice/1").unwrap();
    assert_eq!(doc.date.as_deref(), Some("2023-09-01"));
    assert_eq!(doc.title.as_deref(), Some("Notice"));
}
