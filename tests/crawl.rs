//! End-to-end crawl against an in-process fixture site.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode, Uri};
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::Router;
use newsindex::{crawl, CrawlControls, CrawlRecord, DomainScope, FetchConfig, LinkSelector};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

type Hits = Arc<Mutex<HashMap<String, usize>>>;

const ROOT: &str = r#"<html><head><title>Front &amp; Center</title></head><body>
<div class="hotnews">
  <a href="/a">A story</a>
  <a href="b">B story</a>
  <a href="/missing">Gone</a>
  <a href="/logo.png">Logo</a>
  <a href="http://other.test/x">Elsewhere</a>
</div>
<a href="/hidden">Not a headline</a>
</body></html>"#;

const PAGE_A: &str = r#"<html><head><title>Page A</title></head><body>
<ul class="hotnews"><li><a href="/">Home</a></li><li><a href="/b#top">B again</a></li></ul>
</body></html>"#;

const PAGE_B: &str = "<html><head><title>Page B</title></head><body><p>no links</p></body></html>";

const HUB: &str = r#"<html><head><title>Hub</title></head><body>
<div class="hotnews"><a href="/moved">Moved</a><a href="/b">B direct</a></div>
</body></html>"#;

const OFFSITE: &str = "<html><head><title>Offsite</title></head><body></body></html>";

async fn serve_page(State((hits, addr)): State<(Hits, SocketAddr)>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *hits.lock().unwrap().entry(path.clone()).or_default() += 1;
    match path.as_str() {
        "/" => Html(ROOT).into_response(),
        "/a" => Html(PAGE_A).into_response(),
        "/b" => Html(PAGE_B).into_response(),
        "/hub" => Html(HUB).into_response(),
        "/moved" => Redirect::to("/b").into_response(),
        // Same server, but under a host name outside the allowed domains.
        "/away" => Redirect::to(&format!("http://localhost:{}/offsite", addr.port())).into_response(),
        "/offsite" => Html(OFFSITE).into_response(),
        "/logo.png" => ([(header::CONTENT_TYPE, "image/png")], vec![0x89u8, 0x50, 0x4e, 0x47]).into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn fixture_site() -> (SocketAddr, Hits) {
    let hits: Hits = Arc::default();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .fallback(serve_page)
        .with_state((Arc::clone(&hits), addr));
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, hits)
}

type Arrivals = Arc<Mutex<Vec<Instant>>>;

/// Page `n` links to page `n + 1`, forever.
async fn endless_page(State(arrivals): State<Arrivals>, Path(n): Path<u64>) -> Html<String> {
    arrivals.lock().unwrap().push(Instant::now());
    Html(format!(
        r#"<html><head><title>Page {n}</title></head><body><div class="hotnews"><a href="/n/{next}">Next</a></div></body></html>"#,
        next = n + 1
    ))
}

async fn endless_site() -> (SocketAddr, Arrivals) {
    let arrivals: Arrivals = Arc::default();
    let app = Router::new()
        .route("/n/{n}", get(endless_page))
        .with_state(Arc::clone(&arrivals));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (addr, arrivals)
}

fn controls(parallelism: usize) -> CrawlControls {
    let fetch = FetchConfig {
        timeout: Duration::from_secs(5),
        ..FetchConfig::default()
    };
    CrawlControls::new(
        parallelism,
        Duration::ZERO,
        DomainScope::new(["127.0.0.1"]),
        LinkSelector::new(".hotnews a").unwrap(),
        fetch,
    )
}

async fn run(controls: CrawlControls, seed: String) -> (newsindex::CrawlReport, Vec<CrawlRecord>) {
    let (sink, mut rx) = mpsc::channel(4);
    let collector = tokio::spawn(async move {
        let mut records = Vec::new();
        while let Some(record) = rx.recv().await {
            records.push(record);
        }
        records
    });
    let report = tokio::time::timeout(Duration::from_secs(30), crawl(controls, &[seed], sink))
        .await
        .expect("crawl terminates")
        .expect("crawl starts");
    let records = collector.await.unwrap();
    (report, records)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn crawl_visits_each_in_scope_page_once() {
    let (addr, hits) = fixture_site().await;
    let (report, records) = run(controls(2), format!("http://{addr}/")).await;

    let hits = hits.lock().unwrap().clone();
    for path in ["/", "/a", "/b", "/missing", "/logo.png"] {
        assert_eq!(hits.get(path), Some(&1), "{path} fetched once");
    }
    assert!(!hits.contains_key("/hidden"));
    assert_eq!(hits.len(), 5);

    let mut urls: Vec<_> = records.iter().map(|r| r.url.clone()).collect();
    urls.sort();
    assert_eq!(
        urls,
        [
            format!("http://{addr}/"),
            format!("http://{addr}/a"),
            format!("http://{addr}/b"),
        ]
    );
    let root = records
        .iter()
        .find(|r| r.url == format!("http://{addr}/"))
        .unwrap();
    assert_eq!(root.title, "Front & Center");
    assert_eq!(root.anchors.len(), 5);
    assert_eq!(root.anchors[1].href, format!("http://{addr}/b"));

    assert_eq!(report.pages_fetched, 4);
    assert_eq!(report.fetch_errors, 1);
    assert_eq!(report.skipped_responses, 1);
    assert_eq!(report.records_emitted, 3);
    assert_eq!(report.urls_enqueued, 4);
    assert_eq!(report.out_of_scope, 1);
    assert_eq!(report.duplicates, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn page_budget_bounds_the_run() {
    let (addr, hits) = fixture_site().await;
    let controls = controls(1).with_page_budget(Some(1));
    let (report, records) = run(controls, format!("http://{addr}/")).await;

    assert_eq!(report.pages_fetched, 1);
    assert_eq!(records.len(), 1);
    assert_eq!(hits.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn out_of_scope_seed_is_never_fetched() {
    let (addr, hits) = fixture_site().await;
    let controls = CrawlControls::new(
        1,
        Duration::ZERO,
        DomainScope::new(["example.com"]),
        LinkSelector::new(".hotnews a").unwrap(),
        FetchConfig::default(),
    );
    let (report, records) = run(controls, format!("http://{addr}/")).await;
    assert_eq!(report.pages_fetched, 0);
    assert!(records.is_empty());
    assert!(hits.lock().unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redirects_never_leave_allowed_domains() {
    let (addr, hits) = fixture_site().await;
    let (report, records) = run(controls(1), format!("http://{addr}/away")).await;

    let hits = hits.lock().unwrap().clone();
    assert_eq!(hits.get("/away"), Some(&1));
    assert!(!hits.contains_key("/offsite"));
    assert!(records.is_empty());
    assert_eq!(report.redirects_refused, 1);
    assert_eq!(report.pages_fetched, 0);
    assert_eq!(report.fetch_errors, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redirect_onto_known_url_is_not_processed_twice() {
    let (addr, _hits) = fixture_site().await;
    let (report, records) = run(controls(1), format!("http://{addr}/hub")).await;

    let mut urls: Vec<_> = records.iter().map(|r| r.url.clone()).collect();
    urls.sort();
    assert_eq!(urls, [format!("http://{addr}/b"), format!("http://{addr}/hub")]);
    assert_eq!(report.duplicate_landings, 1);
    assert_eq!(report.pages_fetched, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn closed_sink_stops_the_crawl() {
    let (addr, hits) = fixture_site().await;
    let (sink, records) = mpsc::channel::<CrawlRecord>(1);
    drop(records);

    let report = tokio::time::timeout(
        Duration::from_secs(30),
        crawl(controls(1), &[format!("http://{addr}/")], sink),
    )
    .await
    .expect("crawl terminates")
    .expect("crawl starts");

    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.records_emitted, 0);
    assert_eq!(report.records_dropped, 1);
    assert_eq!(hits.lock().unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn deadline_ends_an_endless_crawl() {
    let (addr, arrivals) = endless_site().await;
    let delay = Duration::from_millis(100);
    let controls = CrawlControls::new(
        1,
        delay,
        DomainScope::new(["127.0.0.1"]),
        LinkSelector::new(".hotnews a").unwrap(),
        FetchConfig::default(),
    )
    .with_deadline(Some(Duration::from_millis(600)));

    let (report, records) = run(controls, format!("http://{addr}/n/0")).await;

    assert!(report.elapsed < Duration::from_secs(5), "{:?}", report.elapsed);
    assert!(report.pages_fetched >= 3, "{report:?}");
    assert!(report.pages_fetched <= 8, "{report:?}");
    assert_eq!(records.len(), report.pages_fetched);

    let seen = arrivals.lock().unwrap().clone();
    assert_eq!(seen.len(), report.pages_fetched);
    for pair in seen.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_millis(80), "requests spaced by the delay");
    }

    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(arrivals.lock().unwrap().len(), seen.len(), "no dispatch after the run ends");
}
