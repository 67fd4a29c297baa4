//! Crawl runtime: a fixed pool of rate-limited workers draining the frontier.
//!
//! Each worker owns one rate lane. A fetched page flows through the
//! [`Pipeline`] stages and produces [`CrawlAction`]s, which enqueue
//! discovered links and emit records to the sink channel.

use crate::controls::CrawlControls;
use crate::fetch::{ClientError, FetchError, FetchedPage, Fetcher};
use crate::frontier::{EnqueueOutcome, Frontier, FrontierEntry};
use crate::html::{self, ExtractError, ExtractedPage, LinkSelector};
use crate::normalizer::{CrawlLink, CrawlRecord};
use crate::rate::RateBudget;
use futures_util::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

/// What to request for a dispatched entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPlan {
    /// URL to GET.
    pub url: Url,
}

/// Whether a fetched response is worth extracting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseVerdict {
    /// Run HTML extraction.
    Extract,
    /// Ignore the body.
    Skip,
}

/// Side effects requested by [`Pipeline::on_extract`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlAction {
    /// Offer a discovered link to the frontier.
    Enqueue {
        /// Absolute link target.
        url: String,
        /// Page the link was found on.
        parent: String,
    },
    /// Hand a finished record to the sink.
    Emit(CrawlRecord),
}

/// Fixed, typed stages applied to every page.
#[derive(Debug, Clone)]
pub struct Pipeline {
    selector: LinkSelector,
}

impl Pipeline {
    /// Builds a pipeline extracting anchors matched by `selector`.
    pub fn new(selector: LinkSelector) -> Self {
        Self { selector }
    }

    /// Runs before the request is issued.
    pub fn before_fetch(&self, entry: &FrontierEntry) -> FetchPlan {
        debug!(url = %entry.url, parent = entry.discovered_from.as_deref().unwrap_or("<seed>"), "visiting");
        FetchPlan {
            url: entry.url.clone(),
        }
    }

    /// Decides whether the body should be parsed.
    pub fn on_response(&self, page: &FetchedPage) -> ResponseVerdict {
        let html_like = page
            .content_type
            .as_deref()
            .map(|ct| {
                let ct = ct.to_ascii_lowercase();
                ct.contains("html") || ct.contains("xml")
            })
            .unwrap_or(true);
        debug!(url = %page.url, status = page.status, html = html_like, "response received");
        if html_like {
            ResponseVerdict::Extract
        } else {
            ResponseVerdict::Skip
        }
    }

    /// Parses title and selector-scoped anchors from the body, decoding it
    /// with the `Content-Type` charset when one is declared.
    pub fn extract(&self, page: &FetchedPage) -> Result<ExtractedPage, ExtractError> {
        let charset = page.content_type.as_deref().and_then(html::charset_param);
        html::extract_with_charset(&page.body, &self.selector, charset)
    }

    /// Resolves anchors against the page URL and turns them into actions.
    ///
    /// Links that do not resolve to an http(s) URL are dropped.
    pub fn on_extract(&self, page: &FetchedPage, extracted: ExtractedPage) -> Vec<CrawlAction> {
        let parent = page.url.as_str().to_string();
        let mut actions = Vec::with_capacity(extracted.anchors.len() + 1);
        let mut links = Vec::with_capacity(extracted.anchors.len());
        for anchor in extracted.anchors {
            let resolved = match page.url.join(anchor.href.trim()) {
                Ok(url) if matches!(url.scheme(), "http" | "https") => url,
                _ => {
                    debug!(href = %anchor.href, page = %parent, "dropping unresolvable link");
                    continue;
                }
            };
            actions.push(CrawlAction::Enqueue {
                url: resolved.as_str().to_string(),
                parent: parent.clone(),
            });
            links.push(CrawlLink {
                href: resolved.into(),
                text: anchor.text,
            });
        }
        actions.push(CrawlAction::Emit(CrawlRecord {
            url: parent,
            title: extracted.title,
            anchors: links,
        }));
        actions
    }
}

/// Counters updated by workers during a run.
#[derive(Default)]
pub struct CrawlMetrics {
    pages_fetched: AtomicUsize,
    fetch_errors: AtomicUsize,
    extract_errors: AtomicUsize,
    skipped_responses: AtomicUsize,
    urls_discovered: AtomicUsize,
    urls_enqueued: AtomicUsize,
    duplicates: AtomicUsize,
    out_of_scope: AtomicUsize,
    redirects_refused: AtomicUsize,
    duplicate_landings: AtomicUsize,
    records_emitted: AtomicUsize,
    records_dropped: AtomicUsize,
}

impl CrawlMetrics {
    fn record_page_fetched(&self) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fetch_error(&self) {
        self.fetch_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_extract_error(&self) {
        self.extract_errors.fetch_add(1, Ordering::Relaxed);
    }

    fn record_skipped(&self) {
        self.skipped_responses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_redirect_refused(&self) {
        self.redirects_refused.fetch_add(1, Ordering::Relaxed);
    }

    fn record_duplicate_landing(&self) {
        self.duplicate_landings.fetch_add(1, Ordering::Relaxed);
    }

    fn record_enqueue(&self, outcome: EnqueueOutcome) {
        self.urls_discovered.fetch_add(1, Ordering::Relaxed);
        let counter = match outcome {
            EnqueueOutcome::Queued => &self.urls_enqueued,
            EnqueueOutcome::Duplicate => &self.duplicates,
            EnqueueOutcome::OutOfScope => &self.out_of_scope,
            EnqueueOutcome::Invalid | EnqueueOutcome::Closed => return,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of every counter.
    pub fn snapshot(&self, elapsed: Duration) -> CrawlReport {
        CrawlReport {
            elapsed,
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            extract_errors: self.extract_errors.load(Ordering::Relaxed),
            skipped_responses: self.skipped_responses.load(Ordering::Relaxed),
            urls_discovered: self.urls_discovered.load(Ordering::Relaxed),
            urls_enqueued: self.urls_enqueued.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            out_of_scope: self.out_of_scope.load(Ordering::Relaxed),
            redirects_refused: self.redirects_refused.load(Ordering::Relaxed),
            duplicate_landings: self.duplicate_landings.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            records_dropped: self.records_dropped.load(Ordering::Relaxed),
        }
    }
}

/// Final counters of a crawl run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlReport {
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Pages fetched with a 2xx status.
    pub pages_fetched: usize,
    /// Fetches that failed or returned a non-2xx status.
    pub fetch_errors: usize,
    /// Pages whose HTML could not be processed.
    pub extract_errors: usize,
    /// Responses skipped as non-HTML.
    pub skipped_responses: usize,
    /// Links offered to the frontier.
    pub urls_discovered: usize,
    /// Links accepted by the frontier.
    pub urls_enqueued: usize,
    /// Links already seen.
    pub duplicates: usize,
    /// Links outside the allowed domains.
    pub out_of_scope: usize,
    /// Redirects that pointed outside the allowed domains and were not followed.
    pub redirects_refused: usize,
    /// Pages that redirected onto a URL already queued or visited.
    pub duplicate_landings: usize,
    /// Records handed to the sink.
    pub records_emitted: usize,
    /// Records lost because the sink was closed.
    pub records_dropped: usize,
}

impl CrawlReport {
    /// Logs the report at `info`.
    pub fn log(&self) {
        let secs = self.elapsed.as_secs_f32().max(f32::EPSILON);
        info!(
            elapsed_secs = secs,
            pages_fetched = self.pages_fetched,
            pages_per_sec = self.pages_fetched as f32 / secs,
            fetch_errors = self.fetch_errors,
            extract_errors = self.extract_errors,
            skipped = self.skipped_responses,
            discovered = self.urls_discovered,
            enqueued = self.urls_enqueued,
            duplicates = self.duplicates,
            out_of_scope = self.out_of_scope,
            redirects_refused = self.redirects_refused,
            duplicate_landings = self.duplicate_landings,
            emitted = self.records_emitted,
            dropped = self.records_dropped,
            "crawl finished"
        );
    }
}

struct CompletionGuard<'a> {
    frontier: &'a Frontier,
    entry: &'a FrontierEntry,
}

impl Drop for CompletionGuard<'_> {
    fn drop(&mut self) {
        self.frontier.complete(self.entry);
    }
}

#[derive(Clone)]
struct Worker {
    lane: usize,
    frontier: Arc<Frontier>,
    budget: Arc<RateBudget>,
    fetcher: Fetcher,
    pipeline: Arc<Pipeline>,
    metrics: Arc<CrawlMetrics>,
    sink: mpsc::Sender<CrawlRecord>,
}

impl Worker {
    async fn run(self) {
        while let Some(entry) = self.frontier.next_entry().await {
            let _complete = CompletionGuard {
                frontier: &self.frontier,
                entry: &entry,
            };
            let plan = self.pipeline.before_fetch(&entry);
            let page = {
                let _permit = self.budget.acquire(self.lane).await;
                self.fetcher.fetch(&plan.url).await
            };
            match page {
                Ok(page) => self.handle_page(&entry, page).await,
                Err(err) => self.fetch_failed(&plan.url, err),
            }
        }
        debug!(lane = self.lane, "worker finished");
    }

    fn fetch_failed(&self, url: &Url, err: FetchError) {
        if let FetchError::OffScopeRedirect(target) = &err {
            self.metrics.record_redirect_refused();
            debug!(lane = self.lane, url = %url, target = %target, "redirect leaves allowed domains");
            return;
        }
        self.metrics.record_fetch_error();
        warn!(lane = self.lane, url = %url, error = %err, "fetch failed");
    }

    async fn handle_page(&self, entry: &FrontierEntry, page: FetchedPage) {
        if !self.frontier.claim_landing(entry, &page.url) {
            self.metrics.record_duplicate_landing();
            debug!(url = %entry.url, landed = %page.url, "redirected onto a known url");
            return;
        }
        self.metrics.record_page_fetched();
        if self.pipeline.on_response(&page) == ResponseVerdict::Skip {
            self.metrics.record_skipped();
            return;
        }
        let extracted = match self.pipeline.extract(&page) {
            Ok(extracted) => extracted,
            Err(err) => {
                self.metrics.record_extract_error();
                warn!(lane = self.lane, url = %page.url, error = %err, "extract failed");
                return;
            }
        };
        for action in self.pipeline.on_extract(&page, extracted) {
            match action {
                CrawlAction::Enqueue { url, parent } => {
                    let outcome = self.frontier.enqueue(&url, Some(&parent));
                    self.metrics.record_enqueue(outcome);
                }
                CrawlAction::Emit(record) => {
                    if self.sink.send(record).await.is_ok() {
                        self.metrics.record_emitted();
                    } else {
                        self.metrics.record_dropped();
                        error!(url = %page.url, "record sink closed; stopping crawl");
                        self.frontier.close();
                    }
                }
            }
        }
    }
}

/// Errors that prevent a crawl from starting.
#[derive(Debug, Error)]
pub enum CrawlError {
    /// The HTTP client could not be built from the fetch configuration.
    #[error("invalid crawl client configuration: {0}")]
    Client(#[from] ClientError),
}

/// Crawls from `seeds` until the frontier is exhausted, the page budget is
/// spent or the deadline passes, sending one record per extracted page to `sink`.
///
/// A closed `sink` ends the run early; records that could not be delivered
/// are counted in [`CrawlReport::records_dropped`].
pub async fn crawl(
    controls: CrawlControls,
    seeds: &[String],
    sink: mpsc::Sender<CrawlRecord>,
) -> Result<CrawlReport, CrawlError> {
    let start = Instant::now();
    let fetcher = Fetcher::new(controls.fetch(), controls.scope())?;
    let frontier = Arc::new(Frontier::new(
        controls.scope().clone(),
        controls.page_budget(),
    ));
    for seed in seeds {
        match frontier.seed(seed) {
            EnqueueOutcome::Queued => debug!(url = %seed, "seeded"),
            outcome => warn!(url = %seed, ?outcome, "seed not accepted"),
        }
    }
    if frontier.pending() == 0 {
        warn!("no usable seeds; nothing to crawl");
    }
    if controls.is_unbounded() {
        warn!("no page budget or deadline set; the crawl runs until every reachable in-scope page is visited");
    }
    info!(
        parallelism = controls.parallelism(),
        delay_ms = controls.delay().as_millis() as u64,
        selector = controls.selector().as_str(),
        "crawl starting"
    );

    let deadline = controls.deadline().map(|limit| {
        let frontier = Arc::clone(&frontier);
        tokio::spawn(async move {
            sleep(limit).await;
            info!(limit_secs = limit.as_secs(), "deadline reached; closing frontier");
            frontier.close();
        })
    });

    let metrics = Arc::new(CrawlMetrics::default());
    let template = Worker {
        lane: 0,
        frontier: Arc::clone(&frontier),
        budget: Arc::new(RateBudget::new(controls.parallelism(), controls.delay())),
        fetcher,
        pipeline: Arc::new(Pipeline::new(controls.selector().clone())),
        metrics: Arc::clone(&metrics),
        sink,
    };
    let workers: Vec<_> = (0..controls.parallelism())
        .map(|lane| {
            let worker = Worker {
                lane,
                ..template.clone()
            };
            tokio::spawn(worker.run())
        })
        .collect();
    drop(template);

    for joined in join_all(workers).await {
        if let Err(err) = joined {
            error!(error = %err, "crawl worker panicked");
        }
    }
    if let Some(handle) = deadline {
        handle.abort();
    }

    let report = metrics.snapshot(start.elapsed());
    report.log();
    Ok(report)
}
