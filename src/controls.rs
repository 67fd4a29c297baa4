//! Crawl throttle, scope and header controls parsed from the command line.

use crate::fetch::{FetchConfig, HeaderProfile};
use crate::html::{LinkSelector, SelectorError};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Hosts a crawl is allowed to visit.
///
/// An empty allowlist admits every host.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DomainScope {
    allowed: Vec<String>,
}

impl DomainScope {
    /// Builds a scope from host names; entries are trimmed and lowercased.
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = hosts
            .into_iter()
            .map(|host| host.as_ref().trim().to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        Self { allowed }
    }

    /// Returns the allowlist of hosts.
    pub fn allowed_hosts(&self) -> &[String] {
        &self.allowed
    }

    /// True when no host restriction is configured.
    pub fn is_unrestricted(&self) -> bool {
        self.allowed.is_empty()
    }

    /// Determines whether the provided host passes the allowlist.
    pub fn is_host_allowed(&self, host: &str) -> bool {
        self.allowed.is_empty()
            || self
                .allowed
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host))
    }

    /// Determines whether the URL's host passes the allowlist.
    pub fn allows(&self, url: &Url) -> bool {
        url.host_str()
            .map(|host| self.is_host_allowed(host))
            .unwrap_or(false)
    }
}

/// Tunable knobs that bound crawl behavior.
#[derive(Clone, Debug)]
pub struct CrawlControls {
    parallelism: usize,
    delay: Duration,
    scope: DomainScope,
    selector: LinkSelector,
    page_budget: Option<usize>,
    deadline: Option<Duration>,
    fetch: FetchConfig,
}

impl CrawlControls {
    /// Constructs a new set of crawl controls. `parallelism` is clamped to at least one.
    pub fn new(
        parallelism: usize,
        delay: Duration,
        scope: DomainScope,
        selector: LinkSelector,
        fetch: FetchConfig,
    ) -> Self {
        Self {
            parallelism: parallelism.max(1),
            delay,
            scope,
            selector,
            page_budget: None,
            deadline: None,
            fetch,
        }
    }

    /// Stops dispatching after `pages` fetches.
    pub fn with_page_budget(mut self, pages: Option<usize>) -> Self {
        self.page_budget = pages;
        self
    }

    /// Closes the frontier once `deadline` has elapsed.
    pub fn with_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.deadline = deadline;
        self
    }

    /// Number of concurrent workers.
    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Minimum gap between two dispatches of the same worker lane.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Allowed host set.
    pub fn scope(&self) -> &DomainScope {
        &self.scope
    }

    /// Selector scoping anchor extraction.
    pub fn selector(&self) -> &LinkSelector {
        &self.selector
    }

    /// Optional cap on dispatched pages.
    pub fn page_budget(&self) -> Option<usize> {
        self.page_budget
    }

    /// Optional wall-clock limit for the run.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// HTTP client settings.
    pub fn fetch(&self) -> &FetchConfig {
        &self.fetch
    }

    /// True when nothing but frontier exhaustion ends the run.
    pub fn is_unbounded(&self) -> bool {
        self.page_budget.is_none() && self.deadline.is_none()
    }
}

/// Command-line interface for the crawler binary.
#[derive(Parser, Debug, Clone)]
#[command(name = "newsindex-crawl", about = "Polite crawler emitting title and headline records")]
pub struct CrawlCli {
    /// Seed URLs (repeatable)
    #[arg(
        long = "seed",
        env = "NEWSINDEX_SEEDS",
        value_delimiter = ',',
        default_value = "http://news.baidu.com"
    )]
    pub seeds: Vec<String>,

    /// Domain allowlist, comma separated (empty admits every host)
    #[arg(long, env = "NEWSINDEX_DOMAINS", default_value = "news.baidu.com")]
    pub allowed_domains: String,

    /// Number of concurrent fetch workers
    #[arg(long, env = "NEWSINDEX_PARALLELISM", default_value_t = 2)]
    pub parallelism: usize,

    /// Milliseconds between two requests of the same worker
    #[arg(long, env = "NEWSINDEX_DELAY_MS", default_value_t = 5000)]
    pub delay_ms: u64,

    /// CSS selector matching the anchors to follow and record
    #[arg(long, env = "NEWSINDEX_SELECTOR", default_value = ".hotnews a")]
    pub selector: String,

    /// JSON lines file receiving one record per fetched page
    #[arg(long, env = "NEWSINDEX_CRAWL_OUTPUT", default_value = "news_data.jsonl")]
    pub output: PathBuf,

    /// Stop dispatching after this many pages
    #[arg(long, env = "NEWSINDEX_MAX_PAGES")]
    pub max_pages: Option<usize>,

    /// Stop accepting work after this many seconds
    #[arg(long, env = "NEWSINDEX_MAX_DURATION_SECS")]
    pub max_duration_secs: Option<u64>,

    /// Per-request timeout in seconds
    #[arg(long, env = "NEWSINDEX_TIMEOUT_SECS", default_value_t = 10)]
    pub timeout_secs: u64,

    /// User-Agent header sent with every request
    #[arg(long, env = "NEWSINDEX_USER_AGENT", default_value = HeaderProfile::DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Accept header
    #[arg(long, env = "NEWSINDEX_ACCEPT", default_value = "*/*")]
    pub accept: String,

    /// Accept-Language header
    #[arg(long, env = "NEWSINDEX_ACCEPT_LANGUAGE", default_value = "zh-CN,zh;q=0.9")]
    pub accept_language: String,

    /// Referer header
    #[arg(long, env = "NEWSINDEX_REFERER", default_value = "http://www.baidu.com")]
    pub referer: Option<String>,

    /// Origin header
    #[arg(long, env = "NEWSINDEX_ORIGIN", default_value = "http://www.baidu.com")]
    pub origin: Option<String>,
}

impl CrawlCli {
    /// Converts the parsed CLI into `CrawlControls`.
    pub fn build_controls(&self) -> Result<CrawlControls, SelectorError> {
        let selector = LinkSelector::new(&self.selector)?;
        let profile = HeaderProfile {
            user_agent: self.user_agent.clone(),
            accept: self.accept.clone(),
            accept_language: self.accept_language.clone(),
            referer: non_empty(self.referer.as_deref()),
            origin: non_empty(self.origin.as_deref()),
        };
        let fetch = FetchConfig::new(profile, Duration::from_secs(self.timeout_secs.max(1)));
        Ok(CrawlControls::new(
            self.parallelism,
            Duration::from_millis(self.delay_ms),
            DomainScope::new(self.domains_vec()),
            selector,
            fetch,
        )
        .with_page_budget(self.max_pages)
        .with_deadline(self.max_duration_secs.map(Duration::from_secs)))
    }

    fn domains_vec(&self) -> Vec<String> {
        self.allowed_domains
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
