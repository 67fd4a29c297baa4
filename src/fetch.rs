//! HTTP fetching with a fixed, configurable header profile.

use crate::controls::DomainScope;
use reqwest::header::{
    HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, LOCATION, ORIGIN, REFERER,
};
use reqwest::redirect::Policy;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use url::Url;

const MAX_REDIRECTS: usize = 5;

/// Identity headers attached to every crawl request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeaderProfile {
    /// `User-Agent` value.
    pub user_agent: String,
    /// `Accept` value.
    pub accept: String,
    /// `Accept-Language` value.
    pub accept_language: String,
    /// Optional `Referer` value.
    pub referer: Option<String>,
    /// Optional `Origin` value.
    pub origin: Option<String>,
}

impl HeaderProfile {
    /// Desktop browser identity used unless overridden.
    pub const DEFAULT_USER_AGENT: &'static str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/96.0.4664.45 Safari/537.36";

    fn header_map(&self) -> Result<HeaderMap, ClientError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, header_value("accept", &self.accept)?);
        headers.insert(
            ACCEPT_LANGUAGE,
            header_value("accept-language", &self.accept_language)?,
        );
        if let Some(referer) = &self.referer {
            headers.insert(REFERER, header_value("referer", referer)?);
        }
        if let Some(origin) = &self.origin {
            headers.insert(ORIGIN, header_value("origin", origin)?);
        }
        Ok(headers)
    }
}

impl Default for HeaderProfile {
    fn default() -> Self {
        Self {
            user_agent: Self::DEFAULT_USER_AGENT.to_string(),
            accept: "*/*".to_string(),
            accept_language: "zh-CN,zh;q=0.9".to_string(),
            referer: None,
            origin: None,
        }
    }
}

fn header_value(name: &'static str, value: &str) -> Result<HeaderValue, ClientError> {
    HeaderValue::from_str(value).map_err(|_| ClientError::InvalidHeader(name))
}

/// HTTP client settings for the crawler.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FetchConfig {
    /// Identity headers.
    pub profile: HeaderProfile,
    /// Whole-request timeout.
    pub timeout: Duration,
}

impl FetchConfig {
    /// Builds a fetch configuration.
    pub fn new(profile: HeaderProfile, timeout: Duration) -> Self {
        Self { profile, timeout }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self::new(HeaderProfile::default(), Duration::from_secs(10))
    }
}

/// A successful (2xx) response body.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: Url,
    /// HTTP status code.
    pub status: u16,
    /// `Content-Type` header when present.
    pub content_type: Option<String>,
    /// Raw response body bytes.
    pub body: Vec<u8>,
}

/// Problems building the crawl client from configuration.
#[derive(Debug, Error)]
pub enum ClientError {
    /// A configured header value is not valid HTTP.
    #[error("invalid {0} header value")]
    InvalidHeader(&'static str),
    /// The HTTP client could not be constructed.
    #[error("failed to build http client: {0}")]
    Build(#[source] reqwest::Error),
}

/// Failures of a single fetch. None of them abort a crawl.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,
    /// Connection, TLS or protocol failure.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
    /// The server answered with a non-2xx status.
    #[error("unexpected status {0}")]
    Status(StatusCode),
    /// The server redirected to a host outside the allowed domains.
    #[error("refused redirect to out-of-scope {0}")]
    OffScopeRedirect(String),
    /// Reading the response body failed.
    #[error("failed to read body: {0}")]
    Body(#[source] reqwest::Error),
}

impl FetchError {
    fn from_send(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Network(err)
        }
    }
}

/// Shared crawl HTTP client. Cloning is cheap and reuses the connection pool.
#[derive(Clone, Debug)]
pub struct Fetcher {
    client: Client,
}

/// Follows at most `MAX_REDIRECTS` hops and never leaves `scope`.
fn scoped_redirects(scope: DomainScope) -> Policy {
    Policy::custom(move |attempt| {
        if attempt.previous().len() > MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else if scope.allows(attempt.url()) {
            attempt.follow()
        } else {
            attempt.stop()
        }
    })
}

impl Fetcher {
    /// Builds the client with the configured identity headers. Redirects out of
    /// `scope` are not followed.
    pub fn new(config: &FetchConfig, scope: &DomainScope) -> Result<Self, ClientError> {
        let client = Client::builder()
            .user_agent(config.profile.user_agent.as_str())
            .default_headers(config.profile.header_map()?)
            .redirect(scoped_redirects(scope.clone()))
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Build)?;
        Ok(Self { client })
    }

    /// Issues a GET and returns the body of a 2xx response.
    pub async fn fetch(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(FetchError::from_send)?;
        let status = response.status();
        if status.is_redirection() {
            // Only an out-of-scope hop stops the redirect chain.
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| response.url().join(value).ok())
                .map(String::from)
                .unwrap_or_else(|| response.url().to_string());
            return Err(FetchError::OffScopeRedirect(location));
        }
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }
        let final_url = response.url().clone();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|err| {
            if err.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Body(err)
            }
        })?;
        Ok(FetchedPage {
            url: final_url,
            status: status.as_u16(),
            content_type,
            body: body.to_vec(),
        })
    }
}
