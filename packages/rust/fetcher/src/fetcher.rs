//! Page fetcher with an explicit, ordered strategy list.
//!
//! Each URL is tried with a plain HTTP GET first. Responses that are blocked
//! or look like a client-rendered shell fall through to the browser renderer.
//! Hard client errors (404, 410, ...) fail immediately. Nothing is retried
//! here; retry policy belongs to the caller.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, HeaderMap, HeaderValue};
use tracing::{debug, info, instrument, warn};
use url::Url;

use pagelens_shared::{FetchConfig, FetchError, PageLensError, Result};

use crate::guard::{is_ssrf_target, normalize_target};
use crate::renderer::{BrowserRenderer, RemoteRenderer};
use crate::substance::{Substance, assess};

/// Browser-like User-Agent for page requests.
const USER_AGENT: &str = concat!(
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) ",
    "Chrome/124.0 Safari/537.36 PageLens/",
    env!("CARGO_PKG_VERSION")
);

/// A thin page with at least this much visible text is still returned when
/// every later strategy fails.
const THIN_PAGE_FLOOR: usize = 100;

// ---------------------------------------------------------------------------
// RawPage / strategies
// ---------------------------------------------------------------------------

/// How a page was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStrategy {
    Http,
    Browser,
}

impl FetchStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Browser => "browser",
        }
    }
}

/// One entry of the strategy list. `timeout: None` uses the caller's budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FetchStep {
    strategy: FetchStrategy,
    timeout: Option<Duration>,
}

/// Fetched page body plus transport details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    pub html: String,
    /// URL after redirects.
    pub final_url: String,
    pub status_code: Option<u16>,
    pub strategy: FetchStrategy,
}

/// Anything that can turn a URL into a [`RawPage`].
///
/// The orchestrator depends on this rather than on [`Fetcher`] so tests can
/// script fetch outcomes.
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<RawPage, FetchError>;
}

/// What a single HTTP attempt concluded.
enum HttpOutcome {
    Page(RawPage),
    /// Worth handing to the next strategy.
    FallThrough(FetchError),
    /// Final; no other strategy will do better.
    Fatal(FetchError),
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// HTTP-first fetcher with optional browser fallback.
pub struct Fetcher {
    client: Client,
    steps: Vec<FetchStep>,
    renderer: Option<Arc<dyn BrowserRenderer>>,
    min_text_chars: usize,
    /// Allow localhost/private IPs (local services, integration tests).
    allow_private_hosts: bool,
}

impl Fetcher {
    /// Create a fetcher from the `[fetch]` config section.
    ///
    /// A remote renderer is attached when `renderer_url` is set.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.9"));

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|e| PageLensError::Network(format!("failed to build HTTP client: {e}")))?;

        let renderer: Option<Arc<dyn BrowserRenderer>> = match &config.renderer_url {
            Some(base) => Some(Arc::new(RemoteRenderer::new(base.clone())?)),
            None => None,
        };

        Ok(Self {
            client,
            steps: vec![
                FetchStep {
                    strategy: FetchStrategy::Http,
                    timeout: None,
                },
                FetchStep {
                    strategy: FetchStrategy::Browser,
                    timeout: Some(Duration::from_secs(config.browser_timeout_secs)),
                },
            ],
            renderer,
            min_text_chars: config.min_text_chars,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    /// Replace the browser renderer.
    pub fn with_renderer(mut self, renderer: Arc<dyn BrowserRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Allow fetching localhost/private IPs.
    pub fn allow_private_hosts(mut self) -> Self {
        self.allow_private_hosts = true;
        self
    }

    /// Fetch `url`, trying each strategy in order.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn fetch_page(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<RawPage, FetchError> {
        let target = normalize_target(url)?;
        if !self.allow_private_hosts && is_ssrf_target(&target) {
            warn!(%target, "refusing private or non-http target");
            return Err(FetchError::Blocked(format!(
                "{target}: private or non-http targets are not allowed"
            )));
        }

        let mut last_error: Option<FetchError> = None;
        let mut thin_page: Option<(RawPage, usize)> = None;

        for step in &self.steps {
            let budget = step.timeout.unwrap_or(timeout);
            match step.strategy {
                FetchStrategy::Http => match self.fetch_http(&target, budget).await {
                    HttpOutcome::Page(page) => match assess(&page.html, self.min_text_chars) {
                        Substance::Substantial => {
                            info!(status = ?page.status_code, "fetched over http");
                            return Ok(page);
                        }
                        Substance::Thin { reason, text_chars } => {
                            debug!(reason, text_chars, "http response insubstantial");
                            last_error = Some(FetchError::Blocked(format!(
                                "{target}: {reason} ({text_chars} visible chars)"
                            )));
                            thin_page = Some((page, text_chars));
                        }
                    },
                    HttpOutcome::FallThrough(err) => {
                        debug!(error = %err, "http attempt failed, trying next strategy");
                        last_error = Some(err);
                    }
                    HttpOutcome::Fatal(err) => return Err(err),
                },
                FetchStrategy::Browser => {
                    let Some(renderer) = &self.renderer else {
                        debug!("no browser renderer configured");
                        continue;
                    };
                    let rendered = tokio::time::timeout(budget, renderer.render(&target, budget))
                        .await
                        .unwrap_or_else(|_| {
                            Err(FetchError::Timeout(format!(
                                "{target}: browser render exceeded {budget:?}"
                            )))
                        });
                    match rendered {
                        Ok(page) if assess(&page.html, 1).is_substantial() => {
                            info!("fetched via browser renderer");
                            return Ok(RawPage {
                                html: page.html,
                                final_url: page.final_url,
                                status_code: page.status_code,
                                strategy: FetchStrategy::Browser,
                            });
                        }
                        Ok(_) => {
                            last_error = Some(FetchError::Blocked(format!(
                                "{target}: browser render produced no content"
                            )));
                        }
                        Err(err) => {
                            debug!(error = %err, "browser attempt failed");
                            last_error = Some(err);
                        }
                    }
                }
            }
        }

        match thin_page {
            Some((page, text_chars)) if text_chars >= THIN_PAGE_FLOOR => {
                warn!(text_chars, "using thin http response, no better strategy succeeded");
                return Ok(page);
            }
            _ => {}
        }

        Err(last_error
            .unwrap_or_else(|| FetchError::Unreachable(format!("{target}: no strategy succeeded"))))
    }

    async fn fetch_http(&self, url: &Url, timeout: Duration) -> HttpOutcome {
        debug!(%url, "fetching over http");

        let response = match self.client.get(url.as_str()).timeout(timeout).send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => {
                return HttpOutcome::Fatal(FetchError::Timeout(format!(
                    "{url}: no response within {timeout:?}"
                )));
            }
            Err(e) => {
                // DNS/connect failures will not improve with a browser.
                return HttpOutcome::Fatal(FetchError::Unreachable(format!("{url}: {e}")));
            }
        };

        let status = response.status();
        let status_code = status.as_u16();
        let final_url = response.url().to_string();

        if !status.is_success() {
            let message = format!("{url}: HTTP {status}");
            return match status_code {
                401 | 403 | 429 | 503 => HttpOutcome::FallThrough(FetchError::Blocked(message)),
                _ => HttpOutcome::Fatal(FetchError::Unreachable(message)),
            };
        }

        match response.text().await {
            Ok(html) => HttpOutcome::Page(RawPage {
                html,
                final_url,
                status_code: Some(status_code),
                strategy: FetchStrategy::Http,
            }),
            Err(e) if e.is_timeout() => HttpOutcome::Fatal(FetchError::Timeout(format!(
                "{url}: body not received within {timeout:?}"
            ))),
            Err(e) => HttpOutcome::FallThrough(FetchError::Unreachable(format!(
                "{url}: body read failed: {e}"
            ))),
        }
    }
}

#[async_trait]
impl PageSource for Fetcher {
    async fn fetch(
        &self,
        url: &str,
        timeout: Duration,
    ) -> std::result::Result<RawPage, FetchError> {
        self.fetch_page(url, timeout).await
    }
}
