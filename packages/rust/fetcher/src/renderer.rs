//! Browser-rendering fallback.
//!
//! Pages that only materialise after JavaScript runs are handed to a
//! [`BrowserRenderer`]. The shipped implementation talks to a headless-browser
//! service over HTTP; tests substitute their own.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use pagelens_shared::{FetchError, PageLensError, Result};

/// HTML produced by a rendering backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub html: String,
    pub final_url: String,
    pub status_code: Option<u16>,
}

/// Renders a URL in a real browser and returns the resulting DOM as HTML.
#[async_trait]
pub trait BrowserRenderer: Send + Sync {
    /// Render `url`, waiting for network idle up to `timeout`.
    async fn render(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> std::result::Result<RenderedPage, FetchError>;
}

#[derive(Debug, Serialize)]
struct RenderRequest<'a> {
    url: &'a str,
    wait_until: &'static str,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct RenderResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    html: String,
    #[serde(default)]
    final_url: Option<String>,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    error: Option<String>,
}

/// Client for an HTTP rendering service exposing `POST /render`.
pub struct RemoteRenderer {
    client: Client,
    base_url: String,
}

impl RemoteRenderer {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().build().map_err(|e| {
            PageLensError::Network(format!("failed to build renderer client: {e}"))
        })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl BrowserRenderer for RemoteRenderer {
    async fn render(
        &self,
        url: &Url,
        timeout: Duration,
    ) -> std::result::Result<RenderedPage, FetchError> {
        let endpoint = format!("{}/render", self.base_url);
        let request = RenderRequest {
            url: url.as_str(),
            wait_until: "networkidle",
            timeout_ms: timeout.as_millis() as u64,
        };

        debug!(%url, %endpoint, "requesting browser render");

        // Leave the service a little headroom to report its own timeout.
        let response = self
            .client
            .post(&endpoint)
            .json(&request)
            .timeout(timeout + Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FetchError::Timeout(format!("{url}: browser render exceeded {timeout:?}"))
                } else {
                    FetchError::Unreachable(format!("{url}: rendering service unavailable: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Unreachable(format!(
                "{url}: rendering service returned HTTP {status}"
            )));
        }

        let body: RenderResponse = response.json().await.map_err(|e| {
            FetchError::Unreachable(format!("{url}: invalid rendering service response: {e}"))
        })?;

        if !body.success {
            let reason = body.error.unwrap_or_else(|| "unknown render failure".into());
            let lowered = reason.to_ascii_lowercase();
            return Err(if lowered.contains("timeout") || lowered.contains("timed out") {
                FetchError::Timeout(format!("{url}: {reason}"))
            } else if matches!(body.status_code, Some(404 | 410)) {
                FetchError::Unreachable(format!("{url}: {reason}"))
            } else {
                FetchError::Blocked(format!("{url}: {reason}"))
            });
        }

        Ok(RenderedPage {
            html: body.html,
            final_url: body.final_url.unwrap_or_else(|| url.to_string()),
            status_code: body.status_code,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn target() -> Url {
        Url::parse("https://spa.example.com/app").unwrap()
    }

    #[tokio::test]
    async fn renders_via_service() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .and(body_partial_json(serde_json::json!({
                "url": "https://spa.example.com/app",
                "wait_until": "networkidle",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true,
                "html": "<html><body><h1>Rendered</h1></body></html>",
                "final_url": "https://spa.example.com/app#/home",
                "status_code": 200,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let renderer = RemoteRenderer::new(format!("{}/", server.uri())).unwrap();
        let page = renderer
            .render(&target(), Duration::from_secs(5))
            .await
            .unwrap();

        assert!(page.html.contains("Rendered"));
        assert_eq!(page.final_url, "https://spa.example.com/app#/home");
        assert_eq!(page.status_code, Some(200));
    }

    #[tokio::test]
    async fn service_failure_maps_to_blocked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error": "captcha challenge detected",
            })))
            .mount(&server)
            .await;

        let renderer = RemoteRenderer::new(server.uri()).unwrap();
        let err = renderer
            .render(&target(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Blocked(ref m) if m.contains("captcha")));
    }

    #[tokio::test]
    async fn service_timeout_report_maps_to_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": false,
                "error": "Navigation timeout of 5000 ms exceeded",
            })))
            .mount(&server)
            .await;

        let renderer = RemoteRenderer::new(server.uri()).unwrap();
        let err = renderer
            .render(&target(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(_)));
    }

    #[tokio::test]
    async fn service_down_is_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/render"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let renderer = RemoteRenderer::new(server.uri()).unwrap();
        let err = renderer
            .render(&target(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unreachable(_)));
    }
}
