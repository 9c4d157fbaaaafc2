//! HTTP transport for the portal
//!
//! The reqwest client is built with automatic redirects disabled; callers
//! resolve redirect chains through [`super::resolve_redirects`] so every hop
//! goes through the same cookie jar.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, CACHE_CONTROL, LOCATION};
use reqwest_cookie_store::{CookieStore, CookieStoreMutex};
use url::Url;

use crate::config::PortalConfig;
use crate::error::{Error, Result};

/// A single, unredirected portal response.
#[derive(Debug, Clone)]
pub struct PortalResponse {
    /// HTTP status code
    pub status: u16,
    /// URL that produced this response
    pub url: Url,
    /// Raw `Location` header, if any
    pub location: Option<String>,
    pub body: String,
}

impl PortalResponse {
    pub fn is_redirect(&self) -> bool {
        matches!(self.status, 301 | 302 | 303 | 307 | 308)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Network boundary for one account's session.
///
/// Implementations must keep cookies between calls and must not follow
/// redirects on their own.
#[async_trait]
pub trait PortalTransport: Send + Sync {
    async fn get(&self, url: &Url) -> Result<PortalResponse>;

    /// POST an `application/x-www-form-urlencoded` body
    async fn post_form(&self, url: &Url, form: &[(String, String)]) -> Result<PortalResponse>;

    /// Drop every stored cookie
    fn reset_cookies(&self);
}

/// reqwest-backed transport with a resettable cookie jar
pub struct HttpTransport {
    client: reqwest::Client,
    cookies: Arc<CookieStoreMutex>,
}

impl HttpTransport {
    /// Create a transport from portal configuration
    pub fn new(config: &PortalConfig) -> Result<Self> {
        let cookies = Arc::new(CookieStoreMutex::new(CookieStore::default()));

        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,application/json;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let client = reqwest::Client::builder()
            .user_agent(&config.user_agent)
            .default_headers(headers)
            .cookie_provider(Arc::clone(&cookies))
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| Error::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, cookies })
    }

    async fn into_portal_response(response: reqwest::Response) -> Result<PortalResponse> {
        let status = response.status().as_u16();
        let url = response.url().clone();
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.map_err(transport_error)?;

        Ok(PortalResponse {
            status,
            url,
            location,
            body,
        })
    }
}

#[async_trait]
impl PortalTransport for HttpTransport {
    async fn get(&self, url: &Url) -> Result<PortalResponse> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(transport_error)?;
        Self::into_portal_response(response).await
    }

    async fn post_form(&self, url: &Url, form: &[(String, String)]) -> Result<PortalResponse> {
        let response = self
            .client
            .post(url.clone())
            .form(form)
            .send()
            .await
            .map_err(transport_error)?;
        Self::into_portal_response(response).await
    }

    fn reset_cookies(&self) {
        match self.cookies.lock() {
            Ok(mut store) => store.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

fn transport_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Transport(format!("request timed out: {}", e))
    } else {
        Error::Transport(format!("HTTP request failed: {}", e))
    }
}
