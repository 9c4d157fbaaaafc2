//! Portal client
//!
//! Everything that talks to the upstream web portal lives here. The portal
//! exposes no API, so the client behaves like a browser: it keeps a cookie
//! jar, scrapes the login form for a CSRF token, and follows redirects
//! itself so cookies set on intermediate hops are kept.
//!
//! ## Data flow
//!
//! ```text
//! SessionManager::login ──► PortalTransport (GET login page, POST form)
//!        │                        │
//!        │                  resolve_redirects (bounded hop count)
//!        ▼
//! RecordFetcher::fetch ──► structured endpoint ──► parse_structured
//!                     └──► HTML fallback page ──► parse_table
//!
//! RecordFetcher::fetch_{ranges,balance,stats} ──► account pages (best effort)
//! ```
//!
//! Network access is behind the [`PortalTransport`] trait so the session and
//! fetcher logic can be exercised against scripted responses.

mod account;
mod credentials;
mod fetcher;
mod redirect;
mod session;
mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use account::{parse_ranges, parse_stats, AccountStats, NumberRange, NOT_AVAILABLE};
pub use credentials::{extract_account_summary, extract_balance, extract_csrf_token, AccountSummary};
pub use fetcher::{parse_structured, parse_table, RecordFetcher};
pub use redirect::{resolve_redirects, DEFAULT_MAX_HOPS};
pub use session::{classify_login, is_login_url, LoginVerdict, RejectReason, SessionManager};
pub use transport::{HttpTransport, PortalResponse, PortalTransport};

use url::Url;

/// Field names of the portal's login form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginForm {
    pub credential_field: String,
    pub secret_field: String,
    pub csrf_field: String,
}

impl Default for LoginForm {
    fn default() -> Self {
        Self {
            credential_field: "email".to_string(),
            secret_field: "password".to_string(),
            csrf_field: "_token".to_string(),
        }
    }
}

/// Resolved portal endpoints and login form layout.
///
/// Built once from [`crate::config::PortalConfig::profile`] and shared
/// read-only by every session and fetcher.
#[derive(Debug, Clone)]
pub struct PortalProfile {
    pub login_url: Url,
    pub records_api_url: Url,
    pub records_page_url: Url,
    pub ranges_url: Url,
    pub balance_url: Url,
    pub stats_url: Url,
    pub form: LoginForm,
    pub max_redirects: usize,
}

impl PortalProfile {
    /// Path component of the login URL, used to detect bounced requests
    pub fn login_path(&self) -> &str {
        self.login_url.path()
    }
}
