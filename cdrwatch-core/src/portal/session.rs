//! Authenticated portal session
//!
//! A [`SessionManager`] owns one account's credentials, its transport (and
//! therefore its cookie jar) and the logged-in flag. It is never shared
//! between workers.
//!
//! ## Login success detection
//!
//! The portal answers a login POST with either a redirect or an HTML page,
//! and failed logins are not signalled by status code. The outcome is
//! judged by [`classify_login`] from the final URL and body:
//!
//! 1. Still on the login path (and not a logout URL) ⇒ rejected
//! 2. Body mentions "invalid" or "incorrect" ⇒ rejected
//! 3. Body has an authenticated marker ("logout", "dashboard", ...) ⇒ authenticated
//! 4. Otherwise ⇒ tentative: treated as logged in, but logged for attention

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use url::Url;

use super::credentials::{extract_account_summary, extract_csrf_token, AccountSummary};
use super::redirect::{get_resolved, resolve_redirects};
use super::transport::{PortalResponse, PortalTransport};
use super::PortalProfile;
use crate::error::{Error, Result};
use crate::types::Account;

/// Body text that marks a rejected login
const FAILURE_MARKERS: &[&str] = &["invalid", "incorrect"];

/// Body text that only appears once logged in
const AUTHENTICATED_MARKERS: &[&str] = &["logout", "sign out", "dashboard", "my ranges"];

/// Why a login was judged to have failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// The portal sent us back to the login page
    StillOnLoginPage,
    /// The page contains an error message
    ErrorMessage,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::StillOnLoginPage => write!(f, "still on login page"),
            RejectReason::ErrorMessage => write!(f, "login error message in page"),
        }
    }
}

/// Outcome of a login attempt, judged from the final page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginVerdict {
    Authenticated,
    /// No failure signal but no authenticated marker either
    Tentative,
    Rejected(RejectReason),
}

impl LoginVerdict {
    pub fn is_accepted(&self) -> bool {
        !matches!(self, LoginVerdict::Rejected(_))
    }
}

/// Whether `url` points at the login page.
///
/// URLs mentioning "logout" never count, so a logout link that happens to
/// live under the login path is not mistaken for a bounce.
pub fn is_login_url(url: &Url, login_path: &str) -> bool {
    let login_path = login_path.trim_end_matches('/');
    if login_path.is_empty() {
        return false;
    }

    let path = url.path();
    let on_login = path == login_path
        || path
            .strip_prefix(login_path)
            .is_some_and(|rest| rest.starts_with('/'));

    on_login && !url.as_str().to_ascii_lowercase().contains("logout")
}

/// Classify a login from the final URL and body after redirects.
pub fn classify_login(final_url: &Url, body: &str, login_path: &str) -> LoginVerdict {
    if is_login_url(final_url, login_path) {
        return LoginVerdict::Rejected(RejectReason::StillOnLoginPage);
    }

    let body = body.to_lowercase();
    if FAILURE_MARKERS.iter().any(|m| body.contains(m)) {
        return LoginVerdict::Rejected(RejectReason::ErrorMessage);
    }

    if AUTHENTICATED_MARKERS.iter().any(|m| body.contains(m)) {
        LoginVerdict::Authenticated
    } else {
        LoginVerdict::Tentative
    }
}

/// One account's authenticated session
pub struct SessionManager {
    account: Account,
    transport: Arc<dyn PortalTransport>,
    profile: Arc<PortalProfile>,
    authenticated: bool,
    last_login_at: Option<DateTime<Utc>>,
    summary: AccountSummary,
}

impl SessionManager {
    pub fn new(
        account: Account,
        transport: Arc<dyn PortalTransport>,
        profile: Arc<PortalProfile>,
    ) -> Self {
        Self {
            account,
            transport,
            profile,
            authenticated: false,
            last_login_at: None,
            summary: AccountSummary::default(),
        }
    }

    /// Log in to the portal.
    ///
    /// Returns the accepted verdict ([`LoginVerdict::Authenticated`] or
    /// [`LoginVerdict::Tentative`]). A rejected login returns
    /// [`Error::Authentication`]; network failures return
    /// [`Error::Transport`]. Either way the session is left unauthenticated.
    pub async fn login(&mut self) -> Result<LoginVerdict> {
        let identifier = self.account.identifier().to_string();

        match self.attempt_login().await {
            Ok((verdict, page)) if verdict.is_accepted() => {
                if verdict == LoginVerdict::Tentative {
                    tracing::warn!(
                        account = %identifier,
                        url = %page.url,
                        "Login may have succeeded but no authenticated markers were found"
                    );
                } else {
                    tracing::info!(account = %identifier, url = %page.url, "Login succeeded");
                }

                self.authenticated = true;
                self.last_login_at = Some(Utc::now());
                self.summary = extract_account_summary(&page.body);
                Ok(verdict)
            }
            Ok((verdict, page)) => {
                self.authenticated = false;
                let reason = match verdict {
                    LoginVerdict::Rejected(reason) => reason.to_string(),
                    _ => "rejected".to_string(),
                };
                tracing::warn!(
                    account = %identifier,
                    url = %page.url,
                    reason = %reason,
                    "Login rejected, verify the account credentials"
                );
                Err(Error::Authentication(reason))
            }
            Err(e) => {
                self.authenticated = false;
                tracing::warn!(account = %identifier, error = %e, "Login attempt failed");
                Err(e)
            }
        }
    }

    async fn attempt_login(&self) -> Result<(LoginVerdict, PortalResponse)> {
        let profile = &self.profile;
        let transport = self.transport.as_ref();

        tracing::debug!(account = %self.account.identifier(), "Fetching login page");
        let login_page = get_resolved(transport, &profile.login_url, profile.max_redirects).await?;

        let token = extract_csrf_token(&login_page.body, &profile.form.csrf_field);
        if token.is_none() {
            tracing::warn!(
                account = %self.account.identifier(),
                field = %profile.form.csrf_field,
                "CSRF token not found, submitting login without it"
            );
        }

        let mut form = vec![
            (
                profile.form.credential_field.clone(),
                self.account.identifier().to_string(),
            ),
            (
                profile.form.secret_field.clone(),
                self.account.secret().to_string(),
            ),
        ];
        if let Some(token) = token {
            form.push((profile.form.csrf_field.clone(), token));
        }

        let response = transport.post_form(&profile.login_url, &form).await?;
        let page = if response.is_redirect() {
            let page = resolve_redirects(transport, response, profile.max_redirects).await?;
            tracing::debug!(url = %page.url, "Login redirected");
            page
        } else {
            response
        };

        if page.is_redirect() {
            return Err(Error::Transport(format!(
                "login did not settle after {} redirects",
                profile.max_redirects
            )));
        }

        let verdict = classify_login(&page.url, &page.body, profile.login_path());
        Ok((verdict, page))
    }

    /// GET a portal page through this session, following redirects
    pub async fn get(&self, url: &Url) -> Result<PortalResponse> {
        get_resolved(self.transport.as_ref(), url, self.profile.max_redirects).await
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    /// Mark the session expired. Cookies are kept; the next login overwrites them.
    pub fn invalidate(&mut self) {
        self.authenticated = false;
    }

    /// Forget the session entirely, cookie jar included
    pub fn reset(&mut self) {
        self.authenticated = false;
        self.transport.reset_cookies();
    }

    /// Whether `url` is the login page (i.e. a request was bounced)
    pub fn is_login_url(&self, url: &Url) -> bool {
        is_login_url(url, self.profile.login_path())
    }

    pub fn last_login_at(&self) -> Option<DateTime<Utc>> {
        self.last_login_at
    }

    pub fn account(&self) -> &Account {
        &self.account
    }

    /// Details scraped from the page shown after the last successful login
    pub fn summary(&self) -> &AccountSummary {
        &self.summary
    }

    pub fn profile(&self) -> &PortalProfile {
        &self.profile
    }
}
