//! Record retrieval
//!
//! Records are read from the portal's structured (DataTables-style JSON)
//! endpoint first. When that yields no rows, the HTML page carrying the same
//! records is scraped instead: its first `<table>` holds one record per row
//! below the header row.

use std::sync::Arc;

use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use super::account::{parse_ranges, parse_stats, AccountStats, NumberRange};
use super::credentials::extract_balance;
use super::session::SessionManager;
use super::PortalProfile;
use crate::error::{Error, Result};
use crate::types::RawRecord;

/// Fetches raw records for one session
pub struct RecordFetcher {
    profile: Arc<PortalProfile>,
}

impl RecordFetcher {
    pub fn new(profile: Arc<PortalProfile>) -> Self {
        Self { profile }
    }

    /// Fetch the records currently listed by the portal.
    ///
    /// Logs in first if needed. A request bounced to the login page triggers
    /// exactly one re-login and retry. Login failures and expired sessions
    /// yield an empty result and leave the session unauthenticated, which is
    /// how callers detect a lost session. Transport failures are returned.
    pub async fn fetch(&self, session: &mut SessionManager) -> Result<Vec<RawRecord>> {
        let account = session.account().identifier().to_string();

        if !session.is_authenticated() && session.login().await.is_err() {
            tracing::warn!(account = %account, "Cannot fetch records, login failed");
            return Ok(Vec::new());
        }

        tracing::debug!(account = %account, "Fetching records from structured endpoint");
        let mut api = session.get(&self.profile.records_api_url).await?;

        if session.is_login_url(&api.url) {
            tracing::warn!(account = %account, "Session expired, attempting re-login");
            session.invalidate();
            if session.login().await.is_err() {
                tracing::error!(account = %account, "Re-login failed, cannot fetch records");
                return Ok(Vec::new());
            }

            api = session.get(&self.profile.records_api_url).await?;
            if session.is_login_url(&api.url) {
                tracing::warn!(account = %account, "Still redirected to login after re-login");
                session.invalidate();
                return Ok(Vec::new());
            }
        }

        if api.is_success() {
            let rows = parse_structured(&api.body);
            if !rows.is_empty() {
                tracing::info!(account = %account, count = rows.len(), "Fetched records from structured endpoint");
                return Ok(rows);
            }
        } else {
            tracing::debug!(account = %account, status = api.status, "Structured endpoint returned no data");
        }

        tracing::debug!(account = %account, "Falling back to HTML record page");
        let page = session.get(&self.profile.records_page_url).await?;
        if session.is_login_url(&page.url) {
            tracing::warn!(account = %account, "Record page redirected to login");
            session.invalidate();
            return Ok(Vec::new());
        }

        let rows = parse_table(&page.body);
        if rows.is_empty() {
            tracing::debug!(account = %account, "No records found");
        } else {
            tracing::info!(account = %account, count = rows.len(), "Parsed records from HTML table");
        }
        Ok(rows)
    }

    /// Fetch the number ranges assigned to the account.
    ///
    /// Empty when the session cannot be established.
    pub async fn fetch_ranges(&self, session: &mut SessionManager) -> Result<Vec<NumberRange>> {
        let Some(body) = self.account_page(session, &self.profile.ranges_url, "ranges").await? else {
            return Ok(Vec::new());
        };
        let ranges = parse_ranges(&body);
        tracing::info!(account = %session.account().identifier(), count = ranges.len(), "Fetched number ranges");
        Ok(ranges)
    }

    /// Fetch the account balance as the portal displays it
    pub async fn fetch_balance(&self, session: &mut SessionManager) -> Result<Option<String>> {
        Ok(self
            .account_page(session, &self.profile.balance_url, "balance")
            .await?
            .and_then(|body| extract_balance(&body)))
    }

    /// Fetch the statistics cards; `active_ranges` is reported as given.
    pub async fn fetch_stats(
        &self,
        session: &mut SessionManager,
        active_ranges: usize,
    ) -> Result<AccountStats> {
        Ok(
            match self.account_page(session, &self.profile.stats_url, "statistics").await? {
                Some(body) => parse_stats(&body, active_ranges),
                None => AccountStats::unavailable(active_ranges),
            },
        )
    }

    /// GET an account page, logging in first if needed.
    ///
    /// `None` when login fails or the page bounces to the login form; the
    /// latter invalidates the session.
    async fn account_page(
        &self,
        session: &mut SessionManager,
        url: &Url,
        page: &str,
    ) -> Result<Option<String>> {
        let account = session.account().identifier().to_string();

        if !session.is_authenticated() && session.login().await.is_err() {
            tracing::warn!(account = %account, page, "Cannot fetch page, login failed");
            return Ok(None);
        }

        let response = session.get(url).await?;
        if session.is_login_url(&response.url) {
            tracing::warn!(account = %account, page, "Page redirected to login");
            session.invalidate();
            return Ok(None);
        }
        Ok(Some(response.body))
    }
}

/// Parse a structured endpoint body.
///
/// Accepts a bare JSON array or an object with a `data` or `aaData` array.
/// Any other shape, or invalid JSON, yields no rows.
pub fn parse_structured(body: &str) -> Vec<RawRecord> {
    match structured_rows(body) {
        Ok(rows) => rows,
        Err(e) => {
            tracing::debug!(error = %e, "No structured records");
            Vec::new()
        }
    }
}

fn structured_rows(body: &str) -> Result<Vec<RawRecord>> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| Error::Parse(format!("invalid JSON: {}", e)))?;

    let rows = match &value {
        Value::Array(rows) => rows,
        Value::Object(map) => ["data", "aaData"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array))
            .ok_or_else(|| Error::Parse("object has no data/aaData array".to_string()))?,
        _ => return Err(Error::Parse("unexpected top-level JSON value".to_string())),
    };

    Ok(rows.iter().filter_map(RawRecord::from_json).collect())
}

/// Parse the first `<table>` of an HTML page.
///
/// The table's first row is its header and is always skipped, whatever its
/// cells are. Later rows without `<td>` cells are skipped too; every other
/// row becomes one positional record of its cell texts.
pub fn parse_table(html: &str) -> Vec<RawRecord> {
    let document = Html::parse_document(html);
    let (Ok(table_sel), Ok(row_sel), Ok(cell_sel)) = (
        Selector::parse("table"),
        Selector::parse("tr"),
        Selector::parse("td"),
    ) else {
        return Vec::new();
    };

    let Some(table) = document.select(&table_sel).next() else {
        return Vec::new();
    };

    table
        .select(&row_sel)
        .skip(1)
        .map(|row| row.select(&cell_sel).map(cell_text).collect::<Vec<_>>())
        .filter(|cells| !cells.is_empty())
        .map(RawRecord::Positional)
        .collect()
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
