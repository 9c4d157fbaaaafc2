//! Account pages: number ranges and statistics
//!
//! Both pages are plain HTML with no stable markup, so parsing is
//! best-effort and never fails. Missing cells become empty strings and
//! missing statistics keep their placeholder.

use scraper::{Html, Selector};
use serde::Serialize;

use super::credentials::element_text;
use super::fetcher::parse_table;
use crate::types::RawRecord;

/// Placeholder for statistics the page did not show
pub const NOT_AVAILABLE: &str = "N/A";

/// Longest statistic text kept from a card
const MAX_STAT_LEN: usize = 50;

/// One row of the number ranges table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NumberRange {
    pub number: String,
    pub country: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    pub payout: String,
}

/// Headline figures from the statistics page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountStats {
    pub total_calls: String,
    pub total_minutes: String,
    pub earnings: String,
    pub active_ranges: usize,
}

impl AccountStats {
    /// Placeholder statistics for an account with `active_ranges` ranges
    pub fn unavailable(active_ranges: usize) -> Self {
        Self {
            total_calls: NOT_AVAILABLE.to_string(),
            total_minutes: NOT_AVAILABLE.to_string(),
            earnings: NOT_AVAILABLE.to_string(),
            active_ranges,
        }
    }
}

/// Parse the ranges page. Columns are number, country, type, status, payout.
pub fn parse_ranges(html: &str) -> Vec<NumberRange> {
    parse_table(html)
        .into_iter()
        .filter_map(|row| match row {
            RawRecord::Positional(cells) => Some(cells),
            RawRecord::Keyed(_) => None,
        })
        .map(|cells| {
            let at = |i: usize| cells.get(i).cloned().unwrap_or_default();
            NumberRange {
                number: at(0),
                country: at(1),
                kind: at(2),
                status: at(3),
                payout: at(4),
            }
        })
        .collect()
}

/// Parse the statistics page.
///
/// Every `.card`, `.stat-card` or `.widget` is classified by its text: a
/// mention of calls, then minutes, then money. Later cards win.
pub fn parse_stats(html: &str, active_ranges: usize) -> AccountStats {
    let mut stats = AccountStats::unavailable(active_ranges);
    let Ok(card_sel) = Selector::parse(".card, .stat-card, .widget") else {
        return stats;
    };

    let document = Html::parse_document(html);
    for card in document.select(&card_sel) {
        let text = element_text(card.text());
        let lower = text.to_lowercase();
        let slot = if lower.contains("call") {
            &mut stats.total_calls
        } else if lower.contains("minute") {
            &mut stats.total_minutes
        } else if text.contains('$') || text.contains('€') || lower.contains("earning") {
            &mut stats.earnings
        } else {
            continue;
        };
        *slot = text.chars().take(MAX_STAT_LEN).collect();
    }

    stats
}
