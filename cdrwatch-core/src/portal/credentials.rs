//! Credential and account detail extraction from portal HTML

use scraper::{Html, Selector};

/// Longest balance/username text kept from the dashboard
const MAX_SUMMARY_LEN: usize = 100;

/// Find the CSRF token the login form expects to be echoed back.
///
/// Looks for `<input name="{field}" value="...">` first, then for a
/// `<meta name="csrf-token" content="...">` tag. Empty values count as absent.
pub fn extract_csrf_token(html: &str, field: &str) -> Option<String> {
    let document = Html::parse_document(html);

    // Names are compared directly; a field may hold characters selectors reject
    let from_input = Selector::parse("input[name]").ok().and_then(|input| {
        document
            .select(&input)
            .filter(|el| el.value().attr("name") == Some(field))
            .filter_map(|el| el.value().attr("value"))
            .find(|v| !v.trim().is_empty())
    });
    if let Some(token) = from_input {
        return Some(token.trim().to_string());
    }

    let meta = Selector::parse("meta[name=\"csrf-token\"]").ok()?;
    document
        .select(&meta)
        .filter_map(|el| el.value().attr("content"))
        .find(|v| !v.trim().is_empty())
        .map(|v| v.trim().to_string())
}

/// Account details scraped from the landing page after login
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSummary {
    pub username: Option<String>,
    pub balance: Option<String>,
}

/// Best-effort scrape of username and balance. Missing elements yield `None`.
pub fn extract_account_summary(html: &str) -> AccountSummary {
    let document = Html::parse_document(html);

    let username = Selector::parse("span.username, span.user-name")
        .ok()
        .and_then(|sel| document.select(&sel).next().map(|el| element_text(el.text())))
        .filter(|s| !s.is_empty())
        .map(|s| truncate(&s));

    AccountSummary {
        username,
        balance: balance_in(&document),
    }
}

/// Scrape the balance from the portal's balance page.
///
/// Prefers the `.balance` element, then the first text node mentioning a
/// currency or "balance" together with a digit.
pub fn extract_balance(html: &str) -> Option<String> {
    balance_in(&Html::parse_document(html))
}

fn balance_in(document: &Html) -> Option<String> {
    Selector::parse(".balance")
        .ok()
        .and_then(|sel| document.select(&sel).next().map(|el| element_text(el.text())))
        .filter(|s| !s.is_empty())
        .or_else(|| {
            document
                .root_element()
                .text()
                .map(str::trim)
                .find(|t| looks_like_balance(t))
                .map(str::to_string)
        })
        .map(|s| truncate(&s))
}

fn looks_like_balance(text: &str) -> bool {
    let lower = text.to_lowercase();
    (lower.contains("balance") || text.contains('$') || text.contains('€'))
        && text.chars().any(|c| c.is_ascii_digit())
}

pub(super) fn element_text<'a>(parts: impl Iterator<Item = &'a str>) -> String {
    parts
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

fn truncate(text: &str) -> String {
    text.chars().take(MAX_SUMMARY_LEN).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGIN_PAGE: &str = r#"
        <html><head><meta name="csrf-token" content="meta-token"></head>
        <body>
          <form method="post" action="/login">
            <input type="hidden" name="_token" value="form-token">
            <input type="email" name="email">
            <input type="password" name="password">
          </form>
        </body></html>
    "#;

    #[test]
    fn test_extract_token_from_input() {
        assert_eq!(
            extract_csrf_token(LOGIN_PAGE, "_token").as_deref(),
            Some("form-token")
        );
    }

    #[test]
    fn test_extract_token_falls_back_to_meta() {
        assert_eq!(
            extract_csrf_token(LOGIN_PAGE, "csrf_field").as_deref(),
            Some("meta-token")
        );
    }

    #[test]
    fn test_quoted_field_name_still_reaches_meta() {
        let html = r#"<head><meta name="csrf-token" content="meta-only"></head><form></form>"#;
        assert_eq!(extract_csrf_token(html, r#"a"b"#).as_deref(), Some("meta-only"));
    }

    #[test]
    fn test_quoted_field_name_matches_input() {
        let html = r#"<input name='a"b' value="odd-token">"#;
        assert_eq!(extract_csrf_token(html, r#"a"b"#).as_deref(), Some("odd-token"));
    }

    #[test]
    fn test_missing_token() {
        let html = r#"<form><input name="_token" value=""></form>"#;
        assert!(extract_csrf_token(html, "_token").is_none());
        assert!(extract_csrf_token("<html></html>", "_token").is_none());
    }

    #[test]
    fn test_account_summary_from_dashboard() {
        let html = r#"
            <nav><span class="username"> Jane Doe </span><a href="/logout">Logout</a></nav>
            <div class="card"><div class="balance">$ 12.50</div></div>
        "#;
        let summary = extract_account_summary(html);
        assert_eq!(summary.username.as_deref(), Some("Jane Doe"));
        assert_eq!(summary.balance.as_deref(), Some("$ 12.50"));
    }

    #[test]
    fn test_account_summary_balance_text_fallback() {
        let html = "<div><p>Welcome</p><p>Your balance: 3.20 EUR</p></div>";
        let summary = extract_account_summary(html);
        assert!(summary.username.is_none());
        assert_eq!(summary.balance.as_deref(), Some("Your balance: 3.20 EUR"));
    }

    #[test]
    fn test_extract_balance_page() {
        let html = r#"<h1>Balance</h1><table><tr><td>Available</td><td>€ 4.75</td></tr></table>"#;
        assert_eq!(extract_balance(html).as_deref(), Some("€ 4.75"));

        let long = format!(r#"<div class="balance">$1 {}</div>"#, "x".repeat(200));
        assert_eq!(extract_balance(&long).map(|b| b.chars().count()), Some(100));

        assert!(extract_balance("<h1>Balance</h1><p>none yet</p>").is_none());
    }

    #[test]
    fn test_account_summary_empty_page() {
        assert_eq!(extract_account_summary("<p>nothing</p>"), AccountSummary::default());
    }
}
