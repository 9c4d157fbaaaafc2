//! Manual redirect resolution
//!
//! Redirects are followed one hop at a time through the session's transport
//! so cookies set on intermediate responses land in the same jar.

use url::Url;

use super::transport::{PortalResponse, PortalTransport};
use crate::error::{Error, Result};

/// Default maximum number of hops followed for one request
pub const DEFAULT_MAX_HOPS: usize = 10;

/// Follow a redirect chain starting at `response`.
///
/// Stops at the first non-redirect response, at a redirect without a
/// `Location` header, or after `max_hops` requests. In the last case the
/// final (still redirecting) response is returned as-is.
pub async fn resolve_redirects(
    transport: &dyn PortalTransport,
    response: PortalResponse,
    max_hops: usize,
) -> Result<PortalResponse> {
    let mut current = response;
    let mut hops = 0;

    while hops < max_hops && current.is_redirect() {
        let Some(location) = current.location.as_deref() else {
            break;
        };
        let next = resolve_location(&current.url, location)?;

        tracing::debug!(from = %current.url, to = %next, hop = hops + 1, "Following redirect");
        current = transport.get(&next).await?;
        hops += 1;
    }

    if current.is_redirect() && hops == max_hops {
        tracing::warn!(
            url = %current.url,
            max_hops,
            "Redirect limit reached, using last response"
        );
    }

    Ok(current)
}

/// GET `url` and resolve any redirects it answers with
pub(crate) async fn get_resolved(
    transport: &dyn PortalTransport,
    url: &Url,
    max_hops: usize,
) -> Result<PortalResponse> {
    let response = transport.get(url).await?;
    resolve_redirects(transport, response, max_hops).await
}

fn resolve_location(base: &Url, location: &str) -> Result<Url> {
    base.join(location).map_err(|e| {
        Error::Transport(format!("invalid redirect location {:?}: {}", location, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portal::testing::{html, redirect, ScriptedTransport};

    #[tokio::test]
    async fn test_non_redirect_is_returned_unchanged() {
        let transport = ScriptedTransport::default();
        let resolved = resolve_redirects(&transport, html("/home", "hi"), DEFAULT_MAX_HOPS)
            .await
            .unwrap();
        assert_eq!(resolved.url.path(), "/home");
        assert_eq!(transport.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_follows_relative_and_absolute_locations() {
        let transport = ScriptedTransport::default();
        transport
            .on_get("/step", redirect("/step", "https://portal.example.com/dashboard"))
            .on_get("/dashboard", html("/dashboard", "Dashboard"));

        let resolved = resolve_redirects(&transport, redirect("/login", "/step"), DEFAULT_MAX_HOPS)
            .await
            .unwrap();

        assert_eq!(resolved.status, 200);
        assert_eq!(resolved.url.path(), "/dashboard");
        assert_eq!(resolved.body, "Dashboard");
        assert_eq!(transport.total_requests(), 2);
    }

    #[tokio::test]
    async fn test_redirect_loop_stops_after_max_hops() {
        // Fifteen hops that bounce between two URLs forever
        let transport = ScriptedTransport::default();
        for _ in 0..15 {
            transport
                .on_get("/a", redirect("/a", "/b"))
                .on_get("/b", redirect("/b", "/a"));
        }

        let resolved = resolve_redirects(&transport, redirect("/start", "/a"), 10)
            .await
            .unwrap();

        assert_eq!(transport.total_requests(), 10);
        assert!(resolved.is_redirect());
        // Hop 10 requested /b, which answered with a redirect back to /a
        assert_eq!(resolved.url.path(), "/b");
    }

    #[tokio::test]
    async fn test_redirect_without_location_stops() {
        let transport = ScriptedTransport::default();
        let mut response = redirect("/x", "/y");
        response.location = None;

        let resolved = resolve_redirects(&transport, response, DEFAULT_MAX_HOPS)
            .await
            .unwrap();
        assert_eq!(resolved.status, 302);
        assert_eq!(transport.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_propagates() {
        let transport = ScriptedTransport::default();
        transport.fail_get("/gone", "connection refused");

        let result = resolve_redirects(&transport, redirect("/x", "/gone"), DEFAULT_MAX_HOPS).await;
        assert!(matches!(result, Err(Error::Transport(_))));
    }
}
