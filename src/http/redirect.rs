//! HTTP to HTTPS redirect listener.
//!
//! The insecure listener serves no content. Every request, whatever its method
//! or path, is answered with a permanent redirect to the same host and path
//! over HTTPS. Requests that name no host (HTTP/1.0) are sent to the
//! configured address.

use std::sync::Arc;

use axum::extract::{FromRequestParts, State};
use axum::http::{HeaderValue, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::any;
use axum::Router;
use axum_extra::extract::Host;
use http::header::LOCATION;

type FallbackHost = Arc<str>;
type HostRejection = <Host as FromRequestParts<FallbackHost>>::Rejection;

/// Router answering every request with a redirect to HTTPS.
///
/// `fallback_host` is used when the request carries no host of its own.
pub fn redirect_router(fallback_host: &str) -> Router {
    Router::new()
        .fallback(any(redirect_to_https))
        .with_state(FallbackHost::from(fallback_host))
}

/// The HTTPS equivalent of a request URL: `https://<host><path and query>`.
///
/// The host is kept exactly as the client sent it; the configured ports play
/// no part.
pub fn https_location(host: &str, uri: &Uri) -> String {
    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("https://{host}{path}")
}

/// Generate a 301 redirect response from HTTP to HTTPS.
async fn redirect_to_https(
    State(fallback_host): State<FallbackHost>,
    host: Result<Host, HostRejection>,
    uri: Uri,
) -> Response {
    let https_url = match &host {
        Ok(Host(host)) => https_location(host, &uri),
        Err(_) => https_location(&fallback_host, &uri),
    };

    tracing::debug!(from = %uri, to = %https_url, "Redirecting HTTP to HTTPS");

    match HeaderValue::from_str(&https_url) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}
