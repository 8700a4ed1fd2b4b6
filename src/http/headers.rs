//! Security headers sent on every response.
//!
//! The header set is fixed. Only the report address, the protocol and the
//! trusted script hash vary, and those are known before any listener starts,
//! so the values are built once and copied onto each response.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use http::header::{
    HeaderMap, HeaderValue, InvalidHeaderValue, CONTENT_SECURITY_POLICY, CONTENT_TYPE,
    REFERRER_POLICY, SET_COOKIE, STRICT_TRANSPORT_SECURITY, X_CONTENT_TYPE_OPTIONS,
    X_FRAME_OPTIONS, X_XSS_PROTECTION,
};

use crate::config::{self, SECURITY_REPORT_PATH};
use crate::script_hash::ScriptHash;

const JAVASCRIPT: &str = "application/javascript";

/// Pre-built values for the security header set.
#[derive(Debug, Clone)]
pub struct SecurityHeaders {
    content_security_policy: HeaderValue,
    xss_protection: HeaderValue,
}

impl SecurityHeaders {
    pub fn new(
        address: &str,
        protocol: &str,
        script_hash: &ScriptHash,
    ) -> Result<Self, InvalidHeaderValue> {
        Ok(Self {
            content_security_policy: HeaderValue::from_str(&format!(
                "default-src 'self' {script_hash}"
            ))?,
            xss_protection: HeaderValue::from_str(&format!(
                "1; mode=block; report={protocol}://{address}{SECURITY_REPORT_PATH}"
            ))?,
        })
    }

    /// Set the full header set on `headers`, in a fixed order.
    ///
    /// The Content-Security-Policy value is appended rather than replacing an
    /// existing policy; browsers enforce the union of all policies sent.
    pub fn apply(&self, headers: &mut HeaderMap) {
        headers.insert(
            STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(config::STRICT_TRANSPORT_SECURITY),
        );
        headers.append(CONTENT_SECURITY_POLICY, self.content_security_policy.clone());
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("SAMEORIGIN"));
        headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
        headers.insert(X_XSS_PROTECTION, self.xss_protection.clone());
        headers.insert(REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
        headers.insert(
            SET_COOKIE,
            HeaderValue::from_static("HttpOnly;Secure;SameSite=Strict"),
        );
    }
}

/// Set the security header set on `headers` for one response.
pub fn set_security_headers(
    headers: &mut HeaderMap,
    address: &str,
    protocol: &str,
    script_hash: &ScriptHash,
) -> Result<(), InvalidHeaderValue> {
    SecurityHeaders::new(address, protocol, script_hash)?.apply(headers);
    Ok(())
}

/// Middleware that applies the security header set to every response,
/// error responses included.
pub async fn security_headers_layer(
    State(headers): State<Arc<SecurityHeaders>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    headers.apply(response.headers_mut());
    response
}

/// Whether `path` names a script the browser must treat as JavaScript.
///
/// Extension detection does not know `.ts`, so both are forced.
pub fn is_script_path(path: &str) -> bool {
    path.ends_with(".js") || path.ends_with(".ts")
}

/// Middleware forcing `application/javascript` on successful script responses,
/// after the file handler has chosen its own content type.
pub async fn script_content_type_layer(request: Request, next: Next) -> Response {
    let path = request.uri().path();
    let script = match urlencoding::decode(path) {
        Ok(decoded) => is_script_path(&decoded),
        Err(_) => is_script_path(path),
    };
    let mut response = next.run(request).await;
    if script && response.status().is_success() {
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static(JAVASCRIPT));
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash() -> ScriptHash {
        ScriptHash::parse("'sha256-5As4+3YpY62+l38PsxCEkjB1R4YtyktBtRScTJ3fyLU='").unwrap()
    }

    #[test]
    fn test_sets_fixed_header_set_in_order() {
        let mut headers = HeaderMap::new();
        set_security_headers(&mut headers, "localhost", "https", &hash()).unwrap();

        let names: Vec<_> = headers.keys().map(|name| name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "strict-transport-security",
                "content-security-policy",
                "x-frame-options",
                "x-content-type-options",
                "x-xss-protection",
                "referrer-policy",
                "set-cookie",
            ]
        );
        assert_eq!(
            headers[STRICT_TRANSPORT_SECURITY],
            "max-age=31536000; includeSubDomains"
        );
        assert_eq!(
            headers[CONTENT_SECURITY_POLICY],
            "default-src 'self' 'sha256-5As4+3YpY62+l38PsxCEkjB1R4YtyktBtRScTJ3fyLU='"
        );
        assert_eq!(headers[X_FRAME_OPTIONS], "SAMEORIGIN");
        assert_eq!(headers[X_CONTENT_TYPE_OPTIONS], "nosniff");
        assert_eq!(
            headers[X_XSS_PROTECTION],
            "1; mode=block; report=https://localhost/api/security/report"
        );
        assert_eq!(headers[REFERRER_POLICY], "no-referrer");
        assert_eq!(headers[SET_COOKIE], "HttpOnly;Secure;SameSite=Strict");
    }

    #[test]
    fn test_policy_is_appended() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_SECURITY_POLICY, HeaderValue::from_static("img-src *"));
        headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
        set_security_headers(&mut headers, "example.com", "http", &ScriptHash::none()).unwrap();

        let policies: Vec<_> = headers.get_all(CONTENT_SECURITY_POLICY).iter().collect();
        assert_eq!(policies, vec!["img-src *", "default-src 'self' 'none'"]);
        assert_eq!(headers.get_all(X_FRAME_OPTIONS).iter().count(), 1);
        assert_eq!(
            headers[X_XSS_PROTECTION],
            "1; mode=block; report=http://example.com/api/security/report"
        );
    }

    #[test]
    fn test_rejects_unencodable_address() {
        let mut headers = HeaderMap::new();
        assert!(set_security_headers(&mut headers, "bad\naddress", "https", &hash()).is_err());
    }

    #[test]
    fn test_script_paths() {
        assert!(is_script_path("/static/js/main.js"));
        assert!(is_script_path("/src/app.ts"));
        assert!(!is_script_path("/app.json"));
        assert!(!is_script_path("/styles.css"));
    }

    #[tokio::test]
    async fn test_encoded_script_path_is_overridden() {
        use axum::body::Body;
        use axum::Router;
        use tower::ServiceExt;

        let app = Router::new()
            .fallback(|| async { ([(CONTENT_TYPE, "text/plain")], "run()") })
            .layer(axum::middleware::from_fn(script_content_type_layer));

        for uri in ["/a.j%73", "/src/app.t%73", "/a.js"] {
            let request = axum::http::Request::builder()
                .uri(uri)
                .body(Body::empty())
                .unwrap();
            let response = app.clone().oneshot(request).await.unwrap();
            assert_eq!(response.headers()[CONTENT_TYPE], JAVASCRIPT, "{uri}");
        }

        let request = axum::http::Request::builder()
            .uri("/a.json")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
    }
}
