//! Static file serving over a virtual directory.
//!
//! Provides the generic file handler the secure listener delegates to. Every
//! lookup goes through a [`VirtualDirectory`], so the handler never knows what
//! storage sits behind it. Supports GET and HEAD, directory index documents and
//! listings, `If-Modified-Since` and single byte ranges. File bodies are read
//! on the blocking pool and streamed to the client in chunks.

use std::io::{self, Read, Seek, SeekFrom};
use std::time::{SystemTime, UNIX_EPOCH};

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::{DateTime, Utc};
use http::header::{
    ACCEPT_RANGES, ALLOW, CONTENT_LENGTH, CONTENT_RANGE, CONTENT_TYPE, IF_MODIFIED_SINCE,
    LAST_MODIFIED, LOCATION, RANGE,
};
use mime_guess::mime;

use crate::error::VfsError;
use crate::vfs::{FileInfo, VirtualDirectory, VirtualFile};

/// Bytes read per body chunk
const CHUNK_SIZE: usize = 64 * 1024;

/// Chunks buffered between the reader thread and the response body
const CHUNK_QUEUE: usize = 4;

const INDEX_PAGE: &str = "/index.html";

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Create the file handler for `dir`. Every path is routed to it.
pub fn file_server(dir: VirtualDirectory) -> Router {
    Router::new().fallback(serve).with_state(dir)
}

/// What a request path resolved to.
enum Resolved {
    File { file: VirtualFile, info: FileInfo },
    Listing(Vec<FileInfo>),
    Redirect(String),
}

async fn serve(
    State(dir): State<VirtualDirectory>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(ALLOW, HeaderValue::from_static("GET, HEAD"))],
            "405 method not allowed\n",
        )
            .into_response();
    }

    let url_path = match urlencoding::decode(uri.path()) {
        Ok(path) if path.starts_with('/') => path.into_owned(),
        Ok(path) => format!("/{path}"),
        Err(_) => return (StatusCode::BAD_REQUEST, "400 bad request\n").into_response(),
    };

    if url_path.ends_with(INDEX_PAGE) {
        return local_redirect(&uri, "./");
    }

    let name = clean_path(&url_path);
    let resolved = tokio::task::spawn_blocking(move || resolve(&dir, &name, &url_path)).await;

    match resolved {
        Ok(Ok(Resolved::File { file, info })) => serve_file(file, info, &method, &headers),
        Ok(Ok(Resolved::Listing(entries))) => serve_listing(&entries, &method),
        Ok(Ok(Resolved::Redirect(target))) => local_redirect(&uri, &target),
        Ok(Err(err)) => error_response(&err),
        Err(err) => {
            tracing::error!(error = %err, "File lookup task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Resolve `.` and `..` segments and collapse slashes. The result is rooted
/// at `/` and has no trailing slash, so it can never climb above the root.
fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            segment => segments.push(segment),
        }
    }
    format!("/{}", segments.join("/"))
}

fn base_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn close(file: &mut VirtualFile) {
    if let Err(err) = file.close() {
        tracing::warn!(path = %file.path(), error = %err, "Failed to close file");
    }
}

fn resolve(dir: &VirtualDirectory, name: &str, url_path: &str) -> Result<Resolved, VfsError> {
    let mut file = dir.open(name)?;
    let info = match file.stat() {
        Ok(info) => info,
        Err(err) => {
            close(&mut file);
            return Err(err);
        }
    };

    if !info.is_dir {
        if url_path.ends_with('/') {
            close(&mut file);
            return Ok(Resolved::Redirect(format!("../{}", base_name(url_path))));
        }
        return Ok(Resolved::File { file, info });
    }

    if !url_path.ends_with('/') {
        close(&mut file);
        return Ok(Resolved::Redirect(format!("{}/", base_name(url_path))));
    }

    let index_name = format!("{}{}", name.trim_end_matches('/'), INDEX_PAGE);
    if let Ok(mut index) = dir.open(&index_name) {
        match index.stat() {
            Ok(index_info) if !index_info.is_dir => {
                close(&mut file);
                return Ok(Resolved::File {
                    file: index,
                    info: index_info,
                });
            }
            _ => close(&mut index),
        }
    }

    let entries = file.read_dir(0);
    close(&mut file);
    Ok(Resolved::Listing(entries?))
}

fn error_response(err: &VfsError) -> Response {
    let (status, message) = match err {
        VfsError::Io(e) if e.kind() == io::ErrorKind::NotFound => {
            (StatusCode::NOT_FOUND, "404 page not found\n")
        }
        VfsError::Io(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            (StatusCode::FORBIDDEN, "403 Forbidden\n")
        }
        _ => {
            tracing::error!(error = %err, "Failed to serve file");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "500 Internal Server Error\n",
            )
        }
    };
    (status, message).into_response()
}

fn local_redirect(uri: &Uri, target: &str) -> Response {
    let location = match uri.query() {
        Some(query) => format!("{target}?{query}"),
        None => target.to_string(),
    };
    match HeaderValue::from_str(&location) {
        Ok(location) => (StatusCode::MOVED_PERMANENTLY, [(LOCATION, location)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

fn content_type(name: &str) -> HeaderValue {
    let guess = mime_guess::from_path(name).first_or_octet_stream();
    let value = if guess.type_() == mime::TEXT && guess.get_param(mime::CHARSET).is_none() {
        format!("{guess}; charset=utf-8")
    } else {
        guess.to_string()
    };
    HeaderValue::from_str(&value)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"))
}

fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE).to_string()
}

fn unix_secs(time: SystemTime) -> Option<i64> {
    time.duration_since(UNIX_EPOCH)
        .ok()
        .and_then(|d| i64::try_from(d.as_secs()).ok())
}

/// Whether the client's cached copy from `If-Modified-Since` is still current.
fn not_modified(headers: &HeaderMap, modified: Option<SystemTime>) -> bool {
    let Some(modified) = modified.and_then(unix_secs) else {
        return false;
    };
    headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| DateTime::parse_from_rfc2822(value).ok())
        .is_some_and(|since| modified <= since.timestamp())
}

/// A satisfiable single range, as `(start, length)`.
#[derive(Debug, PartialEq, Eq)]
enum ByteRange {
    Whole,
    Partial(u64, u64),
    Unsatisfiable,
}

/// Parse a `Range` header against a file of `size` bytes.
///
/// Only single `bytes=` ranges are honoured; anything else serves the whole file.
fn parse_range(header: Option<&HeaderValue>, size: u64) -> ByteRange {
    let Some(spec) = header
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().strip_prefix("bytes="))
    else {
        return ByteRange::Whole;
    };
    if spec.contains(',') {
        return ByteRange::Whole;
    }
    let Some((start, end)) = spec.trim().split_once('-') else {
        return ByteRange::Whole;
    };

    let (start, end) = match (start.trim(), end.trim()) {
        ("", "") => return ByteRange::Whole,
        ("", suffix) => match suffix.parse::<u64>() {
            Ok(0) => return ByteRange::Unsatisfiable,
            Ok(n) => (size.saturating_sub(n), size.saturating_sub(1)),
            Err(_) => return ByteRange::Whole,
        },
        (start, end) => {
            let Ok(start) = start.parse::<u64>() else {
                return ByteRange::Whole;
            };
            let end = if end.is_empty() {
                size.saturating_sub(1)
            } else {
                match end.parse::<u64>() {
                    Ok(end) if end >= start => end.min(size.saturating_sub(1)),
                    _ => return ByteRange::Whole,
                }
            };
            (start, end)
        }
    };

    if size == 0 || start >= size {
        return ByteRange::Unsatisfiable;
    }
    ByteRange::Partial(start, end - start + 1)
}

fn serve_file(mut file: VirtualFile, info: FileInfo, method: &Method, headers: &HeaderMap) -> Response {
    let mut response_headers = HeaderMap::new();
    if let Some(modified) = info.modified {
        if let Ok(value) = HeaderValue::from_str(&http_date(modified)) {
            response_headers.insert(LAST_MODIFIED, value);
        }
    }

    if not_modified(headers, info.modified) {
        close(&mut file);
        return (StatusCode::NOT_MODIFIED, response_headers).into_response();
    }

    response_headers.insert(CONTENT_TYPE, content_type(&info.name));
    response_headers.insert(ACCEPT_RANGES, HeaderValue::from_static("bytes"));

    let size = info.size;
    let (status, start, length) = match parse_range(headers.get(RANGE), size) {
        ByteRange::Whole => (StatusCode::OK, 0, size),
        ByteRange::Partial(start, length) => {
            let content_range = format!("bytes {}-{}/{}", start, start + length - 1, size);
            if let Ok(value) = HeaderValue::from_str(&content_range) {
                response_headers.insert(CONTENT_RANGE, value);
            }
            (StatusCode::PARTIAL_CONTENT, start, length)
        }
        ByteRange::Unsatisfiable => {
            close(&mut file);
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{size}")) {
                response_headers.insert(CONTENT_RANGE, value);
            }
            return (
                StatusCode::RANGE_NOT_SATISFIABLE,
                response_headers,
                "416 requested range not satisfiable\n",
            )
                .into_response();
        }
    };
    response_headers.insert(CONTENT_LENGTH, HeaderValue::from(length));

    if method == Method::HEAD {
        close(&mut file);
        return (status, response_headers).into_response();
    }

    (status, response_headers, stream_file(file, start, length)).into_response()
}

/// Stream `length` bytes from `start` of `file`, closing it when done.
fn stream_file(mut file: VirtualFile, start: u64, length: u64) -> Body {
    let (tx, rx) = async_channel::bounded::<io::Result<Bytes>>(CHUNK_QUEUE);

    tokio::task::spawn_blocking(move || {
        if let Err(err) = copy_chunks(&mut file, start, length, &tx) {
            tracing::warn!(path = %file.path(), error = %err, "Failed to read file body");
            let _ = tx.send_blocking(Err(err));
        }
        close(&mut file);
    });

    Body::from_stream(rx)
}

fn copy_chunks(
    file: &mut VirtualFile,
    start: u64,
    length: u64,
    tx: &async_channel::Sender<io::Result<Bytes>>,
) -> io::Result<()> {
    file.seek(SeekFrom::Start(start))?;
    let mut remaining = length;
    while remaining > 0 {
        let want = usize::try_from(remaining).map_or(CHUNK_SIZE, |r| r.min(CHUNK_SIZE));
        let mut chunk = vec![0u8; want];
        let read = file.read(&mut chunk)?;
        if read == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while serving",
            ));
        }
        chunk.truncate(read);
        remaining -= read as u64;
        if tx.send_blocking(Ok(Bytes::from(chunk))).is_err() {
            // Client went away
            return Ok(());
        }
    }
    Ok(())
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&#34;"),
            '\'' => escaped.push_str("&#39;"),
            c => escaped.push(c),
        }
    }
    escaped
}

fn serve_listing(entries: &[FileInfo], method: &Method) -> Response {
    let mut html = String::from(
        "<!doctype html>\n<meta name=\"viewport\" content=\"width=device-width\">\n<pre>\n",
    );
    for entry in entries {
        let suffix = if entry.is_dir { "/" } else { "" };
        html.push_str(&format!(
            "<a href=\"{}{suffix}\">{}{suffix}</a>\n",
            urlencoding::encode(&entry.name),
            escape_html(&entry.name),
        ));
    }
    html.push_str("</pre>\n");

    let content_type = [(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))];
    if method == Method::HEAD {
        return (StatusCode::OK, content_type).into_response();
    }
    (StatusCode::OK, content_type, html).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vfs::{FileMask, MemoryFileSystem};
    use axum::body::to_bytes;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn site() -> Router {
        let fs = MemoryFileSystem::new()
            .with_file("build/index.html", "<html>home</html>")
            .with_file("build/static/js/main.js", "console.log('main')")
            .with_file("build/static/css/main.css", "body{}")
            .with_file("build/docs/index.html", "<html>docs</html>")
            .with_file("build/assets/a&b.txt", "ab")
            .with_file("build/assets/logo.svg", "<svg/>");
        file_server(VirtualDirectory::new(Arc::new(FileMask::wrap(
            Arc::new(fs),
            "build",
        ))))
    }

    async fn get(app: Router, uri: &str, headers: &[(&str, &str)]) -> Response {
        let mut request = Request::builder().uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        app.oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_root_serves_index_document() {
        let response = get(site(), "/", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/html; charset=utf-8");
        assert!(response.headers().contains_key(LAST_MODIFIED));
        assert_eq!(body(response).await, "<html>home</html>");
    }

    #[tokio::test]
    async fn test_serves_nested_file() {
        let response = get(site(), "/static/css/main.css", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/css; charset=utf-8");
        assert_eq!(response.headers()[CONTENT_LENGTH], "6");
        assert_eq!(body(response).await, "body{}");
    }

    #[tokio::test]
    async fn test_missing_file_is_not_found() {
        let response = get(site(), "/static/js/missing.js", &[]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_index_document_redirects_to_directory() {
        let response = get(site(), "/docs/index.html?x=1", &[]).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[LOCATION], "./?x=1");
    }

    #[tokio::test]
    async fn test_directory_without_slash_redirects() {
        let response = get(site(), "/docs", &[]).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[LOCATION], "docs/");

        let response = get(site(), "/docs/", &[]).await;
        assert_eq!(body(response).await, "<html>docs</html>");
    }

    #[tokio::test]
    async fn test_file_with_slash_redirects() {
        let response = get(site(), "/static/css/main.css/", &[]).await;
        assert_eq!(response.status(), StatusCode::MOVED_PERMANENTLY);
        assert_eq!(response.headers()[LOCATION], "../main.css");
    }

    #[tokio::test]
    async fn test_directory_listing_escapes_names() {
        let response = get(site(), "/assets/", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body(response).await;
        assert!(html.contains("<a href=\"a%26b.txt\">a&amp;b.txt</a>"));
        assert!(html.contains("<a href=\"logo.svg\">logo.svg</a>"));
    }

    #[tokio::test]
    async fn test_parent_segments_stay_inside_root() {
        let response = get(site(), "/static/../../build/static/css/main.css", &[]).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = get(site(), "/static/%2e%2e/static/css/main.css", &[]).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_range_request() {
        let response = get(site(), "/static/js/main.js", &[("range", "bytes=0-6")]).await;
        assert_eq!(response.status(), StatusCode::PARTIAL_CONTENT);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes 0-6/19");
        assert_eq!(body(response).await, "console");

        let response = get(site(), "/static/js/main.js", &[("range", "bytes=100-")]).await;
        assert_eq!(response.status(), StatusCode::RANGE_NOT_SATISFIABLE);
        assert_eq!(response.headers()[CONTENT_RANGE], "bytes */19");
    }

    #[tokio::test]
    async fn test_if_modified_since() {
        let future = http_date(SystemTime::now() + std::time::Duration::from_secs(3600));
        let response = get(site(), "/static/css/main.css", &[("if-modified-since", &future)]).await;
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);

        let past = "Sun, 06 Nov 1994 08:49:37 GMT";
        let response = get(site(), "/static/css/main.css", &[("if-modified-since", past)]).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_head_has_no_body() {
        let request = Request::builder()
            .method(Method::HEAD)
            .uri("/static/css/main.css")
            .body(Body::empty())
            .unwrap();
        let response = site().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_LENGTH], "6");
        assert_eq!(body(response).await, "");
    }

    #[tokio::test]
    async fn test_other_methods_not_allowed() {
        let request = Request::builder()
            .method(Method::POST)
            .uri("/")
            .body(Body::empty())
            .unwrap();
        let response = site().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "GET, HEAD");
    }

    #[tokio::test]
    async fn test_missing_filesystem_is_server_error() {
        let response = get(file_server(VirtualDirectory::default()), "/", &[]).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_clean_path() {
        assert_eq!(clean_path("/"), "/");
        assert_eq!(clean_path("/a//b/./c/"), "/a/b/c");
        assert_eq!(clean_path("/../../etc/passwd"), "/etc/passwd");
        assert_eq!(clean_path("/a/b/../c"), "/a/c");
    }

    #[test]
    fn test_parse_range() {
        let range = |spec: &str| parse_range(Some(&HeaderValue::from_str(spec).unwrap()), 10);
        assert_eq!(parse_range(None, 10), ByteRange::Whole);
        assert_eq!(range("bytes=2-4"), ByteRange::Partial(2, 3));
        assert_eq!(range("bytes=5-"), ByteRange::Partial(5, 5));
        assert_eq!(range("bytes=-3"), ByteRange::Partial(7, 3));
        assert_eq!(range("bytes=8-100"), ByteRange::Partial(8, 2));
        assert_eq!(range("bytes=10-"), ByteRange::Unsatisfiable);
        assert_eq!(range("bytes=0-1,4-5"), ByteRange::Whole);
        assert_eq!(range("items=0-1"), ByteRange::Whole);
    }
}
