//! Static file server for HSML documents and their assets.

use std::fs::Metadata;
use std::net::SocketAddr;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use axum::extract::{Path as UrlPath, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use log::{error, info};

use crate::config::ServeOptions;

const HTML: &str = "text/html; charset=utf-8";
const REVALIDATE: &str = "public, max-age=0, must-revalidate";
const IMMUTABLE: &str = "public, max-age=31536000, immutable";

#[derive(Debug)]
struct SiteRoot {
    root: PathBuf,
}

/// Routes `GET /` and `GET /*path` to files under `root`.
pub fn router(root: impl Into<PathBuf>) -> Router {
    let site = Arc::new(SiteRoot { root: root.into() });
    Router::new()
        .route("/", get(index_handler))
        .route("/*path", get(file_handler))
        .with_state(site)
}

/// Serves until Ctrl-C.
pub async fn run(options: &ServeOptions) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], options.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(
        "static server on http://localhost:{} (root: {})",
        options.port,
        options.root.display()
    );
    axum::serve(listener, router(options.root.clone()))
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                error!("failed to listen for shutdown signal: {err}");
            }
        })
        .await
        .context("static server failed")
}

async fn index_handler(State(site): State<Arc<SiteRoot>>, headers: HeaderMap) -> Response {
    serve(&site, "index.html", &headers).await
}

async fn file_handler(
    State(site): State<Arc<SiteRoot>>,
    UrlPath(path): UrlPath<String>,
    headers: HeaderMap,
) -> Response {
    serve(&site, &path, &headers).await
}

async fn serve(site: &SiteRoot, request_path: &str, headers: &HeaderMap) -> Response {
    let Some(target) = resolve_path(&site.root, request_path) else {
        return (StatusCode::BAD_REQUEST, "400 Bad Request").into_response();
    };

    let (path, metadata, directory_index) = match file_metadata(&target).await {
        Some(metadata) => (target, metadata, false),
        None => {
            let index = target.join("index.html");
            match file_metadata(&index).await {
                Some(metadata) => (index, metadata, true),
                None => return (StatusCode::NOT_FOUND, "404 Not Found").into_response(),
            }
        }
    };

    let tag = etag(metadata.len(), modified_millis(&metadata));
    let (content_type, cache_control) = if directory_index {
        (HTML, REVALIDATE)
    } else {
        (content_type(&path), cache_control(&path))
    };
    let response_headers = [
        (header::CONTENT_TYPE, content_type.to_string()),
        (header::ETAG, tag.clone()),
        (header::CACHE_CONTROL, cache_control.to_string()),
    ];

    let matches = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == tag);
    if matches {
        return (StatusCode::NOT_MODIFIED, response_headers).into_response();
    }

    match tokio::fs::read(&path).await {
        Ok(body) => (StatusCode::OK, response_headers, body).into_response(),
        Err(err) => {
            error!("failed to read {}: {err}", path.display());
            (StatusCode::INTERNAL_SERVER_ERROR, "500 Internal Server Error").into_response()
        }
    }
}

/// Joins `request_path` onto `root` one segment at a time. Returns `None`
/// when a `..` segment would climb above `root`.
pub fn resolve_path(root: &Path, request_path: &str) -> Option<PathBuf> {
    let mut segments: Vec<&str> = Vec::new();
    for segment in request_path.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop()?;
            }
            segment => {
                // Reject drive prefixes and other non-plain components.
                let mut components = Path::new(segment).components();
                if !matches!(
                    (components.next(), components.next()),
                    (Some(Component::Normal(_)), None)
                ) {
                    return None;
                }
                segments.push(segment);
            }
        }
    }
    Some(segments.iter().fold(root.to_path_buf(), |path, segment| path.join(segment)))
}

/// `Content-Type` for a file, chosen by its extension.
pub fn content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("html") => HTML,
        Some("js" | "mjs") => "text/javascript; charset=utf-8",
        Some("css") => "text/css; charset=utf-8",
        Some("json") => "application/json; charset=utf-8",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("txt") => "text/plain; charset=utf-8",
        Some("wasm") => "application/wasm",
        _ => "application/octet-stream",
    }
}

fn cache_control(path: &Path) -> &'static str {
    if path.extension().and_then(|ext| ext.to_str()) == Some("html") {
        REVALIDATE
    } else {
        IMMUTABLE
    }
}

/// Weak validator derived from size and modification time.
pub fn etag(size: u64, modified_ms: u64) -> String {
    format!("\"W/{size:x}-{modified_ms:x}\"")
}

fn modified_millis(metadata: &Metadata) -> u64 {
    metadata
        .modified()
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_millis() as u64)
}

async fn file_metadata(path: &Path) -> Option<Metadata> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(Metadata::is_file)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use once_cell::sync::Lazy;
    use tempfile::TempDir;
    use tower::ServiceExt;

    use super::*;

    static SITE: Lazy<TempDir> = Lazy::new(|| {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.html"), "<h1>home</h1>").unwrap();
        fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        fs::write(dir.path().join("scene.hsml"), "<space/>").unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("docs/index.html"), "<h1>docs</h1>").unwrap();
        fs::create_dir(dir.path().join("empty")).unwrap();
        dir
    });

    async fn get(uri: &str, if_none_match: Option<&str>) -> Response {
        let mut request = Request::builder().uri(uri);
        if let Some(tag) = if_none_match {
            request = request.header(header::IF_NONE_MATCH, tag);
        }
        router(SITE.path())
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn body_text(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn header_value<'a>(response: &'a Response, name: header::HeaderName) -> &'a str {
        response.headers()[name].to_str().unwrap()
    }

    #[tokio::test]
    async fn root_serves_index_html() {
        let response = get("/", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, header::CONTENT_TYPE), HTML);
        assert_eq!(header_value(&response, header::CACHE_CONTROL), REVALIDATE);
        assert_eq!(body_text(response).await, "<h1>home</h1>");
    }

    #[tokio::test]
    async fn assets_are_cached_immutably() {
        let response = get("/app.js", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_value(&response, header::CONTENT_TYPE),
            "text/javascript; charset=utf-8"
        );
        assert_eq!(header_value(&response, header::CACHE_CONTROL), IMMUTABLE);
        let tag = header_value(&response, header::ETAG);
        assert!(tag.starts_with("\"W/e-"), "{tag}");

        let other = get("/scene.hsml", None).await;
        assert_eq!(
            header_value(&other, header::CONTENT_TYPE),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn directories_fall_back_to_their_index() {
        let response = get("/docs", None).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, header::CONTENT_TYPE), HTML);
        assert_eq!(body_text(response).await, "<h1>docs</h1>");

        let slash = get("/docs/", None).await;
        assert_eq!(slash.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_files_are_not_found() {
        for uri in ["/nope.txt", "/empty"] {
            let response = get(uri, None).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND);
            assert_eq!(body_text(response).await, "404 Not Found");
        }
    }

    #[tokio::test]
    async fn escaping_the_root_is_a_bad_request() {
        let response = get("/docs/../../secret", None).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_text(response).await, "400 Bad Request");

        let inside = get("/docs/../app.js", None).await;
        assert_eq!(inside.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn matching_etag_returns_not_modified() {
        let first = get("/app.js", None).await;
        let tag = header_value(&first, header::ETAG).to_string();

        let cached = get("/app.js", Some(&tag)).await;
        assert_eq!(cached.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header_value(&cached, header::ETAG), tag);
        assert_eq!(header_value(&cached, header::CACHE_CONTROL), IMMUTABLE);
        assert!(body_text(cached).await.is_empty());

        let stale = get("/app.js", Some("\"W/0-0\"")).await;
        assert_eq!(stale.status(), StatusCode::OK);
    }

    #[test]
    fn content_types_follow_extensions() {
        let cases = [
            ("a.HTML", HTML),
            ("a.mjs", "text/javascript; charset=utf-8"),
            ("a.css", "text/css; charset=utf-8"),
            ("a.json", "application/json; charset=utf-8"),
            ("a.svg", "image/svg+xml"),
            ("a.jpeg", "image/jpeg"),
            ("a.ico", "image/x-icon"),
            ("a.wasm", "application/wasm"),
            ("a.glb", "application/octet-stream"),
            ("README", "application/octet-stream"),
        ];
        for (name, expected) in cases {
            assert_eq!(content_type(Path::new(name)), expected, "{name}");
        }
    }

    #[test]
    fn resolve_path_stays_under_root() {
        let root = Path::new("/srv/public");
        assert_eq!(
            resolve_path(root, "a/./b//c.txt"),
            Some(PathBuf::from("/srv/public/a/b/c.txt"))
        );
        assert_eq!(resolve_path(root, "a/../b"), Some(PathBuf::from("/srv/public/b")));
        assert_eq!(resolve_path(root, "../etc/passwd"), None);
        assert_eq!(resolve_path(root, "a\\..\\..\\x"), None);
        assert_eq!(resolve_path(root, ""), Some(PathBuf::from("/srv/public")));
    }

    #[test]
    fn etag_is_hex_size_and_mtime() {
        assert_eq!(etag(255, 4096), "\"W/ff-1000\"");
    }
}
