//! Static files and fallback content
//!
//! [`StaticFiles`] serves a directory from disk. [`Fallback`] wraps any
//! handler and replaces error responses (status >= 400) with `200` and a
//! fixed body, which is how a single-page app gets its shell for client-side
//! routes.

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{CACHE_CONTROL, CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use http::{Response, StatusCode};
use std::path::{Path, PathBuf};

use super::utils::{body_from, not_found_response, Req, Resp};
use super::Handler;
use crate::resource::content_hash;

/// Serve files below `root`, with the mount prefix stripped from the path
#[derive(Debug, Clone)]
pub struct StaticFiles {
    root: PathBuf,
    prefix: String,
    index: String,
}

impl StaticFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), prefix: String::new(), index: "index.html".to_string() }
    }

    /// Strip this prefix from request paths before resolving files
    pub fn strip_prefix(mut self, prefix: &str) -> Self {
        self.prefix = prefix.trim_end_matches('/').to_string();
        self
    }

    /// File served for directory paths
    pub fn index(mut self, index: &str) -> Self {
        self.index = index.to_string();
        self
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        let rel = path.strip_prefix(self.prefix.as_str()).unwrap_or(path);
        let rel = urlencoding::decode(rel).ok()?;
        let rel = rel.trim_start_matches('/');

        // Prevent directory traversal
        if rel.split('/').any(|segment| segment == "..") || rel.contains('\\') {
            return None;
        }

        let mut file = self.root.clone();
        if rel.is_empty() || rel.ends_with('/') {
            file.push(rel);
            file.push(&self.index);
        } else {
            file.push(rel);
        }
        Some(file)
    }
}

#[async_trait]
impl Handler for StaticFiles {
    async fn handle(&self, req: Req) -> Resp {
        let Some(file) = self.resolve(req.uri().path()) else {
            return not_found_response("file");
        };

        let bytes = match tokio::fs::read(&file).await {
            Ok(bytes) => bytes,
            Err(e) => {
                log::debug!("Static file {} not served: {}", file.display(), e);
                return not_found_response("file");
            }
        };

        let etag = format!("\"{}\"", content_hash(&bytes));
        let inm = req.headers().get(IF_NONE_MATCH).and_then(|v| v.to_str().ok());
        if inm.map(str::trim) == Some(etag.as_str()) {
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(ETAG, etag)
                .body(body_from(Bytes::new()))
                .expect("valid HTTP response");
        }

        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, mime_for(&file))
            .header(ETAG, etag)
            .header(CACHE_CONTROL, "no-cache")
            .body(body_from(bytes))
            .expect("valid HTTP response")
    }
}

fn mime_for(path: &Path) -> String {
    mime_guess::from_path(path).first_or_octet_stream().to_string()
}

/// Replace error responses from `inner` with `200` and fixed content
pub struct Fallback<H> {
    inner: H,
    content: Bytes,
    content_type: String,
}

impl<H: Handler> Fallback<H> {
    pub fn new(inner: H, content: impl Into<Bytes>, content_type: &str) -> Self {
        Self { inner, content: content.into(), content_type: content_type.to_string() }
    }

    /// Load the fallback body from a file, guessing its content type
    pub async fn from_file(inner: H, path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read(path).await?;
        Ok(Self::new(inner, content, &mime_for(path)))
    }
}

#[async_trait]
impl<H: Handler> Handler for Fallback<H> {
    async fn handle(&self, req: Req) -> Resp {
        let resp = self.inner.handle(req).await;
        if resp.status().as_u16() < 400 {
            return resp;
        }

        log::debug!("Replacing {} response with fallback content", resp.status());
        Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, self.content_type.as_str())
            .body(body_from(self.content.clone()))
            .expect("valid HTTP response")
    }
}
