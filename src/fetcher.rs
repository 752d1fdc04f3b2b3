//! Fetch archives over HTTP.
//!
//! Which URL a category lives at is decided by [ArchiveEndpoints]: either a fixed per-category path, or the hashed file
//! name a published [Manifest] records for it.
use tracing::debug;

use crate::*;

/// Default per-category archive path.  `{category}` is substituted.
pub const DEFAULT_ENDPOINT_TEMPLATE: &str = "/bundles/{category}.zip";

#[derive(Debug, Clone)]
pub enum ArchiveEndpoints {
    /// A path with `{category}` substituted.
    Template(String),
    /// `{prefix}/{file}` where `file` is the manifest's entry for the category.
    Manifest { prefix: String, manifest: Manifest },
}

impl Default for ArchiveEndpoints {
    fn default() -> Self {
        ArchiveEndpoints::Template(DEFAULT_ENDPOINT_TEMPLATE.to_string())
    }
}

impl ArchiveEndpoints {
    /// The path for a category, or `None` if a manifest doesn't list it.
    pub fn path_for(&self, category: &IconCategory) -> Option<String> {
        match self {
            ArchiveEndpoints::Template(t) => Some(t.replace("{category}", category.as_str())),
            ArchiveEndpoints::Manifest { prefix, manifest } => manifest
                .get(category)
                .map(|file| format!("{}/{}", prefix.trim_end_matches('/'), file)),
        }
    }
}

/// An [ArchiveFetcher] that GETs archives from a web server.
///
/// No timeout is applied beyond whatever the client was built with.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    base_url: String,
    endpoints: ArchiveEndpoints,
}

impl HttpFetcher {
    pub fn new(base_url: impl Into<String>, endpoints: ArchiveEndpoints) -> HttpFetcher {
        HttpFetcher::with_client(reqwest::Client::new(), base_url, endpoints)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        endpoints: ArchiveEndpoints,
    ) -> HttpFetcher {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        HttpFetcher {
            client,
            base_url,
            endpoints,
        }
    }

    pub fn url_for(&self, category: &IconCategory) -> Result<String, FetchError> {
        let path = self
            .endpoints
            .path_for(category)
            .ok_or_else(|| FetchError::NoEndpoint(category.clone()))?;
        if path.starts_with('/') {
            Ok(format!("{}{}", self.base_url, path))
        } else {
            Ok(format!("{}/{}", self.base_url, path))
        }
    }
}

#[async_trait::async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, category: &IconCategory) -> Result<Vec<u8>, FetchError> {
        let url = self.url_for(category)?;
        debug!("Fetching archive for {} from {}", category, url);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| FetchError::Request {
                url: url.clone(),
                source,
            })?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                url,
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Request { url, source })?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve exactly one HTTP response on a fresh local port, returning the base URL.
    async fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = vec![0u8; 4096];
            let _ = socket.read(&mut request).await.unwrap();
            let header = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                body.len()
            );
            socket.write_all(header.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.unwrap();
        });
        format!("http://{}/", addr)
    }

    #[test]
    fn template_urls() {
        let fetcher = HttpFetcher::new("https://example.com//", ArchiveEndpoints::default());
        assert_eq!(
            fetcher.url_for(&IconCategory::new("materials")).unwrap(),
            "https://example.com/bundles/materials.zip"
        );
    }

    #[test]
    fn manifest_urls() {
        let mut manifest = Manifest::new();
        manifest.insert(&IconCategory::new("materials"), "materials-0123abcd.zip");
        let fetcher = HttpFetcher::new(
            "https://example.com",
            ArchiveEndpoints::Manifest {
                prefix: "/bundles/".to_string(),
                manifest,
            },
        );
        assert_eq!(
            fetcher.url_for(&IconCategory::new("materials")).unwrap(),
            "https://example.com/bundles/materials-0123abcd.zip"
        );
        assert!(matches!(
            fetcher.url_for(&IconCategory::new("cooking")),
            Err(FetchError::NoEndpoint(_))
        ));
    }

    #[tokio::test]
    async fn fetches_body() {
        let base = serve_once("200 OK", b"zip bytes".to_vec()).await;
        let fetcher = HttpFetcher::new(base, ArchiveEndpoints::default());
        let bytes = fetcher.fetch(&IconCategory::new("materials")).await.unwrap();
        assert_eq!(bytes, b"zip bytes");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let base = serve_once("404 Not Found", vec![]).await;
        let fetcher = HttpFetcher::new(base, ArchiveEndpoints::default());
        match fetcher.fetch(&IconCategory::new("materials")).await {
            Err(FetchError::Status { status, url }) => {
                assert_eq!(status, 404);
                assert!(url.ends_with("/bundles/materials.zip"));
            }
            other => panic!("Expected a status error, got {:?}", other),
        }
    }
}
