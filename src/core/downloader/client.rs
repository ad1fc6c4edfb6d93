use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::core::error::{ModError, ModResult};
use crate::core::http::build_http_client;

/// Network fetch collaborator. Implementations must not retry on their own;
/// retry policy belongs to the caller.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the full body at `url`.
    async fn fetch(&self, url: &str) -> ModResult<Vec<u8>>;
}

/// reqwest-backed fetcher.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str) -> ModResult<Self> {
        let client = build_http_client(user_agent)?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> ModResult<Vec<u8>> {
        let transport = |message: String| ModError::Transport {
            url: url.to_string(),
            message,
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(transport(format!("HTTP {}", status.as_u16())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport(e.to_string()))?;

        debug!("Fetched {} ({} bytes)", url, bytes.len());
        Ok(bytes.to_vec())
    }
}

/// Try each URL in order until one fetch succeeds. Returns the last error
/// if every candidate fails.
pub async fn fetch_first(fetcher: &dyn Fetcher, urls: &[&str]) -> ModResult<Vec<u8>> {
    let mut last_err: Option<ModError> = None;

    for url in urls {
        match fetcher.fetch(url).await {
            Ok(bytes) => return Ok(bytes),
            Err(e) => {
                warn!("Fetch from {} failed: {}", url, e);
                last_err = Some(e);
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ModError::NotFound("no candidate URLs to fetch".into())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fetch_first_falls_through_to_next_mirror() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch()
            .withf(|url| url.starts_with("https://a.example.com"))
            .times(1)
            .returning(|url| {
                Err(ModError::Transport {
                    url: url.to_string(),
                    message: "HTTP 503".into(),
                })
            });
        fetcher
            .expect_fetch()
            .withf(|url| url.starts_with("https://b.example.com"))
            .times(1)
            .returning(|_| Ok(b"jar bytes".to_vec()));

        let bytes = fetch_first(
            &fetcher,
            &["https://a.example.com/m.jar", "https://b.example.com/m.jar"],
        )
        .await
        .unwrap();
        assert_eq!(bytes, b"jar bytes");
    }

    #[tokio::test]
    async fn fetch_first_reports_last_transport_error() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch().times(2).returning(|url| {
            Err(ModError::Transport {
                url: url.to_string(),
                message: "HTTP 404".into(),
            })
        });

        let err = fetch_first(&fetcher, &["https://a/1", "https://b/2"])
            .await
            .unwrap_err();
        match err {
            ModError::Transport { url, .. } => assert_eq!(url, "https://b/2"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn fetch_first_without_urls_is_not_found() {
        let fetcher = MockFetcher::new();
        let err = fetch_first(&fetcher, &[]).await.unwrap_err();
        assert!(matches!(err, ModError::NotFound(_)));
    }
}
