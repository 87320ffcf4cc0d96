//! HTTP client abstraction for testability.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::FetchError;

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Async HTTP GET abstraction.
///
/// Allows dependency injection so the fetcher can be exercised against a
/// scripted client in tests. Implementations return the response body on
/// 2xx and a [`FetchError`] otherwise.
pub trait AsyncHttpClient: Send + Sync {
    /// Perform an HTTP GET request, returning the body bytes.
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>>;
}

/// Real HTTP client backed by reqwest.
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a client with the default 30-second timeout.
    pub fn new() -> Result<Self, FetchError> {
        Self::with_timeout(Duration::from_secs(30))
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl AsyncHttpClient for ReqwestClient {
    fn get<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Result<Vec<u8>, FetchError>> {
        Box::pin(async move {
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| FetchError::Transport(format!("request failed: {e}")))?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: url.to_string(),
                });
            }

            response
                .bytes()
                .await
                .map(|b| b.to_vec())
                .map_err(|e| FetchError::Transport(format!("failed to read response: {e}")))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::ScriptedHttpClient;
    use super::*;

    #[tokio::test]
    async fn scripted_client_success() {
        let client = ScriptedHttpClient::always_ok(vec![1, 2, 3]);
        let result = client.get("http://example.com/0/0/0.png").await;
        assert_eq!(result.unwrap(), vec![1, 2, 3]);
        assert_eq!(client.request_count(), 1);
    }

    #[tokio::test]
    async fn scripted_client_error_then_default() {
        let client = ScriptedHttpClient::always_ok(vec![7]).with_script(vec![Err(
            FetchError::HttpStatus {
                status: 503,
                url: "http://example.com".into(),
            },
        )]);

        assert!(client.get("http://example.com/a").await.is_err());
        assert_eq!(client.get("http://example.com/b").await.unwrap(), vec![7]);
        assert_eq!(
            client.requests(),
            vec!["http://example.com/a", "http://example.com/b"]
        );
    }
}
