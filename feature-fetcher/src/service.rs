use crate::errors::{FetchError, endpoint_label};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::timeout;
use url::Url;

/// Transport used to reach a feature service. Returns the raw response body;
/// decoding happens in the fetcher.
#[async_trait]
pub trait FeatureService: Send + Sync {
    async fn get(&self, url: &Url, timeout: Duration) -> Result<String, FetchError>;
}

/// Feature service reached over HTTP.
#[derive(Clone, Default)]
pub struct HttpFeatureService {
    client: reqwest::Client,
}

#[async_trait]
impl FeatureService for HttpFeatureService {
    /// The timeout covers the whole exchange, body included. On expiry the
    /// in-flight request is dropped.
    async fn get(&self, url: &Url, timeout_after: Duration) -> Result<String, FetchError> {
        let endpoint = endpoint_label(url);

        let exchange = async {
            let response = self.client.get(url.clone()).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Ok::<_, reqwest::Error>(Err(status));
            }
            response.text().await.map(Ok)
        };

        let result = timeout(timeout_after, exchange)
            .await
            .map_err(|_| FetchError::Timeout(endpoint.clone()))?;

        match result {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(status)) => Err(FetchError::UpstreamHttp { endpoint, status }),
            Err(e) if e.is_timeout() => Err(FetchError::Timeout(endpoint)),
            Err(e) => Err(FetchError::Transport {
                endpoint,
                reason: e.to_string(),
            }),
        }
    }
}
