use crate::config::{Config, ValidationError};
use crate::errors::ProxyError;
use crate::metrics_defs::{REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::response::{
    DatasetResponse, ErrorResponse, ProxyBody, error_status, internal_error_response,
    json_response, method_not_allowed_response, not_found_response, preflight_response,
};
use feature_fetcher::{DatasetConfig, Datasets, Fetcher};
use http::{Method, StatusCode, Uri};
use hyper::body::Incoming;
use hyper::service::Service;
use hyper::{Request, Response};
use shared::{gauge, histogram};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;
use tokio::task::{JoinError, JoinHandle};

/// Serves configured datasets as aggregated feature collections.
#[derive(Clone)]
pub struct FeatureProxyService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    route: String,
    datasets: Datasets,
    fetcher: Fetcher,
    cache_max_age: u64,
}

impl FeatureProxyService {
    pub fn new(config: &Config) -> Result<Self, ValidationError> {
        let fetcher = Fetcher::http(config.upstream.fetch_settings());
        Self::with_fetcher(config, fetcher)
    }

    pub fn with_fetcher(config: &Config, fetcher: Fetcher) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(FeatureProxyService {
            inner: Arc::new(ServiceInner {
                route: config.route.clone(),
                datasets: config.datasets()?,
                fetcher,
                cache_max_age: config.cache_max_age_secs,
            }),
        })
    }

    /// Maps a request path to the dataset it serves. The main route picks the
    /// dataset from `source`, falling back to the default one.
    fn resolve(&self, uri: &Uri) -> Option<(String, DatasetConfig)> {
        let path = uri.path();

        if path == self.inner.route {
            let source = uri.query().and_then(|query| {
                url::form_urlencoded::parse(query.as_bytes())
                    .find(|(name, _)| name == "source")
                    .map(|(_, value)| value.into_owned())
            });
            let (key, dataset) = self.inner.datasets.resolve(source.as_deref());
            return Some((key.to_string(), dataset.clone()));
        }

        self.inner
            .datasets
            .by_path(path)
            .map(|(key, dataset)| (key.to_string(), dataset.clone()))
    }

    pub async fn handle(
        &self,
        method: &Method,
        uri: &Uri,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let Some((key, dataset)) = self.resolve(uri) else {
            return Ok(not_found_response());
        };

        match *method {
            Method::GET => self.fetch(key, dataset).await,
            Method::OPTIONS => Ok(preflight_response()),
            _ => Ok(method_not_allowed_response()),
        }
    }

    async fn fetch(
        &self,
        key: String,
        dataset: DatasetConfig,
    ) -> Result<Response<ProxyBody>, ProxyError> {
        let fetcher = self.inner.fetcher.clone();
        let task_key = key.clone();

        // A panic while paging must still produce a JSON error for the client.
        let outcome = AbortOnDrop(tokio::spawn(async move {
            fetcher.fetch_dataset(&task_key, &dataset).await
        }))
        .await;

        match outcome {
            Ok(Ok(result)) => {
                tracing::info!(
                    dataset = %key,
                    features = result.total_count,
                    method = result.method.as_str(),
                    source = result.source_used.as_str(),
                    "Dataset served"
                );
                json_response(
                    StatusCode::OK,
                    &DatasetResponse::new(&key, result),
                    Some(self.inner.cache_max_age),
                )
            }
            Ok(Err(error)) => {
                tracing::warn!(dataset = %key, error = %error, "Dataset fetch failed");
                json_response(
                    error_status(&error),
                    &ErrorResponse::from_fetch_error(&key, &error),
                    None,
                )
            }
            Err(join_error) => {
                tracing::error!(dataset = %key, error = %join_error, "Dataset fetch aborted");
                json_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    &ErrorResponse {
                        error: format!("Fetch failed: {join_error}"),
                        source: key,
                    },
                    None,
                )
            }
        }
    }
}

impl Service<Request<Incoming>> for FeatureProxyService {
    type Response = Response<ProxyBody>;
    type Error = ProxyError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let service = self.clone();
        let (parts, _body) = req.into_parts();

        Box::pin(async move {
            let start = Instant::now();
            let inflight = InflightGuard::new();
            let result = service.handle(&parts.method, &parts.uri).await;
            drop(inflight);

            let response = result.unwrap_or_else(|e| {
                tracing::error!(error = %e, path = parts.uri.path(), "Failed to build response");
                internal_error_response()
            });

            histogram!(REQUEST_DURATION, "status" => response.status().as_str().to_owned())
                .record(start.elapsed().as_secs_f64());
            Ok(response)
        })
    }
}

/// Counts a request as in flight until dropped, including when hyper drops
/// the response future of a disconnected client.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1.0);
        InflightGuard
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1.0);
    }
}

/// Stops the spawned fetch once nobody is waiting for its result.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Future for AbortOnDrop<T> {
    type Output = Result<T, JoinError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0).poll(cx)
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
