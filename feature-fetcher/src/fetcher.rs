use crate::dataset::DatasetConfig;
use crate::errors::{AttemptFailure, FetchError, endpoint_label};
use crate::metrics_defs::{
    ATTEMPT_FAILED, FETCH_COMPLETED, FETCH_FEATURES, FETCH_NO_DATA, PAGE_DURATION, PAGES_FETCHED,
};
use crate::page::{AggregateResult, FeaturePage, RemoteError, Schema};
use crate::query::FeatureQuery;
use crate::service::{FeatureService, HttpFeatureService};
use crate::strategy::{CursorState, DEFAULT_SINGLE_SHOT_RECORD_COUNT, Step, Strategy};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use shared::{counter, histogram};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
pub struct FetchSettings {
    /// Bound on each page request.
    pub request_timeout: Duration,
    /// Bound on the record count request.
    pub count_timeout: Duration,
    pub single_shot_record_count: u32,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            request_timeout: Duration::from_secs(15),
            count_timeout: Duration::from_secs(8),
            single_shot_record_count: DEFAULT_SINGLE_SHOT_RECORD_COUNT,
        }
    }
}

#[derive(Deserialize)]
struct CountResponse {
    count: Option<u64>,
    error: Option<RemoteError>,
}

/// Pages through feature services. Holds no per-request state and can be
/// shared between concurrent requests.
#[derive(Clone)]
pub struct Fetcher {
    service: Arc<dyn FeatureService>,
    settings: FetchSettings,
}

impl Fetcher {
    pub fn new(service: Arc<dyn FeatureService>, settings: FetchSettings) -> Self {
        Fetcher { service, settings }
    }

    pub fn http(settings: FetchSettings) -> Self {
        Self::new(Arc::new(HttpFeatureService::default()), settings)
    }

    /// Runs a single strategy against the query's endpoint.
    pub async fn fetch(
        &self,
        query: &FeatureQuery,
        strategy: Strategy,
        safety_cap: usize,
    ) -> Result<AggregateResult, FetchError> {
        EndpointSession::new(self, query.clone())
            .run(strategy, safety_cap)
            .await
    }

    /// Fetches a configured dataset, falling back through its strategies and
    /// endpoints until one run returns at least one feature.
    pub async fn fetch_dataset(
        &self,
        key: &str,
        dataset: &DatasetConfig,
    ) -> Result<AggregateResult, FetchError> {
        self.fetch_dataset_at(key, dataset, Utc::now()).await
    }

    async fn fetch_dataset_at(
        &self,
        key: &str,
        dataset: &DatasetConfig,
        now: DateTime<Utc>,
    ) -> Result<AggregateResult, FetchError> {
        let mut attempts = Vec::new();

        for (role, endpoint) in dataset.endpoints() {
            let query = dataset.query_for(endpoint, now);

            let server_count = match dataset.server_count {
                true => self
                    .count(&query)
                    .await
                    .inspect_err(|e| {
                        tracing::warn!(dataset = key, source = role.as_str(), error = %e, "Record count unavailable")
                    })
                    .ok(),
                false => None,
            };

            // Strategies share the session so a relaxed filter carries over.
            let mut session = EndpointSession::new(self, query);

            for &strategy in &dataset.strategies {
                let error = match session.run(strategy, dataset.safety_cap).await {
                    Ok(mut result) if result.total_count > 0 => {
                        result.source_used = role;
                        result.server_count = server_count;

                        tracing::info!(
                            dataset = key,
                            source = role.as_str(),
                            method = strategy.as_str(),
                            features = result.total_count,
                            "Fetched dataset"
                        );
                        counter!(FETCH_COMPLETED, "method" => strategy.as_str(), "source" => role.as_str())
                            .increment(1);
                        histogram!(FETCH_FEATURES).record(result.total_count as f64);
                        return Ok(result);
                    }
                    Ok(_) => None,
                    Err(e) => Some(e),
                };

                let attempt = AttemptFailure {
                    source: role,
                    strategy,
                    error,
                };
                tracing::warn!(
                    dataset = key,
                    source = role.as_str(),
                    strategy = strategy.as_str(),
                    reason = %attempt.reason(),
                    "Pagination attempt failed"
                );
                counter!(ATTEMPT_FAILED, "strategy" => strategy.as_str(), "source" => role.as_str())
                    .increment(1);
                attempts.push(attempt);
            }
        }

        tracing::error!(
            dataset = key,
            attempts = attempts.len(),
            "No data retrieved from any source"
        );
        counter!(FETCH_NO_DATA).increment(1);

        // When the services only ever answered with HTTP errors, report that.
        if attempts
            .iter()
            .all(|a| matches!(a.error, Some(FetchError::UpstreamHttp { .. })))
            && let Some(AttemptFailure { error: Some(e), .. }) = attempts.pop()
        {
            return Err(e);
        }

        Err(FetchError::NoDataRetrieved { attempts })
    }

    /// Asks the service how many records match the query.
    pub async fn count(&self, query: &FeatureQuery) -> Result<u64, FetchError> {
        let url = query.count_url();
        let endpoint = endpoint_label(&url);
        let body = self.service.get(&url, self.settings.count_timeout).await?;

        let response: CountResponse =
            serde_json::from_str(&body).map_err(|e| FetchError::MalformedResponse {
                endpoint: endpoint.clone(),
                reason: e.to_string(),
            })?;

        if let Some(error) = response.error {
            return Err(FetchError::RemoteQuery(error));
        }
        response.count.ok_or(FetchError::MalformedResponse {
            endpoint,
            reason: "missing count".to_string(),
        })
    }

    async fn get_page(
        &self,
        query: &FeatureQuery,
        state: &CursorState,
    ) -> Result<FeaturePage, FetchError> {
        let url = query.page_url(&state.page_params(query));
        let endpoint = endpoint_label(&url);
        let strategy = state.strategy();

        let started = Instant::now();
        let body = self.service.get(&url, self.settings.request_timeout).await?;
        histogram!(PAGE_DURATION, "strategy" => strategy.as_str())
            .record(started.elapsed().as_secs_f64());

        let page = FeaturePage::parse(&endpoint, &body)?;
        counter!(PAGES_FETCHED, "strategy" => strategy.as_str()).increment(1);
        tracing::debug!(
            endpoint = %endpoint,
            strategy = strategy.as_str(),
            features = page.features.len(),
            exceeded_transfer_limit = page.exceeded_transfer_limit,
            "Fetched page"
        );
        Ok(page)
    }
}

/// Strategy runs against one endpoint. Owns the query so the filter can be
/// relaxed once for the rest of the session.
struct EndpointSession<'a> {
    fetcher: &'a Fetcher,
    query: FeatureQuery,
    relaxed: bool,
}

impl<'a> EndpointSession<'a> {
    fn new(fetcher: &'a Fetcher, query: FeatureQuery) -> Self {
        EndpointSession {
            fetcher,
            query,
            relaxed: false,
        }
    }

    /// Pages until the strategy reports it is done. Any page error aborts the
    /// run and whatever was accumulated is dropped.
    async fn run(
        &mut self,
        strategy: Strategy,
        safety_cap: usize,
    ) -> Result<AggregateResult, FetchError> {
        let mut state = strategy.initial_state(self.fetcher.settings.single_shot_record_count);
        let mut schema = Schema::default();
        let mut features = Vec::new();

        loop {
            let mut page = self.request_page(&state).await?;
            schema.absorb(&mut page);

            let taken = page
                .features
                .len()
                .min(safety_cap.saturating_sub(features.len()));
            let step = state.advance(&self.query, &page, features.len() + taken, safety_cap);

            features.extend(page.features.into_iter().take(taken));

            match step {
                Step::Continue(next) => state = next,
                Step::Done(reason) => {
                    tracing::debug!(
                        strategy = strategy.as_str(),
                        features = features.len(),
                        reason = ?reason,
                        "Pagination finished"
                    );
                    break;
                }
            }
        }

        Ok(AggregateResult::new(schema, features, strategy))
    }

    async fn request_page(&mut self, state: &CursorState) -> Result<FeaturePage, FetchError> {
        let outcome = self.fetcher.get_page(&self.query, state).await;
        if self.relaxed || self.query.where_clause.is_all() || !self.filter_rejected(&outcome) {
            return outcome?.into_result();
        }

        tracing::warn!(
            endpoint = %endpoint_label(&self.query.endpoint),
            filter = %self.query.where_clause,
            "Filter rejected by feature service, retrying with 1=1"
        );
        self.query = self.query.relaxed();
        self.relaxed = true;

        self.fetcher.get_page(&self.query, state).await?.into_result()
    }

    /// A remote error naming a filter attribute, or a body that is not JSON
    /// at all, is blamed on the filter.
    fn filter_rejected(&self, outcome: &Result<FeaturePage, FetchError>) -> bool {
        match outcome {
            Ok(FeaturePage {
                error: Some(error), ..
            }) => self
                .query
                .where_clause
                .filter_fields()
                .iter()
                .any(|field| error.mentions(field)),
            Err(FetchError::MalformedResponse { .. }) => true,
            _ => false,
        }
    }
}
