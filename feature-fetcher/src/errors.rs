use crate::dataset::SourceRole;
use crate::page::RemoteError;
use crate::strategy::Strategy;
use http::StatusCode;

/// Errors raised while paging through a feature service.
///
/// Everything except `NoDataRetrieved` describes a single failed attempt. The
/// fallback driver records those and moves on to the next strategy or endpoint.
#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },

    #[error("feature service rejected the query: {0}")]
    RemoteQuery(RemoteError),

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("upstream {endpoint} returned HTTP {status}")]
    UpstreamHttp {
        endpoint: String,
        status: StatusCode,
    },

    #[error("request to {endpoint} failed: {reason}")]
    Transport { endpoint: String, reason: String },

    #[error("no data retrieved from any source")]
    NoDataRetrieved { attempts: Vec<AttemptFailure> },
}

/// One strategy run that did not produce any features.
#[derive(Debug)]
pub struct AttemptFailure {
    pub source: SourceRole,
    pub strategy: Strategy,
    /// `None` when the run completed but returned zero features.
    pub error: Option<FetchError>,
}

impl AttemptFailure {
    pub fn reason(&self) -> String {
        match &self.error {
            Some(e) => e.to_string(),
            None => "no features returned".to_string(),
        }
    }
}

/// Short label for an endpoint used in errors and logs: host and path, no query.
pub fn endpoint_label(url: &url::Url) -> String {
    match url.host_str() {
        Some(host) => format!("{host}{}", url.path()),
        None => url.as_str().to_string(),
    }
}
