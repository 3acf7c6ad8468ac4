//! JSON bodies and headers returned to the map front-end.

use crate::errors::ProxyError;
use feature_fetcher::{AggregateResult, Feature, FetchError, Strategy};
use http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    ACCESS_CONTROL_MAX_AGE, ALLOW, CACHE_CONTROL, CONTENT_TYPE,
};
use http::{HeaderValue, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use hyper::body::Bytes;
use serde::Serialize;
use serde_json::Value;
use shared::http::{full_body, make_error_response};

pub type ProxyBody = BoxBody<Bytes, ProxyError>;

const ALLOWED_METHODS: &str = "GET, OPTIONS";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetResponse {
    pub geometry_type: Option<String>,
    pub spatial_reference: Option<Value>,
    pub fields: Option<Value>,
    pub features: Vec<Feature>,
    pub total_count: usize,
    pub method: Strategy,
    pub source: String,
    pub server_count: Option<u64>,
    pub used_fallback: bool,
}

impl DatasetResponse {
    pub fn new(source: &str, result: AggregateResult) -> Self {
        let used_fallback = result.used_fallback();
        DatasetResponse {
            geometry_type: result.geometry_type,
            spatial_reference: result.spatial_reference,
            fields: result.fields,
            total_count: result.total_count,
            features: result.features,
            method: result.method,
            source: source.to_string(),
            server_count: result.server_count,
            used_fallback,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub source: String,
}

impl ErrorResponse {
    pub fn from_fetch_error(source: &str, error: &FetchError) -> Self {
        let error = match error {
            FetchError::NoDataRetrieved { .. } => "No data retrieved from any source".to_string(),
            other => format!("Fetch failed: {other}"),
        };
        ErrorResponse {
            error,
            source: source.to_string(),
        }
    }
}

/// Upstream failures are reported as a bad gateway, anything else as an
/// internal error.
pub fn error_status(error: &FetchError) -> StatusCode {
    match error {
        FetchError::NoDataRetrieved { .. } | FetchError::UpstreamHttp { .. } => {
            StatusCode::BAD_GATEWAY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Serializes `body` with the CORS header set. `cache_max_age` adds a
/// public `Cache-Control` header and is only passed for successful responses.
pub fn json_response<T: Serialize>(
    status: StatusCode,
    body: &T,
    cache_max_age: Option<u64>,
) -> Result<Response<ProxyBody>, ProxyError> {
    let bytes = serde_json::to_vec(body)?;

    let mut builder = Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .header(ACCESS_CONTROL_ALLOW_ORIGIN, "*");
    if let Some(max_age) = cache_max_age {
        builder = builder.header(
            CACHE_CONTROL,
            format!("public, s-maxage={max_age}, max-age={max_age}"),
        );
    }

    Ok(builder.body(full_body(bytes))?)
}

/// Last-resort response when a JSON body could not be produced.
pub fn internal_error_response() -> Response<ProxyBody> {
    let mut response = make_error_response(StatusCode::INTERNAL_SERVER_ERROR);
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn preflight_response() -> Response<ProxyBody> {
    let mut response = Response::new(full_body(Bytes::new()));
    *response.status_mut() = StatusCode::NO_CONTENT;
    let headers = response.headers_mut();
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    headers.insert(
        ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOWED_METHODS),
    );
    headers.insert(
        ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers.insert(ACCESS_CONTROL_MAX_AGE, HeaderValue::from_static("86400"));
    response
}

pub fn not_found_response() -> Response<ProxyBody> {
    let mut response = make_error_response(StatusCode::NOT_FOUND);
    response
        .headers_mut()
        .insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

pub fn method_not_allowed_response() -> Response<ProxyBody> {
    let mut response = make_error_response(StatusCode::METHOD_NOT_ALLOWED);
    let headers = response.headers_mut();
    headers.insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
    headers.insert(ACCESS_CONTROL_ALLOW_ORIGIN, HeaderValue::from_static("*"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_fetcher::errors::AttemptFailure;
    use feature_fetcher::page::Schema;
    use feature_fetcher::SourceRole;
    use http_body_util::BodyExt;
    use serde_json::json;

    async fn body_json(response: Response<ProxyBody>) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_error_status() {
        assert_eq!(
            error_status(&FetchError::NoDataRetrieved { attempts: vec![] }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&FetchError::UpstreamHttp {
                endpoint: "a".into(),
                status: StatusCode::NOT_FOUND
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            error_status(&FetchError::Timeout("a".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn test_success_body_and_headers() {
        let features: Vec<Feature> = vec![
            serde_json::from_value(json!({"attributes": {"OID": 1}})).unwrap(),
        ];
        let schema = Schema {
            geometry_type: Some("esriGeometryPoint".into()),
            ..Default::default()
        };
        let mut result = AggregateResult::new(schema, features, Strategy::Cursor);
        result.source_used = SourceRole::Fallback;
        result.server_count = Some(10);

        let response = json_response(
            StatusCode::OK,
            &DatasetResponse::new("mpc", result),
            Some(3600),
        )
        .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            response.headers()[CACHE_CONTROL],
            "public, s-maxage=3600, max-age=3600"
        );

        let body = body_json(response).await;
        assert_eq!(body["geometryType"], "esriGeometryPoint");
        assert_eq!(body["totalCount"], 1);
        assert_eq!(body["method"], "cursor");
        assert_eq!(body["source"], "mpc");
        assert_eq!(body["serverCount"], 10);
        assert_eq!(body["usedFallback"], true);
        assert_eq!(body["features"][0]["attributes"]["OID"], 1);
        assert!(body["fields"].is_null());
    }

    #[tokio::test]
    async fn test_error_body() {
        let error = FetchError::NoDataRetrieved {
            attempts: vec![AttemptFailure {
                source: SourceRole::Primary,
                strategy: Strategy::Offset,
                error: None,
            }],
        };
        let response = json_response(
            error_status(&error),
            &ErrorResponse::from_fetch_error("bp", &error),
            None,
        )
        .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert!(response.headers().get(CACHE_CONTROL).is_none());
        assert_eq!(response.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let body = body_json(response).await;
        assert_eq!(
            body,
            json!({"error": "No data retrieved from any source", "source": "bp"})
        );
    }

    #[test]
    fn test_fixed_responses() {
        let preflight = preflight_response();
        assert_eq!(preflight.status(), StatusCode::NO_CONTENT);
        assert_eq!(preflight.headers()[ACCESS_CONTROL_ALLOW_METHODS], "GET, OPTIONS");

        let not_allowed = method_not_allowed_response();
        assert_eq!(not_allowed.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(not_allowed.headers()[ALLOW], "GET, OPTIONS");

        let not_found = not_found_response();
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");

        let internal = internal_error_response();
        assert_eq!(internal.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(internal.headers()[ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
