use crate::errors::FetchError;
use crate::service::FeatureService;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

/// Feature service that replays canned responses in order and records every
/// URL it was asked for.
#[derive(Default)]
pub struct ScriptedService {
    responses: Mutex<VecDeque<Result<String, FetchError>>>,
    requests: Mutex<Vec<Url>>,
}

impl ScriptedService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_body(self, body: Value) -> Self {
        self.responses.lock().unwrap().push_back(Ok(body.to_string()));
        self
    }

    pub fn then_raw(self, body: &str) -> Self {
        self.responses.lock().unwrap().push_back(Ok(body.to_string()));
        self
    }

    pub fn then_error(self, error: FetchError) -> Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<Url> {
        self.requests.lock().unwrap().clone()
    }

    /// Decoded query parameter of the n-th request.
    pub fn param(&self, n: usize, name: &str) -> Option<String> {
        self.requests()
            .get(n)?
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }
}

#[async_trait]
impl FeatureService for ScriptedService {
    async fn get(&self, url: &Url, _timeout: Duration) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(url.clone());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("unexpected request: {url}"))
    }
}

/// A page of point features with ids `ids` stored under `id_field`.
pub fn page_body(id_field: &str, ids: impl IntoIterator<Item = i64>, exceeded: bool) -> Value {
    let features: Vec<Value> = ids
        .into_iter()
        .map(|id| {
            json!({
                "attributes": {id_field: id, "NAME": format!("feature-{id}")},
                "geometry": {"x": -86.78, "y": 36.16}
            })
        })
        .collect();

    json!({
        "objectIdFieldName": id_field,
        "geometryType": "esriGeometryPoint",
        "spatialReference": {"wkid": 4326, "latestWkid": 4326},
        "fields": [{"name": id_field, "type": "esriFieldTypeOID"}],
        "features": features,
        "exceededTransferLimit": exceeded
    })
}

pub fn error_body(message: &str, details: &[&str]) -> Value {
    json!({"error": {"code": 400, "message": message, "details": details}})
}
