//! Wire types for feature-service query responses and the aggregate built from them.

use crate::dataset::SourceRole;
use crate::errors::FetchError;
use crate::strategy::Strategy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// A single record. Passed through untouched; only id attributes are ever read.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Feature {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Feature {
    /// Reads an integer attribute. Whole floats and numeric strings are accepted
    /// since some services serialise object ids that way.
    pub fn integer_attribute(&self, name: &str) -> Option<i64> {
        match self.attributes.get(name)? {
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Structured error object returned in place of results.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RemoteError {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Vec<String>,
}

impl RemoteError {
    /// Case-insensitive search of the message and details.
    pub fn mentions(&self, needle: &str) -> bool {
        let needle = needle.to_lowercase();
        self.message
            .iter()
            .chain(self.details.iter())
            .any(|text| text.to_lowercase().contains(&needle))
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(code) = self.code {
            write!(f, "[{code}] ")?;
        }
        f.write_str(self.message.as_deref().unwrap_or("unknown error"))?;
        if !self.details.is_empty() {
            write!(f, " ({})", self.details.join("; "))?;
        }
        Ok(())
    }
}

/// One decoded page as returned by the service.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeaturePage {
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub fields: Option<Value>,
    #[serde(default)]
    pub geometry_type: Option<String>,
    #[serde(default)]
    pub spatial_reference: Option<Value>,
    #[serde(default)]
    pub exceeded_transfer_limit: bool,
    #[serde(default)]
    pub error: Option<RemoteError>,
}

impl FeaturePage {
    pub fn parse(endpoint: &str, body: &str) -> Result<Self, FetchError> {
        serde_json::from_str(body).map_err(|e| FetchError::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })
    }

    /// Turns an embedded error object into `FetchError::RemoteQuery`.
    pub fn into_result(self) -> Result<Self, FetchError> {
        match self.error {
            Some(error) => Err(FetchError::RemoteQuery(error)),
            None => Ok(self),
        }
    }
}

/// Schema metadata shared by every page. The first page that supplies a
/// value wins; later copies are ignored.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Schema {
    pub fields: Option<Value>,
    pub geometry_type: Option<String>,
    pub spatial_reference: Option<Value>,
}

impl Schema {
    pub fn absorb(&mut self, page: &mut FeaturePage) {
        if self.fields.is_none() {
            self.fields = page.fields.take();
        }
        if self.geometry_type.is_none() {
            self.geometry_type = page.geometry_type.take();
        }
        if self.spatial_reference.is_none() {
            self.spatial_reference = page.spatial_reference.take();
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateResult {
    pub geometry_type: Option<String>,
    pub spatial_reference: Option<Value>,
    pub fields: Option<Value>,
    pub features: Vec<Feature>,
    pub total_count: usize,
    pub method: Strategy,
    pub source_used: SourceRole,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_count: Option<u64>,
}

impl AggregateResult {
    pub fn new(schema: Schema, features: Vec<Feature>, method: Strategy) -> Self {
        AggregateResult {
            geometry_type: schema.geometry_type,
            spatial_reference: schema.spatial_reference,
            fields: schema.fields,
            total_count: features.len(),
            features,
            method,
            source_used: SourceRole::Primary,
            server_count: None,
        }
    }

    pub fn used_fallback(&self) -> bool {
        self.source_used == SourceRole::Fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_page() {
        let body = json!({
            "objectIdFieldName": "OBJECTID",
            "geometryType": "esriGeometryPoint",
            "spatialReference": {"wkid": 4326, "latestWkid": 4326},
            "fields": [{"name": "OBJECTID", "type": "esriFieldTypeOID"}],
            "exceededTransferLimit": true,
            "features": [
                {"attributes": {"OBJECTID": 1, "CASE_NO": "2024S-001"}, "geometry": {"x": -86.7, "y": 36.1}},
                {"attributes": {"OBJECTID": 2, "CASE_NO": "2024S-002"}}
            ]
        })
        .to_string();

        let page = FeaturePage::parse("test", &body).unwrap();
        assert_eq!(page.features.len(), 2);
        assert!(page.exceeded_transfer_limit);
        assert_eq!(page.geometry_type.as_deref(), Some("esriGeometryPoint"));
        assert!(page.error.is_none());
        assert_eq!(page.features[0].integer_attribute("OBJECTID"), Some(1));
        assert!(page.features[1].geometry.is_none());
    }

    #[test]
    fn test_parse_error_page() {
        let body = r#"{"error":{"code":400,"message":"Unable to complete operation.","details":["'date_entered' is not a valid field"]}}"#;
        let page = FeaturePage::parse("test", body).unwrap();
        let error = page.error.clone().unwrap();
        assert!(error.mentions("DATE_ENTERED"));
        assert!(!error.mentions("OBJECTID"));
        assert_eq!(
            error.to_string(),
            "[400] Unable to complete operation. ('date_entered' is not a valid field)"
        );
        assert!(matches!(page.into_result(), Err(FetchError::RemoteQuery(_))));
    }

    #[test]
    fn test_parse_malformed() {
        let result = FeaturePage::parse("test", "<html>Service Unavailable</html>");
        assert!(matches!(result, Err(FetchError::MalformedResponse { .. })));
    }

    #[test]
    fn test_feature_passthrough() {
        let raw = json!({
            "attributes": {"OID": 7, "NAME": "x"},
            "geometry": {"rings": [[[0, 0], [1, 1], [0, 0]]]},
            "symbol": {"color": [1, 2, 3]}
        });
        let feature: Feature = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&feature).unwrap(), raw);
    }

    #[test]
    fn test_integer_attribute_variants() {
        let feature: Feature = serde_json::from_value(json!({
            "attributes": {"A": 3.0, "B": "42", "C": 1.5, "D": null}
        }))
        .unwrap();
        assert_eq!(feature.integer_attribute("A"), Some(3));
        assert_eq!(feature.integer_attribute("B"), Some(42));
        assert_eq!(feature.integer_attribute("C"), None);
        assert_eq!(feature.integer_attribute("D"), None);
        assert_eq!(feature.integer_attribute("missing"), None);
    }

    #[test]
    fn test_schema_first_seen_wins() {
        let mut schema = Schema::default();
        let mut first = FeaturePage {
            geometry_type: Some("esriGeometryPolygon".into()),
            ..Default::default()
        };
        let mut second = FeaturePage {
            geometry_type: Some("esriGeometryPoint".into()),
            fields: Some(json!([{"name": "OID"}])),
            ..Default::default()
        };
        schema.absorb(&mut first);
        schema.absorb(&mut second);
        assert_eq!(schema.geometry_type.as_deref(), Some("esriGeometryPolygon"));
        assert_eq!(schema.fields, Some(json!([{"name": "OID"}])));
        assert!(schema.spatial_reference.is_none());
    }
}
