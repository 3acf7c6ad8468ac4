use feature_fetcher::dataset::{DatasetConfig, DatasetError, Datasets};
use feature_fetcher::strategy::DEFAULT_SINGLE_SHOT_RECORD_COUNT;
use feature_fetcher::FetchSettings;
use indexmap::IndexMap;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("Timeouts must be greater than 0")]
    InvalidTimeout,

    #[error("Route must start with '/': {0}")]
    InvalidRoute(String),

    #[error("Dataset path conflicts with the main route: {0}")]
    RouteConflict(String),

    #[error("Dataset configuration error: {0}")]
    Dataset(#[from] DatasetError),
}

/// Feature proxy configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Config {
    /// Listener serving dataset requests
    pub listener: Listener,
    /// Listener serving `/health` and `/ready`
    pub admin_listener: Listener,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Route taking the dataset key from the `source` query parameter
    #[serde(default = "default_route")]
    pub route: String,
    /// `max-age` and `s-maxage` of successful responses
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,
    /// Dataset served when `source` is missing or unknown. Defaults to the
    /// first configured dataset.
    #[serde(default)]
    pub default_dataset: Option<String>,
    /// Datasets keyed by their short source key, in priority order
    pub datasets: IndexMap<String, DatasetConfig>,
}

impl Config {
    /// Validates the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.upstream.validate()?;

        if !self.route.starts_with('/') {
            return Err(ValidationError::InvalidRoute(self.route.clone()));
        }

        for dataset in self.datasets.values() {
            if dataset.path.as_deref() == Some(self.route.as_str()) {
                return Err(ValidationError::RouteConflict(self.route.clone()));
            }
        }

        self.datasets()?;
        Ok(())
    }

    /// Builds the validated dataset table
    pub fn datasets(&self) -> Result<Datasets, ValidationError> {
        Ok(Datasets::new(
            self.default_dataset.clone(),
            self.datasets.clone(),
        )?)
    }
}

/// Network listener configuration
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    /// Host address to bind to (e.g., "0.0.0.0" or "127.0.0.1")
    pub host: String,
    /// Port number to listen on
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

/// Settings for requests sent to the feature services
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct UpstreamConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_count_timeout_secs")]
    pub count_timeout_secs: u64,
    #[serde(default = "default_single_shot_record_count")]
    pub single_shot_record_count: u32,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        UpstreamConfig {
            request_timeout_secs: default_request_timeout_secs(),
            count_timeout_secs: default_count_timeout_secs(),
            single_shot_record_count: default_single_shot_record_count(),
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.request_timeout_secs == 0 || self.count_timeout_secs == 0 {
            return Err(ValidationError::InvalidTimeout);
        }
        Ok(())
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            count_timeout: Duration::from_secs(self.count_timeout_secs),
            single_shot_record_count: self.single_shot_record_count,
        }
    }
}

fn default_route() -> String {
    "/api/nashville-data".to_string()
}

fn default_cache_max_age_secs() -> u64 {
    3600
}

fn default_request_timeout_secs() -> u64 {
    15
}

fn default_count_timeout_secs() -> u64 {
    8
}

fn default_single_shot_record_count() -> u32 {
    DEFAULT_SINGLE_SHOT_RECORD_COUNT
}

#[cfg(test)]
mod tests {
    use super::*;
    use feature_fetcher::{FilterConfig, Strategy};

    const CONFIG_YAML: &str = r#"
listener:
    host: "0.0.0.0"
    port: 3000
admin_listener:
    host: "127.0.0.1"
    port: 3001
upstream:
    request_timeout_secs: 20
datasets:
    mpc:
        path: /api/mpc-cases
        primary:
            url: https://maps.nashville.gov/arcgis/rest/services/Planning/DevTracker_Cases/FeatureServer/1/query
            id_field: ESRI_OID
        fallback:
            url: https://services2.arcgis.com/HdTo6HJqh92wn4D8/arcgis/rest/services/Development_Tracker_Cases_view/FeatureServer/1/query
        server_count: true
    bp:
        path: /api/building-permits
        primary:
            url: https://maps.nashville.gov/arcgis/rest/services/Codes/BuildingPermits/MapServer/0/query
            id_field: OID
            page_size: 1000
        filter:
            type: recent_years
            field: date_entered
            years: 5
"#;

    fn config() -> Config {
        serde_yaml::from_str(CONFIG_YAML).unwrap()
    }

    #[test]
    fn test_parse_valid_config() {
        let config = config();
        assert!(config.validate().is_ok());

        assert_eq!(config.listener.port, 3000);
        assert_eq!(config.route, "/api/nashville-data");
        assert_eq!(config.cache_max_age_secs, 3600);
        assert_eq!(config.upstream.request_timeout_secs, 20);
        assert_eq!(config.upstream.count_timeout_secs, 8);
        assert_eq!(config.datasets.len(), 2);
        assert_eq!(config.datasets["bp"].primary.page_size, 1000);
        assert!(matches!(
            config.datasets["bp"].filter,
            FilterConfig::RecentYears { years: 5, .. }
        ));
        assert_eq!(
            config.datasets["mpc"].strategies,
            vec![Strategy::Offset, Strategy::Cursor]
        );

        let datasets = config.datasets().unwrap();
        assert_eq!(datasets.default_key(), "mpc");
    }

    #[test]
    fn test_fetch_settings() {
        let settings = config().upstream.fetch_settings();
        assert_eq!(settings.request_timeout, Duration::from_secs(20));
        assert_eq!(settings.count_timeout, Duration::from_secs(8));
        assert_eq!(settings.single_shot_record_count, 32000);
    }

    #[test]
    fn test_validation_errors() {
        let mut config = self::config();
        config.listener.port = 0;
        assert_eq!(config.validate().unwrap_err(), ValidationError::InvalidPort);

        let mut config = self::config();
        config.upstream.count_timeout_secs = 0;
        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::InvalidTimeout
        );

        let mut config = self::config();
        config.route = "api".into();
        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::InvalidRoute("api".into())
        );

        let mut config = self::config();
        config.datasets["bp"].path = Some("/api/nashville-data".into());
        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::RouteConflict("/api/nashville-data".into())
        );

        let mut config = self::config();
        config.default_dataset = Some("zoning".into());
        assert_eq!(
            config.validate().unwrap_err(),
            ValidationError::Dataset(DatasetError::UnknownDefault("zoning".into()))
        );
    }

    #[test]
    fn test_deserialization_errors() {
        // Invalid URL
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
datasets: {mpc: {primary: {url: "not-a-url"}}}
"#
            )
            .is_err()
        );

        // Unknown strategy
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
datasets: {mpc: {primary: {url: "http://a/query"}, strategies: [random]}}
"#
            )
            .is_err()
        );

        // Missing datasets
        assert!(
            serde_yaml::from_str::<Config>(
                r#"
listener: {host: "0.0.0.0", port: 3000}
admin_listener: {host: "127.0.0.1", port: 3001}
"#
            )
            .is_err()
        );
    }
}
