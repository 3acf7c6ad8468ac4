use feature_proxy::config::Config as ProxyConfig;
use serde::Deserialize;
use std::fs::File;

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
    /// Prefix prepended to every metric name
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoggingConfig {
    pub sentry_dsn: Option<String>,
    /// Filter used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Deserialize)]
pub struct CommonConfig {
    pub metrics: Option<MetricsConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    #[serde(flatten)]
    pub common: CommonConfig,
    pub proxy: ProxyConfig,
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }
}

fn default_metrics_prefix() -> String {
    "devtracker".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            metrics:
                statsd_host: 127.0.0.1
                statsd_port: 8125
            logging:
                sentry_dsn: https://key@sentry.example.com/1
            proxy:
                listener:
                    host: 0.0.0.0
                    port: 3000
                admin_listener:
                    host: 127.0.0.1
                    port: 3001
                datasets:
                    mpc:
                        primary:
                            url: https://maps.nashville.gov/arcgis/rest/services/Planning/DevTracker_Cases/FeatureServer/1/query
                            id_field: ESRI_OID
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        let metrics = config.common.metrics.expect("metrics config");
        assert_eq!(metrics.statsd_port, 8125);
        assert_eq!(metrics.prefix, "devtracker");

        let logging = config.common.logging.expect("logging config");
        assert!(logging.sentry_dsn.is_some());
        assert_eq!(logging.level, "info");

        assert_eq!(config.proxy.listener.port, 3000);
        assert!(config.proxy.validate().is_ok());
    }

    #[test]
    fn example_config_is_valid() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config.example.yaml");
        let config = Config::from_file(&path).expect("load example config");
        assert!(config.common.metrics.is_none());
        assert!(config.proxy.validate().is_ok());

        let datasets = config.proxy.datasets().expect("datasets");
        assert_eq!(datasets.default_key(), "mpc");
        assert!(datasets.by_path("/api/building-permits").is_some());
    }

    #[test]
    fn missing_file() {
        let err = Config::from_file(std::path::Path::new("/nonexistent/devtracker.yaml"));
        assert!(matches!(err, Err(ConfigError::LoadError(_))));
    }

    #[test]
    fn missing_proxy_section() {
        let tmp = write_tmp_file("metrics:\n  statsd_host: localhost\n  statsd_port: 8125\n");
        let err = Config::from_file(tmp.path());
        assert!(matches!(err, Err(ConfigError::ParseError(_))));
    }
}
