//! Immutable table of the datasets this service can fetch.

use crate::query::{
    DEFAULT_PAGE_SIZE, DEFAULT_SPATIAL_REFERENCE, FeatureQuery, OutFields, WhereClause,
};
use crate::strategy::{DEFAULT_ID_FIELD, Strategy};
use chrono::{DateTime, Months, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use url::Url;

pub const DEFAULT_SAFETY_CAP: usize = 100_000;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum DatasetError {
    #[error("no datasets configured")]
    Empty,
    #[error("default dataset {0} is not configured")]
    UnknownDefault(String),
    #[error("dataset {0}: page size cannot be 0")]
    InvalidPageSize(String),
    #[error("dataset {0}: safety cap cannot be 0")]
    InvalidSafetyCap(String),
    #[error("dataset {0}: at least one pagination strategy is required")]
    NoStrategies(String),
    #[error("dataset {0}: path must start with '/'")]
    InvalidPath(String),
    #[error("path {0} is used by more than one dataset")]
    DuplicatePath(String),
}

/// Which configured copy of a dataset produced the result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Primary,
    Fallback,
}

impl SourceRole {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SourceRole::Primary => "primary",
            SourceRole::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Layer query URL, e.g. `.../FeatureServer/1/query`
    pub url: Url,
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

/// Filter applied to every request of a dataset.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterConfig {
    #[default]
    All,
    Raw {
        clause: String,
    },
    /// Records whose date `field` falls within the last `years` years.
    RecentYears {
        field: String,
        years: u32,
    },
}

impl FilterConfig {
    pub fn where_clause(&self, now: DateTime<Utc>) -> WhereClause {
        match self {
            FilterConfig::All => WhereClause::All,
            FilterConfig::Raw { clause } => WhereClause::Raw(clause.clone()),
            FilterConfig::RecentYears { field, years } => {
                let start = now
                    .checked_sub_months(Months::new(years.saturating_mul(12)))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                WhereClause::Since {
                    field: field.clone(),
                    epoch_millis: start.timestamp_millis(),
                }
            }
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct DatasetConfig {
    /// Optional dedicated route, e.g. `/api/mpc-cases`
    #[serde(default)]
    pub path: Option<String>,
    pub primary: EndpointConfig,
    /// A differently hosted copy of the same data, tried after the primary.
    #[serde(default)]
    pub fallback: Option<EndpointConfig>,
    #[serde(default)]
    pub filter: FilterConfig,
    #[serde(default = "default_out_fields")]
    pub out_fields: Vec<String>,
    #[serde(default = "default_out_sr")]
    pub out_sr: u32,
    #[serde(default = "default_safety_cap")]
    pub safety_cap: usize,
    /// Tried in order on each endpoint.
    #[serde(default = "default_strategies")]
    pub strategies: Vec<Strategy>,
    /// Ask the service for its record count before paging.
    #[serde(default)]
    pub server_count: bool,
}

impl DatasetConfig {
    pub fn new(primary: EndpointConfig) -> Self {
        DatasetConfig {
            path: None,
            primary,
            fallback: None,
            filter: FilterConfig::All,
            out_fields: default_out_fields(),
            out_sr: default_out_sr(),
            safety_cap: default_safety_cap(),
            strategies: default_strategies(),
            server_count: false,
        }
    }

    pub fn endpoints(&self) -> impl Iterator<Item = (SourceRole, &EndpointConfig)> {
        std::iter::once((SourceRole::Primary, &self.primary))
            .chain(self.fallback.iter().map(|f| (SourceRole::Fallback, f)))
    }

    pub fn query_for(&self, endpoint: &EndpointConfig, now: DateTime<Utc>) -> FeatureQuery {
        FeatureQuery::new(endpoint.url.clone())
            .with_where(self.filter.where_clause(now))
            .with_out_fields(OutFields::from_names(&self.out_fields))
            .with_spatial_reference(self.out_sr)
            .with_page_size(endpoint.page_size)
            .with_order_field(endpoint.id_field.clone())
    }

    pub fn validate(&self, key: &str) -> Result<(), DatasetError> {
        if self.endpoints().any(|(_, e)| e.page_size == 0) {
            return Err(DatasetError::InvalidPageSize(key.to_string()));
        }
        if self.safety_cap == 0 {
            return Err(DatasetError::InvalidSafetyCap(key.to_string()));
        }
        if self.strategies.is_empty() {
            return Err(DatasetError::NoStrategies(key.to_string()));
        }
        if let Some(path) = &self.path
            && !path.starts_with('/')
        {
            return Err(DatasetError::InvalidPath(key.to_string()));
        }
        Ok(())
    }
}

/// Validated dataset table keyed by the short source key (`mpc`, `bp`, ...).
#[derive(Clone, Debug)]
pub struct Datasets {
    default_key: String,
    datasets: IndexMap<String, DatasetConfig>,
}

impl Datasets {
    /// When `default_key` is `None` the first configured dataset is the default.
    pub fn new(
        default_key: Option<String>,
        datasets: IndexMap<String, DatasetConfig>,
    ) -> Result<Self, DatasetError> {
        let default_key = match default_key {
            Some(key) if datasets.contains_key(&key) => key,
            Some(key) => return Err(DatasetError::UnknownDefault(key)),
            None => datasets.keys().next().cloned().ok_or(DatasetError::Empty)?,
        };

        let mut paths = HashSet::new();
        for (key, dataset) in &datasets {
            dataset.validate(key)?;
            if let Some(path) = &dataset.path
                && !paths.insert(path.as_str())
            {
                return Err(DatasetError::DuplicatePath(path.clone()));
            }
        }

        Ok(Datasets {
            default_key,
            datasets,
        })
    }

    pub fn default_key(&self) -> &str {
        &self.default_key
    }

    /// Resolves a requested key. Missing or unknown keys resolve to the default.
    pub fn resolve(&self, key: Option<&str>) -> (&str, &DatasetConfig) {
        key.and_then(|k| self.datasets.get_key_value(k))
            .or_else(|| self.datasets.get_key_value(&self.default_key))
            .map(|(k, v)| (k.as_str(), v))
            .expect("default dataset is validated on construction")
    }

    pub fn by_path(&self, path: &str) -> Option<(&str, &DatasetConfig)> {
        self.datasets
            .iter()
            .find(|(_, d)| d.path.as_deref() == Some(path))
            .map(|(k, d)| (k.as_str(), d))
    }
}

fn default_id_field() -> String {
    DEFAULT_ID_FIELD.to_string()
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_out_fields() -> Vec<String> {
    vec!["*".to_string()]
}

fn default_out_sr() -> u32 {
    DEFAULT_SPATIAL_REFERENCE
}

fn default_safety_cap() -> usize {
    DEFAULT_SAFETY_CAP
}

fn default_strategies() -> Vec<Strategy> {
    vec![Strategy::Offset, Strategy::Cursor]
}
