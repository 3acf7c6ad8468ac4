//! Paginated retrieval of ArcGIS feature-service layers.
//!
//! A [`Fetcher`] pages through a layer query endpoint with one of several
//! [`Strategy`] implementations and concatenates the pages into an
//! [`AggregateResult`]. [`Fetcher::fetch_dataset`] applies the fallback
//! policy of a configured dataset: every strategy on the primary endpoint,
//! then every strategy on the fallback endpoint.

pub mod dataset;
pub mod errors;
pub mod fetcher;
pub mod metrics_defs;
pub mod page;
pub mod query;
pub mod service;
pub mod strategy;

#[cfg(test)]
mod testutils;

pub use dataset::{DatasetConfig, Datasets, EndpointConfig, FilterConfig, SourceRole};
pub use errors::FetchError;
pub use fetcher::{FetchSettings, Fetcher};
pub use page::{AggregateResult, Feature, FeaturePage};
pub use query::{FeatureQuery, OutFields, WhereClause};
pub use strategy::Strategy;
