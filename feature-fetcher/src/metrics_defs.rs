//! Metrics definitions for the feature fetcher.

use shared::metrics_defs::{MetricDef, MetricType};

pub const PAGES_FETCHED: MetricDef = MetricDef {
    name: "fetch.pages",
    metric_type: MetricType::Counter,
    description: "Pages decoded from feature services. Tagged with strategy.",
};

pub const PAGE_DURATION: MetricDef = MetricDef {
    name: "fetch.page.duration",
    metric_type: MetricType::Histogram,
    description: "Time to receive one page in seconds. Tagged with strategy.",
};

pub const ATTEMPT_FAILED: MetricDef = MetricDef {
    name: "fetch.attempt.failed",
    metric_type: MetricType::Counter,
    description: "Strategy runs that errored or returned no features. Tagged with strategy, source.",
};

pub const FETCH_COMPLETED: MetricDef = MetricDef {
    name: "fetch.completed",
    metric_type: MetricType::Counter,
    description: "Dataset fetches that returned data. Tagged with method, source.",
};

pub const FETCH_FEATURES: MetricDef = MetricDef {
    name: "fetch.features",
    metric_type: MetricType::Histogram,
    description: "Number of features aggregated by a successful dataset fetch",
};

pub const FETCH_NO_DATA: MetricDef = MetricDef {
    name: "fetch.no_data",
    metric_type: MetricType::Counter,
    description: "Dataset fetches where every strategy on every endpoint came back empty",
};

pub const ALL_METRICS: &[MetricDef] = &[
    PAGES_FETCHED,
    PAGE_DURATION,
    ATTEMPT_FAILED,
    FETCH_COMPLETED,
    FETCH_FEATURES,
    FETCH_NO_DATA,
];
