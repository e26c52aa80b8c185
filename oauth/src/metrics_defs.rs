//! Metrics definitions for OAuth correlation.

use shared::metrics_defs::{MetricDef, MetricType};

pub const OAUTH_PENDING: MetricDef = MetricDef {
    name: "oauth.pending",
    metric_type: MetricType::Gauge,
    description: "Number of authorization attempts waiting for a callback",
};

pub const OAUTH_CALLBACK_MATCHED: MetricDef = MetricDef {
    name: "oauth.callback.matched",
    metric_type: MetricType::Counter,
    description: "Number of callbacks that completed a pending authorization",
};

pub const OAUTH_CALLBACK_UNMATCHED: MetricDef = MetricDef {
    name: "oauth.callback.unmatched",
    metric_type: MetricType::Counter,
    description: "Number of callbacks with an unknown or already resolved token",
};

pub const OAUTH_WAIT_TIMEOUT: MetricDef = MetricDef {
    name: "oauth.wait.timeout",
    metric_type: MetricType::Counter,
    description: "Number of authorization attempts that expired without a callback",
};

pub const OAUTH_WAIT_SUPERSEDED: MetricDef = MetricDef {
    name: "oauth.wait.superseded",
    metric_type: MetricType::Counter,
    description: "Number of authorization attempts replaced by a newer one for the same token",
};

pub const ALL_METRICS: &[MetricDef] = &[
    OAUTH_PENDING,
    OAUTH_CALLBACK_MATCHED,
    OAUTH_CALLBACK_UNMATCHED,
    OAUTH_WAIT_TIMEOUT,
    OAUTH_WAIT_SUPERSEDED,
];
