//! Metrics definitions for the config store.

use shared::metrics_defs::{MetricDef, MetricType};

pub const CONFIG_CACHE_HIT: MetricDef = MetricDef {
    name: "config_cache.hit",
    metric_type: MetricType::Counter,
    description: "Number of config reads served from the local cache",
};

pub const CONFIG_CACHE_MISS: MetricDef = MetricDef {
    name: "config_cache.miss",
    metric_type: MetricType::Counter,
    description: "Number of config reads that went to the remote store",
};

pub const CONFIG_CACHE_CORRUPT_EVICTED: MetricDef = MetricDef {
    name: "config_cache.corrupt_evicted",
    metric_type: MetricType::Counter,
    description: "Number of remote entries discarded because they failed validation",
};

pub const CONFIG_WRITE_CONFLICT: MetricDef = MetricDef {
    name: "config_store.write.conflict",
    metric_type: MetricType::Counter,
    description: "Number of conditional writes rejected with a revision conflict",
};

pub const CONFIG_UPDATE_EXHAUSTED: MetricDef = MetricDef {
    name: "config_store.update.exhausted",
    metric_type: MetricType::Counter,
    description: "Number of read-modify-write loops that ran out of attempts",
};

pub const SUBSCRIPTIONS_ACTIVE: MetricDef = MetricDef {
    name: "subscriptions.active",
    metric_type: MetricType::Gauge,
    description: "Number of subscriptions reachable through the subscription index",
};

pub const SUBSCRIPTIONS_TEAMS: MetricDef = MetricDef {
    name: "subscriptions.teams",
    metric_type: MetricType::Gauge,
    description: "Number of distinct teams with at least one subscription",
};

pub const ALL_METRICS: &[MetricDef] = &[
    CONFIG_CACHE_HIT,
    CONFIG_CACHE_MISS,
    CONFIG_CACHE_CORRUPT_EVICTED,
    CONFIG_WRITE_CONFLICT,
    CONFIG_UPDATE_EXHAUSTED,
    SUBSCRIPTIONS_ACTIVE,
    SUBSCRIPTIONS_TEAMS,
];
