//! Metrics definitions for the inbound HTTP surface.

use shared::metrics_defs::{MetricDef, MetricType};

pub const WEBHOOK_REQUESTS: MetricDef = MetricDef {
    name: "gateway.webhook.requests",
    metric_type: MetricType::Counter,
    description: "Webhook deliveries by outcome",
};

pub const WEBHOOK_BODY_BYTES: MetricDef = MetricDef {
    name: "gateway.webhook.body_bytes",
    metric_type: MetricType::Histogram,
    description: "Size of accepted webhook payloads in bytes",
};

pub const WEBHOOK_SINK_FAILED: MetricDef = MetricDef {
    name: "gateway.webhook.sink_failed",
    metric_type: MetricType::Counter,
    description: "Accepted webhook events the event sink failed to process",
};

pub const OAUTH_CALLBACK_REQUESTS: MetricDef = MetricDef {
    name: "gateway.oauth_callback.requests",
    metric_type: MetricType::Counter,
    description: "OAuth callback requests by outcome",
};

pub const ALL_METRICS: &[MetricDef] = &[
    WEBHOOK_REQUESTS,
    WEBHOOK_BODY_BYTES,
    WEBHOOK_SINK_FAILED,
    OAUTH_CALLBACK_REQUESTS,
];
