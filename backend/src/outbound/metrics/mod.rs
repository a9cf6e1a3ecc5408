//! Outbound adapters for metrics exporting.
//!
//! Prometheus-backed implementations of the domain metrics port, compiled
//! only with the `metrics` feature.

mod prometheus_gateway;

pub use prometheus_gateway::PrometheusGatewayMetrics;
