//! Prometheus adapter for gateway counters.
//!
//! Counters are registered with the registry that backs the `/metrics`
//! endpoint, so they appear next to the HTTP request metrics.
//!
//! | Name | Labels |
//! | --- | --- |
//! | `venue_gateway_access_denied_total` | `reason` |
//! | `venue_gateway_rotations_total` | `trigger` |
//! | `venue_gateway_rotation_stalls_total` | |
//! | `venue_gateway_messages_sent_total` | |
//! | `venue_gateway_slow_consumer_disconnects_total` | |

use async_trait::async_trait;
use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

use crate::domain::RotationTrigger;
use crate::domain::ports::{GatewayMetrics, GatewayMetricsError};

/// Prometheus-backed [`GatewayMetrics`].
pub struct PrometheusGatewayMetrics {
    access_denied: IntCounterVec,
    rotations: IntCounterVec,
    rotation_stalls: IntCounter,
    messages_sent: IntCounter,
    slow_consumer_disconnects: IntCounter,
}

fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, prometheus::Error> {
    let counter = IntCounter::new(name, help)?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

fn counter_vec(
    registry: &Registry,
    name: &str,
    help: &str,
    label: &str,
) -> Result<IntCounterVec, prometheus::Error> {
    let counter = IntCounterVec::new(Opts::new(name, help), &[label])?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

impl PrometheusGatewayMetrics {
    /// Create and register every counter with `registry`.
    ///
    /// # Errors
    ///
    /// Returns an error if a counter with the same name is already
    /// registered.
    pub fn new(registry: &Registry) -> Result<Self, prometheus::Error> {
        Ok(Self {
            access_denied: counter_vec(
                registry,
                "venue_gateway_access_denied_total",
                "Refused scans by reason",
                "reason",
            )?,
            rotations: counter_vec(
                registry,
                "venue_gateway_rotations_total",
                "Committed epoch rotations by trigger",
                "trigger",
            )?,
            rotation_stalls: counter(
                registry,
                "venue_gateway_rotation_stalls_total",
                "Rotations abandoned after exhausting retries",
            )?,
            messages_sent: counter(
                registry,
                "venue_gateway_messages_sent_total",
                "Chat messages made durable",
            )?,
            slow_consumer_disconnects: counter(
                registry,
                "venue_gateway_slow_consumer_disconnects_total",
                "Connections dropped for a full outbound queue",
            )?,
        })
    }
}

#[async_trait]
impl GatewayMetrics for PrometheusGatewayMetrics {
    async fn record_access_denied(&self, reason: &str) -> Result<(), GatewayMetricsError> {
        self.access_denied.with_label_values(&[reason]).inc();
        Ok(())
    }

    async fn record_rotation(&self, trigger: RotationTrigger) -> Result<(), GatewayMetricsError> {
        self.rotations.with_label_values(&[trigger.as_str()]).inc();
        Ok(())
    }

    async fn record_rotation_stalled(&self) -> Result<(), GatewayMetricsError> {
        self.rotation_stalls.inc();
        Ok(())
    }

    async fn record_message_sent(&self) -> Result<(), GatewayMetricsError> {
        self.messages_sent.inc();
        Ok(())
    }

    async fn record_slow_consumer_disconnect(&self) -> Result<(), GatewayMetricsError> {
        self.slow_consumer_disconnects.inc();
        Ok(())
    }
}
