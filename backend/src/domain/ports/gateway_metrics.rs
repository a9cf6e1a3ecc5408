//! Port for recording gateway metrics.
//!
//! Implementations may export to Prometheus or discard everything. Callers log
//! and ignore failures; metrics never fail a request.

use async_trait::async_trait;

use crate::domain::RotationTrigger;

use super::define_port_error;

define_port_error! {
    /// Errors exposed when recording gateway metrics.
    pub enum GatewayMetricsError {
        /// Metric exporter rejected the write.
        Export { message: String } => "gateway metrics exporter failed: {message}",
    }
}

/// Counters describing gateway behaviour.
#[async_trait]
pub trait GatewayMetrics: Send + Sync {
    /// A scan was refused; `reason` is a stable snake-case label.
    async fn record_access_denied(&self, reason: &str) -> Result<(), GatewayMetricsError>;

    /// An epoch rotation committed.
    async fn record_rotation(&self, trigger: RotationTrigger) -> Result<(), GatewayMetricsError>;

    /// A venue entered the stalled state.
    async fn record_rotation_stalled(&self) -> Result<(), GatewayMetricsError>;

    /// A chat message became durable.
    async fn record_message_sent(&self) -> Result<(), GatewayMetricsError>;

    /// A connection was dropped for not draining its queue.
    async fn record_slow_consumer_disconnect(&self) -> Result<(), GatewayMetricsError>;
}

/// No-op implementation for when metrics are disabled or in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpGatewayMetrics;

#[async_trait]
impl GatewayMetrics for NoOpGatewayMetrics {
    async fn record_access_denied(&self, _reason: &str) -> Result<(), GatewayMetricsError> {
        Ok(())
    }

    async fn record_rotation(&self, _trigger: RotationTrigger) -> Result<(), GatewayMetricsError> {
        Ok(())
    }

    async fn record_rotation_stalled(&self) -> Result<(), GatewayMetricsError> {
        Ok(())
    }

    async fn record_message_sent(&self) -> Result<(), GatewayMetricsError> {
        Ok(())
    }

    async fn record_slow_consumer_disconnect(&self) -> Result<(), GatewayMetricsError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_accepts_every_counter() {
        let metrics = NoOpGatewayMetrics;
        assert!(metrics.record_access_denied("token_expired").await.is_ok());
        assert!(metrics.record_rotation(RotationTrigger::Manual).await.is_ok());
        assert!(metrics.record_rotation_stalled().await.is_ok());
        assert!(metrics.record_message_sent().await.is_ok());
        assert!(metrics.record_slow_consumer_disconnect().await.is_ok());
    }
}
