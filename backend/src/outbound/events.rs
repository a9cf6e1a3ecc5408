//! Domain event sink writing a structured audit trail through `tracing`.

use async_trait::async_trait;
use tracing::info;

use crate::domain::DomainEvent;
use crate::domain::ports::{DomainEventSink, DomainEventSinkError};

/// Emits every event at `INFO` on the `venue_gateway::events` target.
///
/// The event body is serialised to JSON so log shippers can index it without
/// knowing the enum layout.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDomainEventSink;

#[async_trait]
impl DomainEventSink for TracingDomainEventSink {
    async fn publish(&self, event: &DomainEvent) -> Result<(), DomainEventSinkError> {
        let body = serde_json::to_string(event)
            .map_err(|err| DomainEventSinkError::publish(err.to_string()))?;
        info!(
            target: "venue_gateway::events",
            event = event.name(),
            venue_id = %event.venue_id(),
            body = %body,
            "domain event"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use rstest::rstest;

    use super::*;
    use crate::domain::{EpochSequence, RotationTrigger, VenueId};

    #[rstest]
    #[tokio::test]
    async fn publishing_never_fails_for_domain_events() {
        let event = DomainEvent::EpochRotated {
            venue_id: VenueId::random(),
            epoch_sequence: EpochSequence::new(4),
            trigger: RotationTrigger::Manual,
            expires_at: Utc
                .with_ymd_and_hms(2026, 3, 1, 10, 0, 0)
                .single()
                .expect("timestamp"),
        };

        assert_eq!(TracingDomainEventSink.publish(&event).await, Ok(()));
    }
}
