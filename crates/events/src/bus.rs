//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] fans [`IssueEvent`]s out to every subscriber. Share it via
//! `Arc<EventBus>` between the gateway that publishes and whoever listens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use urbanwatch_core::types::{IssueId, ObservationId};

// ---------------------------------------------------------------------------
// Event names
// ---------------------------------------------------------------------------

pub const ISSUE_CREATED: &str = "issue.created";
pub const ISSUE_MERGED: &str = "issue.merged";
pub const ISSUE_DUPLICATE: &str = "issue.duplicate";
pub const ISSUE_STATUS_CHANGED: &str = "issue.status_changed";
pub const ISSUE_DELETED: &str = "issue.deleted";
pub const OBSERVATION_FAILED: &str = "observation.failed";

// ---------------------------------------------------------------------------
// IssueEvent
// ---------------------------------------------------------------------------

/// Something that happened to an issue or to an observation in flight.
///
/// Built with [`IssueEvent::new`] and the `with_*` builder methods.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueEvent {
    /// Dot-separated event name, e.g. `"issue.merged"`.
    pub event_type: String,

    pub issue_id: Option<IssueId>,

    /// Observation that caused the event, if any.
    pub observation_id: Option<ObservationId>,

    pub reporter_id: Option<String>,

    /// Event-specific data.
    pub payload: serde_json::Value,

    pub timestamp: DateTime<Utc>,
}

impl IssueEvent {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            issue_id: None,
            observation_id: None,
            reporter_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn with_issue(mut self, issue_id: IssueId) -> Self {
        self.issue_id = Some(issue_id);
        self
    }

    /// Attach the originating observation and its reporter.
    pub fn with_observation(
        mut self,
        observation_id: ObservationId,
        reporter_id: impl Into<String>,
    ) -> Self {
        self.observation_id = Some(observation_id);
        self.reporter_id = Some(reporter_id.into());
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// ```rust
/// use urbanwatch_events::bus::{EventBus, IssueEvent, ISSUE_CREATED};
///
/// let bus = EventBus::default();
/// let mut rx = bus.subscribe();
///
/// bus.publish(IssueEvent::new(ISSUE_CREATED).with_issue(1));
/// ```
pub struct EventBus {
    sender: broadcast::Sender<IssueEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// Slow receivers that fall more than `capacity` events behind observe
    /// `RecvError::Lagged` and lose the oldest events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers. Dropped if there are none.
    pub fn publish(&self, event: IssueEvent) {
        tracing::trace!(event_type = %event.event_type, issue_id = ?event.issue_id, "Publishing event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IssueEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let observation_id = uuid::Uuid::now_v7();
        bus.publish(
            IssueEvent::new(ISSUE_MERGED)
                .with_issue(42)
                .with_observation(observation_id, "alice")
                .with_payload(serde_json::json!({"people_reported": 2})),
        );

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, ISSUE_MERGED);
        assert_eq!(received.issue_id, Some(42));
        assert_eq!(received.observation_id, Some(observation_id));
        assert_eq!(received.reporter_id.as_deref(), Some("alice"));
        assert_eq!(received.payload["people_reported"], 2);
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        bus.publish(IssueEvent::new(ISSUE_CREATED).with_issue(1));

        assert_eq!(rx1.recv().await.unwrap().event_type, ISSUE_CREATED);
        assert_eq!(rx2.recv().await.unwrap().event_type, ISSUE_CREATED);
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(IssueEvent::new(ISSUE_DELETED));
    }

    #[test]
    fn bare_event_has_empty_optional_fields() {
        let event = IssueEvent::new(OBSERVATION_FAILED);
        assert!(event.issue_id.is_none());
        assert!(event.observation_id.is_none());
        assert!(event.reporter_id.is_none());
        assert!(event.payload.is_object());
    }
}
