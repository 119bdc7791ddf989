//! Engine event bus: a trait for emitting lifecycle events from any module.
//!
//! Modules accept an `Arc<dyn EventSink>` to surface journey lifecycle
//! milestones to analytics pipelines and customer-facing activity feeds.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// A journey lifecycle milestone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEvent {
    pub event_id: Uuid,
    pub kind: EngineEventKind,
    pub account_id: String,
    pub contact_id: Option<String>,
    pub campaign_id: Option<Uuid>,
    pub journey_id: Option<Uuid>,
    /// Free-form detail: step id, exit reason, goal name.
    pub detail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EngineEventKind {
    JourneyEntered,
    EmailSent,
    StepSkipped,
    BranchEvaluated,
    JourneyCompleted,
    JourneyExited,
    JourneyFailed,
    GoalReached,
    EventDropped,
}

/// Trait for emitting engine events. Implementations route events to
/// analytics storage, message buses, or customer webhooks.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: EngineEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: EngineEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<EngineEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    pub fn count_kind(&self, kind: EngineEventKind) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: EngineEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience builder for creating `EngineEvent` with minimal boilerplate.
pub fn make_event(
    kind: EngineEventKind,
    account_id: impl Into<String>,
    contact_id: Option<String>,
    campaign_id: Option<Uuid>,
    journey_id: Option<Uuid>,
    detail: Option<String>,
) -> EngineEvent {
    EngineEvent {
        event_id: Uuid::new_v4(),
        kind,
        account_id: account_id.into(),
        contact_id,
        campaign_id,
        journey_id,
        detail,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        let campaign_id = Uuid::new_v4();
        sink.emit(make_event(
            EngineEventKind::JourneyEntered,
            "acct-1",
            Some("contact-1".into()),
            Some(campaign_id),
            Some(Uuid::new_v4()),
            None,
        ));
        sink.emit(make_event(
            EngineEventKind::EmailSent,
            "acct-1",
            Some("contact-1".into()),
            Some(campaign_id),
            Some(Uuid::new_v4()),
            Some("welcome-1".into()),
        ));

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_kind(EngineEventKind::JourneyEntered), 1);
        assert_eq!(sink.count_kind(EngineEventKind::EmailSent), 1);

        let events = sink.events();
        assert_eq!(events[0].account_id, "acct-1");
        assert_eq!(events[1].detail, Some("welcome-1".into()));
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(make_event(
            EngineEventKind::GoalReached,
            "acct-1",
            None,
            None,
            None,
            None,
        ));
    }
}
