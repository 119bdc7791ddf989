//! Inbound provider webhooks. Maps SendGrid engagement events onto the
//! canonical event vocabulary and feeds them to the intake pipeline, where
//! they update journey progress like any other event.

use chrono::{DateTime, Utc};
use dripline_core::types::{event_types, TriggerEvent};
use dripline_triggers::EventIntake;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

/// A SendGrid event webhook item. The custom args set at send time come
/// back as top-level fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailWebhookEvent {
    pub email: String,
    pub event: EmailEventType,
    #[serde(default)]
    pub sg_message_id: Option<String>,
    #[serde(default)]
    pub account_id: Option<String>,
    #[serde(default)]
    pub contact_id: Option<String>,
    #[serde(default)]
    pub journey_id: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailEventType {
    Processed,
    Dropped,
    Delivered,
    Deferred,
    Bounce,
    Open,
    Click,
    SpamReport,
    Unsubscribe,
    GroupUnsubscribe,
    GroupResubscribe,
}

/// Adapter between the provider's webhook feed and the intake pipeline.
pub struct WebhookIngestor {
    intake: EventIntake,
    default_account: String,
}

impl WebhookIngestor {
    pub fn new(intake: EventIntake, default_account: impl Into<String>) -> Self {
        Self {
            intake,
            default_account: default_account.into(),
        }
    }

    /// Forward one webhook event. Returns true when it produced an engine
    /// event that was accepted by the intake.
    pub fn process(&self, event: &EmailWebhookEvent) -> bool {
        metrics::counter!(
            "sendgrid.webhook_events",
            "type" => format!("{:?}", event.event)
        )
        .increment(1);

        match self.to_trigger_event(event) {
            Some(trigger) => self.intake.emit(trigger),
            None => false,
        }
    }

    fn to_trigger_event(&self, event: &EmailWebhookEvent) -> Option<TriggerEvent> {
        let event_type = match event.event {
            EmailEventType::Open => event_types::EMAIL_OPENED,
            EmailEventType::Click => event_types::EMAIL_CLICKED,
            EmailEventType::Bounce => event_types::EMAIL_BOUNCED,
            EmailEventType::Unsubscribe | EmailEventType::GroupUnsubscribe => {
                event_types::UNSUBSCRIBED
            }
            // Delivery bookkeeping with no journey meaning
            EmailEventType::Processed
            | EmailEventType::Dropped
            | EmailEventType::Delivered
            | EmailEventType::Deferred
            | EmailEventType::SpamReport
            | EmailEventType::GroupResubscribe => {
                debug!(event = ?event.event, email = %event.email, "ignoring provider event");
                return None;
            }
        };

        let Some(contact_id) = event.contact_id.as_deref() else {
            warn!(event = ?event.event, email = %event.email, "webhook missing contact_id, skipping");
            return None;
        };
        let account_id = event
            .account_id
            .as_deref()
            .unwrap_or(&self.default_account);

        let mut trigger =
            TriggerEvent::new(event_type, account_id, contact_id).with_source("sendgrid");
        trigger.timestamp = event.timestamp;
        if let Some(journey_id) = &event.journey_id {
            trigger = trigger.with_property("journey_id", json!(journey_id));
        }
        if let Some(url) = &event.url {
            trigger = trigger.with_property("url", json!(url));
        }
        if let Some(message_id) = &event.sg_message_id {
            trigger = trigger.with_property("message_id", json!(message_id));
        }
        Some(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn webhook(event: EmailEventType) -> EmailWebhookEvent {
        EmailWebhookEvent {
            email: "ada@example.com".into(),
            event,
            sg_message_id: Some("sg-abc".into()),
            account_id: Some("acct-1".into()),
            contact_id: Some("c-1".into()),
            journey_id: Some("6f0e8e1a-0000-0000-0000-000000000000".into()),
            url: None,
            timestamp: Utc::now(),
        }
    }

    fn ingestor_for_test() -> (WebhookIngestor, tokio::sync::mpsc::Receiver<TriggerEvent>) {
        let (sender, receiver) = tokio::sync::mpsc::channel(8);
        let intake = EventIntake::from_parts(sender, dripline_core::event_bus::noop_sink());
        (WebhookIngestor::new(intake, "acct-default"), receiver)
    }

    #[test]
    fn test_click_maps_to_email_clicked() {
        let (ingestor, _rx) = ingestor_for_test();
        let mut event = webhook(EmailEventType::Click);
        event.url = Some("https://example.com/upgrade".into());

        let trigger = ingestor.to_trigger_event(&event).unwrap();
        assert_eq!(trigger.event_type, "email_clicked");
        assert_eq!(trigger.account_id, "acct-1");
        assert_eq!(trigger.contact_id, "c-1");
        assert_eq!(trigger.source, "sendgrid");
        assert_eq!(
            trigger.property_str("journey_id"),
            Some("6f0e8e1a-0000-0000-0000-000000000000")
        );
        assert_eq!(
            trigger.property_str("url"),
            Some("https://example.com/upgrade")
        );
    }

    #[test]
    fn test_unsubscribe_variants_map_to_unsubscribed() {
        let (ingestor, _rx) = ingestor_for_test();
        for kind in [EmailEventType::Unsubscribe, EmailEventType::GroupUnsubscribe] {
            let trigger = ingestor.to_trigger_event(&webhook(kind)).unwrap();
            assert_eq!(trigger.event_type, "unsubscribed");
        }
    }

    #[test]
    fn test_bookkeeping_events_are_ignored() {
        let (ingestor, _rx) = ingestor_for_test();
        for kind in [
            EmailEventType::Processed,
            EmailEventType::Delivered,
            EmailEventType::Deferred,
            EmailEventType::GroupResubscribe,
        ] {
            assert!(ingestor.to_trigger_event(&webhook(kind)).is_none());
        }
    }

    #[test]
    fn test_process_forwards_to_the_intake() {
        let (ingestor, mut rx) = ingestor_for_test();
        assert!(ingestor.process(&webhook(EmailEventType::Open)));
        let forwarded = rx.try_recv().unwrap();
        assert_eq!(forwarded.event_type, "email_opened");

        // Ignored kinds forward nothing
        assert!(!ingestor.process(&webhook(EmailEventType::Delivered)));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_missing_contact_id_is_skipped() {
        let (ingestor, _rx) = ingestor_for_test();
        let mut event = webhook(EmailEventType::Open);
        event.contact_id = None;
        assert!(ingestor.to_trigger_event(&event).is_none());
    }

    #[test]
    fn test_missing_account_falls_back_to_default() {
        let (ingestor, _rx) = ingestor_for_test();
        let mut event = webhook(EmailEventType::Open);
        event.account_id = None;
        let trigger = ingestor.to_trigger_event(&event).unwrap();
        assert_eq!(trigger.account_id, "acct-default");
    }

    #[test]
    fn test_webhook_payload_deserializes() {
        let raw = r#"{
            "email": "ada@example.com",
            "event": "open",
            "sg_message_id": "sg-123",
            "contact_id": "c-1",
            "journey_id": "abc",
            "timestamp": "2026-03-02T14:30:00Z"
        }"#;
        let event: EmailWebhookEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(event.event, EmailEventType::Open);
        assert!(event.account_id.is_none());
    }
}
