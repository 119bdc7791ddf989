//! Shared types crossing crate boundaries: the inbound event envelope and
//! the canonical event type names the engine reacts to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Well-known event types. Campaign triggers, goals and branch conditions
/// reference these by name; external sources may emit arbitrary custom types.
pub mod event_types {
    pub const CONTACT_CREATED: &str = "contact_created";
    pub const TAG_ADDED: &str = "tag_added";
    pub const TAG_REMOVED: &str = "tag_removed";
    pub const FIELD_UPDATED: &str = "field_updated";
    pub const FORM_SUBMITTED: &str = "form_submitted";
    pub const EMAIL_SENT: &str = "email_sent";
    pub const EMAIL_OPENED: &str = "email_opened";
    pub const EMAIL_CLICKED: &str = "email_clicked";
    pub const EMAIL_BOUNCED: &str = "email_bounced";
    pub const UNSUBSCRIBED: &str = "unsubscribed";
}

/// An event flowing into the engine: contact activity, engagement signals
/// fed back from the mail provider, or webhooks from external systems.
///
/// Events are ephemeral. The engine consumes them for trigger matching and
/// journey routing; only a compact record survives in the event history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_type: String,
    pub account_id: String,
    pub contact_id: String,
    /// Originating system, e.g. `api`, `webhook`, `import`.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(
        event_type: impl Into<String>,
        account_id: impl Into<String>,
        contact_id: impl Into<String>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            account_id: account_id.into(),
            contact_id: contact_id.into(),
            source: "api".into(),
            category: None,
            properties: Map::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Look up a property by dot path, e.g. `order.total`.
    pub fn property(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.properties.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Property coerced to a string, for id lookups in routing.
    pub fn property_str(&self, path: &str) -> Option<&str> {
        self.property(path).and_then(Value::as_str)
    }
}
