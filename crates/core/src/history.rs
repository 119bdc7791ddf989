//! Bounded per-contact event history. Frequency conditions and
//! waiting-for-event branches query it; the intake worker writes it.

use crate::types::TriggerEvent;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::collections::VecDeque;

/// Compact record kept after the full event envelope is consumed.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub event_type: String,
    pub source: String,
    pub category: Option<String>,
    pub properties: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

pub struct EventHistory {
    per_contact: DashMap<String, VecDeque<RecordedEvent>>,
    max_per_contact: usize,
}

impl EventHistory {
    pub fn new(max_per_contact: usize) -> Self {
        Self {
            per_contact: DashMap::new(),
            max_per_contact: max_per_contact.max(1),
        }
    }

    pub fn record(&self, event: &TriggerEvent) {
        let mut entries = self.per_contact.entry(event.contact_id.clone()).or_default();
        if entries.len() >= self.max_per_contact {
            entries.pop_front();
        }
        entries.push_back(RecordedEvent {
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            category: event.category.clone(),
            properties: event.properties.clone(),
            timestamp: event.timestamp,
        });
    }

    /// Count of events of `event_type` for the contact, optionally limited
    /// to events at or after `since`.
    pub fn count(&self, contact_id: &str, event_type: &str, since: Option<DateTime<Utc>>) -> u64 {
        self.per_contact
            .get(contact_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.event_type == event_type)
                    .filter(|e| since.map_or(true, |cutoff| e.timestamp >= cutoff))
                    .count() as u64
            })
            .unwrap_or(0)
    }

    pub fn has_event_since(
        &self,
        contact_id: &str,
        event_type: &str,
        since: DateTime<Utc>,
    ) -> bool {
        self.count(contact_id, event_type, Some(since)) > 0
    }

    pub fn contact_count(&self) -> usize {
        self.per_contact.len()
    }
}

impl Default for EventHistory {
    fn default() -> Self {
        Self::new(1000)
    }
}
