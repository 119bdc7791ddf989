//! Contact profiles and the store trait the engine reads and mutates
//! through. The engine never owns contact persistence; the in-memory store
//! backs tests and single-node deployments.

use crate::error::{AutomationError, AutomationResult};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: String,
    pub account_id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub custom_fields: HashMap<String, Value>,
    #[serde(default)]
    pub unsubscribed: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(
        id: impl Into<String>,
        account_id: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            account_id: account_id.into(),
            email: email.into(),
            first_name: None,
            last_name: None,
            tags: Vec::new(),
            custom_fields: HashMap::new(),
            unsubscribed: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_name(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_name = Some(first.into());
        self.last_name = Some(last.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.custom_fields.insert(field.into(), value.into());
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Resolve a field by name: built-in attributes first, then custom fields.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "email" => Some(Value::String(self.email.clone())),
            "first_name" => self.first_name.clone().map(Value::String),
            "last_name" => self.last_name.clone().map(Value::String),
            _ => self.custom_fields.get(name).cloned(),
        }
    }
}

/// A single mutation applied to a contact, produced by step post-actions
/// and consent events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContactMutation {
    AddTag { tag: String },
    RemoveTag { tag: String },
    SetField { field: String, value: Value },
    SetUnsubscribed { unsubscribed: bool },
}

pub trait ContactStore: Send + Sync {
    fn get(&self, contact_id: &str) -> Option<Contact>;
    fn apply(&self, contact_id: &str, mutation: ContactMutation) -> AutomationResult<()>;
}

/// DashMap-backed store keyed by contact id.
#[derive(Default)]
pub struct InMemoryContactStore {
    contacts: DashMap<String, Contact>,
}

impl InMemoryContactStore {
    pub fn new() -> Self {
        Self {
            contacts: DashMap::new(),
        }
    }

    pub fn insert(&self, contact: Contact) {
        self.contacts.insert(contact.id.clone(), contact);
    }

    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

impl ContactStore for InMemoryContactStore {
    fn get(&self, contact_id: &str) -> Option<Contact> {
        self.contacts.get(contact_id).map(|c| c.clone())
    }

    fn apply(&self, contact_id: &str, mutation: ContactMutation) -> AutomationResult<()> {
        let mut contact = self
            .contacts
            .get_mut(contact_id)
            .ok_or_else(|| AutomationError::ContactNotFound(contact_id.to_string()))?;

        match mutation {
            ContactMutation::AddTag { tag } => {
                if !contact.has_tag(&tag) {
                    contact.tags.push(tag);
                }
            }
            ContactMutation::RemoveTag { tag } => {
                contact.tags.retain(|t| t != &tag);
            }
            ContactMutation::SetField { field, value } => {
                contact.custom_fields.insert(field, value);
            }
            ContactMutation::SetUnsubscribed { unsubscribed } => {
                contact.unsubscribed = unsubscribed;
            }
        }
        contact.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_lookup() {
        let contact = Contact::new("c-1", "acct-1", "ada@example.com")
            .with_name("Ada", "Lovelace")
            .with_field("plan", "pro");

        assert_eq!(contact.field("email"), Some(json!("ada@example.com")));
        assert_eq!(contact.field("first_name"), Some(json!("Ada")));
        assert_eq!(contact.field("plan"), Some(json!("pro")));
        assert_eq!(contact.field("missing"), None);
    }

    #[test]
    fn test_mutations() {
        let store = InMemoryContactStore::new();
        store.insert(Contact::new("c-1", "acct-1", "ada@example.com"));

        store
            .apply("c-1", ContactMutation::AddTag { tag: "vip".into() })
            .unwrap();
        store
            .apply("c-1", ContactMutation::AddTag { tag: "vip".into() })
            .unwrap();
        store
            .apply(
                "c-1",
                ContactMutation::SetField {
                    field: "score".into(),
                    value: json!(10),
                },
            )
            .unwrap();
        store
            .apply(
                "c-1",
                ContactMutation::SetUnsubscribed { unsubscribed: true },
            )
            .unwrap();

        let contact = store.get("c-1").unwrap();
        assert_eq!(contact.tags, vec!["vip".to_string()]);
        assert_eq!(contact.custom_fields["score"], json!(10));
        assert!(contact.unsubscribed);

        store
            .apply("c-1", ContactMutation::RemoveTag { tag: "vip".into() })
            .unwrap();
        assert!(!store.get("c-1").unwrap().has_tag("vip"));

        let err = store.apply("ghost", ContactMutation::AddTag { tag: "x".into() });
        assert!(err.is_err());
    }
}
