//! Message template rendering engine.

use crate::contacts::Contact;
use serde_json::{Map, Value};
use std::collections::HashMap;

/// Simple template renderer using {{variable}} syntax.
///
/// Variables resolve from a layered context (later layers win): contact
/// attributes, contact custom fields, then trigger-event properties.
/// Unresolved placeholders render as empty strings so a missing field can
/// never leak raw template syntax into an outbound email.
#[derive(Default)]
pub struct TemplateRenderer;

impl TemplateRenderer {
    pub fn new() -> Self {
        Self
    }

    pub fn render(&self, template_str: &str, vars: &TemplateVars) -> String {
        let mut result = String::with_capacity(template_str.len());
        let mut rest = template_str;

        while let Some(start) = rest.find("{{") {
            result.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find("}}") {
                Some(end) => {
                    let token = after[..end].trim();
                    if let Some(value) = vars.get(token) {
                        result.push_str(value);
                    }
                    rest = &after[end + 2..];
                }
                None => {
                    // Unterminated placeholder, emit as-is
                    result.push_str(&rest[start..]);
                    rest = "";
                }
            }
        }
        result.push_str(rest);
        result
    }
}

/// Flattened variable map for one render.
#[derive(Debug, Default, Clone)]
pub struct TemplateVars {
    vars: HashMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    /// Base layer from contact attributes and custom fields.
    pub fn from_contact(contact: &Contact) -> Self {
        let mut vars = Self::new();
        vars.set("email", contact.email.clone());
        vars.set(
            "first_name",
            contact.first_name.clone().unwrap_or_default(),
        );
        vars.set("last_name", contact.last_name.clone().unwrap_or_default());
        for (field, value) in &contact.custom_fields {
            vars.set(field.clone(), stringify(value));
        }
        vars
    }

    /// Overlay trigger-event properties; scalar values only.
    pub fn overlay_properties(mut self, properties: &Map<String, Value>) -> Self {
        for (key, value) in properties {
            if !value.is_object() && !value.is_array() {
                self.set(key.clone(), stringify(value));
            }
        }
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
