//! Condition evaluation. Total by construction: malformed values, missing
//! fields and absent event context all evaluate to `false`, never an error.

use crate::model::{Condition, FieldOperator, FrequencyKind, TagMatchMode};
use chrono::Duration;
use dripline_core::clock::Clock;
use dripline_core::contacts::Contact;
use dripline_core::history::EventHistory;
use dripline_core::types::TriggerEvent;
use serde_json::{Map, Value};
use std::sync::Arc;

pub struct ConditionEvaluator {
    history: Arc<EventHistory>,
    clock: Arc<dyn Clock>,
}

impl ConditionEvaluator {
    pub fn new(history: Arc<EventHistory>, clock: Arc<dyn Clock>) -> Self {
        Self { history, clock }
    }

    /// All conditions must hold. An empty list holds vacuously.
    pub fn matches_all(
        &self,
        conditions: &[Condition],
        contact: &Contact,
        event: Option<&TriggerEvent>,
    ) -> bool {
        conditions.iter().all(|c| self.matches(c, contact, event))
    }

    pub fn matches(
        &self,
        condition: &Condition,
        contact: &Contact,
        event: Option<&TriggerEvent>,
    ) -> bool {
        match condition {
            Condition::Tags {
                include,
                match_mode,
                exclude,
            } => {
                if exclude.iter().any(|tag| contact.has_tag(tag)) {
                    return false;
                }
                if include.is_empty() {
                    return true;
                }
                match match_mode {
                    TagMatchMode::Any => include.iter().any(|tag| contact.has_tag(tag)),
                    TagMatchMode::All => include.iter().all(|tag| contact.has_tag(tag)),
                }
            }
            Condition::Field { field, op, value } => {
                compare_field(contact.field(field).as_ref(), *op, value)
            }
            Condition::EventData {
                source,
                category,
                properties,
            } => event.map_or(false, |e| event_data_matches(e, source, category, properties)),
            Condition::Frequency {
                kind,
                count,
                period_days,
            } => event.map_or(false, |e| {
                let cutoff =
                    period_days.map(|days| self.clock.now() - Duration::days(i64::from(days)));
                let observed = self.history.count(&contact.id, &e.event_type, cutoff);
                match kind {
                    FrequencyKind::FirstTime => observed <= 1,
                    FrequencyKind::NthTime => observed == u64::from(*count),
                    FrequencyKind::AfterCount => observed > u64::from(*count),
                }
            }),
            Condition::TimeWindow(window) => window.contains(self.clock.now()),
        }
    }
}

fn event_data_matches(
    event: &TriggerEvent,
    source: &Option<String>,
    category: &Option<String>,
    properties: &Map<String, Value>,
) -> bool {
    if let Some(expected) = source {
        if &event.source != expected {
            return false;
        }
    }
    if let Some(expected) = category {
        if event.category.as_deref() != Some(expected.as_str()) {
            return false;
        }
    }
    properties
        .iter()
        .all(|(path, expected)| event.property(path) == Some(expected))
}

/// Field comparison shared with branch conditions. Total: missing fields
/// only satisfy the emptiness checks.
pub fn compare_field(actual: Option<&Value>, op: FieldOperator, expected: &Value) -> bool {
    // Emptiness checks are the only ops defined on a missing field
    match (op, actual) {
        (FieldOperator::IsEmpty, value) => is_empty(value),
        (FieldOperator::IsNotEmpty, value) => !is_empty(value),
        (_, None) => false,
        (op, Some(actual)) => present_field_matches(actual, op, expected),
    }
}

fn present_field_matches(actual: &Value, op: FieldOperator, expected: &Value) -> bool {
    match op {
        FieldOperator::Equals => values_equal(actual, expected),
        FieldOperator::NotEquals => !values_equal(actual, expected),
        FieldOperator::Contains => str_pair(actual, expected)
            .map_or(false, |(a, e)| a.to_lowercase().contains(&e.to_lowercase())),
        FieldOperator::NotContains => str_pair(actual, expected)
            .map_or(false, |(a, e)| !a.to_lowercase().contains(&e.to_lowercase())),
        FieldOperator::StartsWith => str_pair(actual, expected)
            .map_or(false, |(a, e)| a.to_lowercase().starts_with(&e.to_lowercase())),
        FieldOperator::EndsWith => str_pair(actual, expected)
            .map_or(false, |(a, e)| a.to_lowercase().ends_with(&e.to_lowercase())),
        FieldOperator::GreaterThan => {
            numeric_pair(actual, expected).map_or(false, |(a, e)| a > e)
        }
        FieldOperator::LessThan => numeric_pair(actual, expected).map_or(false, |(a, e)| a < e),
        // Handled before the value is unwrapped
        FieldOperator::IsEmpty | FieldOperator::IsNotEmpty => false,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(a), Some(e)) = (actual.as_str(), expected.as_str()) {
        return a == e;
    }
    actual == expected
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(_) => false,
    }
}

fn str_pair<'a>(actual: &'a Value, expected: &'a Value) -> Option<(&'a str, &'a str)> {
    actual.as_str().zip(expected.as_str())
}

/// Numeric comparisons accept numbers and numeric strings on both sides.
fn numeric_pair(actual: &Value, expected: &Value) -> Option<(f64, f64)> {
    to_f64(actual).zip(to_f64(expected))
}

fn to_f64(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}
