//! Condition payloads. Closed tagged enums so malformed definitions fail at
//! deserialization or campaign validation, never inside the engine.

use crate::window::TimeWindow;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Tag membership. `include` matches any or all per `match_mode`; a
    /// present `exclude` tag always fails the condition.
    Tags {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        match_mode: TagMatchMode,
        #[serde(default)]
        exclude: Vec<String>,
    },
    /// Comparison against a contact attribute or custom field.
    Field {
        field: String,
        op: FieldOperator,
        #[serde(default)]
        value: Value,
    },
    /// Match on the triggering event's envelope and properties. Property
    /// keys may be dot paths into nested objects.
    EventData {
        #[serde(default)]
        source: Option<String>,
        #[serde(default)]
        category: Option<String>,
        #[serde(default)]
        properties: Map<String, Value>,
    },
    /// How many times the contact has produced the triggering event's type,
    /// optionally within a trailing period.
    Frequency {
        kind: FrequencyKind,
        #[serde(default)]
        count: u32,
        #[serde(default)]
        period_days: Option<u32>,
    },
    /// Current wall-clock time falls inside a recurring window.
    TimeWindow(TimeWindow),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TagMatchMode {
    Any,
    All,
}

impl Default for TagMatchMode {
    fn default() -> Self {
        Self::Any
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FieldOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyKind {
    /// The triggering occurrence is the first (count <= 1, the event itself
    /// is already recorded when conditions run).
    FirstTime,
    /// Exactly the N-th occurrence.
    NthTime,
    /// Strictly more than N occurrences.
    AfterCount,
}
