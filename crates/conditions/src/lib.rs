//! Condition model and evaluation, the pure predicate layer shared by
//! campaign triggers, step gates, goals and exit rules.

pub mod eval;
pub mod model;
pub mod window;

pub use eval::{compare_field, ConditionEvaluator};
pub use model::{Condition, FieldOperator, FrequencyKind, TagMatchMode};
pub use window::TimeWindow;
