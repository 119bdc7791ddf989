//! Journey state, one record per contact moving through a campaign, plus
//! the store enforcing the single-active invariant, lifecycle transitions,
//! and branch evaluation.

pub mod branch;
pub mod lifecycle;
pub mod model;
pub mod store;

pub use branch::{BranchEvaluator, BranchOutcome};
pub use lifecycle::{EnrollOutcome, JourneyLifecycle};
pub use model::{ContactJourney, CurrentNode, JourneyStatus, NextAction, ProgressDelta};
pub use store::{InsertOutcome, JourneyStore};
