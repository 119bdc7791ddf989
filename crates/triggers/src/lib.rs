//! Inbound event handling: the bounded intake pipeline and the trigger
//! matcher that turns events into journey enrollments.

pub mod intake;
pub mod matcher;

pub use intake::{EventIntake, EventRouter};
pub use matcher::{EnrollmentOutcome, EnrollmentResult, TriggerMatcher};
