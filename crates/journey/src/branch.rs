//! Branch condition evaluation. Total: any branch on any journey yields an
//! outcome, and missing contacts or fields read as the condition not
//! holding, never as an error.

use crate::model::ContactJourney;
use chrono::{DateTime, Duration, Utc};
use dripline_campaigns::{Branch, BranchCondition, ElapsedSince, EngagementMetric, NodeRef};
use dripline_conditions::compare_field;
use dripline_core::contacts::Contact;
use dripline_core::history::EventHistory;
use std::sync::Arc;

/// What the scheduler should do with a journey sitting on a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchOutcome {
    Goto {
        node: NodeRef,
        /// True when the condition held and the true path was taken.
        condition_met: bool,
    },
    /// Condition not yet met but the wait has not expired; re-check then.
    Pending { until: DateTime<Utc> },
}

pub struct BranchEvaluator {
    history: Arc<EventHistory>,
}

impl BranchEvaluator {
    pub fn new(history: Arc<EventHistory>) -> Self {
        Self { history }
    }

    /// Decide a branch at `now`. A held condition takes the true path
    /// immediately. Otherwise the branch pends until the wait expires, then
    /// falls to the false path, or to the end of the flow when there is
    /// none.
    pub fn evaluate(
        &self,
        branch: &Branch,
        journey: &ContactJourney,
        contact: Option<&Contact>,
        now: DateTime<Utc>,
    ) -> BranchOutcome {
        if self.condition_holds(&branch.condition, journey, contact, now) {
            return BranchOutcome::Goto {
                node: branch.true_path.clone(),
                condition_met: true,
            };
        }

        if branch.wait_minutes > 0 {
            let deadline =
                journey.step_entered_at + Duration::minutes(i64::from(branch.wait_minutes));
            if now < deadline {
                return BranchOutcome::Pending { until: deadline };
            }
        }

        BranchOutcome::Goto {
            node: branch.false_path.clone().unwrap_or(NodeRef::End),
            condition_met: false,
        }
    }

    fn condition_holds(
        &self,
        condition: &BranchCondition,
        journey: &ContactJourney,
        contact: Option<&Contact>,
        now: DateTime<Utc>,
    ) -> bool {
        match condition {
            BranchCondition::EmailEngagement { metric } => match metric {
                EngagementMetric::Opened => journey.progress.emails_opened > 0,
                EngagementMetric::Clicked => journey.progress.emails_clicked > 0,
            },
            BranchCondition::FieldValue { field, op, value } => {
                let actual = contact.and_then(|c| c.field(field));
                compare_field(actual.as_ref(), *op, value)
            }
            BranchCondition::TagPresence { tag, present } => {
                let has = contact.map_or(false, |c| c.has_tag(tag));
                has == *present
            }
            BranchCondition::TimeElapsed { minutes, since } => {
                let anchor = match since {
                    ElapsedSince::Enrollment => journey.created_at,
                    ElapsedSince::StepEntered => journey.step_entered_at,
                };
                now >= anchor + Duration::minutes(i64::from(*minutes))
            }
            BranchCondition::CustomEvent { event_type } => self.history.has_event_since(
                &journey.contact_id,
                event_type,
                journey.step_entered_at,
            ),
        }
    }
}
