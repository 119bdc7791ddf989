use chrono::{DateTime, Utc};
use dripline_core::types::TriggerEvent;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// One contact's run through one campaign's flow.
///
/// At most one journey per (campaign, contact) pair is ever `Active`;
/// terminal journeys are retained for reporting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactJourney {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub contact_id: String,
    pub account_id: String,
    pub status: JourneyStatus,
    pub current_node: CurrentNode,
    pub next_action: NextAction,
    /// When the scheduler should pick this journey up next.
    pub next_action_at: DateTime<Utc>,
    /// When the journey arrived at `current_node`. Branch waits and
    /// time-elapsed checks anchor here.
    pub step_entered_at: DateTime<Utc>,
    pub progress: JourneyProgress,
    /// The event that enrolled the contact, kept for personalization and
    /// step conditions.
    pub trigger_event: TriggerEvent,
    /// Scratch state, e.g. recorded branch decisions.
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContactJourney {
    pub fn is_active(&self) -> bool {
        self.status == JourneyStatus::Active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JourneyStatus {
    Active,
    Paused,
    Completed,
    Exited,
    Failed,
}

impl JourneyStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Exited | Self::Failed)
    }
}

/// Position in the flow. `Start` precedes the first step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CurrentNode {
    Start,
    Step { id: String },
    Branch { id: String },
}

impl CurrentNode {
    pub fn step(id: impl Into<String>) -> Self {
        Self::Step { id: id.into() }
    }

    pub fn branch(id: impl Into<String>) -> Self {
        Self::Branch { id: id.into() }
    }
}

/// What the executor does when the journey comes due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    SendEmail,
    EvaluateBranch,
    CompleteJourney,
}

/// Monotonic per-journey counters. Merged by increments only, so
/// concurrent engagement signals never overwrite each other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JourneyProgress {
    pub emails_sent: u32,
    pub emails_opened: u32,
    pub emails_clicked: u32,
    pub goals_reached: u32,
}

impl JourneyProgress {
    pub fn apply(&mut self, delta: ProgressDelta) {
        self.emails_sent += delta.emails_sent;
        self.emails_opened += delta.emails_opened;
        self.emails_clicked += delta.emails_clicked;
        self.goals_reached += delta.goals_reached;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressDelta {
    pub emails_sent: u32,
    pub emails_opened: u32,
    pub emails_clicked: u32,
    pub goals_reached: u32,
}

impl ProgressDelta {
    pub fn email_sent() -> Self {
        Self {
            emails_sent: 1,
            ..Self::default()
        }
    }

    pub fn email_opened() -> Self {
        Self {
            emails_opened: 1,
            ..Self::default()
        }
    }

    pub fn email_clicked() -> Self {
        Self {
            emails_clicked: 1,
            ..Self::default()
        }
    }

    pub fn goal_reached() -> Self {
        Self {
            goals_reached: 1,
            ..Self::default()
        }
    }
}
