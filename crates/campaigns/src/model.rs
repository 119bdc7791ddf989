use chrono::{DateTime, Utc};
use dripline_conditions::{Condition, FieldOperator, TimeWindow};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A campaign definition describing when contacts enter and the flow of
/// emails and branches they move through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub account_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub triggers: Vec<CampaignTrigger>,
    pub flow: Flow,
    #[serde(default)]
    pub exit_conditions: Vec<ExitCondition>,
    #[serde(default)]
    pub goals: Vec<Goal>,
    #[serde(default)]
    pub settings: CampaignSettings,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What pulls a contact into the campaign. Triggers are evaluated in
/// descending priority; the first satisfied trigger wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignTrigger {
    pub event_type: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// Delay before the first step runs, relative to enrollment.
    #[serde(default)]
    pub delay_minutes: u32,
    #[serde(default)]
    pub priority: u8,
}

/// The step list plus the branch table. Steps run in list order unless a
/// step names an explicit successor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    pub steps: Vec<Step>,
    #[serde(default)]
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    /// Minutes after the previous node completed (or after enrollment for
    /// the first step, on top of the trigger delay).
    #[serde(default)]
    pub delay_minutes: u32,
    pub template: EmailTemplate,
    /// Gate conditions. A false gate skips the email but still advances.
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub post_actions: Vec<PostAction>,
    /// Explicit successor. `None` falls through to the next step in list
    /// order, completing the journey at the end of the list.
    #[serde(default)]
    pub next: Option<NodeRef>,
}

/// Reference to a flow node by id, or the explicit end of the flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeRef {
    Step { id: String },
    Branch { id: String },
    End,
}

impl NodeRef {
    pub fn step(id: impl Into<String>) -> Self {
        Self::Step { id: id.into() }
    }

    pub fn branch(id: impl Into<String>) -> Self {
        Self::Branch { id: id.into() }
    }
}

/// A two-way split on contact state or engagement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub condition: BranchCondition,
    pub true_path: NodeRef,
    /// `None` completes the journey when the condition is conclusively
    /// false.
    #[serde(default)]
    pub false_path: Option<NodeRef>,
    /// How long to keep re-checking before the false arm is taken. Zero
    /// decides immediately.
    #[serde(default)]
    pub wait_minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BranchCondition {
    /// Did the contact open or click any email in this journey so far.
    EmailEngagement { metric: EngagementMetric },
    FieldValue {
        field: String,
        op: FieldOperator,
        #[serde(default)]
        value: Value,
    },
    TagPresence {
        tag: String,
        #[serde(default = "default_present")]
        present: bool,
    },
    /// Enough wall-clock time has passed.
    TimeElapsed {
        minutes: u32,
        #[serde(default)]
        since: ElapsedSince,
    },
    /// The contact produced an event of this type since entering the
    /// current node.
    CustomEvent { event_type: String },
}

fn default_present() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngagementMetric {
    Opened,
    Clicked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElapsedSince {
    Enrollment,
    StepEntered,
}

impl Default for ElapsedSince {
    fn default() -> Self {
        Self::Enrollment
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailTemplate {
    pub subject: String,
    pub html_body: String,
    /// Weighted A/B subject alternatives. Empty means the base subject is
    /// always used.
    #[serde(default)]
    pub subject_variants: Vec<SubjectVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectVariant {
    pub subject: String,
    pub weight: f32,
}

/// Side effects executed after a step's email is accepted by the mailer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostAction {
    AddTag { tag: String },
    RemoveTag { tag: String },
    SetField { field: String, value: Value },
    CallWebhook { url: String },
}

/// Conditions that pull a contact out of the journey before the next
/// scheduled action runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExitCondition {
    TagAdded { tag: String },
    FieldEquals { field: String, value: Value },
    GoalReached,
    Unsubscribed,
}

/// A conversion target tracked per campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Goal {
    pub name: String,
    pub event_type: String,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default = "default_goal_weight")]
    pub weight: f64,
}

fn default_goal_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSettings {
    #[serde(default = "default_is_active")]
    pub is_active: bool,
    #[serde(default)]
    pub max_duration_days: Option<u32>,
    #[serde(default)]
    pub max_emails_per_contact: Option<u32>,
    #[serde(default = "default_respect_unsubscribe")]
    pub respect_unsubscribe: bool,
    #[serde(default)]
    pub sending_window: Option<TimeWindow>,
}

fn default_is_active() -> bool {
    true
}

fn default_respect_unsubscribe() -> bool {
    true
}

impl Default for CampaignSettings {
    fn default() -> Self {
        Self {
            is_active: default_is_active(),
            max_duration_days: None,
            max_emails_per_contact: None,
            respect_unsubscribe: default_respect_unsubscribe(),
            sending_window: None,
        }
    }
}

impl Campaign {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.flow.steps.iter().find(|s| s.id == id)
    }

    pub fn branch(&self, id: &str) -> Option<&Branch> {
        self.flow.branches.iter().find(|b| b.id == id)
    }

    pub fn first_step(&self) -> Option<&Step> {
        self.flow.steps.first()
    }

    /// Successor of a step: its explicit `next`, otherwise the following
    /// step in list order, otherwise `End`.
    pub fn step_after(&self, step_id: &str) -> NodeRef {
        if let Some(step) = self.step(step_id) {
            if let Some(next) = &step.next {
                return next.clone();
            }
        }
        let mut steps = self.flow.steps.iter();
        while let Some(step) = steps.next() {
            if step.id == step_id {
                return steps
                    .next()
                    .map(|s| NodeRef::step(s.id.clone()))
                    .unwrap_or(NodeRef::End);
            }
        }
        NodeRef::End
    }

    pub fn has_trigger_for(&self, event_type: &str) -> bool {
        self.triggers.iter().any(|t| t.event_type == event_type)
    }
}
