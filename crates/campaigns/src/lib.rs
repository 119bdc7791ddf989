//! Campaign definitions (triggers, timed email steps, branches, exit
//! conditions, goals and settings) plus save-time validation, the campaign
//! store and per-campaign statistics.

pub mod model;
pub mod stats;
pub mod store;
pub mod validation;

pub use model::{
    Branch, BranchCondition, Campaign, CampaignSettings, CampaignTrigger, ElapsedSince,
    EmailTemplate, EngagementMetric, ExitCondition, Flow, Goal, NodeRef, PostAction, Step,
    SubjectVariant,
};
pub use stats::{CampaignStats, StatsRegistry, StatsSnapshot};
pub use store::CampaignStore;
