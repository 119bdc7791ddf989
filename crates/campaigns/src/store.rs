use crate::model::{
    Branch, BranchCondition, Campaign, CampaignSettings, CampaignTrigger, EmailTemplate,
    EngagementMetric, ExitCondition, Flow, Goal, NodeRef, PostAction, Step, SubjectVariant,
};
use crate::validation;
use chrono::Utc;
use dashmap::DashMap;
use dripline_conditions::Condition;
use dripline_core::types::event_types;
use dripline_core::{AutomationError, AutomationResult};
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Campaign definitions, keyed by id. Writes validate; the tick path only
/// ever reads.
#[derive(Clone, Default)]
pub struct CampaignStore {
    campaigns: Arc<DashMap<Uuid, Campaign>>,
}

impl CampaignStore {
    pub fn new() -> Self {
        Self {
            campaigns: Arc::new(DashMap::new()),
        }
    }

    /// Validates and stores a campaign, returning its id.
    pub fn insert(&self, campaign: Campaign) -> AutomationResult<Uuid> {
        validation::validate(&campaign)?;
        let id = campaign.id;
        info!(campaign_id = %id, name = %campaign.name, "Storing campaign");
        self.campaigns.insert(id, campaign);
        Ok(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<Campaign> {
        self.campaigns.get(id).map(|r| r.clone())
    }

    pub fn list_for_account(&self, account_id: &str) -> Vec<Campaign> {
        self.campaigns
            .iter()
            .filter(|r| r.value().account_id == account_id)
            .map(|r| r.value().clone())
            .collect()
    }

    /// Active campaigns in the account with at least one trigger on this
    /// event type.
    pub fn active_for_event(&self, account_id: &str, event_type: &str) -> Vec<Campaign> {
        self.campaigns
            .iter()
            .filter(|r| {
                let c = r.value();
                c.account_id == account_id && c.settings.is_active && c.has_trigger_for(event_type)
            })
            .map(|r| r.value().clone())
            .collect()
    }

    pub fn set_active(&self, id: &Uuid, is_active: bool) -> AutomationResult<()> {
        let mut entry = self
            .campaigns
            .get_mut(id)
            .ok_or(AutomationError::CampaignNotFound(*id))?;
        info!(campaign_id = %id, is_active, "Updating campaign active flag");
        entry.settings.is_active = is_active;
        entry.updated_at = Utc::now();
        Ok(())
    }

    pub fn remove(&self, id: &Uuid) -> AutomationResult<()> {
        self.campaigns
            .remove(id)
            .ok_or(AutomationError::CampaignNotFound(*id))?;
        info!(campaign_id = %id, "Deleted campaign");
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    /// Seeds two demo campaigns for development and smoke testing.
    pub fn seed_demo_campaigns(&self, account_id: &str) -> AutomationResult<Vec<Uuid>> {
        info!(account_id = %account_id, "Seeding demo campaigns");
        let now = Utc::now();

        // ---- 1. Welcome Series (three emails with an engagement branch) ----
        let welcome = Campaign {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            name: "Welcome Series".to_string(),
            description: "Onboarding email sequence for new contacts".to_string(),
            triggers: vec![CampaignTrigger {
                event_type: event_types::CONTACT_CREATED.to_string(),
                conditions: vec![],
                delay_minutes: 0,
                priority: 10,
            }],
            flow: Flow {
                steps: vec![
                    Step {
                        id: "welcome".into(),
                        delay_minutes: 0,
                        template: EmailTemplate {
                            subject: "Welcome aboard, {{first_name}}!".into(),
                            html_body: "<p>Hi {{first_name}}, great to have you.</p>".into(),
                            subject_variants: vec![
                                SubjectVariant {
                                    subject: "Welcome aboard, {{first_name}}!".into(),
                                    weight: 0.5,
                                },
                                SubjectVariant {
                                    subject: "You're in, {{first_name}}".into(),
                                    weight: 0.5,
                                },
                            ],
                        },
                        conditions: vec![],
                        post_actions: vec![PostAction::AddTag {
                            tag: "welcomed".into(),
                        }],
                        next: None,
                    },
                    Step {
                        id: "getting-started".into(),
                        delay_minutes: 2 * 1440,
                        template: EmailTemplate {
                            subject: "Three ways to get started".into(),
                            html_body: "<p>Here is how to get the most out of your account.</p>"
                                .into(),
                            subject_variants: vec![],
                        },
                        conditions: vec![],
                        post_actions: vec![],
                        next: Some(NodeRef::branch("engaged-check")),
                    },
                    Step {
                        id: "power-tips".into(),
                        delay_minutes: 1440,
                        template: EmailTemplate {
                            subject: "Power user tips".into(),
                            html_body: "<p>You read our emails, so here is the good stuff.</p>"
                                .into(),
                            subject_variants: vec![],
                        },
                        conditions: vec![],
                        post_actions: vec![],
                        next: Some(NodeRef::End),
                    },
                    Step {
                        id: "nudge".into(),
                        delay_minutes: 1440,
                        template: EmailTemplate {
                            subject: "Did you miss this?".into(),
                            html_body: "<p>A quick recap of what you signed up for.</p>".into(),
                            subject_variants: vec![],
                        },
                        conditions: vec![],
                        post_actions: vec![],
                        next: None,
                    },
                ],
                branches: vec![Branch {
                    id: "engaged-check".into(),
                    condition: BranchCondition::EmailEngagement {
                        metric: EngagementMetric::Opened,
                    },
                    true_path: NodeRef::step("power-tips"),
                    false_path: Some(NodeRef::step("nudge")),
                    wait_minutes: 1440,
                }],
            },
            exit_conditions: vec![ExitCondition::Unsubscribed],
            goals: vec![Goal {
                name: "activated".into(),
                event_type: event_types::FORM_SUBMITTED.to_string(),
                conditions: vec![],
                weight: 1.0,
            }],
            settings: CampaignSettings::default(),
            created_at: now,
            updated_at: now,
        };

        // ---- 2. Win-back (tag-triggered, capped, business-hours only) ----
        let winback = Campaign {
            id: Uuid::new_v4(),
            account_id: account_id.to_string(),
            name: "Win-back".to_string(),
            description: "Re-engage contacts marked inactive".to_string(),
            triggers: vec![CampaignTrigger {
                event_type: event_types::TAG_ADDED.to_string(),
                conditions: vec![Condition::EventData {
                    source: None,
                    category: None,
                    properties: [("tag".to_string(), json!("inactive"))].into_iter().collect(),
                }],
                delay_minutes: 60,
                priority: 5,
            }],
            flow: Flow {
                steps: vec![
                    Step {
                        id: "winback-offer".into(),
                        delay_minutes: 0,
                        template: EmailTemplate {
                            subject: "We miss you, {{first_name}}".into(),
                            html_body: "<p>Here is 20% off to come back.</p>".into(),
                            subject_variants: vec![],
                        },
                        conditions: vec![],
                        post_actions: vec![],
                        next: None,
                    },
                    Step {
                        id: "last-call".into(),
                        delay_minutes: 3 * 1440,
                        template: EmailTemplate {
                            subject: "Last chance on your offer".into(),
                            html_body: "<p>Your discount expires tomorrow.</p>".into(),
                            subject_variants: vec![],
                        },
                        conditions: vec![],
                        post_actions: vec![],
                        next: None,
                    },
                ],
                branches: vec![],
            },
            exit_conditions: vec![
                ExitCondition::Unsubscribed,
                ExitCondition::TagAdded {
                    tag: "active".into(),
                },
                ExitCondition::GoalReached,
            ],
            goals: vec![Goal {
                name: "returned".into(),
                event_type: "order_placed".to_string(),
                conditions: vec![],
                weight: 1.0,
            }],
            settings: CampaignSettings {
                is_active: true,
                max_duration_days: Some(14),
                max_emails_per_contact: Some(2),
                respect_unsubscribe: true,
                sending_window: None,
            },
            created_at: now,
            updated_at: now,
        };

        let ids = vec![self.insert(welcome)?, self.insert(winback)?];
        info!(count = ids.len(), "Seeded demo campaigns");
        Ok(ids)
    }
}
