//! Trigger matching: events against active campaign triggers, first
//! satisfied trigger per campaign wins, enrollment through the lifecycle
//! manager. One event can enroll a contact into many campaigns, never twice
//! into the same one.

use dripline_campaigns::{CampaignTrigger, StatsRegistry};
use dripline_conditions::ConditionEvaluator;
use dripline_core::contacts::{Contact, ContactStore};
use dripline_core::types::TriggerEvent;
use dripline_journey::{EnrollOutcome, JourneyLifecycle};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentResult {
    pub campaign_id: Uuid,
    pub outcome: EnrollmentOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollmentOutcome {
    Enrolled(Uuid),
    AlreadyActive(Uuid),
    ConditionsNotMet,
}

pub struct TriggerMatcher {
    campaigns: dripline_campaigns::CampaignStore,
    contacts: Arc<dyn ContactStore>,
    evaluator: Arc<ConditionEvaluator>,
    lifecycle: JourneyLifecycle,
    stats: Arc<StatsRegistry>,
}

impl TriggerMatcher {
    pub fn new(
        campaigns: dripline_campaigns::CampaignStore,
        contacts: Arc<dyn ContactStore>,
        evaluator: Arc<ConditionEvaluator>,
        lifecycle: JourneyLifecycle,
        stats: Arc<StatsRegistry>,
    ) -> Self {
        Self {
            campaigns,
            contacts,
            evaluator,
            lifecycle,
            stats,
        }
    }

    /// Match an event against every active campaign in its account and
    /// enroll where a trigger is satisfied. Returns one result per
    /// candidate campaign.
    pub fn on_event(&self, event: &TriggerEvent) -> Vec<EnrollmentResult> {
        let candidates = self
            .campaigns
            .active_for_event(&event.account_id, &event.event_type);
        if candidates.is_empty() {
            return Vec::new();
        }

        let contact = self.contacts.get(&event.contact_id);
        let mut results = Vec::with_capacity(candidates.len());

        for campaign in candidates {
            // Highest priority first; the stable sort keeps definition
            // order between equal priorities.
            let mut triggers: Vec<&CampaignTrigger> = campaign
                .triggers
                .iter()
                .filter(|t| t.event_type == event.event_type)
                .collect();
            triggers.sort_by(|a, b| b.priority.cmp(&a.priority));

            let satisfied = triggers
                .into_iter()
                .find(|t| self.trigger_satisfied(t, contact.as_ref(), event));

            let Some(trigger) = satisfied else {
                debug!(
                    campaign_id = %campaign.id,
                    contact_id = %event.contact_id,
                    event_type = %event.event_type,
                    "no trigger satisfied"
                );
                results.push(EnrollmentResult {
                    campaign_id: campaign.id,
                    outcome: EnrollmentOutcome::ConditionsNotMet,
                });
                continue;
            };

            self.stats.for_campaign(campaign.id).record_triggered();
            metrics::counter!("triggers.matched").increment(1);

            let outcome = match self.lifecycle.enroll(&campaign, trigger, event) {
                EnrollOutcome::Enrolled(id) => EnrollmentOutcome::Enrolled(id),
                EnrollOutcome::AlreadyActive(id) => EnrollmentOutcome::AlreadyActive(id),
            };
            results.push(EnrollmentResult {
                campaign_id: campaign.id,
                outcome,
            });
        }
        results
    }

    /// Contact-based conditions need a contact; with none on file only a
    /// condition-free trigger can fire.
    fn trigger_satisfied(
        &self,
        trigger: &CampaignTrigger,
        contact: Option<&Contact>,
        event: &TriggerEvent,
    ) -> bool {
        match contact {
            Some(contact) => self
                .evaluator
                .matches_all(&trigger.conditions, contact, Some(event)),
            None => trigger.conditions.is_empty(),
        }
    }
}
