//! The action executor. Each tick claims the due journeys and runs exactly
//! one scheduled action per claim: send the current step's email, evaluate
//! a branch, or complete the journey. Failures stay contained to the
//! journey that hit them.

use crate::mailer::{Mailer, OutboundEmail};
use chrono::{DateTime, Duration, Utc};
use dripline_campaigns::{
    Campaign, CampaignStore, EmailTemplate, NodeRef, PostAction, StatsRegistry, Step,
};
use dripline_conditions::ConditionEvaluator;
use dripline_core::contacts::{Contact, ContactMutation, ContactStore};
use dripline_core::error::AutomationResult;
use dripline_core::event_bus::{make_event, EngineEventKind, EventSink};
use dripline_core::templates::{TemplateRenderer, TemplateVars};
use dripline_core::webhooks::WebhookCaller;
use dripline_journey::{
    BranchEvaluator, BranchOutcome, ContactJourney, CurrentNode, JourneyLifecycle, JourneyStatus,
    NextAction, ProgressDelta,
};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One tick's outcome, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    pub processed: u64,
    pub sent: u64,
    pub skipped: u64,
    pub deferred: u64,
    pub branched: u64,
    pub completed: u64,
    pub exited: u64,
    pub failed: u64,
}

pub struct ActionExecutor {
    campaigns: CampaignStore,
    contacts: Arc<dyn ContactStore>,
    lifecycle: JourneyLifecycle,
    branches: BranchEvaluator,
    conditions: Arc<ConditionEvaluator>,
    renderer: TemplateRenderer,
    mailer: Arc<dyn Mailer>,
    webhooks: Arc<dyn WebhookCaller>,
    stats: Arc<StatsRegistry>,
    sink: Arc<dyn EventSink>,
    tick_batch_limit: usize,
}

impl ActionExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        campaigns: CampaignStore,
        contacts: Arc<dyn ContactStore>,
        lifecycle: JourneyLifecycle,
        branches: BranchEvaluator,
        conditions: Arc<ConditionEvaluator>,
        mailer: Arc<dyn Mailer>,
        webhooks: Arc<dyn WebhookCaller>,
        stats: Arc<StatsRegistry>,
        sink: Arc<dyn EventSink>,
        tick_batch_limit: usize,
    ) -> Self {
        Self {
            campaigns,
            contacts,
            lifecycle,
            branches,
            conditions,
            renderer: TemplateRenderer::new(),
            mailer,
            webhooks,
            stats,
            sink,
            tick_batch_limit,
        }
    }

    /// One scheduler pass at `now`. Every claim is released before the
    /// method returns, whatever the journey's action did.
    pub fn tick(&self, now: DateTime<Utc>) -> TickSummary {
        let started = std::time::Instant::now();
        let due = self.lifecycle.store().due(now, self.tick_batch_limit);
        let mut summary = TickSummary::default();

        for journey_id in due {
            if !self.lifecycle.store().claim(journey_id, now) {
                continue;
            }
            summary.processed += 1;
            self.run_one(journey_id, now, &mut summary);
            self.lifecycle.store().release(journey_id);
        }

        metrics::counter!("scheduler.ticks").increment(1);
        metrics::histogram!("scheduler.tick_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);
        if summary.processed > 0 {
            info!(
                processed = summary.processed,
                sent = summary.sent,
                skipped = summary.skipped,
                deferred = summary.deferred,
                branched = summary.branched,
                completed = summary.completed,
                exited = summary.exited,
                failed = summary.failed,
                "tick done"
            );
        }
        summary
    }

    fn run_one(&self, journey_id: Uuid, now: DateTime<Utc>, summary: &mut TickSummary) {
        let Some(journey) = self.lifecycle.store().get(&journey_id) else {
            return;
        };
        if !journey.is_active() {
            return;
        }
        let Some(campaign) = self.campaigns.get(&journey.campaign_id) else {
            warn!(
                journey_id = %journey_id,
                campaign_id = %journey.campaign_id,
                "campaign missing, failing journey"
            );
            if self
                .lifecycle
                .terminate(journey_id, JourneyStatus::Failed, Some("campaign_missing"))
            {
                summary.failed += 1;
            }
            return;
        };
        let contact = self.contacts.get(&journey.contact_id);

        // Exit conditions beat whatever was scheduled
        if let Some(reason) = self.lifecycle.check_exit(&journey, &campaign, contact.as_ref()) {
            if self
                .lifecycle
                .terminate(journey_id, JourneyStatus::Exited, Some(&reason))
            {
                summary.exited += 1;
            }
            return;
        }

        match journey.next_action {
            NextAction::SendEmail => {
                self.run_send(&journey, &campaign, contact.as_ref(), now, summary)
            }
            NextAction::EvaluateBranch => {
                self.run_branch(journey, &campaign, contact.as_ref(), now, summary)
            }
            NextAction::CompleteJourney => {
                if self
                    .lifecycle
                    .terminate(journey_id, JourneyStatus::Completed, None)
                {
                    summary.completed += 1;
                }
            }
        }
    }

    fn run_send(
        &self,
        journey: &ContactJourney,
        campaign: &Campaign,
        contact: Option<&Contact>,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        let step = match &journey.current_node {
            CurrentNode::Start => campaign.first_step(),
            CurrentNode::Step { id } => campaign.step(id),
            CurrentNode::Branch { .. } => None,
        };
        let Some(step) = step else {
            warn!(
                journey_id = %journey.id,
                node = ?journey.current_node,
                "no step at current node, failing journey"
            );
            if self
                .lifecycle
                .terminate(journey.id, JourneyStatus::Failed, Some("unknown_step"))
            {
                summary.failed += 1;
            }
            return;
        };

        // A vanished contact cannot receive mail; skip but keep moving
        let Some(contact) = contact else {
            debug!(
                journey_id = %journey.id,
                contact_id = %journey.contact_id,
                step_id = %step.id,
                "contact missing, skipping send"
            );
            self.skip_step(journey, campaign, step, now, summary);
            return;
        };

        if !self
            .conditions
            .matches_all(&step.conditions, contact, Some(&journey.trigger_event))
        {
            debug!(journey_id = %journey.id, step_id = %step.id, "step conditions false, skipping send");
            self.skip_step(journey, campaign, step, now, summary);
            return;
        }

        if let Some(window) = &campaign.settings.sending_window {
            if !window.contains(now) {
                let reopens = window.next_open(now);
                self.lifecycle.reschedule(journey.id, reopens);
                debug!(
                    journey_id = %journey.id,
                    step_id = %step.id,
                    reopens = %reopens,
                    "outside sending window, deferred"
                );
                metrics::counter!("emails.deferred").increment(1);
                summary.deferred += 1;
                return;
            }
        }

        let (subject_template, variant_picked) = pick_subject(&step.template);
        let vars = TemplateVars::from_contact(contact)
            .overlay_properties(&journey.trigger_event.properties);
        let email = OutboundEmail {
            to_email: contact.email.clone(),
            to_name: contact.first_name.clone(),
            subject: self.renderer.render(subject_template, &vars),
            html_body: self.renderer.render(&step.template.html_body, &vars),
            account_id: journey.account_id.clone(),
            campaign_id: campaign.id,
            journey_id: journey.id,
            contact_id: contact.id.clone(),
            step_id: step.id.clone(),
        };

        let delivery_id = match self.mailer.send(&email) {
            Ok(id) => id,
            Err(err) => {
                warn!(
                    journey_id = %journey.id,
                    step_id = %step.id,
                    error = %err,
                    "mailer refused, failing journey"
                );
                metrics::counter!("emails.failed").increment(1);
                if self
                    .lifecycle
                    .terminate(journey.id, JourneyStatus::Failed, Some(&err.to_string()))
                {
                    summary.failed += 1;
                }
                return;
            }
        };

        if variant_picked {
            self.lifecycle.set_metadata(
                journey.id,
                &format!("subject:{}", step.id),
                json!(subject_template),
            );
        }

        for action in &step.post_actions {
            if let Err(err) = self.apply_post_action(action, journey, campaign, &contact.id) {
                warn!(
                    journey_id = %journey.id,
                    step_id = %step.id,
                    error = %err,
                    "post-action failed"
                );
            }
        }

        self.lifecycle
            .record_progress(journey.id, ProgressDelta::email_sent());
        self.stats.for_campaign(campaign.id).record_email_sent();
        metrics::counter!("emails.sent").increment(1);
        info!(
            campaign_id = %campaign.id,
            journey_id = %journey.id,
            contact_id = %contact.id,
            step_id = %step.id,
            delivery_id = %delivery_id,
            "email sent"
        );
        self.sink.emit(make_event(
            EngineEventKind::EmailSent,
            journey.account_id.clone(),
            Some(contact.id.clone()),
            Some(campaign.id),
            Some(journey.id),
            Some(step.id.clone()),
        ));
        summary.sent += 1;

        self.advance_past_step(journey, campaign, step, now, summary);
    }

    fn skip_step(
        &self,
        journey: &ContactJourney,
        campaign: &Campaign,
        step: &Step,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        metrics::counter!("steps.skipped").increment(1);
        self.sink.emit(make_event(
            EngineEventKind::StepSkipped,
            journey.account_id.clone(),
            Some(journey.contact_id.clone()),
            Some(campaign.id),
            Some(journey.id),
            Some(step.id.clone()),
        ));
        summary.skipped += 1;
        self.advance_past_step(journey, campaign, step, now, summary);
    }

    /// Move to the step's successor: the next step after its delay, a
    /// branch due right away, or the end of the flow.
    fn advance_past_step(
        &self,
        journey: &ContactJourney,
        campaign: &Campaign,
        step: &Step,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        match campaign.step_after(&step.id) {
            NodeRef::Step { id } => {
                if !self.schedule_step(journey.id, campaign, &id, now) {
                    warn!(journey_id = %journey.id, step_id = %id, "successor step not found");
                    if self.lifecycle.terminate(
                        journey.id,
                        JourneyStatus::Failed,
                        Some("unknown_step"),
                    ) {
                        summary.failed += 1;
                    }
                }
            }
            NodeRef::Branch { id } => {
                if campaign.branch(&id).is_some() {
                    self.lifecycle.advance(
                        journey.id,
                        CurrentNode::branch(id),
                        NextAction::EvaluateBranch,
                        now,
                    );
                } else {
                    warn!(journey_id = %journey.id, branch_id = %id, "successor branch not found");
                    if self.lifecycle.terminate(
                        journey.id,
                        JourneyStatus::Failed,
                        Some("unknown_branch"),
                    ) {
                        summary.failed += 1;
                    }
                }
            }
            NodeRef::End => {
                if self
                    .lifecycle
                    .terminate(journey.id, JourneyStatus::Completed, None)
                {
                    summary.completed += 1;
                }
            }
        }
    }

    fn schedule_step(
        &self,
        journey_id: Uuid,
        campaign: &Campaign,
        step_id: &str,
        now: DateTime<Utc>,
    ) -> bool {
        match campaign.step(step_id) {
            Some(step) => {
                let at = now + Duration::minutes(i64::from(step.delay_minutes));
                self.lifecycle.advance(
                    journey_id,
                    CurrentNode::step(step_id),
                    NextAction::SendEmail,
                    at,
                );
                true
            }
            None => false,
        }
    }

    /// Resolve the branch the journey is sitting on. Branch-to-branch hops
    /// resolve in this same pass; campaign validation bounds the chain by
    /// rejecting cycles, and the hop cap catches flows that never went
    /// through it.
    fn run_branch(
        &self,
        mut journey: ContactJourney,
        campaign: &Campaign,
        contact: Option<&Contact>,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        let max_hops = campaign.flow.branches.len() + 1;
        for _ in 0..max_hops {
            let branch_id = match &journey.current_node {
                CurrentNode::Branch { id } => id.clone(),
                node => {
                    warn!(journey_id = %journey.id, node = ?node, "branch action on a non-branch node");
                    if self.lifecycle.terminate(
                        journey.id,
                        JourneyStatus::Failed,
                        Some("invalid_node"),
                    ) {
                        summary.failed += 1;
                    }
                    return;
                }
            };
            let Some(branch) = campaign.branch(&branch_id) else {
                warn!(journey_id = %journey.id, branch_id = %branch_id, "branch not found");
                if self.lifecycle.terminate(
                    journey.id,
                    JourneyStatus::Failed,
                    Some("unknown_branch"),
                ) {
                    summary.failed += 1;
                }
                return;
            };

            summary.branched += 1;
            metrics::counter!("branches.evaluated").increment(1);

            match self.branches.evaluate(branch, &journey, contact, now) {
                BranchOutcome::Pending { until } => {
                    self.lifecycle.reschedule(journey.id, until);
                    debug!(
                        journey_id = %journey.id,
                        branch_id = %branch_id,
                        until = %until,
                        "branch pending"
                    );
                    return;
                }
                BranchOutcome::Goto {
                    node,
                    condition_met,
                } => {
                    self.lifecycle.set_metadata(
                        journey.id,
                        &format!("branch:{branch_id}"),
                        json!(condition_met),
                    );
                    self.sink.emit(make_event(
                        EngineEventKind::BranchEvaluated,
                        journey.account_id.clone(),
                        Some(journey.contact_id.clone()),
                        Some(campaign.id),
                        Some(journey.id),
                        Some(format!("{branch_id}={condition_met}")),
                    ));

                    match node {
                        NodeRef::Step { id } => {
                            if !self.schedule_step(journey.id, campaign, &id, now) {
                                warn!(journey_id = %journey.id, step_id = %id, "branch target step not found");
                                if self.lifecycle.terminate(
                                    journey.id,
                                    JourneyStatus::Failed,
                                    Some("unknown_step"),
                                ) {
                                    summary.failed += 1;
                                }
                            }
                            return;
                        }
                        NodeRef::End => {
                            if self.lifecycle.terminate(
                                journey.id,
                                JourneyStatus::Completed,
                                None,
                            ) {
                                summary.completed += 1;
                            }
                            return;
                        }
                        NodeRef::Branch { id } => {
                            if campaign.branch(&id).is_none() {
                                warn!(journey_id = %journey.id, branch_id = %id, "branch target branch not found");
                                if self.lifecycle.terminate(
                                    journey.id,
                                    JourneyStatus::Failed,
                                    Some("unknown_branch"),
                                ) {
                                    summary.failed += 1;
                                }
                                return;
                            }
                            self.lifecycle.advance(
                                journey.id,
                                CurrentNode::branch(id),
                                NextAction::EvaluateBranch,
                                now,
                            );
                            match self.lifecycle.store().get(&journey.id) {
                                Some(refreshed) => journey = refreshed,
                                None => return,
                            }
                        }
                    }
                }
            }
        }

        warn!(journey_id = %journey.id, "branch chain exceeded flow size, failing journey");
        if self
            .lifecycle
            .terminate(journey.id, JourneyStatus::Failed, Some("branch_cycle"))
        {
            summary.failed += 1;
        }
    }

    fn apply_post_action(
        &self,
        action: &PostAction,
        journey: &ContactJourney,
        campaign: &Campaign,
        contact_id: &str,
    ) -> AutomationResult<()> {
        match action {
            PostAction::AddTag { tag } => self
                .contacts
                .apply(contact_id, ContactMutation::AddTag { tag: tag.clone() }),
            PostAction::RemoveTag { tag } => self
                .contacts
                .apply(contact_id, ContactMutation::RemoveTag { tag: tag.clone() }),
            PostAction::SetField { field, value } => self.contacts.apply(
                contact_id,
                ContactMutation::SetField {
                    field: field.clone(),
                    value: value.clone(),
                },
            ),
            PostAction::CallWebhook { url } => {
                let payload = json!({
                    "account_id": journey.account_id,
                    "campaign_id": campaign.id,
                    "journey_id": journey.id,
                    "contact_id": contact_id,
                    "node": journey.current_node,
                    "triggered_by": journey.trigger_event.event_type,
                });
                self.webhooks.call(url, &payload)
            }
        }
    }
}

/// Weighted subject pick. The base subject stands in when there are no
/// variants or the weights are degenerate. Returns whether a variant roll
/// happened.
fn pick_subject(template: &EmailTemplate) -> (&str, bool) {
    if template.subject_variants.is_empty() {
        return (&template.subject, false);
    }
    let total_weight: f32 = template.subject_variants.iter().map(|v| v.weight).sum();
    if !total_weight.is_finite() || total_weight <= 0.0 {
        return (&template.subject, false);
    }

    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut roll: f32 = rng.gen::<f32>() * total_weight;
    let mut selected = &template.subject_variants[0];
    for variant in &template.subject_variants {
        roll -= variant.weight;
        if roll <= 0.0 {
            selected = variant;
            break;
        }
    }
    (&selected.subject, true)
}
