//! Journey lifecycle transitions: enroll, advance, terminate, exit checks.
//! Termination is idempotent and is the only place the active-index slot
//! for a (campaign, contact) pair is released.

use crate::model::{
    ContactJourney, CurrentNode, JourneyProgress, JourneyStatus, NextAction, ProgressDelta,
};
use crate::store::{InsertOutcome, JourneyStore};
use chrono::{DateTime, Duration, Utc};
use dripline_campaigns::{Campaign, CampaignTrigger, ExitCondition, StatsRegistry};
use dripline_conditions::{compare_field, FieldOperator};
use dripline_core::clock::Clock;
use dripline_core::contacts::Contact;
use dripline_core::event_bus::{make_event, EngineEventKind, EventSink};
use dripline_core::types::TriggerEvent;
use serde_json::Map;
use std::sync::Arc;
use tracing::{debug, error, info};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled(Uuid),
    /// Suppressed because the pair already has an active journey.
    AlreadyActive(Uuid),
}

#[derive(Clone)]
pub struct JourneyLifecycle {
    store: JourneyStore,
    stats: Arc<StatsRegistry>,
    sink: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl JourneyLifecycle {
    pub fn new(
        store: JourneyStore,
        stats: Arc<StatsRegistry>,
        sink: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            stats,
            sink,
            clock,
        }
    }

    pub fn store(&self) -> &JourneyStore {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Create an active journey for the contact unless the pair already has
    /// one. The first action is scheduled after the trigger's delay.
    pub fn enroll(
        &self,
        campaign: &Campaign,
        trigger: &CampaignTrigger,
        event: &TriggerEvent,
    ) -> EnrollOutcome {
        let now = self.clock.now();
        let journey = ContactJourney {
            id: Uuid::new_v4(),
            campaign_id: campaign.id,
            contact_id: event.contact_id.clone(),
            account_id: event.account_id.clone(),
            status: JourneyStatus::Active,
            current_node: CurrentNode::Start,
            next_action: NextAction::SendEmail,
            next_action_at: now + Duration::minutes(i64::from(trigger.delay_minutes)),
            step_entered_at: now,
            progress: JourneyProgress::default(),
            trigger_event: event.clone(),
            metadata: Map::new(),
            exit_reason: None,
            created_at: now,
            updated_at: now,
        };
        let id = journey.id;

        match self.store.insert_active(journey) {
            InsertOutcome::ActiveExists(existing) => {
                debug!(
                    campaign_id = %campaign.id,
                    contact_id = %event.contact_id,
                    journey_id = %existing,
                    "enrollment suppressed, journey already active"
                );
                EnrollOutcome::AlreadyActive(existing)
            }
            InsertOutcome::Inserted => {
                self.stats.for_campaign(campaign.id).record_entered();
                metrics::counter!("journeys.entered").increment(1);
                info!(
                    campaign_id = %campaign.id,
                    contact_id = %event.contact_id,
                    journey_id = %id,
                    trigger = %event.event_type,
                    "journey entered"
                );
                self.sink.emit(make_event(
                    EngineEventKind::JourneyEntered,
                    event.account_id.clone(),
                    Some(event.contact_id.clone()),
                    Some(campaign.id),
                    Some(id),
                    None,
                ));
                EnrollOutcome::Enrolled(id)
            }
        }
    }

    /// Move the journey to a new node with its next action and due time.
    /// Resets the step-entered anchor used by branch waits.
    pub fn advance(
        &self,
        id: Uuid,
        node: CurrentNode,
        action: NextAction,
        at: DateTime<Utc>,
    ) -> bool {
        let now = self.clock.now();
        self.store.modify(&id, |journey| {
            journey.current_node = node;
            journey.next_action = action;
            journey.next_action_at = at;
            journey.step_entered_at = now;
            journey.updated_at = now;
        })
    }

    /// Push the due time without touching the node or the step-entered
    /// anchor. Used for pending branches and sending-window deferrals.
    pub fn reschedule(&self, id: Uuid, at: DateTime<Utc>) -> bool {
        let now = self.clock.now();
        self.store.modify(&id, |journey| {
            journey.next_action_at = at;
            journey.updated_at = now;
        })
    }

    /// Transition to a terminal status. Returns true only on the first
    /// transition; repeated calls and calls on missing journeys are no-ops,
    /// so counters and events fire exactly once per journey.
    pub fn terminate(&self, id: Uuid, status: JourneyStatus, reason: Option<&str>) -> bool {
        let (kind, label) = match status {
            JourneyStatus::Completed => (EngineEventKind::JourneyCompleted, "completed"),
            JourneyStatus::Exited => (EngineEventKind::JourneyExited, "exited"),
            JourneyStatus::Failed => (EngineEventKind::JourneyFailed, "failed"),
            JourneyStatus::Active | JourneyStatus::Paused => return false,
        };

        let now = self.clock.now();
        let mut transitioned: Option<(Uuid, String, String)> = None;
        self.store.modify(&id, |journey| {
            if journey.status.is_terminal() {
                return;
            }
            journey.status = status;
            journey.exit_reason = reason.map(str::to_string);
            journey.updated_at = now;
            transitioned = Some((
                journey.campaign_id,
                journey.contact_id.clone(),
                journey.account_id.clone(),
            ));
        });

        let Some((campaign_id, contact_id, account_id)) = transitioned else {
            return false;
        };

        self.store.clear_active(campaign_id, &contact_id, id);
        let stats = self.stats.for_campaign(campaign_id);
        match status {
            JourneyStatus::Completed => stats.record_completed(),
            JourneyStatus::Exited => stats.record_exited(),
            JourneyStatus::Failed => stats.record_failed(),
            JourneyStatus::Active | JourneyStatus::Paused => {}
        }
        metrics::counter!("journeys.terminated", "status" => label).increment(1);
        info!(
            campaign_id = %campaign_id,
            contact_id = %contact_id,
            journey_id = %id,
            status = label,
            reason = reason.unwrap_or(""),
            "journey terminated"
        );
        self.sink.emit(make_event(
            kind,
            account_id,
            Some(contact_id),
            Some(campaign_id),
            Some(id),
            reason.map(str::to_string),
        ));
        true
    }

    /// Freeze an active journey. Paused journeys are never picked up by the
    /// scheduler until resumed.
    pub fn pause(&self, id: Uuid) -> bool {
        let now = self.clock.now();
        let mut paused = false;
        self.store.modify(&id, |journey| {
            if journey.status == JourneyStatus::Active {
                journey.status = JourneyStatus::Paused;
                journey.updated_at = now;
                paused = true;
            }
        });
        paused
    }

    pub fn resume(&self, id: Uuid) -> bool {
        let now = self.clock.now();
        let mut resumed = false;
        self.store.modify(&id, |journey| {
            if journey.status == JourneyStatus::Paused {
                journey.status = JourneyStatus::Active;
                journey.updated_at = now;
                resumed = true;
            }
        });
        resumed
    }

    pub fn record_progress(&self, id: Uuid, delta: ProgressDelta) -> bool {
        let now = self.clock.now();
        self.store.modify(&id, |journey| {
            journey.progress.apply(delta);
            journey.updated_at = now;
        })
    }

    pub fn set_metadata(&self, id: Uuid, key: &str, value: serde_json::Value) -> bool {
        let now = self.clock.now();
        self.store.modify(&id, |journey| {
            journey.metadata.insert(key.to_string(), value);
            journey.updated_at = now;
        })
    }

    /// First matching exit reason, or `None` to keep going. Explicit exit
    /// conditions are checked in definition order, then the campaign-level
    /// caps. A missing contact satisfies no contact-based condition.
    pub fn check_exit(
        &self,
        journey: &ContactJourney,
        campaign: &Campaign,
        contact: Option<&Contact>,
    ) -> Option<String> {
        for condition in &campaign.exit_conditions {
            match condition {
                ExitCondition::TagAdded { tag } => {
                    if contact.map_or(false, |c| c.has_tag(tag)) {
                        return Some(format!("tag_added:{tag}"));
                    }
                }
                ExitCondition::FieldEquals { field, value } => {
                    let actual = contact.and_then(|c| c.field(field));
                    if compare_field(actual.as_ref(), FieldOperator::Equals, value) {
                        return Some(format!("field_equals:{field}"));
                    }
                }
                ExitCondition::GoalReached => {
                    if journey.progress.goals_reached > 0 {
                        return Some("goal_reached".into());
                    }
                }
                ExitCondition::Unsubscribed => {
                    if contact.map_or(false, |c| c.unsubscribed) {
                        return Some("unsubscribed".into());
                    }
                }
            }
        }

        if campaign.settings.respect_unsubscribe && contact.map_or(false, |c| c.unsubscribed) {
            return Some("unsubscribed".into());
        }
        if let Some(days) = campaign.settings.max_duration_days {
            if self.clock.now() >= journey.created_at + Duration::days(i64::from(days)) {
                return Some("max_duration_reached".into());
            }
        }
        if let Some(cap) = campaign.settings.max_emails_per_contact {
            if journey.progress.emails_sent >= cap {
                return Some("max_emails_reached".into());
            }
        }
        None
    }

    /// Audit pass over the single-active invariant. Pairs with more than
    /// one active journey keep the newest and exit the rest. Returns the
    /// number of journeys repaired.
    pub fn reconcile_active(&self) -> usize {
        let mut repaired = 0;
        for ((campaign_id, contact_id), ids) in self.store.duplicate_active_pairs() {
            error!(
                campaign_id = %campaign_id,
                contact_id = %contact_id,
                count = ids.len(),
                "multiple active journeys for one pair, repairing"
            );
            let mut journeys: Vec<ContactJourney> =
                ids.iter().filter_map(|id| self.store.get(id)).collect();
            journeys.sort_by_key(|j| j.created_at);
            let Some(survivor) = journeys.last().map(|j| j.id) else {
                continue;
            };
            for journey in &journeys {
                if journey.id != survivor
                    && self.terminate(
                        journey.id,
                        JourneyStatus::Exited,
                        Some("duplicate_reconciled"),
                    )
                {
                    repaired += 1;
                }
            }
            self.store.restore_index(campaign_id, &contact_id, survivor);
        }
        repaired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dripline_campaigns::{CampaignSettings, EmailTemplate, Flow, Goal, Step};
    use dripline_core::clock::manual_clock;
    use dripline_core::event_bus::capture_sink;

    fn sample_campaign(settings: CampaignSettings) -> Campaign {
        let now = Utc::now();
        Campaign {
            id: Uuid::new_v4(),
            account_id: "acct-1".into(),
            name: "Lifecycle".into(),
            description: String::new(),
            triggers: vec![CampaignTrigger {
                event_type: "contact_created".into(),
                conditions: vec![],
                delay_minutes: 15,
                priority: 0,
            }],
            flow: Flow {
                steps: vec![Step {
                    id: "hello".into(),
                    delay_minutes: 0,
                    template: EmailTemplate {
                        subject: "Hello".into(),
                        html_body: "<p>Hello</p>".into(),
                        subject_variants: vec![],
                    },
                    conditions: vec![],
                    post_actions: vec![],
                    next: None,
                }],
                branches: vec![],
            },
            exit_conditions: vec![
                ExitCondition::TagAdded {
                    tag: "blocked".into(),
                },
                ExitCondition::GoalReached,
            ],
            goals: vec![Goal {
                name: "signup".into(),
                event_type: "form_submitted".into(),
                conditions: vec![],
                weight: 1.0,
            }],
            settings,
            created_at: now,
            updated_at: now,
        }
    }

    fn lifecycle_with_sink() -> (
        JourneyLifecycle,
        Arc<dripline_core::event_bus::CaptureSink>,
        Arc<dripline_core::clock::ManualClock>,
        Arc<StatsRegistry>,
    ) {
        let clock = manual_clock(Utc::now());
        let sink = capture_sink();
        let stats = Arc::new(StatsRegistry::new());
        let lifecycle = JourneyLifecycle::new(
            JourneyStore::new(),
            Arc::clone(&stats),
            sink.clone(),
            clock.clone(),
        );
        (lifecycle, sink, clock, stats)
    }

    #[test]
    fn test_enroll_schedules_after_trigger_delay() {
        let (lifecycle, sink, clock, stats) = lifecycle_with_sink();
        let campaign = sample_campaign(CampaignSettings::default());
        let event = TriggerEvent::new("contact_created", "acct-1", "c-1");

        let outcome = lifecycle.enroll(&campaign, &campaign.triggers[0], &event);
        let EnrollOutcome::Enrolled(id) = outcome else {
            panic!("expected enrollment");
        };

        let journey = lifecycle.store().get(&id).unwrap();
        assert_eq!(journey.status, JourneyStatus::Active);
        assert_eq!(journey.current_node, CurrentNode::Start);
        assert_eq!(
            journey.next_action_at,
            clock.now() + Duration::minutes(15)
        );
        assert_eq!(stats.snapshot(campaign.id).entered, 1);
        assert_eq!(sink.count_kind(EngineEventKind::JourneyEntered), 1);
    }

    #[test]
    fn test_enroll_twice_is_suppressed() {
        let (lifecycle, sink, _clock, stats) = lifecycle_with_sink();
        let campaign = sample_campaign(CampaignSettings::default());
        let event = TriggerEvent::new("contact_created", "acct-1", "c-1");

        let first = lifecycle.enroll(&campaign, &campaign.triggers[0], &event);
        let EnrollOutcome::Enrolled(first_id) = first else {
            panic!("expected enrollment");
        };
        assert_eq!(
            lifecycle.enroll(&campaign, &campaign.triggers[0], &event),
            EnrollOutcome::AlreadyActive(first_id)
        );

        assert_eq!(stats.snapshot(campaign.id).entered, 1);
        assert_eq!(sink.count_kind(EngineEventKind::JourneyEntered), 1);
    }

    #[test]
    fn test_terminate_is_idempotent_and_frees_the_pair() {
        let (lifecycle, sink, _clock, stats) = lifecycle_with_sink();
        let campaign = sample_campaign(CampaignSettings::default());
        let event = TriggerEvent::new("contact_created", "acct-1", "c-1");

        let EnrollOutcome::Enrolled(id) =
            lifecycle.enroll(&campaign, &campaign.triggers[0], &event)
        else {
            panic!("expected enrollment");
        };

        assert!(lifecycle.terminate(id, JourneyStatus::Exited, Some("unsubscribed")));
        assert!(!lifecycle.terminate(id, JourneyStatus::Exited, Some("unsubscribed")));
        assert!(!lifecycle.terminate(id, JourneyStatus::Completed, None));

        let journey = lifecycle.store().get(&id).unwrap();
        assert_eq!(journey.status, JourneyStatus::Exited);
        assert_eq!(journey.exit_reason.as_deref(), Some("unsubscribed"));
        assert_eq!(stats.snapshot(campaign.id).exited, 1);
        assert_eq!(stats.snapshot(campaign.id).completed, 0);
        assert_eq!(sink.count_kind(EngineEventKind::JourneyExited), 1);

        // The pair can re-enroll once the journey is terminal
        assert!(matches!(
            lifecycle.enroll(&campaign, &campaign.triggers[0], &event),
            EnrollOutcome::Enrolled(_)
        ));
    }

    #[test]
    fn test_terminate_rejects_non_terminal_status() {
        let (lifecycle, _sink, _clock, _stats) = lifecycle_with_sink();
        let campaign = sample_campaign(CampaignSettings::default());
        let event = TriggerEvent::new("contact_created", "acct-1", "c-1");
        let EnrollOutcome::Enrolled(id) =
            lifecycle.enroll(&campaign, &campaign.triggers[0], &event)
        else {
            panic!("expected enrollment");
        };

        assert!(!lifecycle.terminate(id, JourneyStatus::Paused, None));
        assert!(lifecycle.store().get(&id).unwrap().is_active());
    }

    #[test]
    fn test_pause_and_resume() {
        let (lifecycle, _sink, clock, _stats) = lifecycle_with_sink();
        let campaign = sample_campaign(CampaignSettings::default());
        let event = TriggerEvent::new("contact_created", "acct-1", "c-1");
        let EnrollOutcome::Enrolled(id) =
            lifecycle.enroll(&campaign, &campaign.triggers[0], &event)
        else {
            panic!("expected enrollment");
        };

        clock.advance(Duration::minutes(30));
        assert!(lifecycle.pause(id));
        assert!(!lifecycle.pause(id));
        assert!(lifecycle.store().due(clock.now(), 10).is_empty());

        assert!(lifecycle.resume(id));
        assert_eq!(lifecycle.store().due(clock.now(), 10), vec![id]);
    }

    #[test]
    fn test_check_exit_orders_conditions_before_caps() {
        let (lifecycle, _sink, clock, _stats) = lifecycle_with_sink();
        let campaign = sample_campaign(CampaignSettings {
            max_duration_days: Some(7),
            max_emails_per_contact: Some(2),
            ..CampaignSettings::default()
        });
        let event = TriggerEvent::new("contact_created", "acct-1", "c-1");
        let EnrollOutcome::Enrolled(id) =
            lifecycle.enroll(&campaign, &campaign.triggers[0], &event)
        else {
            panic!("expected enrollment");
        };
        let journey = lifecycle.store().get(&id).unwrap();

        let contact = Contact::new("c-1", "acct-1", "ada@example.com");
        assert_eq!(lifecycle.check_exit(&journey, &campaign, Some(&contact)), None);
        assert_eq!(lifecycle.check_exit(&journey, &campaign, None), None);

        let tagged = contact.clone().with_tag("blocked");
        assert_eq!(
            lifecycle.check_exit(&journey, &campaign, Some(&tagged)).as_deref(),
            Some("tag_added:blocked")
        );

        lifecycle.record_progress(id, ProgressDelta::goal_reached());
        let journey = lifecycle.store().get(&id).unwrap();
        assert_eq!(
            lifecycle.check_exit(&journey, &campaign, Some(&contact)).as_deref(),
            Some("goal_reached")
        );

        let mut unsubscribed = contact.clone();
        unsubscribed.unsubscribed = true;
        // Explicit conditions are checked first, so the goal still wins
        assert_eq!(
            lifecycle
                .check_exit(&journey, &campaign, Some(&unsubscribed))
                .as_deref(),
            Some("goal_reached")
        );

        // Caps, checked on a journey without goal progress
        let fresh = ContactJourney {
            progress: JourneyProgress::default(),
            ..journey.clone()
        };
        assert_eq!(
            lifecycle
                .check_exit(&fresh, &campaign, Some(&unsubscribed))
                .as_deref(),
            Some("unsubscribed")
        );

        clock.advance(Duration::days(8));
        assert_eq!(
            lifecycle.check_exit(&fresh, &campaign, Some(&contact)).as_deref(),
            Some("max_duration_reached")
        );

        clock.set(fresh.created_at + Duration::minutes(5));
        let mut saturated = fresh.clone();
        saturated.progress.emails_sent = 2;
        assert_eq!(
            lifecycle
                .check_exit(&saturated, &campaign, Some(&contact))
                .as_deref(),
            Some("max_emails_reached")
        );
    }

    #[test]
    fn test_unsubscribe_respect_can_be_disabled() {
        let (lifecycle, _sink, _clock, _stats) = lifecycle_with_sink();
        let campaign = sample_campaign(CampaignSettings {
            respect_unsubscribe: false,
            ..CampaignSettings::default()
        });
        let event = TriggerEvent::new("contact_created", "acct-1", "c-1");
        let EnrollOutcome::Enrolled(id) =
            lifecycle.enroll(&campaign, &campaign.triggers[0], &event)
        else {
            panic!("expected enrollment");
        };
        let journey = lifecycle.store().get(&id).unwrap();

        let mut contact = Contact::new("c-1", "acct-1", "ada@example.com");
        contact.unsubscribed = true;
        assert_eq!(lifecycle.check_exit(&journey, &campaign, Some(&contact)), None);
    }

    #[test]
    fn test_reconcile_keeps_newest_duplicate() {
        let (lifecycle, _sink, clock, _stats) = lifecycle_with_sink();
        let campaign = sample_campaign(CampaignSettings::default());
        let event = TriggerEvent::new("contact_created", "acct-1", "c-1");

        let EnrollOutcome::Enrolled(older) =
            lifecycle.enroll(&campaign, &campaign.triggers[0], &event)
        else {
            panic!("expected enrollment");
        };
        // Force a second active journey past the index to simulate drift
        clock.advance(Duration::minutes(1));
        let mut rogue = lifecycle.store().get(&older).unwrap();
        rogue.id = Uuid::new_v4();
        rogue.created_at = clock.now();
        let newer = rogue.id;
        lifecycle.store().insert_unindexed(rogue);

        assert_eq!(lifecycle.reconcile_active(), 1);
        assert_eq!(
            lifecycle.store().get(&older).unwrap().status,
            JourneyStatus::Exited
        );
        assert!(lifecycle.store().get(&newer).unwrap().is_active());
        assert_eq!(
            lifecycle.store().active_journey_id(campaign.id, "c-1"),
            Some(newer)
        );
    }
}
