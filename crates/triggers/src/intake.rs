//! Event intake pipeline. Producers hand events to a bounded channel and
//! never block; a background router drains it. Routing order matters:
//! history first so frequency conditions can see the event being routed,
//! then consent and engagement side effects, then goals, then trigger
//! matching.

use crate::matcher::TriggerMatcher;
use dripline_campaigns::{CampaignStore, StatsRegistry};
use dripline_conditions::ConditionEvaluator;
use dripline_core::contacts::{Contact, ContactMutation, ContactStore};
use dripline_core::event_bus::{make_event, EngineEventKind, EventSink};
use dripline_core::history::EventHistory;
use dripline_core::types::{event_types, TriggerEvent};
use dripline_journey::{JourneyLifecycle, ProgressDelta};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Non-blocking producer handle. Cheap to clone; all clones feed the same
/// router.
#[derive(Clone)]
pub struct EventIntake {
    sender: mpsc::Sender<TriggerEvent>,
    sink: Arc<dyn EventSink>,
}

impl EventIntake {
    /// Create the channel and spawn the router worker. The worker stops
    /// when every intake handle is dropped.
    pub fn start(router: EventRouter, buffer_size: usize, sink: Arc<dyn EventSink>) -> Self {
        let (sender, mut receiver) = mpsc::channel::<TriggerEvent>(buffer_size);
        tokio::spawn(async move {
            while let Some(event) = receiver.recv().await {
                router.process(&event);
            }
            debug!("intake channel closed, router stopping");
        });
        Self { sender, sink }
    }

    /// Wrap an existing channel. `start` is the usual entry point; this is
    /// for callers that run the receiving side themselves.
    pub fn from_parts(sender: mpsc::Sender<TriggerEvent>, sink: Arc<dyn EventSink>) -> Self {
        Self { sender, sink }
    }

    /// Submit an event. A full buffer drops the event rather than blocking
    /// the producer; drops are counted and surfaced on the event bus.
    pub fn emit(&self, event: TriggerEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => {
                metrics::counter!("events.received").increment(1);
                true
            }
            Err(mpsc::error::TrySendError::Full(event)) => {
                metrics::counter!("events.dropped").increment(1);
                warn!(
                    event_type = %event.event_type,
                    contact_id = %event.contact_id,
                    "intake buffer full, dropping event"
                );
                self.sink.emit(make_event(
                    EngineEventKind::EventDropped,
                    event.account_id,
                    Some(event.contact_id),
                    None,
                    None,
                    Some(event.event_type),
                ));
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                warn!(event_type = %event.event_type, "intake channel closed, event lost");
                false
            }
        }
    }
}

/// Synchronous event routing. Owns no tasks; `EventIntake::start` runs it
/// on the drain loop and tests drive it directly.
#[derive(Clone)]
pub struct EventRouter {
    history: Arc<EventHistory>,
    contacts: Arc<dyn ContactStore>,
    campaigns: CampaignStore,
    evaluator: Arc<ConditionEvaluator>,
    lifecycle: JourneyLifecycle,
    matcher: Arc<TriggerMatcher>,
    stats: Arc<StatsRegistry>,
    sink: Arc<dyn EventSink>,
}

impl EventRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        history: Arc<EventHistory>,
        contacts: Arc<dyn ContactStore>,
        campaigns: CampaignStore,
        evaluator: Arc<ConditionEvaluator>,
        lifecycle: JourneyLifecycle,
        matcher: Arc<TriggerMatcher>,
        stats: Arc<StatsRegistry>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            history,
            contacts,
            campaigns,
            evaluator,
            lifecycle,
            matcher,
            stats,
            sink,
        }
    }

    pub fn process(&self, event: &TriggerEvent) {
        self.history.record(event);
        self.apply_side_effects(event);
        self.route_engagement(event);
        self.check_goals(event);
        self.matcher.on_event(event);
    }

    /// Consent events mutate the contact record; the journey exit itself
    /// happens at the next scheduled action's exit check.
    fn apply_side_effects(&self, event: &TriggerEvent) {
        if event.event_type == event_types::UNSUBSCRIBED {
            if let Err(err) = self.contacts.apply(
                &event.contact_id,
                ContactMutation::SetUnsubscribed { unsubscribed: true },
            ) {
                debug!(contact_id = %event.contact_id, error = %err, "unsubscribe for unknown contact");
            } else {
                info!(contact_id = %event.contact_id, "contact unsubscribed");
            }
        }
    }

    /// Open/click events update journey progress. A `journey_id` property
    /// pins the event to one journey; without it every active journey of
    /// the contact gets the credit.
    fn route_engagement(&self, event: &TriggerEvent) {
        let delta = match event.event_type.as_str() {
            event_types::EMAIL_OPENED => ProgressDelta::email_opened(),
            event_types::EMAIL_CLICKED => ProgressDelta::email_clicked(),
            _ => return,
        };

        for journey_id in self.engagement_targets(event) {
            self.lifecycle.record_progress(journey_id, delta);
        }
    }

    fn engagement_targets(&self, event: &TriggerEvent) -> Vec<Uuid> {
        if let Some(id) = event
            .property_str("journey_id")
            .and_then(|raw| Uuid::parse_str(raw).ok())
        {
            let owned = self
                .lifecycle
                .store()
                .get(&id)
                .map_or(false, |j| j.contact_id == event.contact_id);
            if owned {
                return vec![id];
            }
            debug!(journey_id = %id, contact_id = %event.contact_id, "engagement names a journey the contact is not on");
        }
        self.lifecycle.store().active_for_contact(&event.contact_id)
    }

    /// Any matching campaign goal counts once per active journey.
    fn check_goals(&self, event: &TriggerEvent) {
        let journey_ids = self.lifecycle.store().active_for_contact(&event.contact_id);
        if journey_ids.is_empty() {
            return;
        }
        let contact = self.contacts.get(&event.contact_id);

        for journey_id in journey_ids {
            let Some(journey) = self.lifecycle.store().get(&journey_id) else {
                continue;
            };
            let Some(campaign) = self.campaigns.get(&journey.campaign_id) else {
                continue;
            };
            for goal in &campaign.goals {
                if goal.event_type != event.event_type {
                    continue;
                }
                if !self.goal_satisfied(&goal.conditions, contact.as_ref(), event) {
                    continue;
                }
                self.lifecycle
                    .record_progress(journey_id, ProgressDelta::goal_reached());
                self.stats.for_campaign(campaign.id).record_goal_reached();
                metrics::counter!("goals.reached").increment(1);
                info!(
                    campaign_id = %campaign.id,
                    contact_id = %event.contact_id,
                    journey_id = %journey_id,
                    goal = %goal.name,
                    "goal reached"
                );
                self.sink.emit(make_event(
                    EngineEventKind::GoalReached,
                    event.account_id.clone(),
                    Some(event.contact_id.clone()),
                    Some(campaign.id),
                    Some(journey_id),
                    Some(goal.name.clone()),
                ));
            }
        }
    }

    fn goal_satisfied(
        &self,
        conditions: &[dripline_conditions::Condition],
        contact: Option<&Contact>,
        event: &TriggerEvent,
    ) -> bool {
        match contact {
            Some(contact) => self.evaluator.matches_all(conditions, contact, Some(event)),
            None => conditions.is_empty(),
        }
    }
}
