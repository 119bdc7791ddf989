//! Journey storage and the two concurrency primitives the engine leans on:
//! the single-active index (atomic check-then-insert per campaign/contact
//! pair) and the claim set (due journeys flip out of the schedulable set
//! before any work happens on them).

use crate::model::{ContactJourney, JourneyStatus};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Result of an enrollment insert against the active index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// The pair already has an active journey; its id is returned.
    ActiveExists(Uuid),
}

#[derive(Clone, Default)]
pub struct JourneyStore {
    journeys: Arc<DashMap<Uuid, ContactJourney>>,
    active_index: Arc<DashMap<(Uuid, String), Uuid>>,
    claims: Arc<DashMap<Uuid, DateTime<Utc>>>,
}

impl JourneyStore {
    pub fn new() -> Self {
        Self {
            journeys: Arc::new(DashMap::new()),
            active_index: Arc::new(DashMap::new()),
            claims: Arc::new(DashMap::new()),
        }
    }

    /// Insert a new active journey iff the (campaign, contact) pair has
    /// none. The index entry makes the existence check and the insert one
    /// atomic step; two racing enrollments for the same pair cannot both
    /// succeed.
    pub fn insert_active(&self, journey: ContactJourney) -> InsertOutcome {
        let key = (journey.campaign_id, journey.contact_id.clone());
        match self.active_index.entry(key) {
            Entry::Occupied(existing) => InsertOutcome::ActiveExists(*existing.get()),
            Entry::Vacant(slot) => {
                let id = journey.id;
                self.journeys.insert(id, journey);
                slot.insert(id);
                InsertOutcome::Inserted
            }
        }
    }

    /// Put the index entry for a pair back if its slot is empty. Repair
    /// path only; normal enrollment goes through `insert_active`.
    pub(crate) fn restore_index(&self, campaign_id: Uuid, contact_id: &str, journey_id: Uuid) {
        if let Entry::Vacant(slot) = self
            .active_index
            .entry((campaign_id, contact_id.to_string()))
        {
            slot.insert(journey_id);
        }
    }

    /// Store a journey without touching the active index. Exists so tests
    /// can simulate index drift.
    pub(crate) fn insert_unindexed(&self, journey: ContactJourney) {
        self.journeys.insert(journey.id, journey);
    }

    pub fn get(&self, id: &Uuid) -> Option<ContactJourney> {
        self.journeys.get(id).map(|j| j.clone())
    }

    /// Apply a mutation under the journey's map lock. Returns false when
    /// the journey does not exist.
    pub fn modify(&self, id: &Uuid, mutate: impl FnOnce(&mut ContactJourney)) -> bool {
        match self.journeys.get_mut(id) {
            Some(mut journey) => {
                mutate(&mut journey);
                true
            }
            None => false,
        }
    }

    /// Drop the active-index entry for a pair, but only if it still points
    /// at the given journey. A newer journey's slot is never clobbered.
    pub fn clear_active(&self, campaign_id: Uuid, contact_id: &str, journey_id: Uuid) {
        self.active_index
            .remove_if(&(campaign_id, contact_id.to_string()), |_, current| {
                *current == journey_id
            });
    }

    pub fn active_journey_id(&self, campaign_id: Uuid, contact_id: &str) -> Option<Uuid> {
        self.active_index
            .get(&(campaign_id, contact_id.to_string()))
            .map(|entry| *entry.value())
    }

    /// Ids of all active journeys for a contact, across campaigns.
    pub fn active_for_contact(&self, contact_id: &str) -> Vec<Uuid> {
        self.active_index
            .iter()
            .filter(|entry| entry.key().1 == contact_id)
            .map(|entry| *entry.value())
            .collect()
    }

    pub fn for_campaign(&self, campaign_id: Uuid) -> Vec<ContactJourney> {
        self.journeys
            .iter()
            .filter(|j| j.campaign_id == campaign_id)
            .map(|j| j.clone())
            .collect()
    }

    pub fn for_contact(&self, contact_id: &str) -> Vec<ContactJourney> {
        self.journeys
            .iter()
            .filter(|j| j.contact_id == contact_id)
            .map(|j| j.clone())
            .collect()
    }

    /// Active journeys due at or before `now`, excluding ones already
    /// claimed by a running tick.
    pub fn due(&self, now: DateTime<Utc>, limit: usize) -> Vec<Uuid> {
        let mut due: Vec<(DateTime<Utc>, Uuid)> = self
            .journeys
            .iter()
            .filter(|j| {
                j.status == JourneyStatus::Active
                    && j.next_action_at <= now
                    && !self.claims.contains_key(&j.id)
            })
            .map(|j| (j.next_action_at, j.id))
            .collect();
        due.sort();
        due.into_iter().take(limit).map(|(_, id)| id).collect()
    }

    /// Atomically claim a journey for processing. False means another
    /// worker holds it.
    pub fn claim(&self, id: Uuid, now: DateTime<Utc>) -> bool {
        match self.claims.entry(id) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(now);
                true
            }
        }
    }

    pub fn release(&self, id: Uuid) {
        self.claims.remove(&id);
    }

    pub fn claimed_count(&self) -> usize {
        self.claims.len()
    }

    /// Pairs holding more than one active journey. Should always be empty;
    /// a non-empty result is an invariant violation to repair.
    pub fn duplicate_active_pairs(&self) -> Vec<((Uuid, String), Vec<Uuid>)> {
        let mut by_pair: HashMap<(Uuid, String), Vec<Uuid>> = HashMap::new();
        for journey in self.journeys.iter() {
            if journey.status == JourneyStatus::Active {
                by_pair
                    .entry((journey.campaign_id, journey.contact_id.clone()))
                    .or_default()
                    .push(journey.id);
            }
        }
        by_pair.retain(|_, ids| ids.len() > 1);
        by_pair.into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.journeys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.journeys.is_empty()
    }

    pub fn active_count(&self) -> usize {
        self.active_index.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CurrentNode, JourneyProgress, NextAction};
    use dripline_core::types::TriggerEvent;

    fn sample_journey(campaign_id: Uuid, contact_id: &str) -> ContactJourney {
        let now = Utc::now();
        ContactJourney {
            id: Uuid::new_v4(),
            campaign_id,
            contact_id: contact_id.to_string(),
            account_id: "acct-1".into(),
            status: JourneyStatus::Active,
            current_node: CurrentNode::Start,
            next_action: NextAction::SendEmail,
            next_action_at: now,
            step_entered_at: now,
            progress: JourneyProgress::default(),
            trigger_event: TriggerEvent::new("contact_created", "acct-1", contact_id),
            metadata: serde_json::Map::new(),
            exit_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_single_active_per_pair() {
        let store = JourneyStore::new();
        let campaign_id = Uuid::new_v4();

        let first = sample_journey(campaign_id, "c-1");
        let first_id = first.id;
        assert_eq!(store.insert_active(first), InsertOutcome::Inserted);

        let second = sample_journey(campaign_id, "c-1");
        assert_eq!(
            store.insert_active(second),
            InsertOutcome::ActiveExists(first_id)
        );

        // A different contact is unaffected
        assert_eq!(
            store.insert_active(sample_journey(campaign_id, "c-2")),
            InsertOutcome::Inserted
        );
        assert_eq!(store.active_count(), 2);
    }

    #[test]
    fn test_concurrent_enrollment_single_winner() {
        let store = JourneyStore::new();
        let campaign_id = Uuid::new_v4();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.insert_active(sample_journey(campaign_id, "c-1"))
                })
            })
            .collect();

        let outcomes: Vec<InsertOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();
        let inserted = outcomes
            .iter()
            .filter(|o| **o == InsertOutcome::Inserted)
            .count();
        assert_eq!(inserted, 1);
        assert_eq!(store.active_count(), 1);
    }

    #[test]
    fn test_clear_active_only_for_matching_journey() {
        let store = JourneyStore::new();
        let campaign_id = Uuid::new_v4();
        let journey = sample_journey(campaign_id, "c-1");
        let journey_id = journey.id;
        store.insert_active(journey);

        // Wrong id leaves the slot in place
        store.clear_active(campaign_id, "c-1", Uuid::new_v4());
        assert_eq!(
            store.active_journey_id(campaign_id, "c-1"),
            Some(journey_id)
        );

        store.clear_active(campaign_id, "c-1", journey_id);
        assert_eq!(store.active_journey_id(campaign_id, "c-1"), None);
    }

    #[test]
    fn test_due_respects_claims_and_order() {
        let store = JourneyStore::new();
        let campaign_id = Uuid::new_v4();
        let now = Utc::now();

        let mut early = sample_journey(campaign_id, "c-1");
        early.next_action_at = now - chrono::Duration::minutes(10);
        let early_id = early.id;
        let mut late = sample_journey(campaign_id, "c-2");
        late.next_action_at = now - chrono::Duration::minutes(1);
        let late_id = late.id;
        let mut future = sample_journey(campaign_id, "c-3");
        future.next_action_at = now + chrono::Duration::minutes(5);

        store.insert_active(early);
        store.insert_active(late);
        store.insert_active(future);

        assert_eq!(store.due(now, 10), vec![early_id, late_id]);

        assert!(store.claim(early_id, now));
        assert!(!store.claim(early_id, now));
        assert_eq!(store.due(now, 10), vec![late_id]);

        store.release(early_id);
        assert_eq!(store.due(now, 10), vec![early_id, late_id]);
    }

    #[test]
    fn test_duplicate_active_pairs_detection() {
        let store = JourneyStore::new();
        let campaign_id = Uuid::new_v4();

        // Bypass the index to simulate a corrupted state
        store.insert_unindexed(sample_journey(campaign_id, "c-1"));
        store.insert_unindexed(sample_journey(campaign_id, "c-1"));

        let pairs = store.duplicate_active_pairs();
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].1.len(), 2);
    }
}
