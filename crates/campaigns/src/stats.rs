//! Per-campaign statistics. Counters only ever increment; the conversion
//! rate is derived on read and never stored.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct CampaignStats {
    triggered: AtomicU64,
    entered: AtomicU64,
    completed: AtomicU64,
    exited: AtomicU64,
    failed: AtomicU64,
    emails_sent: AtomicU64,
    goals_reached: AtomicU64,
}

impl CampaignStats {
    pub fn record_triggered(&self) {
        self.triggered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_entered(&self) {
        self.entered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_exited(&self) {
        self.exited.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_email_sent(&self) {
        self.emails_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_goal_reached(&self) {
        self.goals_reached.fetch_add(1, Ordering::Relaxed);
    }

    pub fn entered(&self) -> u64 {
        self.entered.load(Ordering::Relaxed)
    }

    pub fn goals_reached(&self) -> u64 {
        self.goals_reached.load(Ordering::Relaxed)
    }

    /// goals_reached / max(entered, 1)
    pub fn conversion_rate(&self) -> f64 {
        let entered = self.entered.load(Ordering::Relaxed).max(1);
        self.goals_reached.load(Ordering::Relaxed) as f64 / entered as f64
    }

    pub fn snapshot(&self, campaign_id: Uuid) -> StatsSnapshot {
        StatsSnapshot {
            campaign_id,
            triggered: self.triggered.load(Ordering::Relaxed),
            entered: self.entered.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            exited: self.exited.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            emails_sent: self.emails_sent.load(Ordering::Relaxed),
            goals_reached: self.goals_reached.load(Ordering::Relaxed),
            conversion_rate: self.conversion_rate(),
        }
    }
}

/// Point-in-time view of a campaign's counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub campaign_id: Uuid,
    pub triggered: u64,
    pub entered: u64,
    pub completed: u64,
    pub exited: u64,
    pub failed: u64,
    pub emails_sent: u64,
    pub goals_reached: u64,
    pub conversion_rate: f64,
}

/// Statistics handles keyed by campaign. Handles are created lazily and
/// shared; the campaign definition itself stays read-only under load.
#[derive(Default)]
pub struct StatsRegistry {
    stats: DashMap<Uuid, Arc<CampaignStats>>,
}

impl StatsRegistry {
    pub fn new() -> Self {
        Self {
            stats: DashMap::new(),
        }
    }

    pub fn for_campaign(&self, campaign_id: Uuid) -> Arc<CampaignStats> {
        self.stats
            .entry(campaign_id)
            .or_insert_with(|| Arc::new(CampaignStats::default()))
            .clone()
    }

    pub fn snapshot(&self, campaign_id: Uuid) -> StatsSnapshot {
        self.for_campaign(campaign_id).snapshot(campaign_id)
    }

    pub fn snapshots(&self) -> Vec<StatsSnapshot> {
        self.stats
            .iter()
            .map(|entry| entry.value().snapshot(*entry.key()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_conversion_rate() {
        let registry = StatsRegistry::new();
        let id = Uuid::new_v4();
        let stats = registry.for_campaign(id);

        assert_eq!(stats.conversion_rate(), 0.0);

        for _ in 0..4 {
            stats.record_entered();
        }
        stats.record_goal_reached();
        stats.record_email_sent();
        stats.record_completed();

        let snap = registry.snapshot(id);
        assert_eq!(snap.entered, 4);
        assert_eq!(snap.goals_reached, 1);
        assert_eq!(snap.emails_sent, 1);
        assert_eq!(snap.completed, 1);
        assert!((snap.conversion_rate - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_handle_is_shared() {
        let registry = StatsRegistry::new();
        let id = Uuid::new_v4();

        registry.for_campaign(id).record_entered();
        registry.for_campaign(id).record_entered();
        assert_eq!(registry.snapshot(id).entered, 2);
    }

    #[test]
    fn test_concurrent_increments_do_not_lose_updates() {
        let registry = Arc::new(StatsRegistry::new());
        let id = Uuid::new_v4();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    let stats = registry.for_campaign(id);
                    for _ in 0..1000 {
                        stats.record_email_sent();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.snapshot(id).emails_sent, 8000);
    }
}
