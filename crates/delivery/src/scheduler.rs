//! Periodic driver for the action executor.

use crate::executor::ActionExecutor;
use dripline_core::clock::Clock;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;

pub struct SchedulerLoop {
    executor: Arc<ActionExecutor>,
    clock: Arc<dyn Clock>,
    tick_interval: Duration,
}

impl SchedulerLoop {
    pub fn new(executor: Arc<ActionExecutor>, clock: Arc<dyn Clock>, tick_interval: Duration) -> Self {
        Self {
            executor,
            clock,
            tick_interval,
        }
    }

    /// Run ticks forever on the current runtime. The handle aborts the
    /// loop on drop at shutdown.
    pub fn spawn(self) -> JoinHandle<()> {
        info!(interval_ms = self.tick_interval.as_millis() as u64, "scheduler loop starting");
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.tick_interval);
            loop {
                interval.tick().await;
                self.executor.tick(self.clock.now());
            }
        })
    }
}
