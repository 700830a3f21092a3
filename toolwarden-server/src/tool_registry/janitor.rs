// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Counter Janitor
//!
//! Background task that periodically evicts stale usage buckets so the set of
//! historical labels cannot grow without bound. It only touches the counter
//! map, one shard at a time, and never blocks on the policy store.

use super::clock::Clock;
use super::usage::UsageCounterStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Handle to a running janitor; dropping it without `shutdown` leaves the task running
pub struct JanitorHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl JanitorHandle {
    /// Start sweeping `usage` every `interval`
    pub fn spawn(
        usage: Arc<UsageCounterStore>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        minute_retention: Duration,
    ) -> Self {
        let (stop, mut stopped) = watch::channel(false);
        let interval = interval.max(Duration::from_millis(1));

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let stats = usage.sweep(clock.now(), minute_retention);
                        debug!(
                            "Counter janitor sweep: {} minute buckets, {} day buckets, {} pairs removed",
                            stats.minute_buckets_removed,
                            stats.day_buckets_removed,
                            stats.pairs_dropped
                        );
                    }
                    changed = stopped.changed() => {
                        if changed.is_err() || *stopped.borrow() {
                            break;
                        }
                    }
                }
            }

            debug!("Counter janitor stopped");
        });

        Self { stop, task }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the schedule and wait for the task to exit
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("Counter janitor task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_registry::clock::ManualClock;
    use chrono::NaiveDate;
    use toolwarden_core::RatePeriod;

    #[tokio::test]
    async fn test_janitor_sweeps_on_schedule_and_stops() {
        let start = NaiveDate::from_ymd_opt(2025, 2, 1)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let usage = Arc::new(UsageCounterStore::new());
        usage.record("u1", "search", start);

        let janitor = JanitorHandle::spawn(
            Arc::clone(&usage),
            clock.clone(),
            Duration::from_millis(10),
            Duration::from_secs(600),
        );

        clock.advance(chrono::Duration::minutes(11));
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(usage.labels("u1", "search", RatePeriod::Minute).is_empty());
        assert_eq!(usage.labels("u1", "search", RatePeriod::Day).len(), 1);
        assert!(!janitor.is_finished());

        janitor.shutdown().await;
    }
}
