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

//! Usage Counter Store
//!
//! Fixed-window counters per (user, tool). Each pair holds two independent
//! maps from bucket label to call count: one keyed by the current minute, one
//! by the current day. Limits are checked against the current bucket only, so
//! a caller can burst up to twice the per-minute limit across a boundary.
//!
//! Counts live in a `DashMap`; an increment holds the shard's write guard for
//! the duration of the read-modify-write, so concurrent recorders for the same
//! key never lose updates.

use chrono::NaiveDateTime;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;
use toolwarden_core::RatePeriod;

const MINUTE_LABEL_FORMAT: &str = "%Y-%m-%d-%H-%M";
const DAY_LABEL_FORMAT: &str = "%Y-%m-%d";

/// Counter key: (user_id, tool_name)
pub type UsageKey = (String, String);

pub fn minute_label(at: NaiveDateTime) -> String {
    at.format(MINUTE_LABEL_FORMAT).to_string()
}

pub fn day_label(at: NaiveDateTime) -> String {
    at.format(DAY_LABEL_FORMAT).to_string()
}

pub fn bucket_label(period: RatePeriod, at: NaiveDateTime) -> String {
    match period {
        RatePeriod::Minute => minute_label(at),
        RatePeriod::Day => day_label(at),
    }
}

/// Decode a minute label back to the start of its minute
pub fn parse_minute_label(label: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(&format!("{}-00", label), "%Y-%m-%d-%H-%M-%S").ok()
}

/// Bucket counts for one (user, tool) pair
#[derive(Debug, Clone, Default)]
pub struct UsageCounters {
    pub minute: HashMap<String, u64>,
    pub day: HashMap<String, u64>,
}

impl UsageCounters {
    fn buckets(&self, period: RatePeriod) -> &HashMap<String, u64> {
        match period {
            RatePeriod::Minute => &self.minute,
            RatePeriod::Day => &self.day,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.minute.is_empty() && self.day.is_empty()
    }
}

/// What a janitor sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    pub minute_buckets_removed: usize,
    pub day_buckets_removed: usize,
    pub pairs_dropped: usize,
}

#[derive(Debug, Default)]
pub struct UsageCounterStore {
    counters: DashMap<UsageKey, UsageCounters>,
}

impl UsageCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Calls recorded in the bucket containing `now`
    pub fn current_count(
        &self,
        user_id: &str,
        tool_name: &str,
        period: RatePeriod,
        now: NaiveDateTime,
    ) -> u64 {
        self.count_in_bucket(user_id, tool_name, period, &bucket_label(period, now))
    }

    pub fn count_in_bucket(
        &self,
        user_id: &str,
        tool_name: &str,
        period: RatePeriod,
        label: &str,
    ) -> u64 {
        self.counters
            .get(&(user_id.to_string(), tool_name.to_string()))
            .and_then(|counters| counters.buckets(period).get(label).copied())
            .unwrap_or(0)
    }

    /// Increment the current minute and day buckets; returns the new counts
    pub fn record(&self, user_id: &str, tool_name: &str, now: NaiveDateTime) -> (u64, u64) {
        let mut counters = self
            .counters
            .entry((user_id.to_string(), tool_name.to_string()))
            .or_default();

        let minute = counters.minute.entry(minute_label(now)).or_insert(0);
        *minute += 1;
        let minute = *minute;

        let day = counters.day.entry(day_label(now)).or_insert(0);
        *day += 1;

        (minute, *day)
    }

    /// Sorted bucket labels currently held for a pair
    pub fn labels(&self, user_id: &str, tool_name: &str, period: RatePeriod) -> Vec<String> {
        let mut labels: Vec<String> = self
            .counters
            .get(&(user_id.to_string(), tool_name.to_string()))
            .map(|counters| counters.buckets(period).keys().cloned().collect())
            .unwrap_or_default();
        labels.sort();
        labels
    }

    /// Number of (user, tool) pairs being tracked
    pub fn tracked_pairs(&self) -> usize {
        self.counters.len()
    }

    /// Evict minute buckets older than `minute_retention` and day buckets other
    /// than today's. Pairs left with no buckets are dropped. Undecodable minute
    /// labels are evicted. The bucket containing `now` is always kept.
    pub fn sweep(&self, now: NaiveDateTime, minute_retention: Duration) -> SweepStats {
        let today = day_label(now);
        let current_minute = minute_label(now);
        let mut stats = SweepStats::default();

        self.counters.retain(|_, counters| {
            let before = counters.minute.len();
            counters.minute.retain(|label, _| {
                if *label == current_minute {
                    return true;
                }
                match parse_minute_label(label) {
                    Some(start) => match now.signed_duration_since(start).to_std() {
                        Ok(age) => age <= minute_retention,
                        // Bucket lies in the future relative to `now`
                        Err(_) => true,
                    },
                    None => false,
                }
            });
            stats.minute_buckets_removed += before - counters.minute.len();

            let before = counters.day.len();
            counters.day.retain(|label, _| *label == today);
            stats.day_buckets_removed += before - counters.day.len();

            if counters.is_empty() {
                stats.pairs_dropped += 1;
                false
            } else {
                true
            }
        });

        stats
    }
}
