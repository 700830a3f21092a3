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

//! Registry Cache
//!
//! In-memory snapshot of every tool definition in the durable store. A refresh
//! builds a complete new map and swaps it in under the write lock; lookups
//! clone the `Arc` and never observe a half-loaded snapshot. The store
//! round-trip itself happens outside the lock (see `ToolAccessRegistry`).
//!
//! Age is measured on monotonic instants. Every reload attempt, successful or
//! not, bumps an attempt counter so lookups queued behind a failed reload can
//! tell it already happened.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use toolwarden_core::ToolDefinition;

struct Snapshot {
    tools: Arc<HashMap<String, ToolDefinition>>,
    /// `None` until the first successful load
    loaded_at: Option<Instant>,
}

pub struct RegistryCache {
    snapshot: RwLock<Snapshot>,
    /// Serializes reloads so concurrent stale lookups trigger one store query
    refresh_gate: tokio::sync::Mutex<()>,
    attempts: AtomicU64,
    validity: Duration,
}

impl RegistryCache {
    pub fn new(validity: Duration) -> Self {
        Self {
            snapshot: RwLock::new(Snapshot {
                tools: Arc::new(HashMap::new()),
                loaded_at: None,
            }),
            refresh_gate: tokio::sync::Mutex::new(()),
            attempts: AtomicU64::new(0),
            validity,
        }
    }

    /// True when the snapshot was never loaded or is older than the validity window
    pub fn is_stale(&self, now: Instant) -> bool {
        match self.snapshot.read().loaded_at {
            None => true,
            Some(loaded_at) => now.saturating_duration_since(loaded_at) > self.validity,
        }
    }

    pub fn get(&self, name: &str) -> Option<ToolDefinition> {
        self.snapshot.read().tools.get(name).cloned()
    }

    /// Current snapshot, shared without copying
    pub fn tools(&self) -> Arc<HashMap<String, ToolDefinition>> {
        Arc::clone(&self.snapshot.read().tools)
    }

    /// Replace the whole snapshot; tools absent from `tools` disappear
    pub fn replace(&self, tools: Vec<ToolDefinition>, loaded_at: Instant) {
        let tools: HashMap<String, ToolDefinition> = tools
            .into_iter()
            .map(|tool| (tool.name.clone(), tool))
            .collect();

        let mut snapshot = self.snapshot.write();
        snapshot.tools = Arc::new(tools);
        snapshot.loaded_at = Some(loaded_at);
    }

    pub fn loaded_at(&self) -> Option<Instant> {
        self.snapshot.read().loaded_at
    }

    /// Number of reloads attempted so far
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Acquire)
    }

    /// Count a finished reload, whatever its outcome
    pub fn record_attempt(&self) {
        self.attempts.fetch_add(1, Ordering::AcqRel);
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn refresh_gate(&self) -> &tokio::sync::Mutex<()> {
        &self.refresh_gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use toolwarden_core::NewTool;

    fn tool(name: &str) -> ToolDefinition {
        ToolDefinition::from_new(format!("id-{}", name), NewTool::new(name, ""))
    }

    #[test]
    fn test_staleness_window() {
        let start = Instant::now();
        let at = |secs: u64| start + Duration::from_secs(secs);

        let cache = RegistryCache::new(Duration::from_secs(60));
        assert!(cache.is_stale(at(0)));
        assert!(cache.is_empty());
        assert!(cache.loaded_at().is_none());

        cache.replace(vec![tool("search")], at(0));
        assert_eq!(cache.loaded_at(), Some(at(0)));
        assert!(!cache.is_empty());
        assert!(!cache.is_stale(at(30)));
        assert!(!cache.is_stale(at(60)));
        assert!(cache.is_stale(at(61)));
    }

    #[test]
    fn test_attempts_count_failures_too() {
        let cache = RegistryCache::new(Duration::from_secs(60));
        assert_eq!(cache.attempts(), 0);

        cache.record_attempt();
        assert_eq!(cache.attempts(), 1);
        // A failed attempt does not make the snapshot fresh
        assert!(cache.is_stale(Instant::now()));
    }

    #[test]
    fn test_replace_drops_removed_tools() {
        let start = Instant::now();
        let cache = RegistryCache::new(Duration::from_secs(60));
        cache.replace(vec![tool("search"), tool("weather")], start);
        assert_eq!(cache.len(), 2);

        let before = cache.tools();
        cache.replace(vec![tool("weather")], start + Duration::from_secs(60));

        assert!(cache.get("search").is_none());
        assert!(cache.get("weather").is_some());
        // Earlier readers keep the snapshot they took
        assert!(before.contains_key("search"));
    }
}
