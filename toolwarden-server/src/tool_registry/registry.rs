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

//! Tool Access Registry - permission resolution and rate limiting
//!
//! Decides for every attempted tool invocation whether the caller may proceed.
//! Policy comes from the [`RegistryCache`], refreshed lazily from the durable
//! store once its validity window has passed; usage comes from the in-process
//! [`UsageCounterStore`].
//!
//! ## Decision order
//!
//! ```text
//! cache lookup ─▶ global flag ─▶ user preference ─▶ role ─▶ minute limit ─▶ day limit
//! ```
//!
//! The first failing check wins. A user preference can only disable a tool:
//! a globally disabled tool is refused before preferences are consulted.
//!
//! Store failures never surface from a permission check. A failed refresh keeps
//! serving the last-known snapshot; a failed preference read counts as "no
//! preference". Administrative writes propagate their errors.

use super::cache::RegistryCache;
use super::clock::Clock;
use super::usage::{SweepStats, UsageCounterStore};
use crate::store::{PolicyStore, StoreError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use toolwarden_core::{
    Decision, Denial, EffectiveToolState, LimitCheck, NewTool, RatePeriod, ToolDefinition,
    ToolUpdate, UserToolPreference,
};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Registry errors
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Tool not found in registry: {name}")]
    ToolNotFound { name: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },
}

/// Registry configuration
#[derive(Debug, Clone)]
pub struct ToolRegistryConfig {
    /// How long a cache snapshot is served before the next lookup reloads it
    pub cache_validity: Duration,
    /// Upper bound on any single policy store call
    pub store_timeout: Duration,
    /// Janitor sweep period
    pub janitor_interval: Duration,
    /// Age after which minute buckets are evicted
    pub minute_retention: Duration,
}

impl Default for ToolRegistryConfig {
    fn default() -> Self {
        Self {
            cache_validity: Duration::from_secs(60),
            store_timeout: Duration::from_secs(5),
            janitor_interval: Duration::from_secs(60),
            minute_retention: Duration::from_secs(600),
        }
    }
}

pub struct ToolAccessRegistry {
    store: Arc<dyn PolicyStore>,
    cache: RegistryCache,
    usage: Arc<UsageCounterStore>,
    clock: Arc<dyn Clock>,
    config: ToolRegistryConfig,
}

impl ToolAccessRegistry {
    /// Create a registry with an empty cache; the first lookup loads it
    pub fn new(
        store: Arc<dyn PolicyStore>,
        clock: Arc<dyn Clock>,
        config: ToolRegistryConfig,
    ) -> Self {
        Self {
            store,
            cache: RegistryCache::new(config.cache_validity),
            usage: Arc::new(UsageCounterStore::new()),
            clock,
            config,
        }
    }

    pub fn config(&self) -> &ToolRegistryConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn usage(&self) -> &Arc<UsageCounterStore> {
        &self.usage
    }

    /// Number of tools in the current snapshot, without triggering a refresh
    pub fn cached_tool_count(&self) -> usize {
        self.cache.len()
    }

    /// Look up a tool, reloading the cache first if it has gone stale
    pub async fn get_tool(&self, name: &str) -> Option<ToolDefinition> {
        self.ensure_fresh().await;
        self.cache.get(name)
    }

    /// Every cached tool, sorted by name
    pub async fn list_tools(&self) -> Vec<ToolDefinition> {
        self.ensure_fresh().await;
        let mut tools: Vec<ToolDefinition> = self.cache.tools().values().cloned().collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Check if a user may call a tool, with the reason for the outcome
    pub async fn can_use_with_reason(
        &self,
        tool_name: &str,
        user_id: &str,
        roles: &[&str],
    ) -> Decision {
        let decision = self.resolve(tool_name, user_id, roles).await;
        if !decision.allowed {
            debug!(
                tool = tool_name,
                user = user_id,
                "Tool access denied: {}",
                decision.reason
            );
        }
        decision
    }

    /// Check if a user may call a tool (simplified version)
    pub async fn can_use(&self, tool_name: &str, user_id: &str, roles: &[&str]) -> bool {
        self.can_use_with_reason(tool_name, user_id, roles)
            .await
            .allowed
    }

    async fn resolve(&self, tool_name: &str, user_id: &str, roles: &[&str]) -> Decision {
        let Some(tool) = self.get_tool(tool_name).await else {
            return Decision::denied(Denial::NotFound);
        };

        if !tool.enabled {
            return Decision::denied(Denial::DisabledGlobally);
        }

        if self.user_preference(user_id, tool_name).await == Some(false) {
            return Decision::denied(Denial::DisabledByPreference);
        }

        if !tool.allows_any_role(roles) {
            return Decision::denied(Denial::MissingRole);
        }

        let now = self.clock.now();
        for period in [RatePeriod::Minute, RatePeriod::Day] {
            if let Some(denial) = self.evaluate_limit(&tool, user_id, period, now).denial() {
                return Decision::denied(denial);
            }
        }

        Decision::granted()
    }

    /// Compare the current bucket for `period` against the tool's limit
    pub async fn check_limit(
        &self,
        user_id: &str,
        tool_name: &str,
        period: RatePeriod,
    ) -> LimitCheck {
        match self.get_tool(tool_name).await {
            Some(tool) => self.evaluate_limit(&tool, user_id, period, self.clock.now()),
            None => LimitCheck::unknown_tool(period),
        }
    }

    fn evaluate_limit(
        &self,
        tool: &ToolDefinition,
        user_id: &str,
        period: RatePeriod,
        now: chrono::NaiveDateTime,
    ) -> LimitCheck {
        let count = self.usage.current_count(user_id, &tool.name, period, now);
        LimitCheck::evaluate(period, count, tool.limit_for(period))
    }

    /// Count one call against the current minute and day buckets.
    ///
    /// Not gated: callers check first, then record after the call succeeds.
    pub fn record_usage(&self, user_id: &str, tool_name: &str) {
        let (minute, day) = self.usage.record(user_id, tool_name, self.clock.now());
        trace!(
            tool = tool_name,
            user = user_id,
            "Recorded tool usage: {} this minute, {} today",
            minute,
            day
        );
    }

    /// Run one janitor pass immediately
    pub fn sweep_usage(&self) -> SweepStats {
        self.usage
            .sweep(self.clock.now(), self.config.minute_retention)
    }

    /// Reload the whole cache from the store regardless of staleness
    pub async fn refresh_cache(&self) -> Result<usize, StoreError> {
        let _gate = self.cache.refresh_gate().lock().await;
        self.reload().await
    }

    async fn ensure_fresh(&self) {
        if !self.cache.is_stale(self.clock.monotonic()) {
            return;
        }

        let seen = self.cache.attempts();
        let _gate = self.cache.refresh_gate().lock().await;
        // A reload finished while we waited; serve whatever it left behind
        if self.cache.attempts() != seen || !self.cache.is_stale(self.clock.monotonic()) {
            return;
        }

        if let Err(e) = self.reload().await {
            warn!(
                "Error refreshing tool registry cache, serving {} cached tools: {}",
                self.cache.len(),
                e
            );
        }
    }

    /// Callers must hold the refresh gate
    async fn reload(&self) -> Result<usize, StoreError> {
        let loaded = self.with_timeout(self.store.list_tools()).await;
        self.cache.record_attempt();

        let tools = loaded?;
        let count = tools.len();
        self.cache.replace(tools, self.clock.monotonic());
        debug!("Tool registry cache refreshed with {} tools", count);
        Ok(count)
    }

    async fn force_refresh(&self) {
        if let Err(e) = self.refresh_cache().await {
            warn!("Error refreshing tool registry cache after write: {}", e);
        }
    }

    async fn with_timeout<T, F>(&self, call: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let limit = self.config.store_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or_else(|_| Err(StoreError::Timeout(limit)))
    }

    async fn user_preference(&self, user_id: &str, tool_name: &str) -> Option<bool> {
        match self
            .with_timeout(self.store.get_preference(user_id, tool_name))
            .await
        {
            Ok(preference) => preference,
            Err(e) => {
                warn!(
                    "Error getting tool preference of user {} for {}: {}",
                    user_id, tool_name, e
                );
                None
            }
        }
    }

    /// Register a new tool in the store and refresh the cache before returning
    pub async fn register_tool(&self, tool: NewTool) -> Result<String, RegistryError> {
        require_non_empty("tool name", &tool.name)?;

        let tool_id = Uuid::new_v4().to_string();
        let definition = ToolDefinition::from_new(tool_id.clone(), tool);

        self.with_timeout(self.store.insert_tool(&definition))
            .await
            .map_err(|e| {
                error!("Error registering tool {}: {}", definition.name, e);
                e
            })?;
        info!("Registered tool {} ({})", definition.name, tool_id);

        self.force_refresh().await;
        Ok(tool_id)
    }

    /// Update the set fields of an existing tool.
    ///
    /// Returns whether a row changed; the cache is refreshed only then. An
    /// empty update is a no-op that never reaches the store.
    pub async fn update_tool(
        &self,
        tool_id: &str,
        update: &ToolUpdate,
    ) -> Result<bool, RegistryError> {
        if update.is_empty() {
            return Ok(false);
        }

        let updated = self
            .with_timeout(self.store.update_tool(tool_id, update))
            .await
            .map_err(|e| {
                error!("Error updating tool {}: {}", tool_id, e);
                e
            })?;
        if updated {
            info!("Updated tool {}", tool_id);
            self.force_refresh().await;
        }

        Ok(updated)
    }

    /// All tools with the user's overrides applied, read straight from the store
    pub async fn effective_tools(
        &self,
        user_id: &str,
    ) -> Result<Vec<EffectiveToolState>, RegistryError> {
        require_non_empty("user id", user_id)?;

        let tools = self.with_timeout(self.store.list_tools()).await?;
        let overrides = self
            .with_timeout(self.store.list_preferences(user_id))
            .await?;

        Ok(tools
            .iter()
            .map(|tool| EffectiveToolState::merge(tool, overrides.get(&tool.name).copied()))
            .collect())
    }

    /// Store a per-user override for an existing tool
    pub async fn set_preference(
        &self,
        user_id: &str,
        tool_name: &str,
        enabled: bool,
    ) -> Result<(), RegistryError> {
        require_non_empty("user id", user_id)?;
        require_non_empty("tool name", tool_name)?;

        if self
            .with_timeout(self.store.get_tool_by_name(tool_name))
            .await?
            .is_none()
        {
            return Err(RegistryError::ToolNotFound {
                name: tool_name.to_string(),
            });
        }

        let preference = UserToolPreference {
            user_id: user_id.to_string(),
            tool_name: tool_name.to_string(),
            enabled,
        };
        self.with_timeout(self.store.upsert_preference(&preference))
            .await?;

        info!(
            "Tool {} {} for user {}",
            tool_name,
            if enabled { "enabled" } else { "disabled" },
            user_id
        );
        Ok(())
    }

    /// Remove every override of a user; returns how many were removed
    pub async fn reset_preferences(&self, user_id: &str) -> Result<u64, RegistryError> {
        require_non_empty("user id", user_id)?;

        let removed = self
            .with_timeout(self.store.delete_preferences(user_id))
            .await?;
        info!("Reset {} tool preferences for user {}", removed, user_id);
        Ok(removed)
    }

    /// Whether a tool is enabled for a user: their override if present,
    /// otherwise the global flag, otherwise `false`.
    ///
    /// Unlike [`can_use`](Self::can_use) an override of `true` wins over a
    /// global disable here. Store errors read as disabled.
    pub async fn is_tool_enabled(&self, user_id: &str, tool_name: &str) -> bool {
        match self
            .with_timeout(self.store.get_preference(user_id, tool_name))
            .await
        {
            Ok(Some(enabled)) => return enabled,
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Error checking if tool {} is enabled for user {}: {}",
                    tool_name, user_id, e
                );
                return false;
            }
        }

        match self
            .with_timeout(self.store.get_tool_by_name(tool_name))
            .await
        {
            Ok(tool) => tool.map(|tool| tool.enabled).unwrap_or(false),
            Err(e) => {
                warn!(
                    "Error checking if tool {} is enabled for user {}: {}",
                    tool_name, user_id, e
                );
                false
            }
        }
    }

    /// Release the store connection
    pub async fn close(&self) -> Result<(), StoreError> {
        self.store.close().await
    }
}

fn require_non_empty(field: &str, value: &str) -> Result<(), RegistryError> {
    if value.trim().is_empty() {
        return Err(RegistryError::InvalidInput {
            reason: format!("{} is required", field),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqlitePolicyStore;
    use crate::tool_registry::clock::ManualClock;
    use chrono::NaiveDate;

    fn make_registry() -> (ToolAccessRegistry, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            NaiveDate::from_ymd_opt(2025, 4, 2)
                .unwrap()
                .and_hms_opt(15, 30, 0)
                .unwrap(),
        ));
        let store = Arc::new(SqlitePolicyStore::open_in_memory().unwrap());
        let registry = ToolAccessRegistry::new(store, clock.clone(), ToolRegistryConfig::default());
        (registry, clock)
    }

    #[tokio::test]
    async fn test_unknown_tool_is_denied() {
        let (registry, _) = make_registry();

        let decision = registry.can_use_with_reason("nope", "u1", &["user"]).await;
        assert_eq!(decision.denial, Some(Denial::NotFound));
        assert_eq!(decision.reason, "Tool not found in registry");

        let check = registry.check_limit("u1", "nope", RatePeriod::Minute).await;
        assert!(!check.allowed);
        assert_eq!(check.reason, "Tool not found");
    }

    #[tokio::test]
    async fn test_decision_order() {
        let (registry, _) = make_registry();
        registry
            .register_tool(NewTool::new("search", "").with_roles(["user"]))
            .await
            .unwrap();

        assert_eq!(
            registry.can_use_with_reason("search", "u1", &["user"]).await,
            Decision::granted()
        );
        assert_eq!(
            registry
                .can_use_with_reason("search", "u1", &["guest"])
                .await
                .denial,
            Some(Denial::MissingRole)
        );
        assert!(!registry.can_use("search", "u1", &[]).await);

        // Preference is consulted before roles
        registry.set_preference("u1", "search", false).await.unwrap();
        assert_eq!(
            registry
                .can_use_with_reason("search", "u1", &["guest"])
                .await
                .denial,
            Some(Denial::DisabledByPreference)
        );
    }

    #[tokio::test]
    async fn test_zero_limit_refuses_every_call() {
        let (registry, _) = make_registry();
        registry
            .register_tool(NewTool::new("frozen", "").with_limits(0, 10))
            .await
            .unwrap();

        let decision = registry.can_use_with_reason("frozen", "u1", &["user"]).await;
        assert_eq!(decision.reason, "Rate limit exceeded: 0/0 calls per minute");
    }

    #[tokio::test]
    async fn test_register_requires_name() {
        let (registry, _) = make_registry();
        let err = registry
            .register_tool(NewTool::new("  ", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_cache_refreshes_after_validity_window() {
        let (registry, clock) = make_registry();
        let id = registry
            .register_tool(NewTool::new("search", ""))
            .await
            .unwrap();

        // Write behind the registry's back
        registry
            .store
            .update_tool(
                &id,
                &ToolUpdate {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        clock.advance(chrono::Duration::seconds(30));
        assert!(registry.get_tool("search").await.unwrap().enabled);

        clock.advance(chrono::Duration::seconds(31));
        assert!(!registry.get_tool("search").await.unwrap().enabled);
    }
}
