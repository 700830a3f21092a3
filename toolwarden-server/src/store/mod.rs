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

//! Durable Policy Store
//!
//! The source of truth for tool definitions and per-user preference overrides.
//! The registry only reads from it on cache refresh and preference checks;
//! writes happen through the administrative mutators and preference endpoints.

mod sqlite;

pub use sqlite::SqlitePolicyStore;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use toolwarden_core::{ToolDefinition, ToolUpdate, UserToolPreference};

/// Store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("store task failed: {0}")]
    Task(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("store is closed")]
    Closed,
}

/// Relational-style policy store with two logical tables:
/// tool definitions keyed by name and preferences keyed by (user, tool)
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Select every tool definition
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, StoreError>;

    async fn get_tool_by_name(&self, name: &str) -> Result<Option<ToolDefinition>, StoreError>;

    /// Preference override for one (user, tool) pair, `None` when absent
    async fn get_preference(
        &self,
        user_id: &str,
        tool_name: &str,
    ) -> Result<Option<bool>, StoreError>;

    /// All overrides of one user, keyed by tool name
    async fn list_preferences(&self, user_id: &str) -> Result<HashMap<String, bool>, StoreError>;

    async fn insert_tool(&self, tool: &ToolDefinition) -> Result<(), StoreError>;

    /// Apply the set fields of `update`; returns whether a row was affected
    async fn update_tool(&self, tool_id: &str, update: &ToolUpdate) -> Result<bool, StoreError>;

    /// Insert or update a preference override
    async fn upsert_preference(&self, preference: &UserToolPreference) -> Result<(), StoreError>;

    /// Remove every override of one user; returns rows removed
    async fn delete_preferences(&self, user_id: &str) -> Result<u64, StoreError>;

    /// Release the underlying connection
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
