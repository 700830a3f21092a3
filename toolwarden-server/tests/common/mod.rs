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

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use toolwarden_core::{ToolDefinition, ToolUpdate, UserToolPreference};
use toolwarden_server::store::{PolicyStore, SqlitePolicyStore, StoreError};
use toolwarden_server::tool_registry::{ManualClock, ToolAccessRegistry, ToolRegistryConfig};

/// 2025-04-02 15:30:10 local time
pub fn start_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 4, 2)
        .unwrap()
        .and_hms_opt(15, 30, 10)
        .unwrap()
}

/// SQLite store that can be switched off or made to hang
pub struct FlakyStore {
    inner: SqlitePolicyStore,
    down: AtomicBool,
    stalled: AtomicBool,
    writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: SqlitePolicyStore::open_in_memory().unwrap(),
            down: AtomicBool::new(false),
            stalled: AtomicBool::new(false),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &SqlitePolicyStore {
        &self.inner
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// Write calls that reached this store
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), StoreError> {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("store switched off".to_string()));
        }
        Ok(())
    }

    async fn write_gate(&self) -> Result<(), StoreError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.gate().await
    }
}

#[async_trait]
impl PolicyStore for FlakyStore {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, StoreError> {
        self.gate().await?;
        self.inner.list_tools().await
    }

    async fn get_tool_by_name(&self, name: &str) -> Result<Option<ToolDefinition>, StoreError> {
        self.gate().await?;
        self.inner.get_tool_by_name(name).await
    }

    async fn get_preference(
        &self,
        user_id: &str,
        tool_name: &str,
    ) -> Result<Option<bool>, StoreError> {
        self.gate().await?;
        self.inner.get_preference(user_id, tool_name).await
    }

    async fn list_preferences(&self, user_id: &str) -> Result<HashMap<String, bool>, StoreError> {
        self.gate().await?;
        self.inner.list_preferences(user_id).await
    }

    async fn insert_tool(&self, tool: &ToolDefinition) -> Result<(), StoreError> {
        self.write_gate().await?;
        self.inner.insert_tool(tool).await
    }

    async fn update_tool(&self, tool_id: &str, update: &ToolUpdate) -> Result<bool, StoreError> {
        self.write_gate().await?;
        self.inner.update_tool(tool_id, update).await
    }

    async fn upsert_preference(&self, preference: &UserToolPreference) -> Result<(), StoreError> {
        self.write_gate().await?;
        self.inner.upsert_preference(preference).await
    }

    async fn delete_preferences(&self, user_id: &str) -> Result<u64, StoreError> {
        self.write_gate().await?;
        self.inner.delete_preferences(user_id).await
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.close().await
    }
}

pub struct Harness {
    pub registry: Arc<ToolAccessRegistry>,
    pub clock: Arc<ManualClock>,
    pub store: Arc<FlakyStore>,
}

pub fn harness() -> Harness {
    harness_with(ToolRegistryConfig::default())
}

pub fn harness_with(config: ToolRegistryConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let store = Arc::new(FlakyStore::new());
    let registry = Arc::new(ToolAccessRegistry::new(
        store.clone(),
        clock.clone(),
        config,
    ));
    Harness {
        registry,
        clock,
        store,
    }
}
