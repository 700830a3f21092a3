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

//! Registry service lifecycle: `init → serve → shutdown`

use super::clock::{Clock, SystemClock};
use super::janitor::JanitorHandle;
use super::registry::{ToolAccessRegistry, ToolRegistryConfig};
use crate::config::ServerConfig;
use crate::store::{PolicyStore, SqlitePolicyStore};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

/// Owns the registry and its background janitor
pub struct RegistryService {
    registry: Arc<ToolAccessRegistry>,
    janitor: JanitorHandle,
}

impl RegistryService {
    /// Open the SQLite store from `config`, load the cache and start the janitor
    pub async fn init(config: &ServerConfig) -> Result<Self> {
        let path = config.store.database_path.clone();
        let busy_timeout = config.store.busy_timeout();
        let store = tokio::task::spawn_blocking(move || SqlitePolicyStore::open(&path, busy_timeout))
            .await
            .context("policy store open task failed")?
            .with_context(|| {
                format!(
                    "Failed to open policy store at {:?}",
                    config.store.database_path
                )
            })?;

        Ok(Self::with_store(
            Arc::new(store),
            Arc::new(SystemClock),
            config.registry_config(),
        )
        .await)
    }

    /// Build a service over any store and clock
    pub async fn with_store(
        store: Arc<dyn PolicyStore>,
        clock: Arc<dyn Clock>,
        config: ToolRegistryConfig,
    ) -> Self {
        let registry = Arc::new(ToolAccessRegistry::new(store, clock, config));

        match registry.refresh_cache().await {
            Ok(count) => info!("Tool registry loaded with {} tools", count),
            Err(e) => warn!("Initial tool registry load failed, starting empty: {}", e),
        }

        let janitor = JanitorHandle::spawn(
            Arc::clone(registry.usage()),
            Arc::clone(registry.clock()),
            registry.config().janitor_interval,
            registry.config().minute_retention,
        );

        Self { registry, janitor }
    }

    pub fn registry(&self) -> Arc<ToolAccessRegistry> {
        Arc::clone(&self.registry)
    }

    /// Stop the janitor, then close the store
    pub async fn shutdown(self) -> Result<()> {
        self.janitor.shutdown().await;
        self.registry
            .close()
            .await
            .context("Failed to close policy store")?;
        info!("Tool registry shut down");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use toolwarden_core::NewTool;

    #[tokio::test]
    async fn test_init_opens_store_and_shutdown_closes_it() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = ServerConfig::default();
        config.store.database_path = dir.path().join("data").join("policy.db");

        let service = RegistryService::init(&config).await.unwrap();
        let registry = service.registry();
        registry
            .register_tool(NewTool::new("search", "Web search"))
            .await
            .unwrap();
        assert!(registry.can_use("search", "u1", &["user"]).await);

        service.shutdown().await.unwrap();

        let err = registry.effective_tools("u1").await.unwrap_err();
        assert!(matches!(
            err,
            crate::tool_registry::RegistryError::Store(StoreError::Closed)
        ));

        // Definitions survive a restart
        let service = RegistryService::init(&config).await.unwrap();
        assert!(service.registry().get_tool("search").await.is_some());
        service.shutdown().await.unwrap();
    }
}
