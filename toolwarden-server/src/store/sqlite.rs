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

//! SQLite policy store
//!
//! A single connection guarded by a mutex; every statement runs on the
//! blocking pool so async callers never stall a runtime worker.

use super::{PolicyStore, StoreError};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use toolwarden_core::{ToolDefinition, ToolUpdate, UserToolPreference};
use tracing::{debug, info};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tool_registry (
    tool_id               TEXT PRIMARY KEY,
    tool_name             TEXT NOT NULL UNIQUE,
    description           TEXT NOT NULL DEFAULT '',
    is_enabled            INTEGER NOT NULL DEFAULT 1,
    requires_auth         INTEGER NOT NULL DEFAULT 0,
    rate_limit_per_minute INTEGER NOT NULL DEFAULT 60,
    rate_limit_per_day    INTEGER NOT NULL DEFAULT 1000,
    allowed_roles         TEXT NOT NULL DEFAULT '["user"]',
    created_at            TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at            TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
);

CREATE TABLE IF NOT EXISTS user_tool_prefs (
    user_id    TEXT NOT NULL,
    tool_name  TEXT NOT NULL,
    is_enabled INTEGER NOT NULL,
    updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
    PRIMARY KEY (user_id, tool_name)
);
"#;

const TOOL_COLUMNS: &str = "tool_id, tool_name, description, is_enabled, requires_auth, \
     rate_limit_per_minute, rate_limit_per_day, allowed_roles";

/// Policy store backed by a SQLite database file
pub struct SqlitePolicyStore {
    /// `None` once closed
    conn: Arc<Mutex<Option<Connection>>>,
}

impl SqlitePolicyStore {
    /// Open (or create) a database file and ensure the schema exists
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("cannot create {:?}: {}", parent, e))
                })?;
            }
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(busy_timeout)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "wal", |row| row.get(0))?;
        Self::initialize(&conn)?;

        info!("Opened policy store at {:?} (journal_mode={})", path, mode);
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    /// Private in-memory database, used by tests and one-shot tooling
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(Some(conn))),
        })
    }

    fn initialize(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, op: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock();
            let conn = guard.as_ref().ok_or(StoreError::Closed)?;
            op(conn)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

fn row_to_tool(row: &Row<'_>) -> rusqlite::Result<ToolDefinition> {
    let roles: String = row.get(7)?;
    let allowed_roles: Vec<String> = serde_json::from_str(&roles)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?;

    Ok(ToolDefinition {
        id: row.get(0)?,
        name: row.get(1)?,
        description: row.get(2)?,
        enabled: row.get(3)?,
        requires_auth: row.get(4)?,
        rate_limit_per_minute: row.get(5)?,
        rate_limit_per_day: row.get(6)?,
        allowed_roles,
    })
}

#[async_trait]
impl PolicyStore for SqlitePolicyStore {
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>, StoreError> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM tool_registry ORDER BY tool_name",
                TOOL_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let tools = stmt
                .query_map([], row_to_tool)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(tools)
        })
        .await
    }

    async fn get_tool_by_name(&self, name: &str) -> Result<Option<ToolDefinition>, StoreError> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let sql = format!(
                "SELECT {} FROM tool_registry WHERE tool_name = ?1",
                TOOL_COLUMNS
            );
            Ok(conn.query_row(&sql, params![name], row_to_tool).optional()?)
        })
        .await
    }

    async fn get_preference(
        &self,
        user_id: &str,
        tool_name: &str,
    ) -> Result<Option<bool>, StoreError> {
        let user_id = user_id.to_string();
        let tool_name = tool_name.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    "SELECT is_enabled FROM user_tool_prefs WHERE user_id = ?1 AND tool_name = ?2",
                    params![user_id, tool_name],
                    |row| row.get(0),
                )
                .optional()?)
        })
        .await
    }

    async fn list_preferences(&self, user_id: &str) -> Result<HashMap<String, bool>, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT tool_name, is_enabled FROM user_tool_prefs WHERE user_id = ?1")?;
            let prefs = stmt
                .query_map(params![user_id], |row| Ok((row.get(0)?, row.get(1)?)))?
                .collect::<Result<HashMap<String, bool>, _>>()?;
            Ok(prefs)
        })
        .await
    }

    async fn insert_tool(&self, tool: &ToolDefinition) -> Result<(), StoreError> {
        let roles = serde_json::to_string(&tool.allowed_roles)?;
        let tool = tool.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO tool_registry (
                    tool_id, tool_name, description, is_enabled,
                    requires_auth, rate_limit_per_minute, rate_limit_per_day, allowed_roles
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    tool.id,
                    tool.name,
                    tool.description,
                    tool.enabled,
                    tool.requires_auth,
                    tool.rate_limit_per_minute,
                    tool.rate_limit_per_day,
                    roles,
                ],
            )?;
            debug!("Inserted tool {} ({})", tool.name, tool.id);
            Ok(())
        })
        .await
    }

    async fn update_tool(&self, tool_id: &str, update: &ToolUpdate) -> Result<bool, StoreError> {
        if update.is_empty() {
            return Ok(false);
        }

        // Roles are stored as an opaque JSON blob
        let roles = update
            .allowed_roles
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let update = update.clone();
        let tool_id = tool_id.to_string();

        self.with_conn(move |conn| {
            let mut assignments: Vec<String> = Vec::new();
            let mut values: Vec<Box<dyn ToSql>> = vec![Box::new(tool_id)];
            let mut set = |column: &str, value: Box<dyn ToSql>| {
                values.push(value);
                assignments.push(format!("{} = ?{}", column, values.len()));
            };

            if let Some(name) = update.name {
                set("tool_name", Box::new(name));
            }
            if let Some(description) = update.description {
                set("description", Box::new(description));
            }
            if let Some(enabled) = update.enabled {
                set("is_enabled", Box::new(enabled));
            }
            if let Some(requires_auth) = update.requires_auth {
                set("requires_auth", Box::new(requires_auth));
            }
            if let Some(per_minute) = update.rate_limit_per_minute {
                set("rate_limit_per_minute", Box::new(per_minute));
            }
            if let Some(per_day) = update.rate_limit_per_day {
                set("rate_limit_per_day", Box::new(per_day));
            }
            if let Some(roles) = roles {
                set("allowed_roles", Box::new(roles));
            }
            assignments.push("updated_at = CURRENT_TIMESTAMP".to_string());

            let sql = format!(
                "UPDATE tool_registry SET {} WHERE tool_id = ?1",
                assignments.join(", ")
            );
            let affected = conn.execute(&sql, params_from_iter(values.iter()))?;
            Ok(affected > 0)
        })
        .await
    }

    async fn upsert_preference(&self, preference: &UserToolPreference) -> Result<(), StoreError> {
        let preference = preference.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO user_tool_prefs (user_id, tool_name, is_enabled)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (user_id, tool_name)
                 DO UPDATE SET is_enabled = excluded.is_enabled, updated_at = CURRENT_TIMESTAMP",
                params![preference.user_id, preference.tool_name, preference.enabled],
            )?;
            Ok(())
        })
        .await
    }

    async fn delete_preferences(&self, user_id: &str) -> Result<u64, StoreError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM user_tool_prefs WHERE user_id = ?1",
                params![user_id],
            )?;
            Ok(removed as u64)
        })
        .await
    }

    async fn close(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            debug!("Policy store closed");
        }
        Ok(())
    }
}
