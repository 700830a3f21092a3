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

//! Tool Definitions
//!
//! A tool is a named external capability the assistant may invoke. Its policy
//! (global enable flag, allowed roles, rate limits) lives in the durable store
//! and is mirrored read-only into the registry cache.

use crate::decision::RatePeriod;
use serde::{Deserialize, Serialize};

/// Role granted to callers that do not supply any
pub const DEFAULT_ROLE: &str = "user";

/// Tool policy as held in the durable store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool identifier (UUID v4)
    pub id: String,
    /// Tool name, the stable lookup key
    pub name: String,
    pub description: String,
    /// Global enable flag
    pub enabled: bool,
    pub requires_auth: bool,
    /// Maximum calls per user per minute bucket
    pub rate_limit_per_minute: u32,
    /// Maximum calls per user per day bucket
    pub rate_limit_per_day: u32,
    /// Roles permitted to call the tool
    pub allowed_roles: Vec<String>,
}

impl ToolDefinition {
    /// Build a stored definition from a registration request
    pub fn from_new(id: impl Into<String>, tool: NewTool) -> Self {
        Self {
            id: id.into(),
            name: tool.name,
            description: tool.description,
            enabled: tool.enabled,
            requires_auth: tool.requires_auth,
            rate_limit_per_minute: tool.rate_limit_per_minute,
            rate_limit_per_day: tool.rate_limit_per_day,
            allowed_roles: tool.allowed_roles,
        }
    }

    /// True when at least one of `roles` is in the allowed set
    pub fn allows_any_role(&self, roles: &[&str]) -> bool {
        roles
            .iter()
            .any(|role| self.allowed_roles.iter().any(|allowed| allowed == role))
    }

    /// Configured limit for a rate period
    pub fn limit_for(&self, period: RatePeriod) -> u32 {
        match period {
            RatePeriod::Minute => self.rate_limit_per_minute,
            RatePeriod::Day => self.rate_limit_per_day,
        }
    }
}

/// Registration request: a tool definition without its identifier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub requires_auth: bool,
    #[serde(default = "default_rate_limit_per_minute")]
    pub rate_limit_per_minute: u32,
    #[serde(default = "default_rate_limit_per_day")]
    pub rate_limit_per_day: u32,
    #[serde(default = "default_allowed_roles")]
    pub allowed_roles: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_rate_limit_per_minute() -> u32 {
    60
}

fn default_rate_limit_per_day() -> u32 {
    1000
}

fn default_allowed_roles() -> Vec<String> {
    vec![DEFAULT_ROLE.to_string()]
}

impl NewTool {
    /// Create an enabled tool open to the default role with default limits
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            enabled: default_enabled(),
            requires_auth: false,
            rate_limit_per_minute: default_rate_limit_per_minute(),
            rate_limit_per_day: default_rate_limit_per_day(),
            allowed_roles: default_allowed_roles(),
        }
    }

    pub fn with_limits(mut self, per_minute: u32, per_day: u32) -> Self {
        self.rate_limit_per_minute = per_minute;
        self.rate_limit_per_day = per_day;
        self
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_requires_auth(mut self, requires_auth: bool) -> Self {
        self.requires_auth = requires_auth;
        self
    }
}

/// Partial update of a stored tool; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_auth: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit_per_day: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_roles: Option<Vec<String>>,
}

impl ToolUpdate {
    /// True when no field is set
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.enabled.is_none()
            && self.requires_auth.is_none()
            && self.rate_limit_per_minute.is_none()
            && self.rate_limit_per_day.is_none()
            && self.allowed_roles.is_none()
    }
}

/// Per-user override of a tool's enable flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserToolPreference {
    pub user_id: String,
    pub tool_name: String,
    pub enabled: bool,
}

/// Rate limits as reported to preference listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolRateLimit {
    pub per_minute: u32,
    pub per_day: u32,
}

/// A tool as seen by one user: global policy merged with their override
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveToolState {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Override if present, otherwise the global flag
    pub is_enabled: bool,
    pub requires_auth: bool,
    pub rate_limit: ToolRateLimit,
    pub allowed_roles: Vec<String>,
    pub user_has_override: bool,
}

impl EffectiveToolState {
    pub fn merge(tool: &ToolDefinition, user_override: Option<bool>) -> Self {
        Self {
            id: tool.id.clone(),
            name: tool.name.clone(),
            description: tool.description.clone(),
            is_enabled: user_override.unwrap_or(tool.enabled),
            requires_auth: tool.requires_auth,
            rate_limit: ToolRateLimit {
                per_minute: tool.rate_limit_per_minute,
                per_day: tool.rate_limit_per_day,
            },
            allowed_roles: tool.allowed_roles.clone(),
            user_has_override: user_override.is_some(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn search_tool() -> ToolDefinition {
        ToolDefinition::from_new(
            "t-1",
            NewTool::new("search", "Web search")
                .with_limits(3, 100)
                .with_roles(["user", "admin"]),
        )
    }

    #[test]
    fn test_role_matching() {
        let tool = search_tool();
        assert!(tool.allows_any_role(&["guest", "admin"]));
        assert!(!tool.allows_any_role(&["guest"]));
        assert!(!tool.allows_any_role(&[]));
    }

    #[test]
    fn test_limit_for_period() {
        let tool = search_tool();
        assert_eq!(tool.limit_for(RatePeriod::Minute), 3);
        assert_eq!(tool.limit_for(RatePeriod::Day), 100);
    }

    #[test]
    fn test_update_is_empty() {
        assert!(ToolUpdate::default().is_empty());

        let update = ToolUpdate {
            allowed_roles: Some(vec![]),
            ..Default::default()
        };
        assert!(!update.is_empty());
    }

    #[test]
    fn test_new_tool_defaults_from_json() {
        let tool: NewTool = serde_json::from_str(r#"{"name":"calc"}"#).unwrap();
        assert!(tool.enabled);
        assert!(!tool.requires_auth);
        assert_eq!(tool.allowed_roles, vec!["user".to_string()]);
    }

    #[test]
    fn test_effective_state_prefers_override() {
        let mut tool = search_tool();
        tool.enabled = false;

        let merged = EffectiveToolState::merge(&tool, Some(true));
        assert!(merged.is_enabled);
        assert!(merged.user_has_override);

        let global = EffectiveToolState::merge(&tool, None);
        assert!(!global.is_enabled);
        assert!(!global.user_has_override);
        assert_eq!(global.rate_limit.per_day, 100);
    }
}
