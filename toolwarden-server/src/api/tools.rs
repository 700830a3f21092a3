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

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use toolwarden_core::{NewTool, ToolDefinition, ToolUpdate};
use tracing::debug;

use crate::api::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct ToolListResponse {
    pub tools: Vec<ToolDefinition>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct RegisterToolResponse {
    pub id: String,
}

#[derive(Debug, Serialize)]
pub struct UpdateToolResponse {
    pub updated: bool,
}

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub user_id: String,
    /// Falls back to the configured default roles
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    pub user_id: String,
}

/// GET /api/v1/tools - Cached tool definitions
pub async fn list_tools(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let tools = state.registry.list_tools().await;
    let total = tools.len();
    Ok(Json(ToolListResponse { tools, total }))
}

/// POST /api/v1/tools
pub async fn register_tool(
    State(state): State<AppState>,
    Json(tool): Json<NewTool>,
) -> Result<impl IntoResponse, ApiError> {
    let id = state.registry.register_tool(tool).await?;
    Ok((StatusCode::CREATED, Json(RegisterToolResponse { id })))
}

/// PATCH /api/v1/tools/:tool_id
pub async fn update_tool(
    State(state): State<AppState>,
    Path(tool_id): Path<String>,
    Json(update): Json<ToolUpdate>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = state.registry.update_tool(&tool_id, &update).await?;
    Ok(Json(UpdateToolResponse { updated }))
}

/// POST /api/v1/tools/:tool_name/check
pub async fn check_tool(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Json(req): Json<CheckRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_user(&req.user_id)?;

    let roles: Vec<&str> = match &req.roles {
        Some(roles) => roles.iter().map(String::as_str).collect(),
        None => state.default_roles.iter().map(String::as_str).collect(),
    };

    let decision = state
        .registry
        .can_use_with_reason(&tool_name, &req.user_id, &roles)
        .await;
    debug!(
        "Access check for {} by {}: {}",
        tool_name, req.user_id, decision.reason
    );

    Ok(Json(decision))
}

/// POST /api/v1/tools/:tool_name/usage
pub async fn record_tool_usage(
    State(state): State<AppState>,
    Path(tool_name): Path<String>,
    Json(req): Json<UsageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    require_user(&req.user_id)?;

    state.registry.record_usage(&req.user_id, &tool_name);
    Ok(StatusCode::NO_CONTENT)
}

fn require_user(user_id: &str) -> Result<(), ApiError> {
    if user_id.trim().is_empty() {
        return Err(ApiError::BadRequest("user_id is required".to_string()));
    }
    Ok(())
}
