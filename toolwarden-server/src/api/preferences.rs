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

//! Per-user tool preferences
//!
//! Reads here go straight to the policy store, so a preference change is
//! visible immediately to both these endpoints and permission checks.

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use toolwarden_core::EffectiveToolState;

use crate::api::{ApiError, AppState};

#[derive(Debug, Serialize)]
pub struct UserToolsResponse {
    pub user_id: String,
    pub tools: Vec<EffectiveToolState>,
}

#[derive(Debug, Deserialize)]
pub struct SetPreferenceRequest {
    pub tool_name: String,
    pub is_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct SetPreferenceResponse {
    pub user_id: String,
    pub tool_name: String,
    pub is_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct ResetPreferencesResponse {
    pub user_id: String,
    pub removed: u64,
}

/// GET /api/v1/users/:user_id/tools
pub async fn list_user_tools(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let tools = state.registry.effective_tools(&user_id).await?;
    Ok(Json(UserToolsResponse { user_id, tools }))
}

/// PUT /api/v1/users/:user_id/tools
pub async fn set_user_tool(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(req): Json<SetPreferenceRequest>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .registry
        .set_preference(&user_id, &req.tool_name, req.is_enabled)
        .await?;

    Ok(Json(SetPreferenceResponse {
        user_id,
        tool_name: req.tool_name,
        is_enabled: req.is_enabled,
    }))
}

/// DELETE /api/v1/users/:user_id/tools
pub async fn reset_user_tools(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let removed = state.registry.reset_preferences(&user_id).await?;
    Ok(Json(ResetPreferencesResponse { user_id, removed }))
}
