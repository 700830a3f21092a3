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

//! HTTP API over the tool access registry

pub mod health;
pub mod preferences;
pub mod tools;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::store::StoreError;
use crate::tool_registry::{RegistryError, ToolAccessRegistry};

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ToolAccessRegistry>,
    /// Roles assumed when a check request carries none
    pub default_roles: Arc<Vec<String>>,
}

impl AppState {
    pub fn new(registry: Arc<ToolAccessRegistry>, default_roles: Vec<String>) -> Self {
        Self {
            registry,
            default_roles: Arc::new(default_roles),
        }
    }
}

/// API error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Request timeout: {0}")]
    RequestTimeout(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
            ApiError::RequestTimeout(msg) => (StatusCode::REQUEST_TIMEOUT, msg),
        };

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ToolNotFound { name } => {
                ApiError::NotFound(format!("Tool '{}' not found", name))
            }
            RegistryError::InvalidInput { reason } => ApiError::BadRequest(reason),
            RegistryError::Store(StoreError::Timeout(limit)) => {
                ApiError::RequestTimeout(format!("Policy store did not answer within {:?}", limit))
            }
            RegistryError::Store(e) => {
                tracing::error!("Policy store error: {}", e);
                ApiError::Internal(e.to_string())
            }
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/api/v1/users/:user_id/tools",
            get(preferences::list_user_tools)
                .put(preferences::set_user_tool)
                .delete(preferences::reset_user_tools),
        )
        .route(
            "/api/v1/tools",
            get(tools::list_tools).post(tools::register_tool),
        )
        // `:tool` is the id for PATCH and the name for the nested routes
        .route("/api/v1/tools/:tool", patch(tools::update_tool))
        .route("/api/v1/tools/:tool/check", post(tools::check_tool))
        .route("/api/v1/tools/:tool/usage", post(tools::record_tool_usage))
        .with_state(state)
}
