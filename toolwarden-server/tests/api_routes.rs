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
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use toolwarden_server::api::{router, AppState};
use toolwarden_server::store::SqlitePolicyStore;
use toolwarden_server::tool_registry::{ManualClock, ToolAccessRegistry, ToolRegistryConfig};
use tower::ServiceExt;

fn app() -> Router {
    let store = Arc::new(SqlitePolicyStore::open_in_memory().unwrap());
    let registry = Arc::new(ToolAccessRegistry::new(
        store,
        Arc::new(ManualClock::new(
            chrono::NaiveDate::from_ymd_opt(2025, 4, 2)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
        )),
        ToolRegistryConfig::default(),
    ));
    router(AppState::new(registry, vec!["user".to_string()]))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn register(app: &Router, body: Value) -> String {
    let (status, value) = send(app, "POST", "/api/v1/tools", Some(body)).await;
    assert_eq!(status, StatusCode::CREATED);
    value["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_health() {
    let app = app();
    let (status, value) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["status"], "healthy");
}

#[tokio::test]
async fn test_register_check_and_record() {
    let app = app();
    register(
        &app,
        json!({ "name": "search", "description": "Web search", "rate_limit_per_minute": 1 }),
    )
    .await;

    let (status, value) = send(
        &app,
        "POST",
        "/api/v1/tools/search/check",
        Some(json!({ "user_id": "u1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["allowed"], true);
    assert_eq!(value["reason"], "Access granted");

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/tools/search/usage",
        Some(json!({ "user_id": "u1" })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, value) = send(
        &app,
        "POST",
        "/api/v1/tools/search/check",
        Some(json!({ "user_id": "u1" })),
    )
    .await;
    assert_eq!(value["allowed"], false);
    assert_eq!(value["denial"]["kind"], "rate_limited");
}

#[tokio::test]
async fn test_check_uses_explicit_roles_and_reports_unknown_tools() {
    let app = app();
    register(&app, json!({ "name": "deploy", "allowed_roles": ["admin"] })).await;

    let (_, value) = send(
        &app,
        "POST",
        "/api/v1/tools/deploy/check",
        Some(json!({ "user_id": "u1" })),
    )
    .await;
    assert_eq!(value["reason"], "User does not have required role");

    let (_, value) = send(
        &app,
        "POST",
        "/api/v1/tools/deploy/check",
        Some(json!({ "user_id": "u1", "roles": ["admin"] })),
    )
    .await;
    assert_eq!(value["allowed"], true);

    let (status, value) = send(
        &app,
        "POST",
        "/api/v1/tools/ghost/check",
        Some(json!({ "user_id": "u1" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["reason"], "Tool not found in registry");

    let (status, value) = send(
        &app,
        "POST",
        "/api/v1/tools/deploy/check",
        Some(json!({ "user_id": "" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(value["error"].is_string());
}

#[tokio::test]
async fn test_update_tool() {
    let app = app();
    let id = register(&app, json!({ "name": "search" })).await;

    let uri = format!("/api/v1/tools/{}", id);
    let (status, value) = send(&app, "PATCH", &uri, Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["updated"], false);

    let (_, value) = send(&app, "PATCH", &uri, Some(json!({ "enabled": false }))).await;
    assert_eq!(value["updated"], true);

    let (_, value) = send(
        &app,
        "POST",
        "/api/v1/tools/search/check",
        Some(json!({ "user_id": "u1" })),
    )
    .await;
    assert_eq!(value["reason"], "Tool is disabled globally");

    let (_, value) = send(&app, "GET", "/api/v1/tools", None).await;
    assert_eq!(value["total"], 1);
    assert_eq!(value["tools"][0]["enabled"], false);
}

#[tokio::test]
async fn test_user_preference_routes() {
    let app = app();
    register(&app, json!({ "name": "search" })).await;
    register(&app, json!({ "name": "browse" })).await;

    let (status, _) = send(
        &app,
        "PUT",
        "/api/v1/users/u1/tools",
        Some(json!({ "tool_name": "ghost", "is_enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, value) = send(
        &app,
        "PUT",
        "/api/v1/users/u1/tools",
        Some(json!({ "tool_name": "search", "is_enabled": false })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["is_enabled"], false);

    let (_, value) = send(
        &app,
        "POST",
        "/api/v1/tools/search/check",
        Some(json!({ "user_id": "u1" })),
    )
    .await;
    assert_eq!(value["reason"], "Tool is disabled by user preference");

    let (status, value) = send(&app, "GET", "/api/v1/users/u1/tools", None).await;
    assert_eq!(status, StatusCode::OK);
    let tools = value["tools"].as_array().unwrap();
    assert_eq!(tools.len(), 2);
    let search = tools.iter().find(|tool| tool["name"] == "search").unwrap();
    assert_eq!(search["is_enabled"], false);
    assert_eq!(search["user_has_override"], true);

    let (status, value) = send(&app, "DELETE", "/api/v1/users/u1/tools", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(value["removed"], 1);

    let (_, value) = send(
        &app,
        "POST",
        "/api/v1/tools/search/check",
        Some(json!({ "user_id": "u1" })),
    )
    .await;
    assert_eq!(value["allowed"], true);
}
