//! API route handlers for the gateway.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use flowcast_core::error::FlowcastError;
use flowcast_core::types::{WorkflowDraft, WorkflowPatch};
use flowcast_engine::HealthReport;

use crate::error::ApiResult;
use crate::server::AppState;

/// Optional JSON request body, `null` when empty.
fn body_data(body: &Bytes) -> ApiResult<Value> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body).map_err(FlowcastError::from)?)
}

/// Typed JSON request body. An empty body reads as `{}`; well-formed JSON of
/// the wrong shape is a validation error rather than a 422.
fn parse_body<T: DeserializeOwned>(body: &Bytes) -> ApiResult<T> {
    let raw: &[u8] = if body.iter().all(|b| b.is_ascii_whitespace()) { b"{}" } else { body };
    serde_json::from_slice(raw).map_err(|e| {
        if e.is_data() {
            FlowcastError::validation(format!("invalid request body: {e}")).into()
        } else {
            FlowcastError::from(e).into()
        }
    })
}

/// Liveness plus queue state.
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthReport>> {
    Ok(Json(state.orchestrator.health()?))
}

// ── Workflows ─────────────────────────────────────────────

pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<Response> {
    let draft: WorkflowDraft = parse_body(&body)?;
    let workflow = state.orchestrator.create_workflow(draft).await?;
    Ok((StatusCode::CREATED, Json(workflow)).into_response())
}

pub async fn list_workflows(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let workflows = state.orchestrator.list_workflows()?;
    Ok(Json(json!({
        "count": workflows.len(),
        "workflows": workflows,
    })))
}

pub async fn get_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    Ok(Json(state.orchestrator.get_workflow(&id)?).into_response())
}

pub async fn update_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let patch: WorkflowPatch = parse_body(&body)?;
    Ok(Json(state.orchestrator.update_workflow(&id, patch).await?).into_response())
}

pub async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let workflow = state.orchestrator.delete_workflow(&id).await?;
    Ok(Json(json!({ "ok": true, "deleted": workflow.id })))
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

pub async fn toggle_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let req: ToggleRequest = parse_body(&body)?;
    Ok(Json(state.orchestrator.toggle_workflow(&id, req.enabled).await?).into_response())
}

// ── Executions ────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ExecuteQuery {
    #[serde(default)]
    pub queued: bool,
}

/// Run now, or enqueue with `?queued=true` (202 + job handle).
pub async fn execute_workflow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<ExecuteQuery>,
    body: Bytes,
) -> ApiResult<Response> {
    let data = body_data(&body)?;
    if query.queued {
        let handle = state.orchestrator.enqueue_execution(&id, data).await?;
        return Ok((StatusCode::ACCEPTED, Json(handle)).into_response());
    }
    let execution = state.orchestrator.execute_now(&id, data).await?;
    Ok(Json(execution).into_response())
}

pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Value>> {
    let executions = state.orchestrator.recent_executions(&id)?;
    Ok(Json(json!({ "workflow_id": id, "executions": executions })))
}

pub async fn register_recurring(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let registration = state.orchestrator.register_recurring(&id).await?;
    Ok((StatusCode::CREATED, Json(registration)).into_response())
}

pub async fn emit_event(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let data = body_data(&body)?;
    let executions = state.orchestrator.emit_event(&name, data).await?;
    Ok(Json(json!({
        "event": name,
        "triggered": executions.len(),
        "executions": executions,
    })))
}

// ── Queues & schedules ────────────────────────────────────

pub async fn queue_stats(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let counts = state.orchestrator.queue_stats(&name).await?;
    Ok(Json(json!({ "queue": name, "counts": counts })))
}

pub async fn failed_jobs(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    let jobs = state.orchestrator.failed_jobs(&name).await?;
    Ok(Json(json!({ "queue": name, "jobs": jobs })))
}

pub async fn list_schedules(State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    let schedules = state.orchestrator.schedules().await?;
    Ok(Json(json!({ "schedules": schedules })))
}

pub async fn delete_schedule(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    if !state.orchestrator.remove_schedule(&name).await? {
        return Err(FlowcastError::not_found(format!("schedule '{name}'")).into());
    }
    Ok(Json(json!({ "ok": true, "removed": name })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::build_router;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use flowcast_core::FlowcastConfig;
    use flowcast_engine::Orchestrator;
    use flowcast_scheduler::{MemoryScheduleStore, SqliteQueueBackend};
    use tower::ServiceExt;

    async fn test_state_with(config: FlowcastConfig) -> Arc<AppState> {
        let orchestrator = Orchestrator::builder(config)
            .queue_backend(Arc::new(SqliteQueueBackend::in_memory()))
            .schedule_store(Arc::new(MemoryScheduleStore::new()))
            .build()
            .await;
        Arc::new(AppState {
            orchestrator: Arc::new(orchestrator),
        })
    }

    async fn test_state() -> Arc<AppState> {
        test_state_with(FlowcastConfig::default()).await
    }

    async fn call(state: &Arc<AppState>, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(v) => {
                req = req.header("content-type", "application/json");
                Body::from(v.to_string())
            }
            None => Body::empty(),
        };
        let resp = build_router(Arc::clone(state))
            .oneshot(req.body(body).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    fn acme_workflow() -> Value {
        json!({
            "name": "acme-weekly",
            "trigger": {"type": "manual"},
            "accounts": [{"account_identifier": "acme"}],
            "distributors": [{"type": "messaging"}]
        })
    }

    // ---- Health ----

    #[tokio::test]
    async fn test_health() {
        let state = test_state().await;
        let (status, json) = call(&state, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        assert_eq!(json["queue"]["available"], true);
    }

    #[tokio::test]
    async fn test_health_handler_direct() {
        let state = test_state().await;
        let report = health(State(state)).await.unwrap().0;
        assert_eq!(report.workflows, 0);
    }

    // ---- Workflows ----

    #[tokio::test]
    async fn test_create_validation_is_400() {
        let state = test_state().await;
        let (status, json) = call(&state, Method::POST, "/api/v1/workflows", Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_error");
        assert_eq!(json["ok"], false);

        let (_, list) = call(&state, Method::GET, "/api/v1/workflows", None).await;
        assert_eq!(list["count"], 0);
    }

    #[tokio::test]
    async fn test_wrong_field_type_is_400() {
        let state = test_state().await;
        let mut wf = acme_workflow();
        wf["name"] = json!(5);
        let (status, json) = call(&state, Method::POST, "/api/v1/workflows", Some(wf)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_error");

        let (_, created) = call(&state, Method::POST, "/api/v1/workflows", Some(acme_workflow())).await;
        let uri = format!("/api/v1/workflows/{}/toggle", created["id"].as_str().unwrap());
        let (status, json) = call(&state, Method::POST, &uri, Some(json!({"enabled": "yes"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_error");
        let (status, json) = call(&state, Method::POST, &uri, None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["kind"], "validation_error");

        let (_, list) = call(&state, Method::GET, "/api/v1/workflows", None).await;
        assert_eq!(list["count"], 1);
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_404() {
        let state = test_state().await;
        for (method, uri) in [
            (Method::GET, "/api/v1/workflows/nope"),
            (Method::DELETE, "/api/v1/workflows/nope"),
            (Method::POST, "/api/v1/workflows/nope/execute"),
            (Method::GET, "/api/v1/workflows/nope/executions"),
        ] {
            let (status, json) = call(&state, method, uri, None).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{uri}");
            assert_eq!(json["kind"], "not_found");
        }
    }

    #[tokio::test]
    async fn test_crud_and_toggle() {
        let state = test_state().await;
        let (status, created) = call(&state, Method::POST, "/api/v1/workflows", Some(acme_workflow())).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();
        assert_eq!(created["status"], "created");

        let uri = format!("/api/v1/workflows/{id}");
        let (status, updated) = call(&state, Method::PUT, &uri, Some(json!({"description": "weekly digest"}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["description"], "weekly digest");
        assert_eq!(updated["name"], "acme-weekly");

        let (_, toggled) = call(&state, Method::POST, &format!("{uri}/toggle"), Some(json!({"enabled": false}))).await;
        assert_eq!(toggled["enabled"], false);

        let (status, _) = call(&state, Method::DELETE, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&state, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    // ---- Executions ----

    #[tokio::test]
    async fn test_execute_and_history() {
        let state = test_state().await;
        let (_, created) = call(&state, Method::POST, "/api/v1/workflows", Some(acme_workflow())).await;
        let id = created["id"].as_str().unwrap();

        let (status, execution) = call(
            &state,
            Method::POST,
            &format!("/api/v1/workflows/{id}/execute"),
            Some(json!({"requested_by": "ops"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(execution["status"], "success");
        assert_eq!(execution["engine"], "internal");
        assert_eq!(execution["results"][0]["distribution_results"][0]["status"], "success");

        let (_, history) = call(&state, Method::GET, &format!("/api/v1/workflows/{id}/executions"), None).await;
        assert_eq!(history["executions"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_queued_execute_is_accepted() {
        let state = test_state().await;
        let (_, created) = call(&state, Method::POST, "/api/v1/workflows", Some(acme_workflow())).await;
        let id = created["id"].as_str().unwrap();

        let (status, handle) =
            call(&state, Method::POST, &format!("/api/v1/workflows/{id}/execute?queued=true"), None).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(handle["queue"], "on-demand-execution");

        let (status, stats) = call(&state, Method::GET, "/api/v1/queues/on-demand-execution/stats", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["counts"]["waiting"], 1);
    }

    #[tokio::test]
    async fn test_disabled_queue_is_503() {
        let mut config = FlowcastConfig::default();
        config.queue.enabled = false;
        let state = test_state_with(config).await;
        let (_, created) = call(&state, Method::POST, "/api/v1/workflows", Some(acme_workflow())).await;
        let id = created["id"].as_str().unwrap();

        let (status, json) =
            call(&state, Method::POST, &format!("/api/v1/workflows/{id}/execute?queued=true"), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["kind"], "queue_unavailable");

        let (status, _) = call(&state, Method::GET, "/api/v1/queues/on-demand-execution/failed", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_unknown_queue_is_404() {
        let state = test_state().await;
        let (status, _) = call(&state, Method::GET, "/api/v1/queues/bogus/stats", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_event_fires_matching_workflows() {
        let state = test_state().await;
        let mut wf = acme_workflow();
        wf["trigger"] = json!({"type": "event", "name": "deal-closed"});
        call(&state, Method::POST, "/api/v1/workflows", Some(wf)).await;

        let (status, json) =
            call(&state, Method::POST, "/api/v1/events/deal-closed", Some(json!({"deal": 42}))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["triggered"], 1);
    }

    #[tokio::test]
    async fn test_malformed_body_is_400() {
        let state = test_state().await;
        let (_, created) = call(&state, Method::POST, "/api/v1/workflows", Some(acme_workflow())).await;
        let id = created["id"].as_str().unwrap();
        let req = Request::builder()
            .method(Method::POST)
            .uri(format!("/api/v1/workflows/{id}/execute"))
            .body(Body::from("{not json"))
            .unwrap();
        let resp = build_router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    // ---- Schedules ----

    #[tokio::test]
    async fn test_schedules_lifecycle() {
        let state = test_state().await;
        let mut wf = acme_workflow();
        wf["trigger"] = json!({"type": "schedule", "cron": "0 6 * * 1-5"});
        let (status, created) = call(&state, Method::POST, "/api/v1/workflows", Some(wf)).await;
        assert_eq!(status, StatusCode::CREATED);
        let id = created["id"].as_str().unwrap().to_string();

        let (_, json) = call(&state, Method::GET, "/api/v1/schedules", None).await;
        assert_eq!(json["schedules"][0]["cron_expression"], "0 6 * * 1-5");

        let (status, registration) =
            call(&state, Method::POST, &format!("/api/v1/workflows/{id}/recurring"), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(registration["queue"], "recurring-execution");

        let (status, _) = call(&state, Method::DELETE, "/api/v1/schedules/acme-weekly", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&state, Method::DELETE, "/api/v1/schedules/acme-weekly", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        state.orchestrator.shutdown();
    }

    #[tokio::test]
    async fn test_invalid_cron_is_400() {
        let state = test_state().await;
        let mut wf = acme_workflow();
        wf["trigger"] = json!({"type": "schedule", "cron": "every day"});
        let (status, _) = call(&state, Method::POST, "/api/v1/workflows", Some(wf)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
