//! API route definitions.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::model::{Collection, NotifySettings, Schedule, TestDefinition};
use crate::recurrence::{next_run_after, RecurrenceRule, RecurrenceSpec};
use crate::runner::{RunTrigger, RunnerError};

use super::state::AppState;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/schedules", get(list_schedules).post(create_schedule))
        .route(
            "/schedules/{id}",
            get(get_schedule).put(update_schedule).delete(delete_schedule),
        )
        .route("/schedules/{id}/enable", post(enable_schedule))
        .route("/schedules/{id}/disable", post(disable_schedule))
        .route("/schedules/{id}/run", post(run_schedule_now))
        .route("/schedules/{id}/next-run", get(schedule_next_run))
        .route("/collections", get(list_collections).post(create_collection))
        .route("/collections/{id}/tests", get(list_tests).post(create_test))
        .route("/collections/{id}/run", post(run_collection))
        .route("/runs", get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/runs/{id}/results", get(run_results))
}

/// Error envelope: status code plus a specific, user-facing message.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn forbidden(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        let message = format!("{:#}", e);
        // Uniqueness violations surface from the store as "already exists".
        let status = if message.contains("already exists") {
            StatusCode::CONFLICT
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        Self { status, message }
    }
}

fn envelope(data: Value) -> Json<Value> {
    Json(json!({
        "data": data,
        "meta": { "timestamp": Utc::now().to_rfc3339() }
    }))
}

async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": Utc::now().to_rfc3339(),
            "version": env!("CARGO_PKG_VERSION")
        }
    }))
}

#[derive(Deserialize)]
struct OwnerQuery {
    owner_id: Option<String>,
}

// ---- schedules ----

#[derive(Deserialize)]
struct CreateSchedule {
    owner_id: String,
    name: String,
    collection_id: Uuid,
    recurrence: RecurrenceSpec,
    #[serde(default)]
    notify: NotifySettings,
}

#[derive(Deserialize)]
struct UpdateSchedule {
    name: String,
    collection_id: Uuid,
    recurrence: RecurrenceSpec,
    #[serde(default)]
    notify: NotifySettings,
}

fn schedule_json(schedule: &Schedule) -> Value {
    let next_run = next_run_after(&schedule.rule, schedule.last_run, Utc::now());
    json!({
        "id": schedule.id,
        "owner_id": schedule.owner_id,
        "name": schedule.name,
        "collection_id": schedule.collection_id,
        "recurrence": schedule.rule,
        "notify": schedule.notify,
        "last_run": schedule.last_run,
        "next_run": next_run,
        "created_at": schedule.created_at,
    })
}

async fn list_schedules(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Value>, ApiError> {
    let schedules = state.store.list_schedules(query.owner_id.as_deref())?;
    let data: Vec<Value> = schedules.iter().map(schedule_json).collect();
    let total = data.len();
    Ok(Json(json!({ "data": data, "meta": { "total": total } })))
}

async fn create_schedule(
    State(state): State<AppState>,
    Json(payload): Json<CreateSchedule>,
) -> Result<Json<Value>, ApiError> {
    let rule = RecurrenceRule::try_from(payload.recurrence)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let collection = state
        .store
        .get_collection(payload.collection_id)?
        .ok_or_else(|| ApiError::not_found("collection not found"))?;
    if collection.owner_id != payload.owner_id {
        return Err(ApiError::forbidden("collection belongs to another owner"));
    }

    let schedule = Schedule {
        id: Uuid::new_v4(),
        owner_id: payload.owner_id,
        name: payload.name,
        collection_id: payload.collection_id,
        rule,
        notify: payload.notify,
        last_run: None,
        created_at: Utc::now(),
    };
    state.store.insert_schedule(&schedule)?;
    let _ = state.registry.install(&schedule).await;

    Ok(envelope(schedule_json(&schedule)))
}

async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let schedule = state
        .store
        .get_schedule(id)?
        .ok_or_else(|| ApiError::not_found("schedule not found"))?;
    Ok(envelope(schedule_json(&schedule)))
}

async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateSchedule>,
) -> Result<Json<Value>, ApiError> {
    let existing = state
        .store
        .get_schedule(id)?
        .ok_or_else(|| ApiError::not_found("schedule not found"))?;
    let rule = RecurrenceRule::try_from(payload.recurrence)
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let collection = state
        .store
        .get_collection(payload.collection_id)?
        .ok_or_else(|| ApiError::not_found("collection not found"))?;
    if collection.owner_id != existing.owner_id {
        return Err(ApiError::forbidden("collection belongs to another owner"));
    }

    let schedule = Schedule {
        name: payload.name,
        collection_id: payload.collection_id,
        rule,
        notify: payload.notify,
        ..existing
    };
    state.store.update_schedule(&schedule)?;

    // Edit tears down and re-arms the trigger with the new rule.
    if schedule.rule.active {
        let _ = state.registry.install(&schedule).await;
    } else {
        state.registry.uninstall(schedule.id).await;
    }
    Ok(envelope(schedule_json(&schedule)))
}

async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if !state.store.delete_schedule(id)? {
        return Err(ApiError::not_found("schedule not found"));
    }
    state.registry.uninstall(id).await;
    Ok(envelope(json!({ "deleted": id })))
}

async fn set_active(state: &AppState, id: Uuid, active: bool) -> Result<Json<Value>, ApiError> {
    if !state.store.set_schedule_active(id, active)? {
        return Err(ApiError::not_found("schedule not found"));
    }
    let schedule = state
        .store
        .get_schedule(id)?
        .ok_or_else(|| ApiError::not_found("schedule not found"))?;
    if active {
        let _ = state.registry.install(&schedule).await;
    } else {
        state.registry.uninstall(id).await;
    }
    Ok(envelope(schedule_json(&schedule)))
}

async fn enable_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    set_active(&state, id, true).await
}

async fn disable_schedule(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    set_active(&state, id, false).await
}

async fn run_schedule_now(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let run = state.dispatcher.run_now(id).await.map_err(|e| {
        let message = format!("{:#}", e);
        if message.contains("has no tests") {
            ApiError::bad_request(message)
        } else if message.contains("not found") {
            ApiError::not_found(message)
        } else {
            ApiError::from(e)
        }
    })?;
    Ok(envelope(json!(run)))
}

async fn schedule_next_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let schedule = state
        .store
        .get_schedule(id)?
        .ok_or_else(|| ApiError::not_found("schedule not found"))?;
    let computed = next_run_after(&schedule.rule, schedule.last_run, Utc::now());
    let armed = state.registry.next_fire_at(id).await;
    Ok(envelope(json!({
        "schedule_id": id,
        "next_run": computed,
        "armed_at": armed,
    })))
}

// ---- collections and tests ----

#[derive(Deserialize)]
struct CreateCollection {
    owner_id: String,
    name: String,
    description: Option<String>,
}

#[derive(Deserialize)]
struct CreateTest {
    name: String,
    method: String,
    url: String,
    #[serde(default)]
    headers: std::collections::HashMap<String, String>,
    body: Option<String>,
    expected_status: Option<u16>,
}

async fn list_collections(
    State(state): State<AppState>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<Value>, ApiError> {
    let collections = state.store.list_collections(query.owner_id.as_deref())?;
    let total = collections.len();
    Ok(Json(
        json!({ "data": collections, "meta": { "total": total } }),
    ))
}

async fn create_collection(
    State(state): State<AppState>,
    Json(payload): Json<CreateCollection>,
) -> Result<Json<Value>, ApiError> {
    let collection = Collection {
        id: Uuid::new_v4(),
        owner_id: payload.owner_id,
        name: payload.name,
        description: payload.description,
        created_at: Utc::now(),
    };
    state.store.insert_collection(&collection)?;
    Ok(envelope(json!(collection)))
}

async fn list_tests(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let tests = state.store.tests_for_collection(id)?;
    let total = tests.len();
    Ok(Json(json!({ "data": tests, "meta": { "total": total } })))
}

async fn create_test(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CreateTest>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_collection(id)?.is_none() {
        return Err(ApiError::not_found("collection not found"));
    }
    let method = payload.method.to_ascii_uppercase();
    if reqwest::Method::from_bytes(method.as_bytes()).is_err() {
        return Err(ApiError::bad_request(format!(
            "invalid HTTP method '{}'",
            payload.method
        )));
    }
    let position = state.store.tests_for_collection(id)?.len() as i64;
    let test = TestDefinition {
        id: Uuid::new_v4(),
        collection_id: id,
        name: payload.name,
        method,
        url: payload.url,
        headers: payload.headers,
        body: payload.body,
        expected_status: payload.expected_status,
        position,
    };
    state.store.insert_test(&test)?;
    Ok(envelope(json!(test)))
}

#[derive(Deserialize)]
struct RunCollection {
    owner_id: Option<String>,
}

async fn run_collection(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    payload: Option<Json<RunCollection>>,
) -> Result<Json<Value>, ApiError> {
    let collection = state
        .store
        .get_collection(id)?
        .ok_or_else(|| ApiError::not_found("collection not found"))?;
    let owner_id = payload
        .and_then(|Json(p)| p.owner_id)
        .unwrap_or_else(|| collection.owner_id.clone());
    let trigger = RunTrigger {
        owner_id,
        schedule_id: None,
    };
    let run = state
        .runner
        .run(&collection, &trigger)
        .await
        .map_err(|e| match e {
            RunnerError::EmptyCollection(_) => ApiError::bad_request(e.to_string()),
            RunnerError::Store(inner) => ApiError::from(inner),
        })?;
    Ok(envelope(json!(run)))
}

// ---- runs ----

#[derive(Deserialize)]
struct RunsQuery {
    collection_id: Option<Uuid>,
    owner_id: Option<String>,
    limit: Option<i64>,
}

async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<RunsQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let runs = state
        .store
        .list_runs(query.collection_id, query.owner_id.as_deref(), limit)?;
    let total = runs.len();
    Ok(Json(json!({ "data": runs, "meta": { "total": total } })))
}

async fn get_run(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let run = state
        .store
        .get_run(id)?
        .ok_or_else(|| ApiError::not_found("run not found"))?;
    Ok(envelope(json!(run)))
}

async fn run_results(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    if state.store.get_run(id)?.is_none() {
        return Err(ApiError::not_found("run not found"));
    }
    let results = state.store.results_for_run(id)?;
    let total = results.len();
    Ok(Json(
        json!({ "data": results, "meta": { "total": total } }),
    ))
}
