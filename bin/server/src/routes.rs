//! The five JSON endpoints (§10.5): start a workflow, read execution
//! state, and complete a parked activity.

use crate::error::ApiError;
use crate::AppState;
use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tokenflow_core::{ExecutionId, TokenId};
use tokenflow_engine::ExecutionStatus;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/workflows/{definition_id}/start", post(start_workflow))
        .route("/executions/{id}", get(get_execution))
        .route("/executions/{id}/status", get(get_status))
        .route("/executions/{id}/nodes/{node_id}/complete", post(complete_node))
        .route("/executions/{id}/waiting", get(get_waiting))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct StartWorkflowRequest {
    #[serde(default)]
    pub initial_data: Map<String, Value>,
}

#[derive(Serialize)]
pub struct StartWorkflowResponse {
    pub execution_id: ExecutionId,
}

async fn start_workflow(
    State(state): State<Arc<AppState>>,
    Path(definition_id): Path<String>,
    Json(request): Json<StartWorkflowRequest>,
) -> Result<Json<StartWorkflowResponse>, ApiError> {
    let execution_id = state.start_workflow(&definition_id, request.initial_data).await?;
    Ok(Json(StartWorkflowResponse { execution_id }))
}

#[derive(Serialize)]
pub struct ExecutionResponse {
    pub execution_id: ExecutionId,
    pub status: ExecutionStatus,
}

async fn get_execution(State(state): State<Arc<AppState>>, Path(id): Path<ExecutionId>) -> Result<Json<ExecutionResponse>, ApiError> {
    let engine = state.engine_for(id)?;
    let status = engine.status().await?;
    Ok(Json(ExecutionResponse { execution_id: id, status }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub status: ExecutionStatus,
}

async fn get_status(State(state): State<Arc<AppState>>, Path(id): Path<ExecutionId>) -> Result<Json<StatusResponse>, ApiError> {
    let engine = state.engine_for(id)?;
    Ok(Json(StatusResponse { status: engine.status().await? }))
}

#[derive(Deserialize)]
pub struct CompleteNodeRequest {
    pub token_id: TokenId,
    #[serde(default)]
    pub user_data: Map<String, Value>,
}

async fn complete_node(
    State(state): State<Arc<AppState>>,
    Path((id, node_id)): Path<(ExecutionId, String)>,
    Json(request): Json<CompleteNodeRequest>,
) -> Result<Json<Value>, ApiError> {
    let engine = state.engine_for(id)?;
    let token = engine.complete_activity(node_id, request.token_id, request.user_data).await?;
    Ok(Json(serde_json::to_value(&token).expect("Token always serializes")))
}

async fn get_waiting(State(state): State<Arc<AppState>>, Path(id): Path<ExecutionId>) -> Result<Json<Value>, ApiError> {
    let engine = state.engine_for(id)?;
    let waiting = engine.all_waiting_tokens().await?;
    Ok(Json(serde_json::to_value(&waiting).expect("waiting tokens always serialize")))
}
