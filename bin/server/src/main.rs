mod config;
mod db;
mod error;
mod routes;

use crate::config::ServerConfig;
use crate::db::{PgDefinitionStore, PgExecutionStore, PgNodeExecutionSink};
use crate::error::ApiError;
use chrono::Utc;
use sqlx::postgres::PgPoolOptions;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokenflow_core::{DefinitionId, ExecutionId};
use tokenflow_engine::{
    CallableRegistry, DefinitionStore, Execution, ExecutionStatus, ExecutionStore, NodeExecutionSink, spawn_engine, Definition, EngineHandle,
};
use tower_http::trace::TraceLayer;

/// How often a spawned execution's persisted status row is refreshed from
/// the live engine, until the execution reaches a terminal status.
const STATUS_SYNC_INTERVAL: Duration = Duration::from_millis(200);

pub struct AppState {
    definitions: PgDefinitionStore,
    executions: Arc<PgExecutionStore>,
    sink: Arc<dyn NodeExecutionSink>,
    registry: Arc<CallableRegistry>,
    live: Mutex<HashMap<ExecutionId, EngineHandle>>,
}

impl AppState {
    pub(crate) async fn start_workflow(&self, definition_id: &str, initial_data: serde_json::Map<String, serde_json::Value>) -> Result<ExecutionId, ApiError> {
        let definition_id: DefinitionId = definition_id.parse().map_err(|_| ApiError::NotFound {
            resource: "definition",
            id: definition_id.to_string(),
        })?;
        let document = self.definitions.get(definition_id).await.ok_or(ApiError::NotFound {
            resource: "definition",
            id: definition_id.to_string(),
        })?;
        let definition = Definition::from_document(definition_id, document)?;

        let execution_id = ExecutionId::new();
        let now = Utc::now();
        self.executions
            .insert(Execution {
                id: execution_id,
                definition_id,
                status: ExecutionStatus::Initialized,
                initial_data: initial_data.clone(),
                current_state: serde_json::Map::new(),
                error: None,
                inserted_at: now,
                updated_at: now,
            })
            .await;

        let engine = spawn_engine(execution_id, definition, Arc::clone(&self.registry), Arc::clone(&self.sink));
        engine.start_workflow(initial_data).await?;
        self.live.lock().expect("lock poisoned").insert(execution_id, engine.clone());
        spawn_status_sync(Arc::clone(&self.executions), engine, execution_id);
        Ok(execution_id)
    }

    pub(crate) fn engine_for(&self, id: ExecutionId) -> Result<EngineHandle, ApiError> {
        self.live
            .lock()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(ApiError::NotFound { resource: "execution", id: id.to_string() })
    }
}

/// Keeps the persisted `Execution.status` in step with the live engine,
/// since the engine can transition status well after the HTTP request that
/// started the workflow has returned. Polls at `STATUS_SYNC_INTERVAL` until
/// the execution reaches a terminal status or the engine task is gone.
fn spawn_status_sync(executions: Arc<PgExecutionStore>, engine: EngineHandle, execution_id: ExecutionId) {
    tokio::spawn(async move {
        let mut last = None;
        loop {
            let status = match engine.status().await {
                Ok(status) => status,
                Err(_) => return,
            };
            if Some(status) != last {
                executions.update_status(execution_id, status, None).await;
                last = Some(status);
            }
            if matches!(status, ExecutionStatus::Completed | ExecutionStatus::Failed) {
                return;
            }
            tokio::time::sleep(STATUS_SYNC_INTERVAL).await;
        }
    });
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("loaded configuration");

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    tracing::info!("running database migrations");
    sqlx::migrate!("./migrations").run(&pool).await.expect("failed to run migrations");

    let state = Arc::new(AppState {
        definitions: PgDefinitionStore::new(pool.clone()),
        executions: Arc::new(PgExecutionStore::new(pool.clone())),
        sink: Arc::new(PgNodeExecutionSink::new(pool)),
        registry: Arc::new(CallableRegistry::new()),
        live: Mutex::new(HashMap::new()),
    });

    let app = routes::router(state).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await.expect("failed to bind listener");
    tracing::info!(addr = %listener.local_addr().expect("listener has a local address"), "tokenflow-server listening");
    axum::serve(listener, app).await.expect("server error");
}
