//! Postgres-backed `DefinitionStore`/`ExecutionStore`/`NodeExecutionSink`
//! implementations (§10.4). Row/record conversion follows the same
//! `FromRow` struct + `try_into_*` pattern used throughout this codebase's
//! other repositories: typed ids are stored as `TEXT` and parsed back via
//! `FromStr`, failures mapped to `sqlx::Error::Decode`.

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use tokenflow_core::{DefinitionId, ExecutionId, NodeExecutionId, TokenId};
use tokenflow_engine::{
    DefinitionDocument, DefinitionStore, Execution, ExecutionStatus, ExecutionStore, NodeExecutionSink, NodeExecutionStart, TrackerHandle,
};
use tokio::sync::mpsc;

fn decode_err(what: &str, raw: &str, source: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(Box::new(std::io::Error::new(
        std::io::ErrorKind::InvalidData,
        format!("invalid {what} '{raw}': {source}"),
    )))
}

pub struct PgDefinitionStore {
    pool: PgPool,
}

impl PgDefinitionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct DefinitionRow {
    id: String,
    document: Value,
}

#[async_trait]
impl DefinitionStore for PgDefinitionStore {
    async fn put(&self, id: DefinitionId, document: DefinitionDocument) {
        let document = serde_json::to_value(&document).expect("DefinitionDocument always serializes");
        let _ = sqlx::query("INSERT INTO definitions (id, document) VALUES ($1, $2) ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document")
            .bind(id.to_string())
            .bind(document)
            .execute(&self.pool)
            .await
            .inspect_err(|err| tracing::error!(%err, definition_id = %id, "failed to persist definition"));
    }

    async fn get(&self, id: DefinitionId) -> Option<DefinitionDocument> {
        let row: DefinitionRow = sqlx::query_as("SELECT id, document FROM definitions WHERE id = $1")
            .bind(id.to_string())
            .fetch_one(&self.pool)
            .await
            .inspect_err(|err| tracing::warn!(%err, definition_id = %id, "definition not found"))
            .ok()?;
        serde_json::from_value(row.document).ok()
    }
}

pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: String,
    definition_id: String,
    status: String,
    initial_data: Value,
    current_state: Value,
    error: Option<String>,
    inserted_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl ExecutionRow {
    fn try_into_record(self) -> Result<Execution, sqlx::Error> {
        let id = ExecutionId::from_str(&self.id).map_err(|e| decode_err("execution id", &self.id, e))?;
        let definition_id = DefinitionId::from_str(&self.definition_id).map_err(|e| decode_err("definition id", &self.definition_id, e))?;
        let status = status_from_str(&self.status);
        Ok(Execution {
            id,
            definition_id,
            status,
            initial_data: serde_json::from_value(self.initial_data).unwrap_or_default(),
            current_state: serde_json::from_value(self.current_state).unwrap_or_default(),
            error: self.error,
            inserted_at: self.inserted_at,
            updated_at: self.updated_at,
        })
    }
}

fn status_as_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Initialized => "initialized",
        ExecutionStatus::Running => "running",
        ExecutionStatus::Waiting => "waiting",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
    }
}

fn status_from_str(raw: &str) -> ExecutionStatus {
    match raw {
        "running" => ExecutionStatus::Running,
        "waiting" => ExecutionStatus::Waiting,
        "completed" => ExecutionStatus::Completed,
        "failed" => ExecutionStatus::Failed,
        _ => ExecutionStatus::Initialized,
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn insert(&self, execution: Execution) {
        let result = sqlx::query(
            r#"
            INSERT INTO executions (id, definition_id, status, initial_data, current_state, error, inserted_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(execution.id.to_string())
        .bind(execution.definition_id.to_string())
        .bind(status_as_str(execution.status))
        .bind(serde_json::to_value(&execution.initial_data).unwrap_or_default())
        .bind(serde_json::to_value(&execution.current_state).unwrap_or_default())
        .bind(execution.error)
        .bind(execution.inserted_at)
        .bind(execution.updated_at)
        .execute(&self.pool)
        .await;
        if let Err(err) = result {
            tracing::error!(%err, execution_id = %execution.id, "failed to persist execution");
        }
    }

    async fn update_status(&self, id: ExecutionId, status: ExecutionStatus, error: Option<String>) {
        let result = sqlx::query("UPDATE executions SET status = $1, error = $2, updated_at = now() WHERE id = $3")
            .bind(status_as_str(status))
            .bind(error)
            .bind(id.to_string())
            .execute(&self.pool)
            .await;
        if let Err(err) = result {
            tracing::error!(%err, execution_id = %id, "failed to update execution status");
        }
    }

    async fn get(&self, id: ExecutionId) -> Option<Execution> {
        let row: ExecutionRow = sqlx::query_as(
            "SELECT id, definition_id, status, initial_data, current_state, error, inserted_at, updated_at FROM executions WHERE id = $1",
        )
        .bind(id.to_string())
        .fetch_one(&self.pool)
        .await
        .ok()?;
        row.try_into_record().ok()
    }
}

/// Dispatches `NodeExecutionSink` calls onto a background task so a slow
/// database write never blocks a worker's event loop (§10.4). Each call is
/// translated into an insert/update against `node_executions`, keyed by the
/// `NodeExecutionId` handed out from `start`.
#[derive(Clone)]
pub struct PgNodeExecutionSink {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

enum SinkMessage {
    Start {
        id: NodeExecutionId,
        execution_id: ExecutionId,
        token_id: TokenId,
        node_id: String,
        node_type: String,
        input_data: Value,
    },
    Complete {
        id: NodeExecutionId,
        output_data: Value,
    },
    Fail {
        id: NodeExecutionId,
        error_message: String,
    },
    MarkWaiting(NodeExecutionId),
    MarkSkipped(NodeExecutionId),
}

impl PgNodeExecutionSink {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<SinkMessage>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let result = match message {
                    SinkMessage::Start {
                        id,
                        execution_id,
                        token_id,
                        node_id,
                        node_type,
                        input_data,
                    } => sqlx::query(
                        r#"
                        INSERT INTO node_executions (id, execution_id, token_id, node_id, node_type, status, input_data)
                        VALUES ($1, $2, $3, $4, $5, 'executing', $6)
                        "#,
                    )
                    .bind(id.to_string())
                    .bind(execution_id.to_string())
                    .bind(token_id.to_string())
                    .bind(node_id)
                    .bind(node_type)
                    .bind(input_data)
                    .execute(&pool)
                    .await
                    .map(|_| ()),
                    SinkMessage::Complete { id, output_data } => sqlx::query(
                        "UPDATE node_executions SET status = 'completed', output_data = $1, completed_at = now(), \
                         duration_ms = EXTRACT(EPOCH FROM (now() - started_at)) * 1000 WHERE id = $2",
                    )
                    .bind(output_data)
                    .bind(id.to_string())
                    .execute(&pool)
                    .await
                    .map(|_| ()),
                    SinkMessage::Fail { id, error_message } => sqlx::query(
                        "UPDATE node_executions SET status = 'failed', error_message = $1, completed_at = now(), \
                         duration_ms = EXTRACT(EPOCH FROM (now() - started_at)) * 1000 WHERE id = $2",
                    )
                    .bind(error_message)
                    .bind(id.to_string())
                    .execute(&pool)
                    .await
                    .map(|_| ()),
                    SinkMessage::MarkWaiting(id) => sqlx::query("UPDATE node_executions SET status = 'waiting' WHERE id = $1")
                        .bind(id.to_string())
                        .execute(&pool)
                        .await
                        .map(|_| ()),
                    SinkMessage::MarkSkipped(id) => sqlx::query("UPDATE node_executions SET status = 'skipped' WHERE id = $1")
                        .bind(id.to_string())
                        .execute(&pool)
                        .await
                        .map(|_| ()),
                };
                if let Err(err) = result {
                    tracing::error!(%err, "failed to persist node execution");
                }
            }
        });
        Self { tx }
    }
}

#[async_trait]
impl NodeExecutionSink for PgNodeExecutionSink {
    async fn start(&self, input: NodeExecutionStart) -> TrackerHandle {
        let id = NodeExecutionId::new();
        let input_data = serde_json::to_value(&input.input_data).unwrap_or_default();
        let _ = self.tx.send(SinkMessage::Start {
            id,
            execution_id: input.execution_id,
            token_id: input.token_id,
            node_id: input.node_id,
            node_type: input.node_type,
            input_data,
        });
        TrackerHandle::live(id)
    }

    async fn complete(&self, handle: TrackerHandle, output_data: Map<String, Value>) {
        if let Some(id) = handle.id() {
            let output_data = serde_json::to_value(&output_data).unwrap_or_default();
            let _ = self.tx.send(SinkMessage::Complete { id, output_data });
        }
    }

    async fn fail(&self, handle: TrackerHandle, error_message: String) {
        if let Some(id) = handle.id() {
            let _ = self.tx.send(SinkMessage::Fail { id, error_message });
        }
    }

    async fn mark_waiting(&self, handle: TrackerHandle) {
        if let Some(id) = handle.id() {
            let _ = self.tx.send(SinkMessage::MarkWaiting(id));
        }
    }

    async fn mark_skipped(&self, handle: TrackerHandle) {
        if let Some(id) = handle.id() {
            let _ = self.tx.send(SinkMessage::MarkSkipped(id));
        }
    }
}
