//! Persistence-facing record shapes and store traits (§6), plus
//! in-memory implementations used by this crate's own tests. A
//! Postgres-backed implementation lives in the server binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use tokenflow_core::{DefinitionId, ExecutionId, NodeExecutionId, TokenId};

use crate::definition::DefinitionDocument;
use crate::engine::ExecutionStatus;

/// §6's `Execution` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub definition_id: DefinitionId,
    pub status: ExecutionStatus,
    pub initial_data: Map<String, Value>,
    pub current_state: Map<String, Value>,
    pub error: Option<String>,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// §6's `NodeExecution` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeExecution {
    pub id: NodeExecutionId,
    pub execution_id: ExecutionId,
    pub token_id: TokenId,
    pub node_id: String,
    pub node_type: String,
    pub status: String,
    pub input_data: Map<String, Value>,
    pub output_data: Option<Map<String, Value>>,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
}

/// Stores a workflow definition document keyed by id.
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    async fn put(&self, id: DefinitionId, document: DefinitionDocument);
    async fn get(&self, id: DefinitionId) -> Option<DefinitionDocument>;
}

/// Stores execution records keyed by id.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert(&self, execution: Execution);
    async fn update_status(&self, id: ExecutionId, status: ExecutionStatus, error: Option<String>);
    async fn get(&self, id: ExecutionId) -> Option<Execution>;
}

/// `Mutex`-guarded in-process `DefinitionStore`, for engine-crate tests.
#[derive(Default)]
pub struct InMemoryDefinitionStore {
    documents: Mutex<HashMap<DefinitionId, DefinitionDocument>>,
}

impl InMemoryDefinitionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryDefinitionStore {
    async fn put(&self, id: DefinitionId, document: DefinitionDocument) {
        self.documents.lock().expect("lock poisoned").insert(id, document);
    }

    async fn get(&self, id: DefinitionId) -> Option<DefinitionDocument> {
        self.documents.lock().expect("lock poisoned").get(&id).cloned()
    }
}

/// `Mutex`-guarded in-process `ExecutionStore`, for engine-crate tests.
#[derive(Default)]
pub struct InMemoryExecutionStore {
    executions: Mutex<HashMap<ExecutionId, Execution>>,
}

impl InMemoryExecutionStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionStore for InMemoryExecutionStore {
    async fn insert(&self, execution: Execution) {
        self.executions.lock().expect("lock poisoned").insert(execution.id, execution);
    }

    async fn update_status(&self, id: ExecutionId, status: ExecutionStatus, error: Option<String>) {
        if let Some(execution) = self.executions.lock().expect("lock poisoned").get_mut(&id) {
            execution.status = status;
            execution.error = error;
            execution.updated_at = Utc::now();
        }
    }

    async fn get(&self, id: ExecutionId) -> Option<Execution> {
        self.executions.lock().expect("lock poisoned").get(&id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::NodeDocument;

    fn sample_document() -> DefinitionDocument {
        DefinitionDocument {
            start_node_id: "start".to_string(),
            nodes: vec![NodeDocument {
                id: "start".to_string(),
                node_type: "start".to_string(),
                name: None,
                next_nodes: Vec::new(),
                activity_type: None,
                form_fields: Vec::new(),
                script: None,
                gateway_type: None,
                work_fn: None,
                condition_fn: None,
            }],
        }
    }

    #[tokio::test]
    async fn definition_store_roundtrips() {
        let store = InMemoryDefinitionStore::new();
        let id = DefinitionId::new();
        store.put(id, sample_document()).await;
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.start_node_id, "start");
    }

    #[tokio::test]
    async fn execution_store_tracks_status_updates() {
        let store = InMemoryExecutionStore::new();
        let id = ExecutionId::new();
        let now = Utc::now();
        store
            .insert(Execution {
                id,
                definition_id: DefinitionId::new(),
                status: ExecutionStatus::Running,
                initial_data: Map::new(),
                current_state: Map::new(),
                error: None,
                inserted_at: now,
                updated_at: now,
            })
            .await;
        store.update_status(id, ExecutionStatus::Completed, None).await;
        let fetched = store.get(id).await.unwrap();
        assert_eq!(fetched.status, ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn missing_execution_returns_none() {
        let store = InMemoryExecutionStore::new();
        assert!(store.get(ExecutionId::new()).await.is_none());
    }
}
