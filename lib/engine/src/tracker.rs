//! `NodeExecutionSink`: the external observer that receives start/complete/
//! wait/fail events per node visit (§4.7).

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokenflow_core::{ExecutionId, NodeExecutionId, TokenId};

/// Input to `NodeExecutionSink::start`.
#[derive(Debug, Clone)]
pub struct NodeExecutionStart {
    pub workflow_id: ExecutionId,
    pub execution_id: ExecutionId,
    pub token_id: TokenId,
    pub node_id: String,
    pub node_type: String,
    pub input_data: Map<String, Value>,
}

/// Opaque handle returned by `start`. A failed `start` returns a handle
/// that is a no-op for every later call (§4.7).
#[derive(Debug, Clone, Copy)]
pub struct TrackerHandle(Option<NodeExecutionId>);

impl TrackerHandle {
    #[must_use]
    pub fn live(id: NodeExecutionId) -> Self {
        Self(Some(id))
    }

    #[must_use]
    pub fn null() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn id(&self) -> Option<NodeExecutionId> {
        self.0
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.0.is_some()
    }
}

/// The engine's view of an external node-execution writer.
///
/// Calls must not block the engine's event loop indefinitely (§4.7);
/// implementations backed by real I/O should dispatch to a background
/// task (see `tokenflow-server`'s Postgres-backed sink).
#[async_trait]
pub trait NodeExecutionSink: Send + Sync {
    async fn start(&self, input: NodeExecutionStart) -> TrackerHandle;
    async fn complete(&self, handle: TrackerHandle, output_data: Map<String, Value>);
    async fn fail(&self, handle: TrackerHandle, error_message: String);
    async fn mark_waiting(&self, handle: TrackerHandle);
    async fn mark_skipped(&self, handle: TrackerHandle);
}

/// Discards every event. Useful for embedding the engine where no audit
/// trail is wanted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl NodeExecutionSink for NullSink {
    async fn start(&self, _input: NodeExecutionStart) -> TrackerHandle {
        TrackerHandle::null()
    }

    async fn complete(&self, _handle: TrackerHandle, _output_data: Map<String, Value>) {}

    async fn fail(&self, _handle: TrackerHandle, _error_message: String) {}

    async fn mark_waiting(&self, _handle: TrackerHandle) {}

    async fn mark_skipped(&self, _handle: TrackerHandle) {}
}

/// Logs every event at `debug`/`warn` via `tracing`. Used by the server
/// binary when no richer sink is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingSink;

#[async_trait]
impl NodeExecutionSink for LoggingSink {
    async fn start(&self, input: NodeExecutionStart) -> TrackerHandle {
        let id = NodeExecutionId::new();
        tracing::debug!(
            node_id = %input.node_id,
            node_type = %input.node_type,
            token_id = %input.token_id,
            node_execution_id = %id,
            "node execution started"
        );
        TrackerHandle::live(id)
    }

    async fn complete(&self, handle: TrackerHandle, _output_data: Map<String, Value>) {
        if let Some(id) = handle.id() {
            tracing::debug!(node_execution_id = %id, "node execution completed");
        }
    }

    async fn fail(&self, handle: TrackerHandle, error_message: String) {
        if let Some(id) = handle.id() {
            tracing::warn!(node_execution_id = %id, error = %error_message, "node execution failed");
        }
    }

    async fn mark_waiting(&self, handle: TrackerHandle) {
        if let Some(id) = handle.id() {
            tracing::debug!(node_execution_id = %id, "node execution waiting");
        }
    }

    async fn mark_skipped(&self, handle: TrackerHandle) {
        if let Some(id) = handle.id() {
            tracing::debug!(node_execution_id = %id, "node execution skipped");
        }
    }
}
