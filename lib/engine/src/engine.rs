//! The engine: owns every node worker, routes events between them, and
//! answers the synchronous-looking command surface (§4.1, §6).

use crate::definition::Definition;
use crate::error::{ActivityApiError, EngineError};
use crate::message::{CompleteOutcome, EngineEvent, WaitingTokenView, WorkerCommand};
use crate::registry::CallableRegistry;
use crate::token::Token;
use crate::tracker::{NodeExecutionSink, NodeExecutionStart, NullSink, TrackerHandle};
use crate::worker::{spawn_worker, WorkerHandle};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokenflow_core::{ExecutionId, TokenId};
use tokio::sync::{mpsc, oneshot};

/// §6's execution status values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Initialized,
    Running,
    Waiting,
    Completed,
    Failed,
}

/// A bounded record of one routing step, kept for inspection and debugging.
/// §9: history is bounded via a fixed-size ring buffer rather than growing
/// without limit for long-lived executions.
#[derive(Debug)]
pub struct HistoryEntry {
    pub node_id: String,
    pub token_id: TokenId,
    pub event: &'static str,
}

const HISTORY_CAPACITY: usize = 500;

struct RingBuffer<T> {
    items: std::collections::VecDeque<T>,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    fn new(capacity: usize) -> Self {
        Self {
            items: std::collections::VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    fn push(&mut self, item: T) {
        if self.items.len() == self.capacity {
            self.items.pop_front();
        }
        self.items.push_back(item);
    }

    fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

/// Commands the engine's actor task accepts.
enum EngineCommand {
    StartWorkflow {
        data: Map<String, Value>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    GetStatus {
        reply: oneshot::Sender<ExecutionStatus>,
    },
    GetHistory {
        reply: oneshot::Sender<Vec<HistoryEntry>>,
    },
    CompleteActivity {
        node_id: String,
        token_id: TokenId,
        user_data: Map<String, Value>,
        reply: oneshot::Sender<Result<Token, ActivityApiError>>,
    },
    GetWaitingTokens {
        node_id: String,
        reply: oneshot::Sender<Vec<WaitingTokenView>>,
    },
    GetAllWaitingTokens {
        reply: oneshot::Sender<Vec<(String, WaitingTokenView)>>,
    },
}

/// Where one live token is parked, as mirrored by the engine (§4.8: the
/// engine keeps its own waiting-set so `CompleteActivity`'s
/// `TokenNotWaiting`/`TokenAtDifferentNode` checks don't require asking
/// every worker).
#[derive(Debug, Clone, Copy)]
struct Waiting {
    node_id_index: usize,
}

struct EngineState {
    execution_id: ExecutionId,
    definition: Definition,
    workers: Vec<WorkerHandle>,
    node_index: HashMap<String, usize>,
    sink: Arc<dyn NodeExecutionSink>,
    tracker_handles: HashMap<TokenId, TrackerHandle>,
    waiting: HashMap<TokenId, Waiting>,
    status: ExecutionStatus,
    live_tokens: usize,
    terminated_tokens: usize,
    history: RingBuffer<HistoryEntry>,
}

impl EngineState {
    fn node_name(&self, idx: usize) -> &str {
        &self.workers[idx].node_id
    }

    fn worker_for(&self, node_id: &str) -> Option<&WorkerHandle> {
        self.node_index.get(node_id).map(|&idx| &self.workers[idx])
    }

    fn record(&mut self, node_id: &str, token_id: TokenId, event: &'static str) {
        self.history.push(HistoryEntry {
            node_id: node_id.to_string(),
            token_id,
            event,
        });
    }

    /// §4.1: the engine recomputes status from the union of live/waiting/
    /// terminated token counts after every event, rather than tracking it
    /// piecemeal. `completed` requires at least one token to have actually
    /// terminated, not merely that none are in flight — otherwise a token
    /// dropped at an unknown node would read as a completed execution.
    fn recompute_status(&mut self) {
        if self.live_tokens == 0 && self.waiting.is_empty() && self.terminated_tokens > 0 {
            self.status = ExecutionStatus::Completed;
        } else if self.live_tokens == 0 && !self.waiting.is_empty() {
            self.status = ExecutionStatus::Waiting;
        } else if self.live_tokens != 0 {
            self.status = ExecutionStatus::Running;
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::ForwardToken { node_id, token } => {
                self.record(&node_id, token.id, "forward");
                match self.worker_for(&node_id).cloned() {
                    Some(worker) => {
                        let node_type = worker.node_type.clone();
                        let handle = self
                            .sink
                            .start(NodeExecutionStart {
                                workflow_id: self.execution_id,
                                execution_id: self.execution_id,
                                token_id: token.id,
                                node_id: node_id.clone(),
                                node_type,
                                input_data: token.data.clone(),
                            })
                            .await;
                        self.tracker_handles.insert(token.id, handle);
                        worker.send(WorkerCommand::Execute(token));
                    }
                    None => {
                        tracing::warn!(node_id = %node_id, token_id = %token.id, "forward to unknown node, dropping token");
                        self.live_tokens = self.live_tokens.saturating_sub(1);
                        self.recompute_status();
                    }
                }
            }
            EngineEvent::NodeExecuted { node_id, token } => {
                self.record(&node_id, token.id, "executed");
                if let Some(handle) = self.tracker_handles.remove(&token.id) {
                    self.sink.complete(handle, token.data.clone()).await;
                }
            }
            EngineEvent::WorkflowCompleted { node_id, token } => {
                self.record(&node_id, token.id, "workflow_completed");
                self.live_tokens = self.live_tokens.saturating_sub(1);
                self.terminated_tokens += 1;
                self.recompute_status();
            }
            EngineEvent::ActivityWaiting { node_id, token } => {
                self.record(&node_id, token.id, "activity_waiting");
                let idx = *self.node_index.get(&node_id).unwrap_or(&0);
                self.waiting.insert(token.id, Waiting { node_id_index: idx });
                // §4.1: the token leaves activeTokens while parked.
                self.live_tokens = self.live_tokens.saturating_sub(1);
                if let Some(&handle) = self.tracker_handles.get(&token.id) {
                    self.sink.mark_waiting(handle).await;
                }
                self.recompute_status();
            }
            EngineEvent::ActivityCompleted { node_id, token } => {
                self.record(&node_id, token.id, "activity_completed");
                self.waiting.remove(&token.id);
                // §4.1: the token re-enters activeTokens on external completion.
                self.live_tokens += 1;
                self.recompute_status();
            }
            EngineEvent::NodeFailed { node_id, token_id, message } => {
                // §7 `WorkerFailure`: only the node execution is marked failed;
                // the token continues (its data now carries the error) and the
                // execution-wide status is untouched by this event.
                tracing::warn!(node_id = %node_id, error = %message, "node failed");
                if let Some(handle) = self.tracker_handles.remove(&token_id) {
                    self.sink.fail(handle, message.clone()).await;
                }
                self.recompute_status();
            }
        }
    }

    async fn start_workflow(&mut self, data: Map<String, Value>) -> Result<(), EngineError> {
        let start_node_id = self.definition.start_node_id.clone();
        let start = self.worker_for(&start_node_id).cloned().ok_or(EngineError::NoStartNode)?;
        let token = Token::new(data);
        self.live_tokens += 1;
        self.record(&start_node_id, token.id, "start");
        let handle = self
            .sink
            .start(NodeExecutionStart {
                workflow_id: self.execution_id,
                execution_id: self.execution_id,
                token_id: token.id,
                node_id: start_node_id,
                node_type: start.node_type.clone(),
                input_data: token.data.clone(),
            })
            .await;
        self.tracker_handles.insert(token.id, handle);
        start.send(WorkerCommand::Execute(token));
        self.recompute_status();
        Ok(())
    }

    async fn complete_activity(
        &mut self,
        node_id: String,
        token_id: TokenId,
        user_data: Map<String, Value>,
    ) -> Result<Token, ActivityApiError> {
        let Some(waiting) = self.waiting.get(&token_id).copied() else {
            return Err(ActivityApiError::TokenNotWaiting { token_id });
        };
        let waiting_at = self.node_name(waiting.node_id_index).to_string();
        if waiting_at != node_id {
            return Err(ActivityApiError::TokenAtDifferentNode {
                token_id,
                waiting_at,
                requested: node_id,
            });
        }

        let worker = self.worker_for(&node_id).expect("waiting index is always valid").clone();
        let (tx, rx) = oneshot::channel();
        worker.send(WorkerCommand::Complete {
            token_id,
            user_data,
            reply: tx,
        });
        match rx.await {
            Ok(CompleteOutcome::Completed(token)) => Ok(token),
            Ok(CompleteOutcome::TokenNotFound) => Err(ActivityApiError::TokenNotFound { token_id }),
            Err(_) => Err(ActivityApiError::EngineShutDown),
        }
    }

    async fn waiting_tokens(&self, node_id: &str) -> Vec<WaitingTokenView> {
        let Some(worker) = self.worker_for(node_id) else {
            return Vec::new();
        };
        let (tx, rx) = oneshot::channel();
        worker.send(WorkerCommand::GetWaitingTokens { reply: tx });
        rx.await.unwrap_or_default()
    }

    /// Every parked token across the whole execution, paired with the node
    /// id it is waiting at.
    async fn all_waiting_tokens(&self) -> Vec<(String, WaitingTokenView)> {
        let mut result = Vec::new();
        for worker in &self.workers {
            let (tx, rx) = oneshot::channel();
            worker.send(WorkerCommand::GetWaitingTokens { reply: tx });
            if let Ok(tokens) = rx.await {
                for token in tokens {
                    result.push((worker.node_id.clone(), token));
                }
            }
        }
        result
    }
}

/// A handle to a running engine's actor task. Cloning shares the same
/// underlying engine.
#[derive(Clone)]
pub struct EngineHandle {
    execution_id: ExecutionId,
    tx: mpsc::UnboundedSender<EngineCommand>,
}

const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

impl EngineHandle {
    #[must_use]
    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    /// §6 `StartWorkflow`: spawns the initial token at the start node.
    pub async fn start_workflow(&self, data: Map<String, Value>) -> Result<(), EngineError> {
        self.call(|reply| EngineCommand::StartWorkflow { data, reply }).await
    }

    /// §6 `GetStatus`: the current execution-wide status.
    pub async fn status(&self) -> Result<ExecutionStatus, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::GetStatus { reply: tx })?;
        tokio::time::timeout(COMMAND_TIMEOUT, rx).await.map_err(|_| EngineError::Timeout)?.map_err(|_| EngineError::EngineShutDown)
    }

    /// Bounded routing history, oldest first, for inspection/debugging.
    pub async fn history(&self) -> Result<Vec<HistoryEntry>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::GetHistory { reply: tx })?;
        tokio::time::timeout(COMMAND_TIMEOUT, rx).await.map_err(|_| EngineError::Timeout)?.map_err(|_| EngineError::EngineShutDown)
    }

    /// §4.8 `CompleteActivity` (a.k.a. `TriggerUserTask`): resolves a
    /// parked token with externally supplied data.
    pub async fn complete_activity(
        &self,
        node_id: impl Into<String>,
        token_id: TokenId,
        user_data: Map<String, Value>,
    ) -> Result<Token, ActivityApiError> {
        let node_id = node_id.into();
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(EngineCommand::CompleteActivity {
                node_id,
                token_id,
                user_data,
                reply: tx,
            })
            .map_err(|_| ActivityApiError::EngineShutDown)?;
        tokio::time::timeout(COMMAND_TIMEOUT, rx)
            .await
            .map_err(|_| ActivityApiError::EngineShutDown)?
            .map_err(|_| ActivityApiError::EngineShutDown)?
    }

    /// §4.5 `GetWaitingTokens`, scoped to one activity node.
    pub async fn waiting_tokens(&self, node_id: impl Into<String>) -> Result<Vec<WaitingTokenView>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::GetWaitingTokens { node_id: node_id.into(), reply: tx })?;
        tokio::time::timeout(COMMAND_TIMEOUT, rx).await.map_err(|_| EngineError::Timeout)?.map_err(|_| EngineError::EngineShutDown)
    }

    /// Every parked token in this execution, across all activity nodes.
    pub async fn all_waiting_tokens(&self) -> Result<Vec<(String, WaitingTokenView)>, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(EngineCommand::GetAllWaitingTokens { reply: tx })?;
        tokio::time::timeout(COMMAND_TIMEOUT, rx).await.map_err(|_| EngineError::Timeout)?.map_err(|_| EngineError::EngineShutDown)
    }

    fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.tx.send(command).map_err(|_| EngineError::EngineShutDown)
    }

    async fn call<T>(&self, build: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineCommand) -> Result<T, EngineError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx))?;
        tokio::time::timeout(COMMAND_TIMEOUT, rx).await.map_err(|_| EngineError::Timeout)?.map_err(|_| EngineError::EngineShutDown)?
    }
}

/// Spawns one node worker per node in `definition`, plus the engine's own
/// coordinating task, and returns a handle to it.
///
/// Worker dispatch is §9's "tagged union plus a switch": every node kind
/// runs inside its own `tokio` task (its own mailbox), so the actor model
/// is per-node, not per-kind.
pub fn spawn_engine(execution_id: ExecutionId, definition: Definition, registry: Arc<CallableRegistry>, sink: Arc<dyn NodeExecutionSink>) -> EngineHandle {
    let (engine_tx, mut engine_rx) = mpsc::unbounded_channel::<EngineEvent>();
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<EngineCommand>();

    let mut workers = Vec::new();
    let mut node_index = HashMap::new();
    for spec in definition.nodes() {
        let node_type = format!("{:?}", spec.kind).to_lowercase();
        let handle = spawn_worker(spec, node_type, Arc::clone(&registry), engine_tx.clone());
        node_index.insert(spec.id.clone(), workers.len());
        workers.push(handle);
    }

    let mut state = EngineState {
        execution_id,
        definition,
        workers,
        node_index,
        sink,
        tracker_handles: HashMap::new(),
        waiting: HashMap::new(),
        status: ExecutionStatus::Initialized,
        live_tokens: 0,
        terminated_tokens: 0,
        history: RingBuffer::new(HISTORY_CAPACITY),
    };

    tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = engine_rx.recv() => {
                    state.handle_event(event).await;
                }
                Some(command) = cmd_rx.recv() => {
                    match command {
                        EngineCommand::StartWorkflow { data, reply } => {
                            let _ = reply.send(state.start_workflow(data).await);
                        }
                        EngineCommand::GetStatus { reply } => {
                            let _ = reply.send(state.status);
                        }
                        EngineCommand::GetHistory { reply } => {
                            let _ = reply.send(state.history.iter().cloned().collect());
                        }
                        EngineCommand::CompleteActivity { node_id, token_id, user_data, reply } => {
                            let _ = reply.send(state.complete_activity(node_id, token_id, user_data).await);
                        }
                        EngineCommand::GetWaitingTokens { node_id, reply } => {
                            let _ = reply.send(state.waiting_tokens(&node_id).await);
                        }
                        EngineCommand::GetAllWaitingTokens { reply } => {
                            let _ = reply.send(state.all_waiting_tokens().await);
                        }
                    }
                }
                else => break,
            }
        }
    });

    EngineHandle { execution_id, tx: cmd_tx }
}

impl Clone for HistoryEntry {
    fn clone(&self) -> Self {
        Self {
            node_id: self.node_id.clone(),
            token_id: self.token_id,
            event: self.event,
        }
    }
}

/// Convenience constructor using [`NullSink`] and an empty registry, for
/// tests and embeddings that need no callables or audit trail.
#[must_use]
pub fn spawn_bare_engine(execution_id: ExecutionId, definition: Definition) -> EngineHandle {
    spawn_engine(execution_id, definition, Arc::new(CallableRegistry::new()), Arc::new(NullSink))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::{DefinitionDocument, NodeDocument};
    use tokenflow_core::DefinitionId;

    fn node(id: &str, kind: &str, next: &[&str]) -> NodeDocument {
        NodeDocument {
            id: id.to_string(),
            node_type: kind.to_string(),
            name: None,
            next_nodes: next.iter().map(|s| s.to_string()).collect(),
            activity_type: None,
            form_fields: Vec::new(),
            script: None,
            gateway_type: None,
            work_fn: None,
            condition_fn: None,
        }
    }

    fn linear_definition() -> Definition {
        let document = DefinitionDocument {
            start_node_id: "start".to_string(),
            nodes: vec![
                node("start", "start", &["a"]),
                {
                    let mut n = node("a", "activity", &["end"]);
                    n.activity_type = Some("service".to_string());
                    n
                },
                node("end", "end", &[]),
            ],
        };
        Definition::from_document(DefinitionId::new(), document).unwrap()
    }

    #[tokio::test]
    async fn linear_workflow_runs_to_completion() {
        let engine = spawn_bare_engine(ExecutionId::new(), linear_definition());
        engine.start_workflow(Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status().await.unwrap(), ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn user_task_parks_execution_until_completed() {
        let document = DefinitionDocument {
            start_node_id: "start".to_string(),
            nodes: vec![
                node("start", "start", &["u"]),
                {
                    let mut n = node("u", "user_task", &["end"]);
                    n.activity_type = Some("user".to_string());
                    n
                },
                node("end", "end", &[]),
            ],
        };
        let definition = Definition::from_document(DefinitionId::new(), document).unwrap();
        let engine = spawn_bare_engine(ExecutionId::new(), definition);
        engine.start_workflow(Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status().await.unwrap(), ExecutionStatus::Waiting);

        let waiting = engine.waiting_tokens("u").await.unwrap();
        assert_eq!(waiting.len(), 1);
        let token_id = waiting[0].id;

        engine.complete_activity("u", token_id, Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status().await.unwrap(), ExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn completing_wrong_node_is_rejected() {
        let document = DefinitionDocument {
            start_node_id: "start".to_string(),
            nodes: vec![
                node("start", "start", &["u"]),
                {
                    let mut n = node("u", "user_task", &["end"]);
                    n.activity_type = Some("user".to_string());
                    n
                },
                node("end", "end", &[]),
            ],
        };
        let definition = Definition::from_document(DefinitionId::new(), document).unwrap();
        let engine = spawn_bare_engine(ExecutionId::new(), definition);
        engine.start_workflow(Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let waiting = engine.waiting_tokens("u").await.unwrap();
        let token_id = waiting[0].id;

        let err = engine.complete_activity("end", token_id, Map::new()).await.unwrap_err();
        assert!(matches!(err, ActivityApiError::TokenAtDifferentNode { .. }));
    }

    #[tokio::test]
    async fn completing_unknown_token_is_rejected() {
        let engine = spawn_bare_engine(ExecutionId::new(), linear_definition());
        let err = engine.complete_activity("a", TokenId::new(), Map::new()).await.unwrap_err();
        assert!(matches!(err, ActivityApiError::TokenNotWaiting { .. }));
    }

    #[tokio::test]
    async fn parallel_gateway_waits_for_all_branches_before_completing() {
        let document = DefinitionDocument {
            start_node_id: "start".to_string(),
            nodes: vec![
                node("start", "start", &["g"]),
                {
                    let mut n = node("g", "gateway", &["end1", "end2"]);
                    n.gateway_type = Some("parallel".to_string());
                    n
                },
                node("end1", "end", &[]),
                node("end2", "end", &[]),
            ],
        };
        let definition = Definition::from_document(DefinitionId::new(), document).unwrap();
        let engine = spawn_bare_engine(ExecutionId::new(), definition);
        engine.start_workflow(Map::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(engine.status().await.unwrap(), ExecutionStatus::Completed);
        let history = engine.history().await.unwrap();
        assert!(history.iter().any(|h| h.node_id == "end1"));
        assert!(history.iter().any(|h| h.node_id == "end2"));
    }
}
