//! The messages workers and the engine exchange (§2, §4.1, §4.2).

use crate::token::Token;
use tokio::sync::oneshot;

/// Events a worker sends back to the engine. The engine never reaches into
/// a worker's state directly — every observation arrives as one of these.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Dispatch `token` to `node_id`'s worker. Sent by the engine itself
    /// (self-directed, for `StartWorkflow`) or by a worker forwarding to a
    /// successor.
    ForwardToken { node_id: String, token: Token },
    /// A worker finished local processing for one visit.
    NodeExecuted { node_id: String, token: Token },
    /// An end-event worker terminated a token.
    WorkflowCompleted { node_id: String, token: Token },
    /// A user/manual activity parked a token awaiting external completion.
    ActivityWaiting { node_id: String, token: Token },
    /// A user/manual activity was completed externally and the token is
    /// live again (the worker, not the engine, issues the follow-up
    /// `ForwardToken`s).
    ActivityCompleted { node_id: String, token: Token },
    /// A worker's `workFn`/script raised; the token was poisoned but
    /// processing continued. Reported separately from `NodeExecuted` so
    /// the tracker can be told `fail` instead of `complete`.
    NodeFailed { node_id: String, token_id: tokenflow_core::TokenId, message: String },
}

/// Commands the engine (or the activity API) sends to one worker's
/// mailbox.
#[derive(Debug)]
pub enum WorkerCommand {
    /// §4.2 common contract: run this node's logic for `token`.
    Execute(Token),
    /// §4.5/§4.8: resolve a waiting token with externally supplied data.
    Complete {
        token_id: tokenflow_core::TokenId,
        user_data: serde_json::Map<String, serde_json::Value>,
        reply: oneshot::Sender<CompleteOutcome>,
    },
    /// §4.5: snapshot of tokens currently parked at this worker.
    GetWaitingTokens {
        reply: oneshot::Sender<Vec<WaitingTokenView>>,
    },
}

/// Result of a worker-local `Complete` call (§4.5's three branches,
/// `TokenNotFound` is the only error this layer can produce — the
/// `TokenAtDifferentNode`/`TokenNotWaiting` checks happen one layer up,
/// against the engine's mirrored waiting set, per §4.8).
#[derive(Debug)]
pub enum CompleteOutcome {
    Completed(Token),
    TokenNotFound,
}

/// A snapshot of one parked token, as exposed to the activity API
/// (§4.5 `GetWaitingTokens`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct WaitingTokenView {
    pub id: tokenflow_core::TokenId,
    pub data: serde_json::Map<String, serde_json::Value>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub activity_type: String,
    pub form_fields: Vec<String>,
}
