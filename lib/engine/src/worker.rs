//! Per-kind node workers (§4.2–§4.6).
//!
//! Each worker kind is a variant of [`NodeWorkerState`] rather than a trait
//! object: the design notes (§9 "Actor mailbox model") call this out
//! explicitly as the realization of actor dispatch-by-kind in a language
//! without actors — "a tagged union plus a switch." Each worker still runs
//! on its own `tokio` task with its own mailbox (`spawn_worker`), so the
//! dispatch-by-tag happens inside one actor, not across a shared table.

use crate::message::{CompleteOutcome, EngineEvent, WaitingTokenView, WorkerCommand};
use crate::node_spec::{ActivityType, GatewayType, NodeSpec};
use crate::registry::CallableRegistry;
use crate::token::Token;
use std::collections::HashMap;
use std::sync::Arc;
use tokenflow_core::TokenId;
use tokio::sync::mpsc;

/// Handle to a running worker's mailbox.
#[derive(Clone)]
pub struct WorkerHandle {
    pub node_id: String,
    pub node_type: String,
    tx: mpsc::UnboundedSender<WorkerCommand>,
}

impl WorkerHandle {
    pub fn send(&self, command: WorkerCommand) {
        // The worker task only stops once the engine drops every handle to
        // it, so a send failure here means the engine itself is shutting
        // down; there is nothing left to report it to.
        let _ = self.tx.send(command);
    }
}

struct ActivityState {
    activity_type: ActivityType,
    work_fn: Option<String>,
    script: Option<String>,
    form_fields: Vec<String>,
    next_nodes: Vec<String>,
    waiting: HashMap<TokenId, Token>,
}

struct GatewayState {
    gateway_type: GatewayType,
    condition_fn: Option<String>,
    next_nodes: Vec<String>,
}

enum WorkerState {
    Start { next_nodes: Vec<String> },
    End,
    Activity(ActivityState),
    Gateway(GatewayState),
}

impl WorkerState {
    fn from_spec(spec: &NodeSpec) -> Self {
        use crate::node_spec::NodeKind;
        match spec.kind {
            NodeKind::Start => Self::Start {
                next_nodes: spec.next_nodes.clone(),
            },
            NodeKind::End => Self::End,
            NodeKind::Activity => Self::Activity(ActivityState {
                activity_type: spec.activity_type.expect("validated by Definition::from_document"),
                work_fn: spec.work_fn.clone(),
                script: spec.script.clone(),
                form_fields: spec.form_fields.clone(),
                next_nodes: spec.next_nodes.clone(),
                waiting: HashMap::new(),
            }),
            NodeKind::Gateway => Self::Gateway(GatewayState {
                gateway_type: spec.gateway_type.expect("validated by Definition::from_document"),
                condition_fn: spec.condition_fn.clone(),
                next_nodes: spec.next_nodes.clone(),
            }),
        }
    }

    /// §4.2 common contract, specialized per kind.
    fn execute(&mut self, node_id: &str, token: Token, registry: &CallableRegistry) -> Vec<EngineEvent> {
        let token = token.moved_to(node_id);
        match self {
            Self::Start { next_nodes } => start_execute(node_id, token, next_nodes),
            Self::End => end_execute(node_id, token),
            Self::Activity(state) => activity_execute(node_id, token, state, registry),
            Self::Gateway(state) => gateway_execute(node_id, token, state, registry),
        }
    }

    fn complete(&mut self, token_id: TokenId, user_data: serde_json::Map<String, serde_json::Value>) -> (CompleteOutcome, Vec<EngineEvent>) {
        let Self::Activity(state) = self else {
            return (CompleteOutcome::TokenNotFound, Vec::new());
        };
        let Some(token) = state.waiting.remove(&token_id) else {
            return (CompleteOutcome::TokenNotFound, Vec::new());
        };
        let completed = token.merged_with(user_data);
        let node_id = completed.current_node.clone().unwrap_or_default();
        let mut events = vec![EngineEvent::ActivityCompleted {
            node_id: node_id.clone(),
            token: completed.clone(),
        }];
        for successor in &state.next_nodes {
            events.push(EngineEvent::ForwardToken {
                node_id: successor.clone(),
                token: completed.clone(),
            });
        }
        (CompleteOutcome::Completed(completed), events)
    }

    fn waiting_snapshot(&self) -> Vec<WaitingTokenView> {
        let Self::Activity(state) = self else {
            return Vec::new();
        };
        state
            .waiting
            .values()
            .map(|token| WaitingTokenView {
                id: token.id,
                data: token.data.clone(),
                timestamp: token.timestamp,
                activity_type: state.activity_type.to_string(),
                form_fields: state.form_fields.clone(),
            })
            .collect()
    }
}

fn start_execute(node_id: &str, token: Token, next_nodes: &[String]) -> Vec<EngineEvent> {
    let mut events = vec![EngineEvent::NodeExecuted {
        node_id: node_id.to_string(),
        token: token.clone(),
    }];
    for successor in next_nodes {
        events.push(EngineEvent::ForwardToken {
            node_id: successor.clone(),
            token: token.clone(),
        });
    }
    events
}

fn end_execute(node_id: &str, token: Token) -> Vec<EngineEvent> {
    vec![
        EngineEvent::NodeExecuted {
            node_id: node_id.to_string(),
            token: token.clone(),
        },
        EngineEvent::WorkflowCompleted {
            node_id: node_id.to_string(),
            token,
        },
    ]
}

fn activity_execute(node_id: &str, token: Token, state: &mut ActivityState, registry: &CallableRegistry) -> Vec<EngineEvent> {
    if state.activity_type.pauses() {
        state.waiting.insert(token.id, token.clone());
        return vec![
            EngineEvent::NodeExecuted {
                node_id: node_id.to_string(),
                token: token.clone(),
            },
            EngineEvent::ActivityWaiting {
                node_id: node_id.to_string(),
                token,
            },
        ];
    }

    // service and script both apply a work unit and continue; script's
    // "work unit" is a pre-registered callable looked up by the script
    // field's name rather than evaluated as free-form source (§4.5: "Script
    // -from-string evaluation is an open hazard ... implementations may
    // restrict to pre-registered callables").
    let callable_name = match state.activity_type {
        ActivityType::Service => state.work_fn.as_deref(),
        ActivityType::Script => state.script.as_deref(),
        ActivityType::User | ActivityType::Manual => unreachable!("handled by the pausing branch above"),
    };

    let mut events = Vec::new();
    let outgoing = match callable_name.and_then(|name| registry.work_fn(name)) {
        None => token,
        Some(work_fn) => match work_fn(&token) {
            Ok(patch) => token.merged_with(patch),
            Err(message) => {
                events.push(EngineEvent::NodeFailed {
                    node_id: node_id.to_string(),
                    token_id: token.id,
                    message: message.clone(),
                });
                token.with_error(message)
            }
        },
    };

    events.push(EngineEvent::NodeExecuted {
        node_id: node_id.to_string(),
        token: outgoing.clone(),
    });
    for successor in &state.next_nodes {
        events.push(EngineEvent::ForwardToken {
            node_id: successor.clone(),
            token: outgoing.clone(),
        });
    }
    events
}

fn gateway_execute(node_id: &str, token: Token, state: &mut GatewayState, registry: &CallableRegistry) -> Vec<EngineEvent> {
    let mut events = vec![EngineEvent::NodeExecuted {
        node_id: node_id.to_string(),
        token: token.clone(),
    }];

    let condition = state.condition_fn.as_deref().and_then(|name| registry.condition_fn(name));
    let matches = |candidate: &str| -> bool {
        match &condition {
            Some(f) => f(&token, candidate),
            None => !candidate.is_empty(),
        }
    };

    match state.gateway_type {
        GatewayType::Exclusive => {
            let chosen = state
                .next_nodes
                .iter()
                .find(|candidate| matches(candidate))
                .or_else(|| state.next_nodes.first());
            if let Some(successor) = chosen {
                events.push(EngineEvent::ForwardToken {
                    node_id: successor.clone(),
                    token,
                });
            }
        }
        GatewayType::Parallel => {
            for successor in &state.next_nodes {
                events.push(EngineEvent::ForwardToken {
                    node_id: successor.clone(),
                    token: token.branch(),
                });
            }
        }
        GatewayType::Inclusive => {
            let matched: Vec<&String> = state.next_nodes.iter().filter(|candidate| matches(candidate)).collect();
            let targets: Vec<&String> = if matched.is_empty() {
                state.next_nodes.iter().collect()
            } else {
                matched
            };
            for successor in targets {
                events.push(EngineEvent::ForwardToken {
                    node_id: successor.clone(),
                    token: token.branch(),
                });
            }
        }
    }
    events
}

/// Spawns a node's worker task and returns a handle to its mailbox.
/// `engine_tx` is how the worker reports every event it emits back to the
/// engine's own mailbox.
pub fn spawn_worker(
    spec: &NodeSpec,
    node_type: String,
    registry: Arc<CallableRegistry>,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
) -> WorkerHandle {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerCommand>();
    let node_id = spec.id.clone();
    let mut state = WorkerState::from_spec(spec);

    tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            match command {
                WorkerCommand::Execute(token) => {
                    for event in state.execute(&node_id, token, &registry) {
                        let _ = engine_tx.send(event);
                    }
                }
                WorkerCommand::Complete { token_id, user_data, reply } => {
                    let (outcome, events) = state.complete(token_id, user_data);
                    for event in events {
                        let _ = engine_tx.send(event);
                    }
                    let _ = reply.send(outcome);
                }
                WorkerCommand::GetWaitingTokens { reply } => {
                    let _ = reply.send(state.waiting_snapshot());
                }
            }
        }
    });

    WorkerHandle { node_id: spec.id.clone(), node_type, tx }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_spec::NodeKind;
    use serde_json::Map;

    fn spec(id: &str, kind: NodeKind, next: &[&str]) -> NodeSpec {
        NodeSpec {
            id: id.to_string(),
            name: None,
            kind,
            activity_type: None,
            gateway_type: None,
            work_fn: None,
            condition_fn: None,
            script: None,
            form_fields: Vec::new(),
            next_nodes: next.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn start_emits_executed_then_forward_per_successor() {
        let s = spec("start", NodeKind::Start, &["a", "b"]);
        let mut state = WorkerState::from_spec(&s);
        let registry = CallableRegistry::new();
        let token = Token::new(Map::new());
        let events = state.execute("start", token, &registry);
        assert!(matches!(events[0], EngineEvent::NodeExecuted { .. }));
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn end_emits_executed_then_workflow_completed() {
        let s = spec("end", NodeKind::End, &[]);
        let mut state = WorkerState::from_spec(&s);
        let registry = CallableRegistry::new();
        let token = Token::new(Map::new());
        let events = state.execute("end", token, &registry);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], EngineEvent::WorkflowCompleted { .. }));
    }

    #[test]
    fn exclusive_gateway_picks_first_matching_in_order() {
        let mut s = spec("g", NodeKind::Gateway, &["a", "b", "c"]);
        s.gateway_type = Some(GatewayType::Exclusive);
        s.condition_fn = Some("always_true".to_string());
        let mut state = WorkerState::from_spec(&s);
        let mut registry = CallableRegistry::new();
        registry.register_condition_fn("always_true", Arc::new(|_t: &Token, _c: &str| true));
        let token = Token::new(Map::new());
        let events = state.execute("g", token, &registry);
        let forwards: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::ForwardToken { node_id, .. } => Some(node_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(forwards, vec!["a".to_string()]);
    }

    #[test]
    fn exclusive_gateway_falls_back_to_first_successor() {
        let mut s = spec("g", NodeKind::Gateway, &["a", "b"]);
        s.gateway_type = Some(GatewayType::Exclusive);
        s.condition_fn = Some("never".to_string());
        let mut state = WorkerState::from_spec(&s);
        let mut registry = CallableRegistry::new();
        registry.register_condition_fn("never", Arc::new(|_t: &Token, _c: &str| false));
        let token = Token::new(Map::new());
        let events = state.execute("g", token, &registry);
        let forwards: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::ForwardToken { node_id, .. } => Some(node_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(forwards, vec!["a".to_string()]);
    }

    #[test]
    fn parallel_gateway_forwards_to_every_successor_with_cloned_ids() {
        let mut s = spec("g", NodeKind::Gateway, &["a", "b", "c"]);
        s.gateway_type = Some(GatewayType::Parallel);
        let mut state = WorkerState::from_spec(&s);
        let registry = CallableRegistry::new();
        let token = Token::new(Map::new());
        let original_id = token.id;
        let events = state.execute("g", token, &registry);
        let forwards: Vec<_> = events
            .iter()
            .filter_map(|e| match e {
                EngineEvent::ForwardToken { node_id, token } => Some((node_id.clone(), token.id)),
                _ => None,
            })
            .collect();
        assert_eq!(forwards.len(), 3);
        for (_, id) in &forwards {
            assert_ne!(*id, original_id);
        }
    }

    #[test]
    fn inclusive_gateway_falls_back_to_all_on_no_match() {
        let mut s = spec("g", NodeKind::Gateway, &["a", "b"]);
        s.gateway_type = Some(GatewayType::Inclusive);
        let mut state = WorkerState::from_spec(&s);
        let registry = CallableRegistry::new();
        let token = Token::new(Map::new());
        let events = state.execute("g", token, &registry);
        let forwards: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, EngineEvent::ForwardToken { .. }))
            .collect();
        assert_eq!(forwards.len(), 2);
    }

    #[test]
    fn activity_user_pauses_and_later_completes() {
        let mut s = spec("u", NodeKind::Activity, &["end"]);
        s.activity_type = Some(ActivityType::User);
        let mut state = WorkerState::from_spec(&s);
        let registry = CallableRegistry::new();
        let token = Token::new(Map::new());
        let token_id = token.id;
        let events = state.execute("u", token, &registry);
        assert!(matches!(events[1], EngineEvent::ActivityWaiting { .. }));

        let (outcome, events) = state.complete(token_id, Map::from_iter([("approved".to_string(), serde_json::Value::from(true))]));
        assert!(matches!(outcome, CompleteOutcome::Completed(_)));
        assert!(matches!(events[0], EngineEvent::ActivityCompleted { .. }));
        assert!(matches!(events[1], EngineEvent::ForwardToken { .. }));
    }

    #[test]
    fn activity_complete_on_unknown_token_is_not_found() {
        let mut s = spec("u", NodeKind::Activity, &["end"]);
        s.activity_type = Some(ActivityType::User);
        let mut state = WorkerState::from_spec(&s);
        let (outcome, events) = state.complete(TokenId::new(), Map::new());
        assert!(matches!(outcome, CompleteOutcome::TokenNotFound));
        assert!(events.is_empty());
    }

    #[test]
    fn service_work_fn_failure_poisons_data_and_still_forwards() {
        let mut s = spec("a", NodeKind::Activity, &["end"]);
        s.activity_type = Some(ActivityType::Service);
        s.work_fn = Some("boom".to_string());
        let mut state = WorkerState::from_spec(&s);
        let mut registry = CallableRegistry::new();
        registry.register_work_fn("boom", Arc::new(|_t: &Token| Err("kaboom".to_string())));
        let token = Token::new(Map::new());
        let events = state.execute("a", token, &registry);
        assert!(matches!(events[0], EngineEvent::NodeFailed { .. }));
        let EngineEvent::NodeExecuted { token, .. } = &events[1] else {
            panic!("expected NodeExecuted");
        };
        assert_eq!(token.data.get("error"), Some(&serde_json::Value::from("kaboom")));
        assert!(matches!(events[2], EngineEvent::ForwardToken { .. }));
    }
}
