//! Error types for the engine crate.
//!
//! - `DefinitionError`: loading/validating a definition document
//! - `EngineError`: the engine's synchronous command surface
//! - `ActivityApiError`: the external completion bridge

use std::fmt;
use tokenflow_core::TokenId;

/// Errors raised while parsing or validating a definition document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionError {
    /// `start_node_id` does not reference any node in the document.
    MissingStartNode { start_node_id: String },
    /// The node referenced by `start_node_id` is not of kind `start`.
    StartNodeWrongKind { start_node_id: String, actual_kind: String },
    /// A node's `type` field did not match any known kind.
    UnknownNodeType { node_id: String, node_type: String },
    /// Two nodes in the document share the same id.
    DuplicateNodeId { node_id: String },
    /// A `next_nodes` entry does not resolve to any node in the document.
    DanglingSuccessor { node_id: String, successor: String },
    /// An activity node is missing its required `activity_type`.
    MissingActivityType { node_id: String },
    /// A gateway node is missing its required `gateway_type`.
    MissingGatewayType { node_id: String },
}

impl fmt::Display for DefinitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingStartNode { start_node_id } => {
                write!(f, "start_node_id '{start_node_id}' does not reference a node in this document")
            }
            Self::StartNodeWrongKind { start_node_id, actual_kind } => {
                write!(f, "start node '{start_node_id}' has kind '{actual_kind}', expected 'start'")
            }
            Self::UnknownNodeType { node_id, node_type } => {
                write!(f, "node '{node_id}' has unknown type '{node_type}'")
            }
            Self::DuplicateNodeId { node_id } => {
                write!(f, "duplicate node id '{node_id}'")
            }
            Self::DanglingSuccessor { node_id, successor } => {
                write!(f, "node '{node_id}' points to unknown successor '{successor}'")
            }
            Self::MissingActivityType { node_id } => {
                write!(f, "activity node '{node_id}' is missing activity_type")
            }
            Self::MissingGatewayType { node_id } => {
                write!(f, "gateway node '{node_id}' is missing gateway_type")
            }
        }
    }
}

impl std::error::Error for DefinitionError {}

/// Errors from the engine's command surface (§6/§7).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// `AddNode` with a kind the engine does not recognize.
    UnknownNodeType { kind: String },
    /// `AddNode` with an id that is already registered.
    DuplicateNodeId { node_id: String },
    /// `StartWorkflow` called before any start node was added.
    NoStartNode,
    /// A synchronous query exceeded its implementation-defined timeout.
    Timeout,
    /// The engine's background task is no longer running.
    EngineShutDown,
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownNodeType { kind } => write!(f, "unknown node kind '{kind}'"),
            Self::DuplicateNodeId { node_id } => {
                write!(f, "node id '{node_id}' is already registered")
            }
            Self::NoStartNode => write!(f, "engine has no start node"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::EngineShutDown => write!(f, "engine task is no longer running"),
        }
    }
}

impl std::error::Error for EngineError {}

/// Errors from the external activity-completion bridge (§4.8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivityApiError {
    /// `tokenId` is not paused anywhere (active, completed, or unknown).
    TokenNotWaiting { token_id: TokenId },
    /// `tokenId` is paused, but at a different node than requested.
    TokenAtDifferentNode {
        token_id: TokenId,
        waiting_at: String,
        requested: String,
    },
    /// The worker holding `tokenId` reports it as absent from its local table.
    ///
    /// Distinct from `TokenNotWaiting`: this can only happen if the engine's
    /// mirrored waiting-set and the worker's authoritative table disagree.
    TokenNotFound { token_id: TokenId },
    /// The engine backing this API is no longer running.
    EngineShutDown,
}

impl fmt::Display for ActivityApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TokenNotWaiting { token_id } => {
                write!(f, "token {token_id} is not waiting at any activity")
            }
            Self::TokenAtDifferentNode {
                token_id,
                waiting_at,
                requested,
            } => {
                write!(
                    f,
                    "token {token_id} is waiting at '{waiting_at}', not '{requested}'"
                )
            }
            Self::TokenNotFound { token_id } => {
                write!(f, "token {token_id} not found")
            }
            Self::EngineShutDown => write!(f, "engine task is no longer running"),
        }
    }
}

impl std::error::Error for ActivityApiError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn definition_error_display() {
        let err = DefinitionError::MissingStartNode {
            start_node_id: "start".to_string(),
        };
        assert!(err.to_string().contains("start_node_id"));
    }

    #[test]
    fn engine_error_display() {
        let err = EngineError::NoStartNode;
        assert_eq!(err.to_string(), "engine has no start node");
    }

    #[test]
    fn activity_api_error_display() {
        let token_id = TokenId::new();
        let err = ActivityApiError::TokenAtDifferentNode {
            token_id,
            waiting_at: "u".to_string(),
            requested: "v".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("waiting at 'u'"));
        assert!(msg.contains("'v'"));
    }
}
