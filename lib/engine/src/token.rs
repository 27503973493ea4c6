//! The unit of flow: a value carrying payload data and a cursor to its
//! current node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokenflow_core::TokenId;

/// A token in flight through a workflow execution.
///
/// Tokens are value types: every mutation (`moved_to`, `merged_with`)
/// returns a new `Token` rather than mutating in place, matching the
/// "right-biased merge, replace rather than deep-merge" rule of the data
/// model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Unique for the lifetime of the process; cloned (not aliased) across
    /// a parallel gateway split.
    pub id: TokenId,
    /// Right-biased JSON object; nested maps replace rather than merge.
    pub data: Map<String, Value>,
    /// `None` only before the token has been forwarded anywhere.
    pub current_node: Option<String>,
    /// UTC timestamp of the last move.
    pub timestamp: DateTime<Utc>,
    /// Set when this token was spawned as a branch of another token at a
    /// parallel split; retained for execution-history reconstruction.
    pub parent: Option<TokenId>,
}

impl Token {
    /// Creates a fresh token with no current node, as produced by
    /// `StartWorkflow`.
    #[must_use]
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            id: TokenId::new(),
            data,
            current_node: None,
            timestamp: Utc::now(),
            parent: None,
        }
    }

    /// Returns a copy of this token moved to `node_id`, with a bumped
    /// timestamp. Data is unchanged.
    #[must_use]
    pub fn moved_to(&self, node_id: impl Into<String>) -> Self {
        Self {
            current_node: Some(node_id.into()),
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    /// Right-biased merge: keys in `patch` overwrite keys in `self.data`;
    /// nested objects are replaced wholesale, not recursively merged.
    #[must_use]
    pub fn merged_with(&self, patch: Map<String, Value>) -> Self {
        let mut data = self.data.clone();
        for (key, value) in patch {
            data.insert(key, value);
        }
        Self {
            data,
            timestamp: Utc::now(),
            ..self.clone()
        }
    }

    /// Spawns a branch for a parallel gateway fan-out: a new id, the
    /// original recorded as `parent`, data and current node unchanged
    /// until the branch's own execution mutates them.
    #[must_use]
    pub fn branch(&self) -> Self {
        Self {
            id: self.id.child(),
            parent: Some(self.id),
            ..self.clone()
        }
    }

    /// Writes `{"error": message}` into the token's data, matching the
    /// `WorkerFailure` recovery rule: poison the data and continue.
    #[must_use]
    pub fn with_error(&self, message: impl Into<String>) -> Self {
        self.merged_with(Map::from_iter([(
            "error".to_string(),
            Value::String(message.into()),
        )]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn new_token_has_no_current_node() {
        let token = Token::new(Map::new());
        assert!(token.current_node.is_none());
    }

    #[test]
    fn moved_to_sets_current_node_and_preserves_data() {
        let token = Token::new(map(&[("x", Value::from(1))]));
        let moved = token.moved_to("a");
        assert_eq!(moved.current_node.as_deref(), Some("a"));
        assert_eq!(moved.data, token.data);
        assert_eq!(moved.id, token.id);
    }

    #[test]
    fn merged_with_is_right_biased_and_shallow() {
        let token = Token::new(map(&[("a", Value::from(1)), ("b", Value::from(2))]));
        let merged = token.merged_with(map(&[("b", Value::from(3)), ("c", Value::from(4))]));
        assert_eq!(merged.data.get("a"), Some(&Value::from(1)));
        assert_eq!(merged.data.get("b"), Some(&Value::from(3)));
        assert_eq!(merged.data.get("c"), Some(&Value::from(4)));
    }

    #[test]
    fn branch_clones_id_and_sets_parent() {
        let token = Token::new(Map::new());
        let branch = token.branch();
        assert_ne!(branch.id, token.id);
        assert_eq!(branch.parent, Some(token.id));
    }

    #[test]
    fn with_error_writes_error_key() {
        let token = Token::new(Map::new());
        let errored = token.with_error("boom");
        assert_eq!(errored.data.get("error"), Some(&Value::from("boom")));
    }
}
