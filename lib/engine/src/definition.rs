//! Definition documents and the validated `Definition` built from them.
//!
//! The wire document (§6) is a plain serde type; `Definition::from_document`
//! resolves it into a petgraph graph so successors/validation reuse the
//! same adjacency structure the rest of the crate walks.

use crate::error::DefinitionError;
use crate::node_spec::{ActivityType, GatewayType, NodeKind, NodeSpec};
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokenflow_core::DefinitionId;

/// One node as it appears in the wire document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub next_nodes: Vec<String>,
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub form_fields: Vec<String>,
    #[serde(default)]
    pub script: Option<String>,
    #[serde(default)]
    pub gateway_type: Option<String>,
    #[serde(default)]
    pub work_fn: Option<String>,
    #[serde(default)]
    pub condition_fn: Option<String>,
}

/// The definition document accepted by the loader (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefinitionDocument {
    pub start_node_id: String,
    pub nodes: Vec<NodeDocument>,
}

/// A validated, graph-backed workflow definition.
///
/// Invariant (§3): exactly one `start_node_id`, referencing a node of kind
/// `start`; every `next_nodes` entry resolves to a node in the same
/// definition.
#[derive(Debug, Clone)]
pub struct Definition {
    pub id: DefinitionId,
    pub start_node_id: String,
    graph: DiGraph<NodeSpec, ()>,
    index: HashMap<String, NodeIndex>,
}

impl Definition {
    /// Parses and validates a wire document into a `Definition`.
    ///
    /// # Errors
    ///
    /// Returns [`DefinitionError`] if the start node is missing or of the
    /// wrong kind, a node type/activity type/gateway type is unrecognized
    /// or missing where required, a node id is duplicated, or a
    /// `next_nodes` entry is dangling.
    pub fn from_document(id: DefinitionId, doc: DefinitionDocument) -> Result<Self, DefinitionError> {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();

        for node in &doc.nodes {
            if index.contains_key(&node.id) {
                return Err(DefinitionError::DuplicateNodeId {
                    node_id: node.id.clone(),
                });
            }
            let kind = NodeKind::parse(&node.node_type).ok_or_else(|| DefinitionError::UnknownNodeType {
                node_id: node.id.clone(),
                node_type: node.node_type.clone(),
            })?;

            let activity_type = match node.activity_type.as_deref() {
                Some(raw) => Some(ActivityType::parse(raw).ok_or_else(|| DefinitionError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: raw.to_string(),
                })?),
                None if node.node_type == "user_task" => Some(ActivityType::User),
                None => None,
            };
            if kind == NodeKind::Activity && activity_type.is_none() {
                return Err(DefinitionError::MissingActivityType {
                    node_id: node.id.clone(),
                });
            }

            let gateway_type = match node.gateway_type.as_deref() {
                Some(raw) => Some(GatewayType::parse(raw).ok_or_else(|| DefinitionError::UnknownNodeType {
                    node_id: node.id.clone(),
                    node_type: raw.to_string(),
                })?),
                None => None,
            };
            if kind == NodeKind::Gateway && gateway_type.is_none() {
                return Err(DefinitionError::MissingGatewayType {
                    node_id: node.id.clone(),
                });
            }

            let spec = NodeSpec {
                id: node.id.clone(),
                name: node.name.clone(),
                kind,
                activity_type,
                gateway_type,
                work_fn: node.work_fn.clone(),
                condition_fn: node.condition_fn.clone(),
                script: node.script.clone(),
                form_fields: node.form_fields.clone(),
                next_nodes: node.next_nodes.clone(),
            };
            let idx = graph.add_node(spec);
            index.insert(node.id.clone(), idx);
        }

        for node in &doc.nodes {
            let from = index[&node.id];
            for successor in &node.next_nodes {
                let to = *index.get(successor).ok_or_else(|| DefinitionError::DanglingSuccessor {
                    node_id: node.id.clone(),
                    successor: successor.clone(),
                })?;
                graph.add_edge(from, to, ());
            }
        }

        let start_idx = index.get(&doc.start_node_id).ok_or_else(|| DefinitionError::MissingStartNode {
            start_node_id: doc.start_node_id.clone(),
        })?;
        let start_kind = graph[*start_idx].kind;
        if start_kind != NodeKind::Start {
            return Err(DefinitionError::StartNodeWrongKind {
                start_node_id: doc.start_node_id.clone(),
                actual_kind: format!("{start_kind:?}").to_lowercase(),
            });
        }

        Ok(Self {
            id,
            start_node_id: doc.start_node_id,
            graph,
            index,
        })
    }

    /// Looks up a node's spec by id.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeSpec> {
        self.index.get(node_id).map(|&idx| &self.graph[idx])
    }

    /// Iterates over every node spec in the definition, in declaration
    /// order.
    pub fn nodes(&self) -> impl Iterator<Item = &NodeSpec> {
        self.graph.node_weights()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// All node kind `end` node ids, used by the engine to know how many
    /// termination points exist.
    pub fn end_node_ids(&self) -> impl Iterator<Item = &str> {
        self.graph
            .node_weights()
            .filter(|n| n.kind == NodeKind::End)
            .map(|n| n.id.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(nodes: Vec<NodeDocument>, start: &str) -> DefinitionDocument {
        DefinitionDocument {
            start_node_id: start.to_string(),
            nodes,
        }
    }

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

    #[test]
    fn simple_linear_definition_parses() {
        let document = doc(
            vec![
                node("start", "start", &["a"]),
                {
                    let mut n = node("a", "activity", &["end"]);
                    n.activity_type = Some("service".to_string());
                    n
                },
                node("end", "end", &[]),
            ],
            "start",
        );
        let definition = Definition::from_document(DefinitionId::new(), document).unwrap();
        assert_eq!(definition.node_count(), 3);
        assert_eq!(definition.end_node_ids().collect::<Vec<_>>(), vec!["end"]);
    }

    #[test]
    fn user_task_alias_resolves_to_user_activity() {
        let document = doc(
            vec![node("start", "start", &["u"]), node("u", "user_task", &["end"]), node("end", "end", &[])],
            "start",
        );
        let definition = Definition::from_document(DefinitionId::new(), document).unwrap();
        let u = definition.node("u").unwrap();
        assert_eq!(u.activity_type, Some(ActivityType::User));
    }

    #[test]
    fn dangling_successor_is_rejected() {
        let document = doc(vec![node("start", "start", &["nowhere"])], "start");
        let err = Definition::from_document(DefinitionId::new(), document).unwrap_err();
        assert!(matches!(err, DefinitionError::DanglingSuccessor { .. }));
    }

    #[test]
    fn wrong_start_kind_is_rejected() {
        let document = doc(vec![node("a", "activity", &[]) ], "a");
        let err = Definition::from_document(DefinitionId::new(), document).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingActivityType { .. } | DefinitionError::StartNodeWrongKind { .. }));
    }

    #[test]
    fn missing_start_node_is_rejected() {
        let document = doc(vec![node("a", "start", &[])], "b");
        let err = Definition::from_document(DefinitionId::new(), document).unwrap_err();
        assert!(matches!(err, DefinitionError::MissingStartNode { .. }));
    }

    #[test]
    fn duplicate_node_id_is_rejected() {
        let document = doc(vec![node("a", "start", &[]), node("a", "end", &[])], "a");
        let err = Definition::from_document(DefinitionId::new(), document).unwrap_err();
        assert!(matches!(err, DefinitionError::DuplicateNodeId { .. }));
    }
}
