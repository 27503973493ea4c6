//! Node specification types: the per-node configuration carried by a
//! [`crate::definition::Definition`].

use serde::{Deserialize, Serialize};

/// The four node kinds a definition may contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Start,
    End,
    Activity,
    Gateway,
}

impl NodeKind {
    /// Parses the wire-format `type` string, treating `user_task` as the
    /// alias for `activity` it is documented to be.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "start" => Some(Self::Start),
            "end" => Some(Self::End),
            "activity" | "user_task" => Some(Self::Activity),
            "gateway" => Some(Self::Gateway),
            _ => None,
        }
    }
}

/// The four activity variants (§4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Service,
    User,
    Manual,
    Script,
}

impl ActivityType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "service" => Some(Self::Service),
            "user" => Some(Self::User),
            "manual" => Some(Self::Manual),
            "script" => Some(Self::Script),
            _ => None,
        }
    }

    /// `true` for the externally-completed variants (§4.5: "user and
    /// manual — externally-completed").
    #[must_use]
    pub fn pauses(self) -> bool {
        matches!(self, Self::User | Self::Manual)
    }
}

impl std::fmt::Display for ActivityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Service => "service",
            Self::User => "user",
            Self::Manual => "manual",
            Self::Script => "script",
        };
        write!(f, "{s}")
    }
}

/// The three gateway routing strategies (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayType {
    Exclusive,
    Parallel,
    Inclusive,
}

impl GatewayType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "exclusive" => Some(Self::Exclusive),
            "parallel" => Some(Self::Parallel),
            "inclusive" => Some(Self::Inclusive),
            _ => None,
        }
    }
}

/// One node's full configuration, resolved from the wire document into
/// strongly-typed fields. `next_nodes` order is significant: it is the
/// tie-break order for gateway fallbacks (§4.6) and the fan-out order
/// for `start`/`parallel` (§4.3, §4.6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub name: Option<String>,
    pub kind: NodeKind,
    pub activity_type: Option<ActivityType>,
    pub gateway_type: Option<GatewayType>,
    /// Name of a callable registered in the `CallableRegistry`, invoked as
    /// `workFn(token) -> token'` for service/script activities.
    pub work_fn: Option<String>,
    /// Name of a callable registered in the `CallableRegistry`, invoked as
    /// `conditionFn(token, candidate) -> bool` for exclusive/inclusive
    /// gateways.
    pub condition_fn: Option<String>,
    pub script: Option<String>,
    pub form_fields: Vec<String>,
    pub next_nodes: Vec<String>,
}

impl NodeSpec {
    /// `true` if this activity node pauses for external completion.
    #[must_use]
    pub fn pauses(&self) -> bool {
        self.kind == NodeKind::Activity && self.activity_type.is_some_and(ActivityType::pauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_task_parses_as_activity() {
        assert_eq!(NodeKind::parse("user_task"), Some(NodeKind::Activity));
    }

    #[test]
    fn unknown_kind_is_none() {
        assert_eq!(NodeKind::parse("bogus"), None);
    }

    #[test]
    fn user_and_manual_pause() {
        assert!(ActivityType::User.pauses());
        assert!(ActivityType::Manual.pauses());
        assert!(!ActivityType::Service.pauses());
        assert!(!ActivityType::Script.pauses());
    }
}
