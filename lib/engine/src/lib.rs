//! Token-based workflow execution engine.
//!
//! A [`definition::Definition`] is a validated, petgraph-backed graph of
//! [`node_spec::NodeSpec`]s. [`engine::spawn_engine`] spawns one `tokio`
//! task per node (each a single-consumer mailbox) plus a coordinating
//! engine task, and returns an [`engine::EngineHandle`] used to start a
//! workflow, query its status, and complete parked activities.

pub mod definition;
pub mod engine;
pub mod error;
pub mod message;
pub mod node_spec;
pub mod registry;
pub mod store;
pub mod token;
pub mod tracker;
pub mod worker;

pub use definition::{Definition, DefinitionDocument, NodeDocument};
pub use engine::{spawn_bare_engine, spawn_engine, EngineHandle, ExecutionStatus, HistoryEntry};
pub use error::{ActivityApiError, DefinitionError, EngineError};
pub use node_spec::{ActivityType, GatewayType, NodeKind, NodeSpec};
pub use registry::{CallableRegistry, ConditionFn, WorkFn};
pub use store::{DefinitionStore, Execution, ExecutionStore, InMemoryDefinitionStore, InMemoryExecutionStore, NodeExecution};
pub use token::Token;
pub use tracker::{LoggingSink, NodeExecutionSink, NodeExecutionStart, NullSink, TrackerHandle};
