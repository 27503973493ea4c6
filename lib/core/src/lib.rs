//! Core domain types and error handling for the tokenflow workflow engine.
//!
//! This crate provides the foundational types, error handling, and shared
//! utilities used throughout the engine, its stores, and its server.

pub mod error;
pub mod id;

pub use error::Result;
pub use id::{DefinitionId, ExecutionId, NodeExecutionId, ParseIdError, TokenId};
