//! Maps engine errors onto HTTP responses (§10.5).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use std::fmt;
use tokenflow_engine::{ActivityApiError, DefinitionError, EngineError};

#[derive(Debug)]
pub enum ApiError {
    Definition(DefinitionError),
    Engine(EngineError),
    Activity(ActivityApiError),
    NotFound { resource: &'static str, id: String },
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Definition(e) => write!(f, "{e}"),
            Self::Engine(e) => write!(f, "{e}"),
            Self::Activity(e) => write!(f, "{e}"),
            Self::NotFound { resource, id } => write!(f, "{resource} '{id}' not found"),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<DefinitionError> for ApiError {
    fn from(err: DefinitionError) -> Self {
        Self::Definition(err)
    }
}

impl From<EngineError> for ApiError {
    fn from(err: EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<ActivityApiError> for ApiError {
    fn from(err: ActivityApiError) -> Self {
        Self::Activity(err)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::Definition(_) => StatusCode::BAD_REQUEST,
            Self::Engine(EngineError::NoStartNode | EngineError::UnknownNodeType { .. } | EngineError::DuplicateNodeId { .. }) => StatusCode::BAD_REQUEST,
            Self::Engine(EngineError::Timeout | EngineError::EngineShutDown) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Activity(ActivityApiError::TokenAtDifferentNode { .. } | ActivityApiError::TokenNotWaiting { .. }) => StatusCode::CONFLICT,
            Self::Activity(ActivityApiError::TokenNotFound { .. }) => StatusCode::NOT_FOUND,
            Self::Activity(ActivityApiError::EngineShutDown) => StatusCode::SERVICE_UNAVAILABLE,
        };
        (status, Json(ErrorBody { error: self.to_string() })).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokenflow_core::TokenId;

    #[test]
    fn token_at_different_node_maps_to_conflict() {
        let err = ApiError::Activity(ActivityApiError::TokenAtDifferentNode {
            token_id: TokenId::new(),
            waiting_at: "a".to_string(),
            requested: "b".to_string(),
        });
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[test]
    fn no_start_node_maps_to_bad_request() {
        let err = ApiError::Engine(EngineError::NoStartNode);
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
