use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use performance_engine::config::ConfigError;
use performance_engine::scoring::ScoringError;
use performance_engine::store::StoreError;
use performance_engine::telemetry::TelemetryError;
use serde_json::json;

#[derive(Debug)]
pub enum ApiError {
    MissingTenant,
    MissingParameter(&'static str),
    NotFound(&'static str),
    Config(ConfigError),
    Telemetry(TelemetryError),
    Io(std::io::Error),
    Server(axum::Error),
    Engine(ScoringError),
    Store(StoreError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::MissingTenant => write!(f, "missing x-tenant-id header"),
            ApiError::MissingParameter(name) => write!(f, "missing parameter '{name}'"),
            ApiError::NotFound(what) => write!(f, "{what} not found"),
            ApiError::Config(err) => write!(f, "configuration error: {err}"),
            ApiError::Telemetry(err) => write!(f, "telemetry error: {err}"),
            ApiError::Io(err) => write!(f, "io error: {err}"),
            ApiError::Server(err) => write!(f, "server error: {err}"),
            ApiError::Engine(err) => write!(f, "evaluation error: {err}"),
            ApiError::Store(err) => write!(f, "store error: {err}"),
        }
    }
}

impl std::error::Error for ApiError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApiError::MissingTenant
            | ApiError::MissingParameter(_)
            | ApiError::NotFound(_) => None,
            ApiError::Config(err) => Some(err),
            ApiError::Telemetry(err) => Some(err),
            ApiError::Io(err) => Some(err),
            ApiError::Server(err) => Some(err),
            ApiError::Engine(err) => Some(err),
            ApiError::Store(err) => Some(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            ApiError::MissingTenant | ApiError::MissingParameter(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            // Parsing, formula, and configuration faults all surface as
            // internal errors at the boundary.
            ApiError::Config(_)
            | ApiError::Telemetry(_)
            | ApiError::Io(_)
            | ApiError::Server(_)
            | ApiError::Engine(_)
            | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<ConfigError> for ApiError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<TelemetryError> for ApiError {
    fn from(value: TelemetryError) -> Self {
        Self::Telemetry(value)
    }
}

impl From<std::io::Error> for ApiError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<axum::Error> for ApiError {
    fn from(value: axum::Error) -> Self {
        Self::Server(value)
    }
}

impl From<ScoringError> for ApiError {
    fn from(value: ScoringError) -> Self {
        Self::Engine(value)
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}
