use crate::error::{AggregatorError, ScoringError};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Scoring(#[from] ScoringError),

    #[error(transparent)]
    Portfolio(#[from] AggregatorError),

    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    #[error("Missing query parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Event queue is full")]
    QueueFull,

    #[error("Event ingestion is not running")]
    IngestClosed,
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Scoring(ScoringError::InvalidRequest(_))
            | ApiError::Scoring(ScoringError::Extraction(_))
            | ApiError::InvalidBody(_)
            | ApiError::MissingParameter(_) => StatusCode::BAD_REQUEST,

            ApiError::Scoring(ScoringError::ModelUnavailable { .. })
            | ApiError::QueueFull
            | ApiError::IngestClosed => StatusCode::SERVICE_UNAVAILABLE,

            ApiError::Scoring(ScoringError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,

            ApiError::Portfolio(AggregatorError::UnknownPortfolio(_)) => StatusCode::NOT_FOUND,

            ApiError::Scoring(ScoringError::Model(_))
            | ApiError::Scoring(ScoringError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            ApiError::Scoring(e) => e.kind(),
            ApiError::Portfolio(_) => "unknown_portfolio",
            ApiError::InvalidBody(_) => "invalid_body",
            ApiError::MissingParameter(_) => "missing_parameter",
            ApiError::QueueFull => "queue_full",
            ApiError::IngestClosed => "service_unavailable",
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error_type: self.error_type(),
            message: self.to_string(),
            status: self.status_code().as_u16(),
        }
    }
}

/// Error payload shared by error responses and failed batch items
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    #[serde(rename = "type")]
    pub error_type: &'static str,
    pub message: String,
    pub status: u16,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, Json(json!({ "error": self.body() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ModelError, SchemaMismatch};

    #[test]
    fn test_status_mapping() {
        let cases: Vec<(ApiError, StatusCode)> = vec![
            (
                ScoringError::Extraction(SchemaMismatch::MissingAttribute {
                    feature: "f".into(),
                    attribute: "a".into(),
                })
                .into(),
                StatusCode::BAD_REQUEST,
            ),
            (
                ScoringError::ModelUnavailable { version: None }.into(),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            (
                ScoringError::Timeout { budget_ms: 100 }.into(),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ScoringError::Model(ModelError::invalid("v", "bad")).into(),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
            (
                AggregatorError::UnknownPortfolio("p".into()).into(),
                StatusCode::NOT_FOUND,
            ),
            (ApiError::QueueFull, StatusCode::SERVICE_UNAVAILABLE),
        ];

        for (error, status) in cases {
            assert_eq!(error.status_code(), status, "{}", error);
        }
    }

    #[test]
    fn test_error_body_shape() {
        let body = serde_json::to_value(ApiError::Scoring(ScoringError::Timeout { budget_ms: 100 }).body()).unwrap();
        assert_eq!(body["type"], "scoring_timeout");
        assert_eq!(body["status"], 504);
        assert!(body["message"].as_str().unwrap().contains("100ms"));
    }
}
