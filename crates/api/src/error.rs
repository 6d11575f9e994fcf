use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, warn};

use extract::PipelineError;
use query::{SearchError, SelectionError};

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("no artifacts loaded; run /index first")]
    NotIndexed,

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error("{0}")]
    Generation(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        match err {
            SearchError::Selection(e) => Self::Selection(e),
            SearchError::Prompt(e) => Self::Pipeline(e),
            SearchError::Generation(message) => Self::Generation(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: &'static str,
}

impl ApiError {
    pub fn status_and_kind(&self) -> (StatusCode, &'static str) {
        match self {
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::NotIndexed => (StatusCode::CONFLICT, "not_indexed"),
            Self::Selection(SelectionError::EmptyCorpus) => (StatusCode::CONFLICT, "empty_corpus"),
            Self::Selection(SelectionError::EmptySelection) => {
                (StatusCode::NOT_FOUND, "empty_selection")
            }
            Self::Selection(SelectionError::Scoring(_)) => (StatusCode::BAD_GATEWAY, "scoring_failed"),
            Self::Selection(SelectionError::InvalidBudget(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "invalid_config")
            }
            Self::Pipeline(e) if e.is_contract_violation() => {
                (StatusCode::INTERNAL_SERVER_ERROR, "prompt_contract")
            }
            Self::Pipeline(PipelineError::Extraction { .. }) => {
                (StatusCode::BAD_GATEWAY, "extraction_failed")
            }
            Self::Pipeline(PipelineError::Summarization { .. }) => {
                (StatusCode::BAD_GATEWAY, "summarization_failed")
            }
            Self::Pipeline(_) => (StatusCode::BAD_GATEWAY, "model_failure"),
            Self::Generation(_) => (StatusCode::BAD_GATEWAY, "generation_failed"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.status_and_kind();
        let message = format!("{self:#}");
        if status.is_server_error() {
            error!(kind, error = %message, "Request failed");
        } else {
            warn!(kind, error = %message, "Request rejected");
        }

        (
            status,
            Json(ErrorBody {
                error: message,
                kind,
            }),
        )
            .into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_outcomes_have_distinct_statuses() {
        assert_eq!(
            ApiError::from(SelectionError::EmptyCorpus).status_and_kind(),
            (StatusCode::CONFLICT, "empty_corpus")
        );
        assert_eq!(
            ApiError::from(SearchError::Selection(SelectionError::EmptySelection)).status_and_kind(),
            (StatusCode::NOT_FOUND, "empty_selection")
        );
    }

    #[test]
    fn contract_violations_are_server_errors() {
        let err = ApiError::from(PipelineError::missing_argument("local_search", "documents"));
        assert_eq!(err.status_and_kind(), (StatusCode::INTERNAL_SERVER_ERROR, "prompt_contract"));

        let err = ApiError::from(PipelineError::Extraction {
            text_unit_id: "t1".to_string(),
            message: "bad json".to_string(),
        });
        assert_eq!(err.status_and_kind().0, StatusCode::BAD_GATEWAY);
    }
}
