use serde::{Deserialize, Serialize};

/// Errors surfaced by the indexing stages.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// A prompt was prepared without one of its required named arguments.
    #[error("prompt `{prompt}` is missing required argument `{argument}`")]
    MissingArgument {
        prompt: &'static str,
        argument: &'static str,
    },

    /// A template references a variable the chain input does not provide.
    #[error("prompt template references unbound variable `{variable}`")]
    UnboundVariable { variable: String },

    #[error("extraction failed for text unit {text_unit_id}: {message}")]
    Extraction {
        text_unit_id: String,
        message: String,
    },

    #[error("summarization failed for {target}: {message}")]
    Summarization { target: String, message: String },

    #[error("embedding failed: {message}")]
    Embedding { message: String },
}

impl PipelineError {
    pub fn missing_argument(prompt: &'static str, argument: &'static str) -> Self {
        Self::MissingArgument { prompt, argument }
    }

    /// True for errors caused by a misconfigured prompt rather than a failed unit of work.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Self::MissingArgument { .. } | Self::UnboundVariable { .. }
        )
    }
}

/// Outcome of one `prompt | model | parser` invocation.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    #[error(transparent)]
    Prompt(#[from] PipelineError),

    #[error("model call failed: {0:#}")]
    Model(anyhow::Error),

    #[error("malformed model response: {0:#}")]
    Parse(anyhow::Error),
}

/// Whether a failed unit of work stops the whole stage or is recorded and skipped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Abort,
    Skip,
}

/// A unit of work (text unit, entity or relationship) that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitFailure {
    pub id: String,
    pub message: String,
}

impl UnitFailure {
    pub fn new(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            message: message.into(),
        }
    }
}
