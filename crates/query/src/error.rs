use thiserror::Error;

use extract::PipelineError;

/// Why no context could be selected for a query.
#[derive(Debug, Error)]
pub enum SelectionError {
    /// The artifacts contain no entities at all.
    #[error("the index contains no entities")]
    EmptyCorpus,

    /// Entities exist but none scored as relevant.
    #[error("no entity is relevant to the query")]
    EmptySelection,

    #[error("entity scoring failed: {0}")]
    Scoring(String),

    #[error("invalid search budget: {0} must be greater than zero")]
    InvalidBudget(&'static str),
}

impl SelectionError {
    /// Expected outcomes of a query, as opposed to faults.
    pub fn is_reportable(&self) -> bool {
        matches!(self, Self::EmptyCorpus | Self::EmptySelection)
    }
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Prompt(#[from] PipelineError),

    #[error("answer generation failed: {0}")]
    Generation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_outcomes_are_reportable() {
        assert!(SelectionError::EmptyCorpus.is_reportable());
        assert!(SelectionError::EmptySelection.is_reportable());
        assert!(!SelectionError::Scoring("down".into()).is_reportable());
    }

    #[test]
    fn search_error_is_transparent_over_selection() {
        let err = SearchError::from(SelectionError::EmptyCorpus);
        assert_eq!(err.to_string(), "the index contains no entities");
    }
}
