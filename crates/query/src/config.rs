use serde::{Deserialize, Serialize};

use crate::error::SelectionError;

/// Budgets for one local-search context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSearchConfig {
    pub max_entities: usize,
    /// Entities scoring below this are dropped, unless nothing would remain.
    pub min_entity_score: f32,
    pub max_text_units: usize,
    pub max_text_unit_tokens: usize,
    pub max_relationships: usize,
}

impl Default for LocalSearchConfig {
    fn default() -> Self {
        Self {
            max_entities: 10,
            min_entity_score: 0.0,
            max_text_units: 5,
            max_text_unit_tokens: 4000,
            max_relationships: 10,
        }
    }
}

impl LocalSearchConfig {
    pub fn validate(&self) -> Result<(), SelectionError> {
        let budgets = [
            ("max_entities", self.max_entities),
            ("max_text_units", self.max_text_units),
            ("max_text_unit_tokens", self.max_text_unit_tokens),
            ("max_relationships", self.max_relationships),
        ];
        match budgets.into_iter().find(|(_, value)| *value == 0) {
            Some((name, _)) => Err(SelectionError::InvalidBudget(name)),
            None => Ok(()),
        }
    }
}
