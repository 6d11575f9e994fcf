use serde::{Deserialize, Serialize};

/// One entity as observed in a single text unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMention {
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    #[serde(default)]
    pub text_unit_ids: Vec<String>,
}

/// One relationship as observed in a single text unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMention {
    pub source: String,
    pub target: String,
    pub description: String,
    pub weight: f64,
    #[serde(default)]
    pub text_unit_ids: Vec<String>,
}

/// The graph extracted from exactly one text unit.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalGraphFragment {
    pub text_unit_id: String,
    pub entities: Vec<EntityMention>,
    pub relationships: Vec<RelationshipMention>,
}

impl LocalGraphFragment {
    /// Attribute every node and edge to `text_unit_id` alone.
    pub fn tag_provenance(&mut self, text_unit_id: &str) {
        self.text_unit_id = text_unit_id.to_string();

        for entity in &mut self.entities {
            entity.text_unit_ids = vec![text_unit_id.to_string()];
        }
        for relationship in &mut self.relationships {
            relationship.text_unit_ids = vec![text_unit_id.to_string()];
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relationships.is_empty()
    }
}
