use std::collections::HashSet;
use tracing::debug;

use index::RelationshipRecord;

use crate::entities::ScoredEntity;

/// Keeps relationships between selected entities, strongest first.
///
/// Ranked by rank (endpoint degree sum), then weight, both descending, then id.
#[derive(Debug, Clone)]
pub struct RelationshipsSelector {
    max_relationships: usize,
}

impl RelationshipsSelector {
    pub fn new(max_relationships: usize) -> Self {
        Self { max_relationships }
    }

    pub fn run(
        &self,
        entities: &[ScoredEntity],
        relationships: &[RelationshipRecord],
    ) -> Vec<RelationshipRecord> {
        let selected: HashSet<&str> = entities.iter().map(|e| e.entity.id.as_str()).collect();

        let mut seen = HashSet::new();
        let mut in_network: Vec<&RelationshipRecord> = relationships
            .iter()
            .filter(|r| selected.contains(r.source.as_str()) && selected.contains(r.target.as_str()))
            .filter(|&r| seen.insert(r.id.as_str()))
            .collect();

        in_network.sort_by(|a, b| {
            b.rank
                .cmp(&a.rank)
                .then_with(|| b.weight.total_cmp(&a.weight))
                .then_with(|| a.id.cmp(&b.id))
        });
        in_network.truncate(self.max_relationships);

        debug!(selected = in_network.len(), "Selected relationships");
        in_network.into_iter().cloned().collect()
    }
}
