use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use index::{IndexerArtifacts, RelationshipRecord, TextUnitRecord};

use crate::config::LocalSearchConfig;
use crate::entities::{EntitiesSelector, ScoredEntity};
use crate::error::SelectionError;
use crate::relationships::RelationshipsSelector;
use crate::scoring::EntityScorer;
use crate::text_units::TextUnitsSelector;

/// The bounded context for one query, built fresh per call.
#[derive(Debug, Clone, Serialize)]
pub struct ContextSelectionResult {
    pub entities: Vec<ScoredEntity>,
    pub text_units: Vec<TextUnitRecord>,
    pub relationships: Vec<RelationshipRecord>,
}

impl ContextSelectionResult {
    /// Render the selection as prompt documents: entities, relationships and
    /// sources, one document per non-empty section.
    pub fn to_documents(&self) -> Vec<String> {
        let mut documents = Vec::new();

        if !self.entities.is_empty() {
            let mut doc = String::from("RELEVANT ENTITIES:\n");
            for scored in &self.entities {
                let entity = &scored.entity;
                doc.push_str(&format!(
                    "- {} ({}): {}\n",
                    entity.name, entity.entity_type, entity.description
                ));
            }
            documents.push(doc);
        }

        if !self.relationships.is_empty() {
            let mut doc = String::from("KEY RELATIONSHIPS:\n");
            for relationship in &self.relationships {
                doc.push_str(&format!(
                    "- {}: {} (weight: {})\n",
                    relationship.id, relationship.description, relationship.weight
                ));
            }
            documents.push(doc);
        }

        if !self.text_units.is_empty() {
            let mut doc = String::from("SOURCES:\n");
            for (i, unit) in self.text_units.iter().enumerate() {
                doc.push_str(&format!("[Source {}] {}\n\n", i + 1, unit.text));
            }
            documents.push(doc);
        }

        documents
    }
}

/// Entities, then text units, then relationships, each stage under its own
/// budget. Never mutates the artifacts.
pub struct ContextSelector {
    entities: EntitiesSelector,
    text_units: TextUnitsSelector,
    relationships: RelationshipsSelector,
}

impl ContextSelector {
    pub fn new(
        entities: EntitiesSelector,
        text_units: TextUnitsSelector,
        relationships: RelationshipsSelector,
    ) -> Self {
        Self {
            entities,
            text_units,
            relationships,
        }
    }

    pub fn from_config(
        scorer: Arc<dyn EntityScorer>,
        config: &LocalSearchConfig,
    ) -> Result<Self, SelectionError> {
        config.validate()?;
        Ok(Self::new(
            EntitiesSelector::new(scorer, config.max_entities)
                .with_min_score(config.min_entity_score),
            TextUnitsSelector::new(config.max_text_units, config.max_text_unit_tokens),
            RelationshipsSelector::new(config.max_relationships),
        ))
    }

    pub async fn run(
        &self,
        query: &str,
        artifacts: &IndexerArtifacts,
    ) -> Result<ContextSelectionResult, SelectionError> {
        let entities = self.entities.run(query, &artifacts.entities).await?;

        let text_units =
            self.text_units
                .run(&entities, &artifacts.relationships, &artifacts.text_units);

        let relationships = self.relationships.run(&entities, &artifacts.relationships);

        info!(
            entities = entities.len(),
            text_units = text_units.len(),
            relationships = relationships.len(),
            "Context selected"
        );

        Ok(ContextSelectionResult {
            entities,
            text_units,
            relationships,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::scoring::tests::FixedScorer;
    use extract::{EntityMention, LocalGraphFragment, RelationshipMention};
    use index::{GraphKind, GraphMerger};
    use ingest::TextUnit;
    use std::collections::{HashMap, HashSet};

    fn mention(name: &str) -> EntityMention {
        EntityMention {
            name: name.to_string(),
            entity_type: "PERSON".to_string(),
            description: format!("{name} is a person"),
            text_unit_ids: Vec::new(),
        }
    }

    fn link(source: &str, target: &str) -> RelationshipMention {
        RelationshipMention {
            source: source.to_string(),
            target: target.to_string(),
            description: format!("{source} knows {target}"),
            weight: 1.0,
            text_unit_ids: Vec::new(),
        }
    }

    /// A and B linked in t1, B and C linked in t2, A alone in t3.
    pub(crate) fn artifacts() -> IndexerArtifacts {
        let units = vec![
            TextUnit::with_id("t1", "doc", "A met B."),
            TextUnit::with_id("t2", "doc", "B met C."),
            TextUnit::with_id("t3", "doc", "A rested."),
        ];
        let fragments = vec![
            LocalGraphFragment {
                text_unit_id: "t1".to_string(),
                entities: vec![mention("A"), mention("B")],
                relationships: vec![link("A", "B")],
            },
            LocalGraphFragment {
                text_unit_id: "t2".to_string(),
                entities: vec![mention("B"), mention("C")],
                relationships: vec![link("B", "C")],
            },
            LocalGraphFragment {
                text_unit_id: "t3".to_string(),
                entities: vec![mention("A")],
                relationships: vec![],
            },
        ];
        let graph = GraphMerger::new(GraphKind::Undirected).merge(&fragments);
        IndexerArtifacts::from_graph(graph, &units)
    }

    fn selector(scores: &[(&'static str, f32)], config: LocalSearchConfig) -> ContextSelector {
        let scorer = Arc::new(FixedScorer(scores.iter().copied().collect::<HashMap<_, _>>()));
        ContextSelector::from_config(scorer, &config).unwrap()
    }

    fn assert_postconditions(result: &ContextSelectionResult, config: &LocalSearchConfig) {
        assert!(result.entities.len() <= config.max_entities);
        assert!(result.text_units.len() <= config.max_text_units);
        assert!(result.relationships.len() <= config.max_relationships);

        let entity_ids: HashSet<&str> = result.entities.iter().map(|e| e.entity.id.as_str()).collect();
        assert_eq!(entity_ids.len(), result.entities.len());
        for relationship in &result.relationships {
            assert!(entity_ids.contains(relationship.source.as_str()));
            assert!(entity_ids.contains(relationship.target.as_str()));
        }

        let unit_ids: HashSet<&str> = result.text_units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(unit_ids.len(), result.text_units.len());
        for unit in &result.text_units {
            let cited = result
                .entities
                .iter()
                .any(|e| e.entity.text_unit_ids.contains(&unit.id))
                || result
                    .relationships
                    .iter()
                    .any(|r| r.text_unit_ids.contains(&unit.id));
            assert!(cited, "{} is not cited by the selection", unit.id);
        }
    }

    #[tokio::test]
    async fn single_entity_budget_drops_its_relationships() {
        let config = LocalSearchConfig {
            max_entities: 1,
            ..Default::default()
        };
        let artifacts = artifacts();

        let result = selector(&[("A", 0.9), ("B", 0.5)], config.clone())
            .run("who is A?", &artifacts)
            .await
            .unwrap();

        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].entity.name, "A");
        assert!(result.relationships.is_empty());
        let unit_ids: Vec<&str> = result.text_units.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(unit_ids, vec!["t1", "t3"]);
        assert_postconditions(&result, &config);
    }

    #[tokio::test]
    async fn wider_budget_keeps_relationships_between_selected_entities() {
        let config = LocalSearchConfig {
            max_entities: 2,
            ..Default::default()
        };
        let artifacts = artifacts();

        let result = selector(&[("A", 0.9), ("B", 0.5), ("C", 0.1)], config.clone())
            .run("A and B", &artifacts)
            .await
            .unwrap();

        let relationship_ids: Vec<&str> = result.relationships.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(relationship_ids, vec!["A -> B"]);
        // t1 is cited by A, B and A -> B
        assert_eq!(result.text_units[0].id, "t1");
        assert_postconditions(&result, &config);
    }

    #[tokio::test]
    async fn does_not_mutate_artifacts() {
        let artifacts = artifacts();
        let before = serde_json::to_string(&artifacts).unwrap();

        selector(&[("B", 1.0)], LocalSearchConfig::default())
            .run("B", &artifacts)
            .await
            .unwrap();

        assert_eq!(serde_json::to_string(&artifacts).unwrap(), before);
    }

    #[tokio::test]
    async fn empty_corpus_is_reported() {
        let artifacts = IndexerArtifacts::from_graph(
            GraphMerger::new(GraphKind::Undirected).merge(&[]),
            &[],
        );

        let err = selector(&[], LocalSearchConfig::default())
            .run("anything", &artifacts)
            .await
            .unwrap_err();

        assert!(matches!(err, SelectionError::EmptyCorpus));
    }

    #[test]
    fn zero_budget_is_rejected() {
        let config = LocalSearchConfig {
            max_relationships: 0,
            ..Default::default()
        };
        let scorer = Arc::new(FixedScorer(HashMap::new()));
        assert!(ContextSelector::from_config(scorer, &config).is_err());
    }

    #[tokio::test]
    async fn documents_cover_each_section() {
        let artifacts = artifacts();
        let result = selector(&[("A", 0.9), ("B", 0.8)], LocalSearchConfig::default())
            .run("A", &artifacts)
            .await
            .unwrap();

        let documents = result.to_documents();

        assert_eq!(documents.len(), 3);
        assert!(documents[0].starts_with("RELEVANT ENTITIES:\n- A (PERSON): A is a person"));
        assert!(documents[1].contains("A -> B: A knows B"));
        assert!(documents[2].contains("[Source 1] A met B."));
    }
}
