use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use extract::PipelineError;
use ingest::TextUnit;

use crate::embeddings::Embedder;
use crate::graph::KnowledgeGraph;

const ENTITIES_FILE: &str = "entities.json";
const RELATIONSHIPS_FILE: &str = "relationships.json";
const TEXT_UNITS_FILE: &str = "text_units.json";
const GRAPH_FILE: &str = "graph.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// The normalized entity name.
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub description: String,
    pub text_unit_ids: Vec<String>,
    pub degree: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipRecord {
    /// `"{source} -> {target}"`, with `->` inside names escaped.
    pub id: String,
    pub source: String,
    pub target: String,
    pub description: String,
    pub weight: f64,
    /// Sum of the endpoint degrees.
    pub rank: usize,
    pub text_unit_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextUnitRecord {
    pub id: String,
    pub document_id: String,
    pub text: String,
    pub n_tokens: usize,
    pub entity_ids: Vec<String>,
    pub relationship_ids: Vec<String>,
}

/// Tabular views over the canonical graph, consumed read-only at query time.
///
/// Table order is the graph's insertion order for entities and relationships and
/// the input order for text units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerArtifacts {
    pub entities: Vec<EntityRecord>,
    pub relationships: Vec<RelationshipRecord>,
    pub text_units: Vec<TextUnitRecord>,
    pub graph: KnowledgeGraph,
}

impl IndexerArtifacts {
    pub fn from_graph(graph: KnowledgeGraph, text_units: &[TextUnit]) -> Self {
        let degrees = graph.degrees();

        let entities: Vec<EntityRecord> = graph
            .entities()
            .iter()
            .map(|node| EntityRecord {
                id: node.name.clone(),
                name: node.name.clone(),
                entity_type: node.entity_type.clone(),
                description: node.description.text(),
                text_unit_ids: node.text_unit_ids.clone(),
                degree: degrees.get(node.name.as_str()).copied().unwrap_or(0),
                description_embedding: None,
            })
            .collect();

        let relationships: Vec<RelationshipRecord> = graph
            .relationships()
            .iter()
            .map(|edge| {
                let source_degree = degrees.get(edge.source.as_str()).copied().unwrap_or(0);
                let target_degree = degrees.get(edge.target.as_str()).copied().unwrap_or(0);
                RelationshipRecord {
                    id: edge.id(),
                    source: edge.source.clone(),
                    target: edge.target.clone(),
                    description: edge.description.text(),
                    weight: edge.weight,
                    rank: source_degree + target_degree,
                    text_unit_ids: edge.text_unit_ids.clone(),
                }
            })
            .collect();

        let mut entity_ids: HashMap<&str, Vec<String>> = HashMap::new();
        for entity in &entities {
            for unit_id in &entity.text_unit_ids {
                entity_ids
                    .entry(unit_id.as_str())
                    .or_default()
                    .push(entity.id.clone());
            }
        }
        let mut relationship_ids: HashMap<&str, Vec<String>> = HashMap::new();
        for relationship in &relationships {
            for unit_id in &relationship.text_unit_ids {
                relationship_ids
                    .entry(unit_id.as_str())
                    .or_default()
                    .push(relationship.id.clone());
            }
        }

        let text_units = text_units
            .iter()
            .map(|unit| TextUnitRecord {
                id: unit.id.clone(),
                document_id: unit.document_id.clone(),
                text: unit.text.clone(),
                n_tokens: unit.estimated_tokens(),
                entity_ids: entity_ids.remove(unit.id.as_str()).unwrap_or_default(),
                relationship_ids: relationship_ids.remove(unit.id.as_str()).unwrap_or_default(),
            })
            .collect();

        Self {
            entities,
            relationships,
            text_units,
            graph,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, id: &str) -> Option<&EntityRecord> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Compute description embeddings for entities that have none yet.
    ///
    /// Returns how many entities were embedded.
    pub async fn embed_entities(
        &mut self,
        embedder: &dyn Embedder,
        concurrency: usize,
    ) -> Result<usize, PipelineError> {
        let pending: Vec<(usize, String)> = self
            .entities
            .iter()
            .enumerate()
            .filter(|(_, e)| e.description_embedding.is_none())
            .map(|(idx, e)| (idx, e.description.clone()))
            .collect();
        let total = pending.len();

        let results: Vec<(usize, Result<Vec<f32>>)> = stream::iter(pending)
            .map(|(idx, description)| async move { (idx, embedder.embed(&description).await) })
            .buffered(concurrency.max(1))
            .collect()
            .await;

        for (idx, result) in results {
            let embedding = result.map_err(|e| PipelineError::Embedding {
                message: format!("{}: {e:#}", self.entities[idx].id),
            })?;
            self.entities[idx].description_embedding = Some(embedding);
        }

        debug!(embedded = total, "Entity descriptions embedded");
        Ok(total)
    }

    /// Write the tables to `dir`, replacing any previous artifacts there.
    ///
    /// Files are written to a sibling staging directory that is renamed into
    /// place, so a failed save leaves the previous artifacts untouched.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        let staging = sibling(dir, "staging")?;
        let previous = sibling(dir, "previous")?;

        remove_dir_if_exists(&staging).await?;
        tokio::fs::create_dir_all(&staging)
            .await
            .with_context(|| format!("Failed to create artifacts directory {}", staging.display()))?;

        write_json(&staging.join(ENTITIES_FILE), &self.entities).await?;
        write_json(&staging.join(RELATIONSHIPS_FILE), &self.relationships).await?;
        write_json(&staging.join(TEXT_UNITS_FILE), &self.text_units).await?;
        write_json(&staging.join(GRAPH_FILE), &self.graph).await?;

        remove_dir_if_exists(&previous).await?;
        if tokio::fs::try_exists(dir).await.unwrap_or(false) {
            tokio::fs::rename(dir, &previous)
                .await
                .with_context(|| format!("Failed to move aside {}", dir.display()))?;
        }
        tokio::fs::rename(&staging, dir)
            .await
            .with_context(|| format!("Failed to move artifacts into {}", dir.display()))?;
        remove_dir_if_exists(&previous).await?;

        info!(
            dir = %dir.display(),
            entities = self.entities.len(),
            relationships = self.relationships.len(),
            text_units = self.text_units.len(),
            "Artifacts saved"
        );
        Ok(())
    }

    pub async fn load(dir: &Path) -> Result<Self> {
        let artifacts = Self {
            entities: read_json(&dir.join(ENTITIES_FILE)).await?,
            relationships: read_json(&dir.join(RELATIONSHIPS_FILE)).await?,
            text_units: read_json(&dir.join(TEXT_UNITS_FILE)).await?,
            graph: read_json(&dir.join(GRAPH_FILE)).await?,
        };
        info!(
            dir = %dir.display(),
            entities = artifacts.entities.len(),
            "Artifacts loaded"
        );
        Ok(artifacts)
    }
}

fn sibling(dir: &Path, suffix: &str) -> Result<PathBuf> {
    let mut name = dir
        .file_name()
        .with_context(|| format!("Artifacts directory {} has no name", dir.display()))?
        .to_os_string();
    name.push(format!(".{suffix}"));
    Ok(dir.with_file_name(name))
}

async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("Failed to remove {}", path.display())),
    }
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_slice(&bytes).with_context(|| format!("Failed to parse {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::GraphKind;
    use crate::merger::GraphMerger;
    use async_trait::async_trait;
    use extract::{EntityMention, LocalGraphFragment, RelationshipMention};

    fn entity(name: &str, description: &str) -> EntityMention {
        EntityMention {
            name: name.to_string(),
            entity_type: "ORG".to_string(),
            description: description.to_string(),
            text_unit_ids: Vec::new(),
        }
    }

    fn relationship(source: &str, target: &str) -> RelationshipMention {
        RelationshipMention {
            source: source.to_string(),
            target: target.to_string(),
            description: format!("{source} works with {target}"),
            weight: 2.0,
            text_unit_ids: Vec::new(),
        }
    }

    fn sample() -> IndexerArtifacts {
        let units = vec![
            TextUnit::with_id("u1", "doc", "Alpha met Beta."),
            TextUnit::with_id("u2", "doc", "Beta met Gamma near the river."),
            TextUnit::with_id("u3", "doc", "Nothing here."),
        ];
        let fragments = vec![
            LocalGraphFragment {
                text_unit_id: "u1".to_string(),
                entities: vec![entity("ALPHA", "first"), entity("BETA", "second")],
                relationships: vec![relationship("ALPHA", "BETA")],
            },
            LocalGraphFragment {
                text_unit_id: "u2".to_string(),
                entities: vec![entity("BETA", "again"), entity("GAMMA", "third")],
                relationships: vec![relationship("BETA", "GAMMA")],
            },
        ];
        let graph = GraphMerger::new(GraphKind::Undirected).merge(&fragments);
        IndexerArtifacts::from_graph(graph, &units)
    }

    #[test]
    fn tables_carry_degree_rank_and_back_references() {
        let artifacts = sample();

        let beta = artifacts.entity("BETA").unwrap();
        assert_eq!(beta.degree, 2);
        assert_eq!(beta.text_unit_ids, vec!["u1", "u2"]);
        assert_eq!(beta.description, "second\nagain");

        let alpha_beta = &artifacts.relationships[0];
        assert_eq!(alpha_beta.id, "ALPHA -> BETA");
        assert_eq!(alpha_beta.rank, 3);

        let u2 = &artifacts.text_units[1];
        assert_eq!(u2.entity_ids, vec!["BETA", "GAMMA"]);
        assert_eq!(u2.relationship_ids, vec!["BETA -> GAMMA"]);
        assert_eq!(u2.n_tokens, 8);

        let u3 = &artifacts.text_units[2];
        assert!(u3.entity_ids.is_empty());
        assert!(!artifacts.is_empty());
    }

    #[test]
    fn relationship_ids_stay_unique_with_arrows_in_names() {
        let fragments = vec![LocalGraphFragment {
            text_unit_id: "u1".to_string(),
            entities: vec![
                entity("A -> B", "x"),
                entity("C", "x"),
                entity("A", "x"),
                entity("B -> C", "x"),
            ],
            relationships: vec![relationship("A -> B", "C"), relationship("A", "B -> C")],
        }];
        let graph = GraphMerger::new(GraphKind::Undirected).merge(&fragments);

        let artifacts = IndexerArtifacts::from_graph(graph, &[]);

        assert_eq!(artifacts.relationships.len(), 2);
        assert_ne!(artifacts.relationships[0].id, artifacts.relationships[1].id);
    }

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.is_empty() {
                anyhow::bail!("nothing to embed");
            }
            Ok(vec![text.len() as f32, 1.0])
        }
    }

    #[tokio::test]
    async fn embeds_each_entity_once() {
        let mut artifacts = sample();

        assert_eq!(artifacts.embed_entities(&LengthEmbedder, 2).await.unwrap(), 3);
        assert_eq!(
            artifacts.entity("ALPHA").unwrap().description_embedding,
            Some(vec![5.0, 1.0])
        );
        assert_eq!(artifacts.embed_entities(&LengthEmbedder, 2).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn embedding_failure_names_the_entity() {
        let mut artifacts = sample();
        artifacts.entities[1].description.clear();

        let err = artifacts.embed_entities(&LengthEmbedder, 1).await.unwrap_err();

        assert!(matches!(err, PipelineError::Embedding { ref message } if message.starts_with("BETA")));
    }

    #[tokio::test]
    async fn save_and_load_restore_the_graph_index() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("artifacts");
        let artifacts = sample();

        artifacts.save(&target).await.unwrap();
        let loaded = IndexerArtifacts::load(&target).await.unwrap();

        assert_eq!(loaded.entities, artifacts.entities);
        assert_eq!(loaded.text_units, artifacts.text_units);
        assert!(loaded.graph.relationship("GAMMA", "BETA").is_some());
    }

    #[tokio::test]
    async fn save_replaces_previous_artifacts_whole() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("artifacts");
        sample().save(&target).await.unwrap();

        let mut smaller = sample();
        smaller.entities.truncate(1);
        smaller.save(&target).await.unwrap();

        let loaded = IndexerArtifacts::load(&target).await.unwrap();
        assert_eq!(loaded.entities, smaller.entities);
        assert_eq!(loaded.relationships, smaller.relationships);
        assert!(!dir.path().join("artifacts.staging").exists());
        assert!(!dir.path().join("artifacts.previous").exists());
    }

    #[tokio::test]
    async fn failed_save_keeps_previous_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("artifacts");
        let original = sample();
        original.save(&target).await.unwrap();

        // A file where the staging directory belongs makes the next save fail.
        let staging = dir.path().join("artifacts.staging");
        std::fs::write(&staging, b"in the way").unwrap();
        let mut smaller = sample();
        smaller.entities.truncate(1);
        assert!(smaller.save(&target).await.is_err());

        let loaded = IndexerArtifacts::load(&target).await.unwrap();
        assert_eq!(loaded.entities, original.entities);
    }

    #[tokio::test]
    async fn load_reports_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let err = IndexerArtifacts::load(dir.path()).await.unwrap_err();
        assert!(format!("{err:#}").contains("entities.json"));
    }
}
