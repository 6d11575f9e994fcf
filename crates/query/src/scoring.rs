use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use index::{Embedder, EntityRecord, cosine_similarity};

/// Relevance of each entity to a query; one score per entity, same order.
///
/// Higher is more relevant. Negative and NaN scores mark an entity as not
/// selectable.
#[async_trait]
pub trait EntityScorer: Send + Sync {
    async fn score(&self, query: &str, entities: &[EntityRecord]) -> Result<Vec<f32>>;
}

/// Cosine similarity between the query embedding and each entity's description
/// embedding.
///
/// Entities indexed without an embedding have their description embedded on the
/// fly.
pub struct EmbeddingSimilarityScorer {
    embedder: Arc<dyn Embedder>,
    concurrency: usize,
}

impl EmbeddingSimilarityScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            concurrency: 4,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }
}

#[async_trait]
impl EntityScorer for EmbeddingSimilarityScorer {
    async fn score(&self, query: &str, entities: &[EntityRecord]) -> Result<Vec<f32>> {
        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .context("Failed to embed query")?;
        let query_embedding = &query_embedding;
        let embedder = self.embedder.as_ref();

        let pending: Vec<_> = entities
            .iter()
            .map(|entity| async move {
                let similarity = match &entity.description_embedding {
                    Some(embedding) => cosine_similarity(query_embedding, embedding),
                    None => {
                        let embedding = embedder
                            .embed(&entity.description)
                            .await
                            .with_context(|| format!("Failed to embed description of {}", entity.id))?;
                        cosine_similarity(query_embedding, &embedding)
                    }
                };
                Ok::<_, anyhow::Error>(similarity)
            })
            .collect();

        stream::iter(pending)
            .buffered(self.concurrency)
            .try_collect()
            .await
    }
}

/// Fraction of distinct query terms that occur in the entity's name or
/// description, case-insensitive. Works without an embedding model.
///
/// Entities sharing no term with the query score [`Self::NO_MATCH`], which is
/// below every selection threshold.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordOverlapScorer;

impl KeywordOverlapScorer {
    pub const NO_MATCH: f32 = -1.0;

    fn terms(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|term| term.chars().count() > 1)
            .map(|term| term.to_lowercase())
            .collect()
    }
}

#[async_trait]
impl EntityScorer for KeywordOverlapScorer {
    async fn score(&self, query: &str, entities: &[EntityRecord]) -> Result<Vec<f32>> {
        let query_terms = Self::terms(query);
        if query_terms.is_empty() {
            return Ok(vec![Self::NO_MATCH; entities.len()]);
        }

        Ok(entities
            .iter()
            .map(|entity| {
                let mut entity_terms = Self::terms(&entity.name);
                entity_terms.extend(Self::terms(&entity.description));
                let hits = query_terms
                    .iter()
                    .filter(|term| entity_terms.contains(*term))
                    .count();
                if hits == 0 {
                    Self::NO_MATCH
                } else {
                    hits as f32 / query_terms.len() as f32
                }
            })
            .collect())
    }
}
