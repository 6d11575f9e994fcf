pub mod artifacts;
pub mod cache;
pub mod embeddings;
pub mod graph;
pub mod merger;
pub mod pipeline;
pub mod summarize_prompt;
pub mod summarizer;

pub use artifacts::{EntityRecord, IndexerArtifacts, RelationshipRecord, TextUnitRecord};
pub use cache::{CacheStats, CachedChatModel, CachedEmbedder, ResponseCache};
pub use embeddings::{Embedder, EmbeddingClient, cosine_similarity};
pub use graph::{Description, EntityNode, GraphKind, KnowledgeGraph, RelationshipEdge, relationship_id};
pub use merger::{GraphMerger, MergeStats};
pub use pipeline::{IndexingConfig, IndexingOutput, IndexingPipeline, IndexingReport};
pub use summarize_prompt::SummarizeDescriptionPromptBuilder;
pub use summarizer::{
    EntityRelationshipDescriptionSummarizer, SummarizationConfig, SummarizationReport,
};

use serde::Serialize;

/// Sizes of a loaded artifact set.
#[derive(Debug, Serialize)]
pub struct IndexStats {
    pub entities: usize,
    pub relationships: usize,
    pub text_units: usize,
    pub embedded_entities: usize,
}

impl IndexStats {
    pub fn of(artifacts: &IndexerArtifacts) -> Self {
        Self {
            entities: artifacts.entities.len(),
            relationships: artifacts.relationships.len(),
            text_units: artifacts.text_units.len(),
            embedded_entities: artifacts
                .entities
                .iter()
                .filter(|e| e.description_embedding.is_some())
                .count(),
        }
    }
}
