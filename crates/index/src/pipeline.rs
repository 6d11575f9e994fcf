use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use extract::{
    ChatModel, EntityRelationshipExtractor, ExtractionConfig, PipelineError, UnitFailure,
};
use ingest::TextUnit;

use crate::artifacts::IndexerArtifacts;
use crate::embeddings::Embedder;
use crate::graph::GraphKind;
use crate::merger::{GraphMerger, MergeStats};
use crate::summarizer::{
    EntityRelationshipDescriptionSummarizer, SummarizationConfig, SummarizationReport,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    pub graph_kind: GraphKind,
    pub extraction: ExtractionConfig,
    pub summarization: SummarizationConfig,
    pub embedding_concurrency: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            graph_kind: GraphKind::Undirected,
            extraction: ExtractionConfig::default(),
            summarization: SummarizationConfig::default(),
            embedding_concurrency: 4,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexingReport {
    pub text_units: usize,
    pub extraction_failures: Vec<UnitFailure>,
    pub merge: MergeStats,
    pub summarization: SummarizationReport,
    pub entities: usize,
    pub relationships: usize,
    pub embedded_entities: usize,
    pub elapsed_ms: u64,
}

pub struct IndexingOutput {
    pub artifacts: IndexerArtifacts,
    pub report: IndexingReport,
}

/// Extraction, merge and summarization over a batch of text units, producing
/// query-ready artifacts.
pub struct IndexingPipeline {
    extractor: EntityRelationshipExtractor,
    merger: GraphMerger,
    summarizer: EntityRelationshipDescriptionSummarizer,
    embedder: Option<Arc<dyn Embedder>>,
    embedding_concurrency: usize,
}

impl IndexingPipeline {
    /// Pipeline with the built-in extraction and summarization prompts.
    pub fn new(model: Arc<dyn ChatModel>, config: IndexingConfig) -> Self {
        Self::from_parts(
            EntityRelationshipExtractor::build_default(model.clone(), config.extraction),
            GraphMerger::new(config.graph_kind),
            EntityRelationshipDescriptionSummarizer::build_default(model, config.summarization),
            config.embedding_concurrency,
        )
    }

    pub fn from_parts(
        extractor: EntityRelationshipExtractor,
        merger: GraphMerger,
        summarizer: EntityRelationshipDescriptionSummarizer,
        embedding_concurrency: usize,
    ) -> Self {
        Self {
            extractor,
            merger,
            summarizer,
            embedder: None,
            embedding_concurrency,
        }
    }

    /// Precompute entity description embeddings after summarization.
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub async fn run(&self, text_units: &[TextUnit]) -> Result<IndexingOutput, PipelineError> {
        let start = Instant::now();
        let mut report = IndexingReport {
            text_units: text_units.len(),
            ..Default::default()
        };

        info!(text_units = text_units.len(), "Extracting entities and relationships");
        let extraction = self.extractor.invoke(text_units).await?;
        report.extraction_failures = extraction.failures;

        let (mut graph, merge) = self.merger.merge_with_stats(&extraction.fragments);
        report.merge = merge;

        report.summarization = self.summarizer.invoke(&mut graph).await?;

        let mut artifacts = IndexerArtifacts::from_graph(graph, text_units);
        if let Some(embedder) = &self.embedder {
            report.embedded_entities = artifacts
                .embed_entities(embedder.as_ref(), self.embedding_concurrency)
                .await?;
        }

        report.entities = artifacts.entities.len();
        report.relationships = artifacts.relationships.len();
        report.elapsed_ms = start.elapsed().as_millis() as u64;

        info!(
            entities = report.entities,
            relationships = report.relationships,
            elapsed_ms = report.elapsed_ms,
            "Indexing complete"
        );

        Ok(IndexingOutput { artifacts, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use extract::mock::MockChatModel;
    use extract::FailurePolicy;

    fn extraction_answer(text: &str) -> String {
        let json = match text {
            "Alpha hired Bravo." => serde_json::json!({
                "entities": [
                    {"name": "Alpha", "type": "PERSON", "description": "Alpha is an employer"},
                    {"name": "Bravo", "type": "PERSON", "description": "Bravo was hired"}
                ],
                "relationships": [
                    {"source": "Alpha", "target": "Bravo", "description": "Alpha hired Bravo", "weight": 2.0}
                ]
            }),
            "Bravo wrote code." => serde_json::json!({
                "entities": [
                    {"name": "Bravo", "type": "PERSON", "description": "Bravo writes code"}
                ],
                "relationships": []
            }),
            "Charlie stayed home." => serde_json::json!({
                "entities": [
                    {"name": "Charlie", "type": "PERSON", "description": "Charlie stayed home"}
                ],
                "relationships": []
            }),
            other => return format!("not json for {other}"),
        };
        json.to_string()
    }

    fn scripted_model() -> Arc<MockChatModel> {
        Arc::new(MockChatModel::replying(|prompt| {
            if prompt.contains("SUMMARY:") {
                return Ok("Bravo was hired and writes code".to_string());
            }
            let text = prompt
                .split("TEXT:\n")
                .nth(1)
                .and_then(|rest| rest.split("\n\nJSON OUTPUT:").next())
                .unwrap_or_default();
            Ok(extraction_answer(text))
        }))
    }

    fn units() -> Vec<TextUnit> {
        vec![
            TextUnit::with_id("t1", "doc", "Alpha hired Bravo."),
            TextUnit::with_id("t2", "doc", "Bravo wrote code."),
            TextUnit::with_id("t3", "doc", "Charlie stayed home."),
        ]
    }

    #[tokio::test]
    async fn only_the_twice_seen_entity_is_summarized() {
        let model = scripted_model();
        let pipeline = IndexingPipeline::new(model.clone(), IndexingConfig::default());

        let output = pipeline.run(&units()).await.unwrap();

        // three extractions, one summary for BRAVO
        assert_eq!(model.calls(), 4);
        assert_eq!(output.report.summarization.entities_summarized, 1);
        assert_eq!(output.report.summarization.passthrough, 3);

        let artifacts = &output.artifacts;
        let bravo = artifacts.entity("BRAVO").unwrap();
        assert_eq!(bravo.description, "Bravo was hired and writes code");
        assert_eq!(bravo.text_unit_ids, vec!["t1", "t2"]);
        assert_eq!(artifacts.entity("ALPHA").unwrap().description, "Alpha is an employer");
        assert_eq!(artifacts.entity("CHARLIE").unwrap().description, "Charlie stayed home");
        assert_eq!(artifacts.relationships[0].id, "ALPHA -> BRAVO");
        assert_eq!(artifacts.relationships[0].weight, 2.0);
        assert_eq!(artifacts.text_units.len(), 3);
    }

    #[tokio::test]
    async fn runs_on_a_spawned_task() {
        let pipeline = Arc::new(IndexingPipeline::new(scripted_model(), IndexingConfig::default()));
        let units = units();

        let output = tokio::spawn(async move { pipeline.run(&units).await })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(output.artifacts.entities.len(), 3);
    }

    #[tokio::test]
    async fn skipped_units_are_reported_and_the_rest_indexed() {
        let model = scripted_model();
        let mut config = IndexingConfig::default();
        config.extraction.failure_policy = FailurePolicy::Skip;
        let pipeline = IndexingPipeline::new(model, config);

        let mut input = units();
        input.push(TextUnit::with_id("t4", "doc", "Garbage in."));

        let output = pipeline.run(&input).await.unwrap();

        assert_eq!(output.report.extraction_failures.len(), 1);
        assert_eq!(output.report.extraction_failures[0].id, "t4");
        assert_eq!(output.report.entities, 3);
        assert_eq!(output.artifacts.text_units.len(), 4);
    }

    #[tokio::test]
    async fn abort_stops_before_summarization() {
        let model = scripted_model();
        let pipeline = IndexingPipeline::new(model.clone(), IndexingConfig::default());

        let err = pipeline
            .run(&[TextUnit::with_id("bad", "doc", "Garbage in.")])
            .await
            .err()
            .unwrap();

        assert!(matches!(err, PipelineError::Extraction { ref text_unit_id, .. } if text_unit_id == "bad"));
        assert_eq!(model.calls(), 1);
    }
}
