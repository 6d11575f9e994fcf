use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use extract::{
    Chain, ChainError, ChatModel, FailurePolicy, PipelineError, PromptArgs, PromptBuilder,
    UnitFailure,
};

use crate::graph::{Description, KnowledgeGraph};
use crate::summarize_prompt::SummarizeDescriptionPromptBuilder;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummarizationConfig {
    /// Maximum number of summaries requested at once.
    pub concurrency: usize,
    /// `Skip` leaves a failed entry with its observation list.
    pub failure_policy: FailurePolicy,
}

impl Default for SummarizationConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SummarizationReport {
    pub entities_summarized: usize,
    pub relationships_summarized: usize,
    /// Entries with a single description, made canonical without a model call.
    pub passthrough: usize,
    pub failures: Vec<UnitFailure>,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    Entity,
    Relationship,
}

struct SummaryJob {
    index: usize,
    name: String,
    descriptions: Vec<String>,
}

/// Replaces each multi-observation description with one canonical description.
pub struct EntityRelationshipDescriptionSummarizer {
    prompt_builder: Box<dyn PromptBuilder<Output = String>>,
    chain: Chain<String>,
    config: SummarizationConfig,
}

impl EntityRelationshipDescriptionSummarizer {
    pub fn new<B>(prompt_builder: B, model: Arc<dyn ChatModel>, config: SummarizationConfig) -> Self
    where
        B: PromptBuilder<Output = String> + 'static,
    {
        let chain = Chain::from_builder(&prompt_builder, model);
        Self {
            prompt_builder: Box::new(prompt_builder),
            chain,
            config,
        }
    }

    pub fn build_default(model: Arc<dyn ChatModel>, config: SummarizationConfig) -> Self {
        Self::new(SummarizeDescriptionPromptBuilder::new(), model, config)
    }

    /// Summarize every entity, then every relationship, in place.
    ///
    /// Summaries already applied stay applied when a later call fails. Under
    /// [`FailurePolicy::Abort`] the first failure is returned; under `Skip` failed
    /// entries keep their observation lists and are listed in the report.
    pub async fn invoke(
        &self,
        graph: &mut KnowledgeGraph,
    ) -> Result<SummarizationReport, PipelineError> {
        let mut report = SummarizationReport::default();

        let mut entity_jobs = Vec::new();
        for idx in 0..graph.entities().len() {
            let node = graph.entity_mut(idx);
            if node.description.collapse_single() {
                report.passthrough += 1;
            } else if !node.description.is_canonical() {
                entity_jobs.push(SummaryJob {
                    index: idx,
                    name: node.name.clone(),
                    descriptions: node.description.observations().to_vec(),
                });
            }
        }

        let mut relationship_jobs = Vec::new();
        for idx in 0..graph.relationships().len() {
            let edge = graph.relationship_mut(idx);
            if edge.description.collapse_single() {
                report.passthrough += 1;
            } else if !edge.description.is_canonical() {
                relationship_jobs.push(SummaryJob {
                    index: idx,
                    name: edge.display_name(),
                    descriptions: edge.description.observations().to_vec(),
                });
            }
        }

        self.summarize_all(Target::Entity, entity_jobs, graph, &mut report)
            .await?;
        self.summarize_all(Target::Relationship, relationship_jobs, graph, &mut report)
            .await?;

        info!(
            entities = report.entities_summarized,
            relationships = report.relationships_summarized,
            passthrough = report.passthrough,
            failures = report.failures.len(),
            "Summarized descriptions"
        );
        Ok(report)
    }

    async fn summarize_all(
        &self,
        target: Target,
        jobs: Vec<SummaryJob>,
        graph: &mut KnowledgeGraph,
        report: &mut SummarizationReport,
    ) -> Result<(), PipelineError> {
        let total = jobs.len();
        let pending: Vec<_> = jobs
            .into_iter()
            .map(|job| async move {
                let result = self.summarize(&job.name, &job.descriptions).await;
                (job, result)
            })
            .collect();
        let mut results = stream::iter(pending).buffered(self.config.concurrency.max(1));

        let mut completed = 0;
        while let Some((job, result)) = results.next().await {
            completed += 1;

            match result {
                Ok(summary) => {
                    let description = Description::Canonical(summary);
                    match target {
                        Target::Entity => {
                            graph.entity_mut(job.index).description = description;
                            report.entities_summarized += 1;
                        }
                        Target::Relationship => {
                            graph.relationship_mut(job.index).description = description;
                            report.relationships_summarized += 1;
                        }
                    }
                }
                Err(ChainError::Prompt(e)) => return Err(e),
                Err(e) => {
                    let message = e.to_string();
                    match self.config.failure_policy {
                        FailurePolicy::Abort => {
                            warn!(target_name = %job.name, error = %message, "Summarization failed, aborting");
                            return Err(PipelineError::Summarization {
                                target: job.name,
                                message,
                            });
                        }
                        FailurePolicy::Skip => {
                            warn!(target_name = %job.name, error = %message, "Summarization failed, keeping observations");
                            report.failures.push(UnitFailure::new(job.name, message));
                        }
                    }
                }
            }

            info!(stage = ?target, completed, total, "Summarizing descriptions");
        }

        Ok(())
    }

    async fn summarize(&self, name: &str, descriptions: &[String]) -> Result<String, ChainError> {
        let args = PromptArgs::new()
            .with("entity_name", name)
            .with("description_list", descriptions);
        let input = self.prompt_builder.prepare_chain_input(&args)?;
        self.chain.invoke(&input).await
    }
}
