use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use ingest::TextUnit;

use crate::chain::Chain;
use crate::error::{ChainError, FailurePolicy, PipelineError, UnitFailure};
use crate::extraction_prompt::EntityExtractionPromptBuilder;
use crate::llm::ChatModel;
use crate::prompt::{PromptArgs, PromptBuilder};
use crate::schema::LocalGraphFragment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Maximum number of text units in flight at once.
    pub concurrency: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

/// Fragments in input order, plus the units that were skipped.
///
/// Under [`FailurePolicy::Abort`] `failures` is always empty and there is one
/// fragment per input unit.
#[derive(Debug, Clone, Default)]
pub struct ExtractionOutput {
    pub fragments: Vec<LocalGraphFragment>,
    pub failures: Vec<UnitFailure>,
}

/// Extracts one local graph per text unit.
pub struct EntityRelationshipExtractor {
    prompt_builder: Box<dyn PromptBuilder<Output = LocalGraphFragment>>,
    chain: Chain<LocalGraphFragment>,
    config: ExtractionConfig,
}

impl EntityRelationshipExtractor {
    pub fn new<B>(prompt_builder: B, model: Arc<dyn ChatModel>, config: ExtractionConfig) -> Self
    where
        B: PromptBuilder<Output = LocalGraphFragment> + 'static,
    {
        let chain = Chain::from_builder(&prompt_builder, model);
        Self {
            prompt_builder: Box::new(prompt_builder),
            chain,
            config,
        }
    }

    pub fn build_default(model: Arc<dyn ChatModel>, config: ExtractionConfig) -> Self {
        Self::new(EntityExtractionPromptBuilder::new(), model, config)
    }

    /// Run extraction over `text_units`, preserving input order in the output.
    ///
    /// Prompt contract violations are returned immediately regardless of the
    /// failure policy.
    pub async fn invoke(&self, text_units: &[TextUnit]) -> Result<ExtractionOutput, PipelineError> {
        let total = text_units.len();
        let concurrency = self.config.concurrency.max(1);

        let pending: Vec<_> = text_units
            .iter()
            .map(|unit| async move {
                let result = self.extract_unit(unit).await;
                (unit, result)
            })
            .collect();
        let mut results = stream::iter(pending).buffered(concurrency);

        let mut output = ExtractionOutput::default();
        let mut completed = 0;

        while let Some((unit, result)) = results.next().await {
            completed += 1;

            match result {
                Ok(fragment) => {
                    debug!(
                        text_unit_id = %unit.id,
                        entities = fragment.entities.len(),
                        relationships = fragment.relationships.len(),
                        "Extracted fragment"
                    );
                    output.fragments.push(fragment);
                }
                Err(ChainError::Prompt(e)) => return Err(e),
                Err(e) => {
                    let message = e.to_string();
                    match self.config.failure_policy {
                        FailurePolicy::Abort => {
                            warn!(text_unit_id = %unit.id, error = %message, "Extraction failed, aborting");
                            return Err(PipelineError::Extraction {
                                text_unit_id: unit.id.clone(),
                                message,
                            });
                        }
                        FailurePolicy::Skip => {
                            warn!(text_unit_id = %unit.id, error = %message, "Extraction failed, skipping unit");
                            output.failures.push(UnitFailure::new(&unit.id, message));
                        }
                    }
                }
            }

            info!(completed, total, "Extracting entities and relationships");
        }

        Ok(output)
    }

    async fn extract_unit(&self, unit: &TextUnit) -> Result<LocalGraphFragment, ChainError> {
        let args = PromptArgs::new().with("text", unit.text.as_str());
        let input = self.prompt_builder.prepare_chain_input(&args)?;

        let mut fragment = self.chain.invoke(&input).await?;
        fragment.tag_provenance(&unit.id);
        Ok(fragment)
    }
}
