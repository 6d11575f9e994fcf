use anyhow::Result;
use std::path::Path;
use std::sync::Arc;

use extract::prompt::read_template;
use extract::{
    ChainInput, PipelineError, PromptArgs, PromptBuilder, PromptTemplate, PromptValue,
    ResponseParser, StrOutputParser,
};

const PROMPT_NAME: &str = "summarize_descriptions";

pub const DEFAULT_SUMMARIZE_PROMPT: &str = r#"You are writing entries for a knowledge graph.

Below is the name of one entity, or of a relationship written as "SOURCE -> TARGET",
together with every description of it that was collected from different passages.

TASK:
- Combine all of the descriptions into one comprehensive description
- Keep every distinct fact; drop only exact repetitions
- If descriptions contradict each other, keep both claims and say they conflict
- Write in the third person and mention the entity names so the text stands alone
- Do NOT use markdown formatting

NAME: {entity_name}
DESCRIPTIONS: {description_list}

SUMMARY:"#;

/// Prompt variant that collapses a description list into one description.
///
/// Required arguments: `entity_name`, `description_list`.
pub struct SummarizeDescriptionPromptBuilder {
    prompt: String,
}

impl Default for SummarizeDescriptionPromptBuilder {
    fn default() -> Self {
        Self::with_prompt(DEFAULT_SUMMARIZE_PROMPT)
    }
}

impl SummarizeDescriptionPromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::with_prompt(read_template(path).await?))
    }
}

impl PromptBuilder for SummarizeDescriptionPromptBuilder {
    type Output = String;

    fn name(&self) -> &'static str {
        PROMPT_NAME
    }

    fn build(&self) -> (PromptTemplate, Arc<dyn ResponseParser<String>>) {
        (
            PromptTemplate::from_template(self.prompt.clone()),
            Arc::new(StrOutputParser),
        )
    }

    fn prepare_chain_input(&self, args: &PromptArgs) -> Result<ChainInput, PipelineError> {
        let entity_name = args.require(PROMPT_NAME, "entity_name")?;
        let description_list = match args.require(PROMPT_NAME, "description_list")? {
            PromptValue::Text(text) => PromptValue::List(vec![text.clone()]),
            list => list.clone(),
        };

        Ok(ChainInput::from([
            ("entity_name".to_string(), entity_name.render()),
            ("description_list".to_string(), description_list.render()),
        ]))
    }
}
