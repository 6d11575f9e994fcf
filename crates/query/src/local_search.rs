use anyhow::Result;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

use extract::prompt::read_template;
use extract::{
    Chain, ChainError, ChainInput, ChatModel, PipelineError, PromptArgs, PromptBuilder,
    PromptTemplate, PromptValue, ResponseParser, Role, StrOutputParser,
};
use index::IndexerArtifacts;

use crate::context::{ContextSelectionResult, ContextSelector};
use crate::error::SearchError;

const PROMPT_NAME: &str = "local_search";

pub const DEFAULT_LOCAL_SEARCH_SYSTEM_PROMPT: &str = r#"You are a helpful assistant answering questions about the entities, relationships and source passages in the data tables below.

TARGET RESPONSE LENGTH AND FORMAT:
{response_type}

INSTRUCTIONS:
- Answer the question using only information from the data tables
- Be specific and cite the relevant entities, relationships or sources
- If the data tables do not contain enough information, say so
- Do not make anything up

DATA TABLES:
{context_data}"#;

/// Prompt variant for answering a query from a selected context.
///
/// Required arguments: `local_query`, `documents`. The system message receives
/// the documents joined by newlines as `context_data`; the user message is the
/// query itself.
#[derive(Debug, Clone)]
pub struct LocalSearchPromptBuilder {
    system_prompt: String,
}

impl Default for LocalSearchPromptBuilder {
    fn default() -> Self {
        Self::with_prompt(DEFAULT_LOCAL_SEARCH_SYSTEM_PROMPT)
    }
}

impl LocalSearchPromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt.into(),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::with_prompt(read_template(path).await?))
    }
}

impl PromptBuilder for LocalSearchPromptBuilder {
    type Output = String;

    fn name(&self) -> &'static str {
        PROMPT_NAME
    }

    fn build(&self) -> (PromptTemplate, Arc<dyn ResponseParser<String>>) {
        let template = PromptTemplate::chat(vec![
            (Role::System, self.system_prompt.clone()),
            (Role::User, "{local_query}".to_string()),
        ]);
        (template, Arc::new(StrOutputParser))
    }

    fn prepare_chain_input(&self, args: &PromptArgs) -> Result<ChainInput, PipelineError> {
        let local_query = args.require(PROMPT_NAME, "local_query")?;
        let documents = args.require(PROMPT_NAME, "documents")?;

        let context_data = match documents {
            PromptValue::Text(text) => text.clone(),
            PromptValue::List(items) => items.join("\n"),
        };

        Ok(ChainInput::from([
            ("response_type".to_string(), "Multiple Paragraphs".to_string()),
            ("context_data".to_string(), context_data),
            ("local_query".to_string(), local_query.render()),
        ]))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchTrace {
    pub entities_selected: usize,
    pub text_units_selected: usize,
    pub relationships_selected: usize,
    pub context_size: usize,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocalSearchResult {
    pub answer: String,
    pub context: ContextSelectionResult,
    pub trace: SearchTrace,
}

/// Context selection followed by answer generation.
pub struct LocalSearch {
    selector: ContextSelector,
    prompt_builder: Box<dyn PromptBuilder<Output = String>>,
    chain: Chain<String>,
}

impl LocalSearch {
    pub fn new<B>(selector: ContextSelector, prompt_builder: B, model: Arc<dyn ChatModel>) -> Self
    where
        B: PromptBuilder<Output = String> + 'static,
    {
        let chain = Chain::from_builder(&prompt_builder, model);
        Self {
            selector,
            prompt_builder: Box::new(prompt_builder),
            chain,
        }
    }

    pub fn build_default(selector: ContextSelector, model: Arc<dyn ChatModel>) -> Self {
        Self::new(selector, LocalSearchPromptBuilder::new(), model)
    }

    pub fn selector(&self) -> &ContextSelector {
        &self.selector
    }

    pub async fn search(
        &self,
        query: &str,
        artifacts: &IndexerArtifacts,
    ) -> Result<LocalSearchResult, SearchError> {
        let start = Instant::now();

        let context = self.selector.run(query, artifacts).await?;
        let documents = context.to_documents();
        let context_size = documents.iter().map(String::len).sum();

        let args = PromptArgs::new()
            .with("local_query", query)
            .with("documents", documents);
        let input = self.prompt_builder.prepare_chain_input(&args)?;

        let answer = match self.chain.invoke(&input).await {
            Ok(answer) => answer,
            Err(ChainError::Prompt(e)) => return Err(e.into()),
            Err(e) => return Err(SearchError::Generation(e.to_string())),
        };

        let trace = SearchTrace {
            entities_selected: context.entities.len(),
            text_units_selected: context.text_units.len(),
            relationships_selected: context.relationships.len(),
            context_size,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            entities = trace.entities_selected,
            text_units = trace.text_units_selected,
            relationships = trace.relationships_selected,
            elapsed_ms = trace.elapsed_ms,
            "Local search answered"
        );

        Ok(LocalSearchResult {
            answer,
            context,
            trace,
        })
    }
}
