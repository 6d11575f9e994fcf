pub mod chain;
pub mod error;
pub mod extraction_prompt;
pub mod extractor;
pub mod llm;
pub mod mock;
pub mod normalizer;
pub mod prompt;
pub mod retry;
pub mod schema;

pub use chain::Chain;
pub use error::{ChainError, FailurePolicy, PipelineError, UnitFailure};
pub use extraction_prompt::{EntityExtractionPromptBuilder, GraphFragmentParser};
pub use extractor::{EntityRelationshipExtractor, ExtractionConfig, ExtractionOutput};
pub use llm::{ChatModel, OllamaClient};
pub use normalizer::EntityNormalizer;
pub use prompt::{
    ChainInput, ChatMessage, PromptArgs, PromptBuilder, PromptTemplate, PromptValue,
    ResponseParser, Role, StrOutputParser,
};
pub use retry::RetryPolicy;
pub use schema::{EntityMention, LocalGraphFragment, RelationshipMention};
