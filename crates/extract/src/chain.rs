use std::sync::Arc;

use crate::error::ChainError;
use crate::llm::ChatModel;
use crate::prompt::{ChainInput, PromptBuilder, PromptTemplate, ResponseParser};

/// `prompt | model | parser` as an explicit three-step pipeline.
pub struct Chain<T> {
    template: PromptTemplate,
    model: Arc<dyn ChatModel>,
    parser: Arc<dyn ResponseParser<T>>,
}

impl<T> Chain<T> {
    pub fn new(
        template: PromptTemplate,
        model: Arc<dyn ChatModel>,
        parser: Arc<dyn ResponseParser<T>>,
    ) -> Self {
        Self {
            template,
            model,
            parser,
        }
    }

    pub fn from_builder<B>(builder: &B, model: Arc<dyn ChatModel>) -> Self
    where
        B: PromptBuilder<Output = T> + ?Sized,
    {
        let (template, parser) = builder.build();
        Self::new(template, model, parser)
    }

    pub async fn invoke(&self, input: &ChainInput) -> Result<T, ChainError> {
        // Rendering happens before the model is contacted.
        let messages = self.template.render(input)?;

        let response = self
            .model
            .invoke(&messages)
            .await
            .map_err(ChainError::Model)?;

        self.parser.parse(&response).map_err(ChainError::Parse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::mock::MockChatModel;
    use crate::prompt::StrOutputParser;

    fn chain(model: Arc<MockChatModel>) -> Chain<String> {
        Chain::new(
            PromptTemplate::from_template("Summarize {entity_name}"),
            model,
            Arc::new(StrOutputParser),
        )
    }

    #[tokio::test]
    async fn runs_steps_in_order() {
        let model = Arc::new(MockChatModel::replying(|prompt| Ok(format!(" echo: {prompt} "))));
        let input = ChainInput::from([("entity_name".to_string(), "ACME".to_string())]);

        let answer = chain(model.clone()).invoke(&input).await.unwrap();

        assert_eq!(answer, "echo: Summarize ACME");
        assert_eq!(model.calls(), 1);
    }

    #[tokio::test]
    async fn unbound_variable_never_reaches_the_model() {
        let model = Arc::new(MockChatModel::replying(|_| Ok("unused".to_string())));

        let err = chain(model.clone()).invoke(&ChainInput::new()).await.unwrap_err();

        assert!(matches!(err, ChainError::Prompt(PipelineError::UnboundVariable { .. })));
        assert_eq!(model.calls(), 0);
    }

    #[tokio::test]
    async fn separates_model_and_parse_failures() {
        let input = ChainInput::from([("entity_name".to_string(), "ACME".to_string())]);

        let failing = Arc::new(MockChatModel::replying(|_| anyhow::bail!("offline")));
        let err = chain(failing).invoke(&input).await.unwrap_err();
        assert!(matches!(err, ChainError::Model(_)));

        let empty = Arc::new(MockChatModel::replying(|_| Ok("   ".to_string())));
        let err = chain(empty).invoke(&input).await.unwrap_err();
        assert!(matches!(err, ChainError::Parse(_)));
    }
}
