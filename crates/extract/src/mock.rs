//! A scripted [`ChatModel`] for tests and offline runs.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::llm::ChatModel;
use crate::prompt::ChatMessage;

type Responder = dyn Fn(&str) -> Result<String> + Send + Sync;

/// Answers every call with a closure over the rendered prompt and records each call.
///
/// Multi-message prompts are joined with a blank line before reaching the closure.
pub struct MockChatModel {
    responder: Box<Responder>,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl MockChatModel {
    pub fn replying<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with the same text.
    pub fn constant(answer: impl Into<String>) -> Self {
        let answer = answer.into();
        Self::replying(move |_| Ok(answer.clone()))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every prompt seen so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatModel for MockChatModel {
    async fn invoke(&self, messages: &[ChatMessage]) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let prompt = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.clone());
        }

        (self.responder)(&prompt)
    }
}
