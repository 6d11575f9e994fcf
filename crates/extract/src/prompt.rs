//! The prompt contract shared by every model call site.
//!
//! A [`PromptBuilder`] produces a [`PromptTemplate`] together with the parser for
//! the model's answer, and validates the named arguments of a call before any
//! request is sent.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use crate::error::PipelineError;

/// A named argument passed to [`PromptBuilder::prepare_chain_input`].
#[derive(Debug, Clone, PartialEq)]
pub enum PromptValue {
    Text(String),
    List(Vec<String>),
}

impl PromptValue {
    /// Render the value as it is substituted into a template.
    ///
    /// Lists render as a JSON array so the model sees item boundaries unambiguously.
    pub fn render(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::List(items) => {
                serde_json::to_string(items).unwrap_or_else(|_| items.join("\n"))
            }
        }
    }
}

impl From<&str> for PromptValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for PromptValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for PromptValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value)
    }
}

impl From<&[String]> for PromptValue {
    fn from(value: &[String]) -> Self {
        Self::List(value.to_vec())
    }
}

/// Named arguments for one prompt invocation.
#[derive(Debug, Clone, Default)]
pub struct PromptArgs {
    values: HashMap<&'static str, PromptValue>,
}

impl PromptArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &'static str, value: impl Into<PromptValue>) -> Self {
        self.values.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&PromptValue> {
        self.values.get(name)
    }

    /// Look up a required argument, failing with `MissingArgument` when absent.
    pub fn require(
        &self,
        prompt: &'static str,
        name: &'static str,
    ) -> Result<&PromptValue, PipelineError> {
        self.get(name)
            .ok_or_else(|| PipelineError::missing_argument(prompt, name))
    }
}

/// Fully rendered template variables, ready to be substituted.
pub type ChainInput = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// A request template: one or more chat messages with `{variable}` placeholders.
///
/// `{{` and `}}` render as literal braces.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptTemplate {
    messages: Vec<(Role, String)>,
}

impl PromptTemplate {
    /// A single user message.
    pub fn from_template(template: impl Into<String>) -> Self {
        Self {
            messages: vec![(Role::User, template.into())],
        }
    }

    pub fn chat(messages: Vec<(Role, String)>) -> Self {
        Self { messages }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let template = read_template(path).await?;
        Ok(Self::from_template(template))
    }

    pub fn render(&self, input: &ChainInput) -> Result<Vec<ChatMessage>, PipelineError> {
        self.messages
            .iter()
            .map(|(role, template)| {
                Ok(ChatMessage {
                    role: *role,
                    content: render_template(template, input)?,
                })
            })
            .collect()
    }
}

/// Read a prompt template from disk.
pub async fn read_template(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read prompt template: {:?}", path))
}

fn render_template(template: &str, input: &ChainInput) -> Result<String, PipelineError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
            continue;
        }
        if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
            continue;
        }
        if let Some(end) = tail.find('}').filter(|_| tail.starts_with('{')) {
            let name = &tail[1..end];
            if is_identifier(name) {
                let value = input
                    .get(name)
                    .ok_or_else(|| PipelineError::UnboundVariable {
                        variable: name.to_string(),
                    })?;
                out.push_str(value);
                rest = &tail[end + 1..];
                continue;
            }
        }

        // A lone brace that is not part of a placeholder.
        out.push_str(&tail[..1]);
        rest = &tail[1..];
    }

    out.push_str(rest);
    Ok(out)
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Turns a raw model answer into a typed value.
pub trait ResponseParser<T>: Send + Sync {
    fn parse(&self, response: &str) -> Result<T>;
}

/// Returns the trimmed answer; an empty answer is malformed.
#[derive(Debug, Clone, Copy, Default)]
pub struct StrOutputParser;

impl ResponseParser<String> for StrOutputParser {
    fn parse(&self, response: &str) -> Result<String> {
        let text = response.trim();
        if text.is_empty() {
            anyhow::bail!("model returned an empty answer");
        }
        Ok(text.to_string())
    }
}

/// One prompt variant: how to build its request and how to validate a call's arguments.
pub trait PromptBuilder: Send + Sync {
    type Output;

    /// Short name used in error messages.
    fn name(&self) -> &'static str;

    fn build(&self) -> (PromptTemplate, Arc<dyn ResponseParser<Self::Output>>);

    /// Validate named arguments and map them to template variables.
    ///
    /// Fails with `MissingArgument` before any model call is made.
    fn prepare_chain_input(&self, args: &PromptArgs) -> Result<ChainInput, PipelineError>;
}
