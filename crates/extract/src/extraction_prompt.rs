use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::PipelineError;
use crate::normalizer::EntityNormalizer;
use crate::prompt::{
    ChainInput, PromptArgs, PromptBuilder, PromptTemplate, ResponseParser, read_template,
};
use crate::schema::{EntityMention, LocalGraphFragment, RelationshipMention};

const PROMPT_NAME: &str = "entity_extraction";

pub const DEFAULT_EXTRACTION_PROMPT: &str = r#"Extract entities and relationships from the following text.

INSTRUCTIONS:
1. Identify key entities (people, organizations, concepts, technologies, locations, events)
2. Extract relationships between entities you identified
3. Output ONLY valid JSON, nothing else
4. Use the exact schema below

SCHEMA:
{{
  "entities": [
    {{"name": "EntityName", "type": "PERSON|ORGANIZATION|CONCEPT|TECHNOLOGY|LOCATION|EVENT", "description": "comprehensive description of the entity's attributes and activities"}}
  ],
  "relationships": [
    {{"source": "EntityName", "target": "OtherEntityName", "description": "why the two entities are related", "weight": 1.0}}
  ]
}}

RULES:
- Relationship source and target must be names from the entities list
- Weight is a number between 1 and 10 indicating the strength of the relationship
- Describe entities and relationships using only information present in the text
- Output ONLY the JSON object, no markdown, no explanations

TEXT:
{input_text}

JSON OUTPUT:"#;

/// Prompt variant that turns one text unit into a [`LocalGraphFragment`].
///
/// Required argument: `text`.
pub struct EntityExtractionPromptBuilder {
    prompt: String,
}

impl Default for EntityExtractionPromptBuilder {
    fn default() -> Self {
        Self::with_prompt(DEFAULT_EXTRACTION_PROMPT)
    }
}

impl EntityExtractionPromptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a custom template; it must contain `{input_text}`.
    pub fn with_prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
        }
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        Ok(Self::with_prompt(read_template(path).await?))
    }
}

impl PromptBuilder for EntityExtractionPromptBuilder {
    type Output = LocalGraphFragment;

    fn name(&self) -> &'static str {
        PROMPT_NAME
    }

    fn build(&self) -> (PromptTemplate, Arc<dyn ResponseParser<LocalGraphFragment>>) {
        (
            PromptTemplate::from_template(self.prompt.clone()),
            Arc::new(GraphFragmentParser::new()),
        )
    }

    fn prepare_chain_input(&self, args: &PromptArgs) -> Result<ChainInput, PipelineError> {
        let text = args.require(PROMPT_NAME, "text")?;
        Ok(ChainInput::from([("input_text".to_string(), text.render())]))
    }
}

#[derive(Deserialize)]
struct RawExtraction {
    #[serde(default)]
    entities: Vec<RawEntity>,
    #[serde(default, alias = "relations")]
    relationships: Vec<RawRelationship>,
}

#[derive(Deserialize)]
struct RawEntity {
    name: String,
    #[serde(default, rename = "type")]
    entity_type: String,
    #[serde(default)]
    description: String,
}

#[derive(Deserialize)]
struct RawRelationship {
    source: String,
    target: String,
    #[serde(default)]
    description: String,
    #[serde(default = "default_weight")]
    weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

/// Parses the model's JSON answer into a fragment with normalized names.
///
/// Within one fragment each entity name and each (source, target) pair appears once:
/// repeated mentions keep the first type, join distinct descriptions with a newline,
/// and sum relationship weights. Relationships to entities that were not extracted,
/// and self-loops, are dropped.
#[derive(Debug, Clone, Default)]
pub struct GraphFragmentParser {
    normalizer: EntityNormalizer,
}

impl GraphFragmentParser {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResponseParser<LocalGraphFragment> for GraphFragmentParser {
    fn parse(&self, response: &str) -> Result<LocalGraphFragment> {
        let raw: RawExtraction = serde_json::from_str(strip_code_fence(response))
            .context("Failed to parse extraction result")?;

        let mut fragment = LocalGraphFragment::default();
        let mut entity_idx: HashMap<String, usize> = HashMap::new();

        for entity in raw.entities {
            let name = self.normalizer.normalize(&entity.name);
            if name.is_empty() {
                continue;
            }
            let entity_type = self.normalizer.normalize_type(&entity.entity_type);
            let description = entity.description.trim().to_string();

            match entity_idx.get(&name) {
                Some(&idx) => {
                    let existing = &mut fragment.entities[idx];
                    if existing.entity_type.is_empty() {
                        existing.entity_type = entity_type;
                    }
                    append_distinct(&mut existing.description, &description);
                }
                None => {
                    entity_idx.insert(name.clone(), fragment.entities.len());
                    fragment.entities.push(EntityMention {
                        name,
                        entity_type,
                        description,
                        text_unit_ids: Vec::new(),
                    });
                }
            }
        }

        let mut edge_idx: HashMap<(String, String), usize> = HashMap::new();

        for relationship in raw.relationships {
            let source = self.normalizer.normalize(&relationship.source);
            let target = self.normalizer.normalize(&relationship.target);

            if source == target
                || !entity_idx.contains_key(&source)
                || !entity_idx.contains_key(&target)
            {
                debug!(%source, %target, "Dropping relationship without extracted endpoints");
                continue;
            }

            let weight = if relationship.weight.is_finite() && relationship.weight >= 0.0 {
                relationship.weight
            } else {
                default_weight()
            };
            let description = relationship.description.trim().to_string();

            match edge_idx.get(&(source.clone(), target.clone())) {
                Some(&idx) => {
                    let existing = &mut fragment.relationships[idx];
                    existing.weight += weight;
                    append_distinct(&mut existing.description, &description);
                }
                None => {
                    edge_idx.insert((source.clone(), target.clone()), fragment.relationships.len());
                    fragment.relationships.push(RelationshipMention {
                        source,
                        target,
                        description,
                        weight,
                        text_unit_ids: Vec::new(),
                    });
                }
            }
        }

        Ok(fragment)
    }
}

fn append_distinct(existing: &mut String, addition: &str) {
    if addition.is_empty() || existing.lines().any(|line| line == addition) {
        return;
    }
    if !existing.is_empty() {
        existing.push('\n');
    }
    existing.push_str(addition);
}

/// Models sometimes wrap JSON in a markdown fence despite instructions.
fn strip_code_fence(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the info string (e.g. `json`) on the opening line.
    let body = body.split_once('\n').map_or("", |(_, rest)| rest);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}
