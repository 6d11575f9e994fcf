use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Whether the relationships `(A, B)` and `(B, A)` are the same edge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GraphKind {
    #[default]
    Undirected,
    Directed,
}

/// The description of a node or edge: observations before summarization, one
/// canonical string after.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Description {
    Observed(Vec<String>),
    Canonical(String),
}

impl Description {
    pub fn new(first: impl Into<String>) -> Self {
        Self::Observed(vec![first.into()])
    }

    /// Record another observation. A canonical description becomes the first observation.
    pub fn push(&mut self, description: impl Into<String>) {
        match self {
            Self::Observed(list) => list.push(description.into()),
            Self::Canonical(text) => {
                let first = std::mem::take(text);
                *self = Self::Observed(vec![first, description.into()]);
            }
        }
    }

    pub fn observations(&self) -> &[String] {
        match self {
            Self::Observed(list) => list,
            Self::Canonical(text) => std::slice::from_ref(text),
        }
    }

    pub fn observation_count(&self) -> usize {
        self.observations().len()
    }

    pub fn is_canonical(&self) -> bool {
        matches!(self, Self::Canonical(_))
    }

    pub fn canonical(&self) -> Option<&str> {
        match self {
            Self::Canonical(text) => Some(text),
            Self::Observed(_) => None,
        }
    }

    /// Promote a lone observation to the canonical description.
    ///
    /// Returns false, leaving the description untouched, when there are several
    /// observations or it is already canonical.
    pub fn collapse_single(&mut self) -> bool {
        match self {
            Self::Observed(list) if list.len() == 1 => {
                let text = list.remove(0);
                *self = Self::Canonical(text);
                true
            }
            _ => false,
        }
    }

    /// The canonical text, or the observations joined by newlines when unresolved.
    pub fn text(&self) -> String {
        match self {
            Self::Canonical(text) => text.clone(),
            Self::Observed(list) => list.join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityNode {
    pub name: String,
    pub entity_type: String,
    pub description: Description,
    /// Contributing text units, deduplicated, in first-seen order.
    pub text_unit_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipEdge {
    pub source: String,
    pub target: String,
    pub description: Description,
    pub weight: f64,
    pub text_unit_ids: Vec<String>,
}

impl RelationshipEdge {
    /// `"{source} -> {target}"`, in the orientation first observed.
    pub fn display_name(&self) -> String {
        format!("{} -> {}", self.source, self.target)
    }

    /// Like [`display_name`](Self::display_name), but unique even when entity
    /// names contain `->`. See [`relationship_id`].
    pub fn id(&self) -> String {
        relationship_id(&self.source, &self.target)
    }
}

/// Stable id for the edge `source -> target`.
///
/// Backslashes and `->` inside either name are escaped, so the only unescaped
/// `->` is the separator and distinct endpoint pairs never share an id.
pub fn relationship_id(source: &str, target: &str) -> String {
    format!("{} -> {}", escape_endpoint(source), escape_endpoint(target))
}

fn escape_endpoint(name: &str) -> String {
    name.replace('\\', "\\\\").replace("->", "\\->")
}

/// Entities keyed by normalized name and relationships keyed by endpoint pair,
/// both kept in insertion order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "GraphTables", into = "GraphTables")]
pub struct KnowledgeGraph {
    kind: GraphKind,
    entities: Vec<EntityNode>,
    relationships: Vec<RelationshipEdge>,
    entity_to_idx: HashMap<String, usize>,
    edge_to_idx: HashMap<(String, String), usize>,
}

#[derive(Serialize, Deserialize)]
struct GraphTables {
    kind: GraphKind,
    entities: Vec<EntityNode>,
    relationships: Vec<RelationshipEdge>,
}

impl From<GraphTables> for KnowledgeGraph {
    fn from(tables: GraphTables) -> Self {
        let mut graph = KnowledgeGraph::new(tables.kind);
        for entity in tables.entities {
            graph.push_entity(entity);
        }
        for relationship in tables.relationships {
            graph.push_relationship(relationship);
        }
        graph
    }
}

impl From<KnowledgeGraph> for GraphTables {
    fn from(graph: KnowledgeGraph) -> Self {
        Self {
            kind: graph.kind,
            entities: graph.entities,
            relationships: graph.relationships,
        }
    }
}

impl KnowledgeGraph {
    pub fn new(kind: GraphKind) -> Self {
        Self {
            kind,
            entities: Vec::new(),
            relationships: Vec::new(),
            entity_to_idx: HashMap::new(),
            edge_to_idx: HashMap::new(),
        }
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn entities(&self) -> &[EntityNode] {
        &self.entities
    }

    pub fn relationships(&self) -> &[RelationshipEdge] {
        &self.relationships
    }

    pub fn entity(&self, name: &str) -> Option<&EntityNode> {
        self.entity_index(name).map(|idx| &self.entities[idx])
    }

    pub fn relationship(&self, source: &str, target: &str) -> Option<&RelationshipEdge> {
        self.relationship_index(source, target)
            .map(|idx| &self.relationships[idx])
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Nodes and edges whose description has not been made canonical.
    pub fn unresolved_count(&self) -> usize {
        self.entities
            .iter()
            .filter(|e| !e.description.is_canonical())
            .count()
            + self
                .relationships
                .iter()
                .filter(|r| !r.description.is_canonical())
                .count()
    }

    /// Number of relationships touching each entity.
    pub fn degrees(&self) -> HashMap<&str, usize> {
        let mut degrees: HashMap<&str, usize> = self
            .entities
            .iter()
            .map(|e| (e.name.as_str(), 0))
            .collect();
        for relationship in &self.relationships {
            *degrees.entry(relationship.source.as_str()).or_default() += 1;
            *degrees.entry(relationship.target.as_str()).or_default() += 1;
        }
        degrees
    }

    fn edge_key(&self, source: &str, target: &str) -> (String, String) {
        match self.kind {
            GraphKind::Undirected if target < source => (target.to_string(), source.to_string()),
            _ => (source.to_string(), target.to_string()),
        }
    }

    pub(crate) fn entity_index(&self, name: &str) -> Option<usize> {
        self.entity_to_idx.get(name).copied()
    }

    pub(crate) fn relationship_index(&self, source: &str, target: &str) -> Option<usize> {
        self.edge_to_idx.get(&self.edge_key(source, target)).copied()
    }

    pub(crate) fn push_entity(&mut self, entity: EntityNode) -> usize {
        let idx = self.entities.len();
        self.entity_to_idx.insert(entity.name.clone(), idx);
        self.entities.push(entity);
        idx
    }

    pub(crate) fn push_relationship(&mut self, relationship: RelationshipEdge) -> usize {
        let idx = self.relationships.len();
        let key = self.edge_key(&relationship.source, &relationship.target);
        self.edge_to_idx.insert(key, idx);
        self.relationships.push(relationship);
        idx
    }

    pub(crate) fn entity_mut(&mut self, idx: usize) -> &mut EntityNode {
        &mut self.entities[idx]
    }

    pub(crate) fn relationship_mut(&mut self, idx: usize) -> &mut RelationshipEdge {
        &mut self.relationships[idx]
    }
}
