use anyhow::Result;
use serde::Serialize;
use tracing::{debug, info, warn};

use extract::{EntityMention, EntityNormalizer, LocalGraphFragment, RelationshipMention};

use crate::graph::{Description, EntityNode, GraphKind, KnowledgeGraph, RelationshipEdge};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub entity_mentions: usize,
    pub relationship_mentions: usize,
    /// Relationships skipped because an endpoint was never extracted as an entity.
    pub dropped_relationships: usize,
}

/// Folds per-chunk fragments into one multi-observation graph.
///
/// Fragments are folded sequentially in input order, so description lists are
/// in fragment order and provenance ids in first-seen order. Extraction already
/// runs concurrently; the fold itself holds no locks and does no I/O.
///
/// The entity type is first-non-empty-wins: later mentions only fill in a type
/// when none has been seen yet.
#[derive(Debug, Clone, Default)]
pub struct GraphMerger {
    kind: GraphKind,
    normalizer: EntityNormalizer,
}

impl GraphMerger {
    pub fn new(kind: GraphKind) -> Self {
        Self {
            kind,
            normalizer: EntityNormalizer::new(),
        }
    }

    pub fn kind(&self) -> GraphKind {
        self.kind
    }

    pub fn merge(&self, fragments: &[LocalGraphFragment]) -> KnowledgeGraph {
        self.merge_with_stats(fragments).0
    }

    pub fn merge_with_stats(&self, fragments: &[LocalGraphFragment]) -> (KnowledgeGraph, MergeStats) {
        let mut graph = KnowledgeGraph::new(self.kind);
        let stats = self.fold(&mut graph, fragments);
        (graph, stats)
    }

    /// Fold more fragments into an existing graph.
    ///
    /// The graph must have the merger's [`GraphKind`]; edge identity would
    /// otherwise differ between the graph and this merger.
    pub fn merge_into(
        &self,
        graph: &mut KnowledgeGraph,
        fragments: &[LocalGraphFragment],
    ) -> Result<MergeStats> {
        if graph.kind() != self.kind {
            anyhow::bail!(
                "cannot merge into a {:?} graph with a {:?} merger",
                graph.kind(),
                self.kind
            );
        }
        Ok(self.fold(graph, fragments))
    }

    /// Entities are merged before relationships within each fragment so that a
    /// relationship can refer to an entity introduced by the same fragment.
    fn fold(&self, graph: &mut KnowledgeGraph, fragments: &[LocalGraphFragment]) -> MergeStats {
        let mut stats = MergeStats::default();

        for fragment in fragments {
            for mention in &fragment.entities {
                self.merge_entity(graph, fragment, mention);
                stats.entity_mentions += 1;
            }
            for mention in &fragment.relationships {
                if self.merge_relationship(graph, fragment, mention) {
                    stats.relationship_mentions += 1;
                } else {
                    stats.dropped_relationships += 1;
                }
            }
        }

        info!(
            fragments = fragments.len(),
            entities = graph.entities().len(),
            relationships = graph.relationships().len(),
            dropped_relationships = stats.dropped_relationships,
            "Merged fragments"
        );
        stats
    }

    fn merge_entity(
        &self,
        graph: &mut KnowledgeGraph,
        fragment: &LocalGraphFragment,
        mention: &EntityMention,
    ) {
        let name = self.normalizer.normalize(&mention.name);
        let provenance = provenance_of(fragment, &mention.text_unit_ids);

        let Some(idx) = graph.entity_index(&name) else {
            graph.push_entity(EntityNode {
                name,
                entity_type: mention.entity_type.clone(),
                description: Description::new(mention.description.clone()),
                text_unit_ids: dedup(provenance),
            });
            return;
        };

        let node = graph.entity_mut(idx);
        if node.entity_type.is_empty() {
            node.entity_type = mention.entity_type.clone();
        } else if !mention.entity_type.is_empty() && node.entity_type != mention.entity_type {
            debug!(
                entity = %node.name,
                kept = %node.entity_type,
                ignored = %mention.entity_type,
                "Entity type conflict, keeping first-seen type"
            );
        }
        node.description.push(mention.description.clone());
        extend_unique(&mut node.text_unit_ids, provenance);
    }

    fn merge_relationship(
        &self,
        graph: &mut KnowledgeGraph,
        fragment: &LocalGraphFragment,
        mention: &RelationshipMention,
    ) -> bool {
        let source = self.normalizer.normalize(&mention.source);
        let target = self.normalizer.normalize(&mention.target);

        if source == target
            || graph.entity_index(&source).is_none()
            || graph.entity_index(&target).is_none()
        {
            warn!(
                %source,
                %target,
                text_unit_id = %fragment.text_unit_id,
                "Skipping relationship with unknown endpoint"
            );
            return false;
        }

        let provenance = provenance_of(fragment, &mention.text_unit_ids);

        match graph.relationship_index(&source, &target) {
            Some(idx) => {
                let edge = graph.relationship_mut(idx);
                edge.description.push(mention.description.clone());
                edge.weight += mention.weight;
                extend_unique(&mut edge.text_unit_ids, provenance);
            }
            None => {
                graph.push_relationship(RelationshipEdge {
                    source,
                    target,
                    description: Description::new(mention.description.clone()),
                    weight: mention.weight,
                    text_unit_ids: dedup(provenance),
                });
            }
        }
        true
    }
}

/// A mention's own provenance, falling back to the fragment's text unit.
fn provenance_of(fragment: &LocalGraphFragment, ids: &[String]) -> Vec<String> {
    if !ids.is_empty() {
        ids.to_vec()
    } else if !fragment.text_unit_id.is_empty() {
        vec![fragment.text_unit_id.clone()]
    } else {
        Vec::new()
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut unique = Vec::with_capacity(ids.len());
    extend_unique(&mut unique, ids);
    unique
}

fn extend_unique(existing: &mut Vec<String>, ids: Vec<String>) {
    for id in ids {
        if !existing.contains(&id) {
            existing.push(id);
        }
    }
}
