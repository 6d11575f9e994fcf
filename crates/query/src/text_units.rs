use std::collections::{HashMap, HashSet};
use tracing::debug;

use index::{RelationshipRecord, TextUnitRecord};

use crate::entities::ScoredEntity;

/// Picks the source text units behind the selected entities.
///
/// Candidates are the units referenced by selected entities. Each candidate's
/// coverage counts the selected entities and the relationships touching them that
/// cite it. Units are taken by coverage descending, ties in original chunk order,
/// until the count budget is reached. A unit that would overflow the token budget
/// is passed over so smaller, lower-ranked units can still fit.
#[derive(Debug, Clone)]
pub struct TextUnitsSelector {
    max_text_units: usize,
    max_tokens: usize,
}

impl TextUnitsSelector {
    pub fn new(max_text_units: usize, max_tokens: usize) -> Self {
        Self {
            max_text_units,
            max_tokens,
        }
    }

    pub fn run(
        &self,
        entities: &[ScoredEntity],
        relationships: &[RelationshipRecord],
        text_units: &[TextUnitRecord],
    ) -> Vec<TextUnitRecord> {
        let selected: HashSet<&str> = entities.iter().map(|e| e.entity.id.as_str()).collect();

        let mut coverage: HashMap<&str, usize> = HashMap::new();
        for entity in entities {
            for unit_id in dedup(&entity.entity.text_unit_ids) {
                *coverage.entry(unit_id).or_default() += 1;
            }
        }

        for relationship in relationships.iter().filter(|r| {
            selected.contains(r.source.as_str()) || selected.contains(r.target.as_str())
        }) {
            for unit_id in dedup(&relationship.text_unit_ids) {
                if let Some(count) = coverage.get_mut(unit_id) {
                    *count += 1;
                }
            }
        }

        let mut candidates: Vec<(usize, &TextUnitRecord, usize)> = text_units
            .iter()
            .enumerate()
            .filter_map(|(position, unit)| {
                coverage
                    .get(unit.id.as_str())
                    .map(|&count| (position, unit, count))
            })
            .collect();
        candidates.sort_by(|a, b| b.2.cmp(&a.2).then(a.0.cmp(&b.0)));

        let mut result = Vec::new();
        let mut seen = HashSet::new();
        let mut tokens = 0;
        for (_, unit, _) in candidates {
            if !seen.insert(unit.id.as_str()) {
                continue;
            }
            if result.len() == self.max_text_units {
                break;
            }
            if tokens + unit.n_tokens > self.max_tokens {
                debug!(text_unit_id = %unit.id, n_tokens = unit.n_tokens, "Text unit exceeds token budget");
                continue;
            }
            tokens += unit.n_tokens;
            result.push(unit.clone());
        }

        debug!(
            candidates = coverage.len(),
            selected = result.len(),
            tokens,
            "Selected text units"
        );
        result
    }
}

fn dedup(ids: &[String]) -> impl Iterator<Item = &str> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(String::as_str)
        .filter(move |id| seen.insert(*id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::tests::record;

    fn entity(name: &str, units: &[&str]) -> ScoredEntity {
        let mut entity = record(name, "");
        entity.text_unit_ids = units.iter().map(|u| u.to_string()).collect();
        ScoredEntity { entity, score: 1.0 }
    }

    fn unit(id: &str, n_tokens: usize) -> TextUnitRecord {
        TextUnitRecord {
            id: id.to_string(),
            document_id: "doc".to_string(),
            text: format!("text of {id}"),
            n_tokens,
            entity_ids: Vec::new(),
            relationship_ids: Vec::new(),
        }
    }

    fn relationship(source: &str, target: &str, units: &[&str]) -> RelationshipRecord {
        RelationshipRecord {
            id: format!("{source} -> {target}"),
            source: source.to_string(),
            target: target.to_string(),
            description: String::new(),
            weight: 1.0,
            rank: 0,
            text_unit_ids: units.iter().map(|u| u.to_string()).collect(),
        }
    }

    fn ids(units: &[TextUnitRecord]) -> Vec<&str> {
        units.iter().map(|u| u.id.as_str()).collect()
    }

    #[test]
    fn ranks_by_coverage_then_chunk_order() {
        let units = vec![unit("u1", 10), unit("u2", 10), unit("u3", 10), unit("u4", 10)];
        let entities = vec![entity("A", &["u1", "u3"]), entity("B", &["u3", "u2"])];
        let relationships = vec![relationship("A", "C", &["u2", "u4"])];

        let selected = TextUnitsSelector::new(10, 1000).run(&entities, &relationships, &units);

        // u3: two entities; u2: one entity and one relationship; u1: one entity.
        // u4 is only cited by a relationship and is not a candidate.
        assert_eq!(ids(&selected), vec!["u2", "u3", "u1"]);
    }

    #[test]
    fn respects_count_and_token_budgets() {
        let units = vec![unit("u1", 40), unit("u2", 40), unit("u3", 40)];
        let entities = vec![entity("A", &["u1", "u2", "u3"])];

        let by_count = TextUnitsSelector::new(2, 1000).run(&entities, &[], &units);
        assert_eq!(ids(&by_count), vec!["u1", "u2"]);

        let by_tokens = TextUnitsSelector::new(10, 100).run(&entities, &[], &units);
        assert_eq!(ids(&by_tokens), vec!["u1", "u2"]);
        assert!(by_tokens.iter().map(|u| u.n_tokens).sum::<usize>() <= 100);
    }

    #[test]
    fn oversized_top_unit_does_not_block_smaller_ones() {
        let units = vec![unit("big", 5000), unit("small", 10), unit("medium", 60)];
        let entities = vec![entity("A", &["big", "small", "medium"]), entity("B", &["big"])];

        let selected = TextUnitsSelector::new(5, 100).run(&entities, &[], &units);

        assert_eq!(ids(&selected), vec!["small", "medium"]);
    }

    #[test]
    fn each_unit_appears_once() {
        let units = vec![unit("u1", 5), unit("u1", 5), unit("u2", 5)];
        let entities = vec![entity("A", &["u1", "u1"]), entity("B", &["u1", "u2"])];

        let selected = TextUnitsSelector::new(10, 1000).run(&entities, &[], &units);

        assert_eq!(ids(&selected), vec!["u1", "u2"]);
    }

    #[test]
    fn unknown_unit_ids_are_ignored() {
        let units = vec![unit("u1", 5)];
        let entities = vec![entity("A", &["missing", "u1"])];

        let selected = TextUnitsSelector::new(10, 1000).run(&entities, &[], &units);

        assert_eq!(ids(&selected), vec!["u1"]);
    }
}
