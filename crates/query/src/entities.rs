use serde::Serialize;
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::debug;

use index::EntityRecord;

use crate::error::SelectionError;
use crate::scoring::EntityScorer;

#[derive(Debug, Clone, Serialize)]
pub struct ScoredEntity {
    #[serde(flatten)]
    pub entity: EntityRecord,
    pub score: f32,
}

/// Picks the entities most relevant to a query.
///
/// Entities are ordered by score descending, then degree descending, then name.
/// Only entities scoring at least `min_score` are kept, at most `max_entities` of
/// them. If the threshold removes every candidate, the single best entity with
/// a non-negative score is kept instead.
pub struct EntitiesSelector {
    scorer: Arc<dyn EntityScorer>,
    max_entities: usize,
    min_score: f32,
}

impl EntitiesSelector {
    pub fn new(scorer: Arc<dyn EntityScorer>, max_entities: usize) -> Self {
        Self {
            scorer,
            max_entities: max_entities.max(1),
            min_score: 0.0,
        }
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = min_score;
        self
    }

    pub async fn run(
        &self,
        query: &str,
        entities: &[EntityRecord],
    ) -> Result<Vec<ScoredEntity>, SelectionError> {
        if entities.is_empty() {
            return Err(SelectionError::EmptyCorpus);
        }

        let scores = self
            .scorer
            .score(query, entities)
            .await
            .map_err(|e| SelectionError::Scoring(format!("{e:#}")))?;
        if scores.len() != entities.len() {
            return Err(SelectionError::Scoring(format!(
                "expected {} scores, got {}",
                entities.len(),
                scores.len()
            )));
        }

        let mut candidates: Vec<(&EntityRecord, f32)> = entities
            .iter()
            .zip(scores)
            .filter(|(_, score)| *score >= 0.0)
            .collect();
        if candidates.is_empty() {
            return Err(SelectionError::EmptySelection);
        }

        candidates.sort_by(|(a, a_score), (b, b_score)| {
            b_score
                .partial_cmp(a_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.degree.cmp(&a.degree))
                .then_with(|| a.name.cmp(&b.name))
        });

        let passing = candidates
            .iter()
            .take_while(|(_, score)| *score >= self.min_score)
            .count();
        let keep = passing.clamp(1, self.max_entities);

        debug!(
            candidates = candidates.len(),
            above_threshold = passing,
            selected = keep,
            "Selected entities"
        );

        Ok(candidates
            .into_iter()
            .take(keep)
            .map(|(entity, score)| ScoredEntity {
                entity: entity.clone(),
                score,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::tests::{FixedScorer, record};
    use std::collections::HashMap;

    fn selector(scores: &[(&'static str, f32)], max_entities: usize) -> EntitiesSelector {
        EntitiesSelector::new(
            Arc::new(FixedScorer(scores.iter().copied().collect::<HashMap<_, _>>())),
            max_entities,
        )
    }

    fn names(selected: &[ScoredEntity]) -> Vec<&str> {
        selected.iter().map(|s| s.entity.name.as_str()).collect()
    }

    #[tokio::test]
    async fn orders_by_score_and_truncates() {
        let entities = vec![record("A", ""), record("B", ""), record("C", "")];
        let selected = selector(&[("A", 0.2), ("B", 0.9), ("C", 0.5)], 2)
            .run("q", &entities)
            .await
            .unwrap();

        assert_eq!(names(&selected), vec!["B", "C"]);
        assert_eq!(selected[0].score, 0.9);
    }

    #[tokio::test]
    async fn ties_break_by_degree_then_name() {
        let mut hub = record("Z", "");
        hub.degree = 5;
        let entities = vec![record("B", ""), record("A", ""), hub];

        let selected = selector(&[("A", 0.5), ("B", 0.5), ("Z", 0.5)], 3)
            .run("q", &entities)
            .await
            .unwrap();

        assert_eq!(names(&selected), vec!["Z", "A", "B"]);
    }

    #[tokio::test]
    async fn threshold_falls_back_to_the_best_candidate() {
        let entities = vec![record("A", ""), record("B", "")];
        let selected = selector(&[("A", 0.1), ("B", 0.3)], 5)
            .with_min_score(0.8)
            .run("q", &entities)
            .await
            .unwrap();

        assert_eq!(names(&selected), vec!["B"]);
    }

    #[tokio::test]
    async fn threshold_filters_when_something_passes() {
        let entities = vec![record("A", ""), record("B", ""), record("C", "")];
        let selected = selector(&[("A", 0.6), ("B", 0.3), ("C", 0.7)], 5)
            .with_min_score(0.5)
            .run("q", &entities)
            .await
            .unwrap();

        assert_eq!(names(&selected), vec!["C", "A"]);
    }

    #[tokio::test]
    async fn empty_corpus_and_empty_selection_are_distinct() {
        let none = selector(&[], 3).run("q", &[]).await.unwrap_err();
        assert!(matches!(none, SelectionError::EmptyCorpus));

        let entities = vec![record("A", ""), record("B", "")];
        let negative = selector(&[("A", -0.2), ("B", f32::NAN)], 3)
            .run("q", &entities)
            .await
            .unwrap_err();
        assert!(matches!(negative, SelectionError::EmptySelection));
    }

    #[tokio::test]
    async fn zero_scores_are_still_selectable() {
        let entities = vec![record("A", "")];
        let selected = selector(&[], 3).run("q", &entities).await.unwrap();
        assert_eq!(names(&selected), vec!["A"]);
    }
}
