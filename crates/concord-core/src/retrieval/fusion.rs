//! Reciprocal rank fusion of the vector and graph branch rankings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::traits::{SearchHit, SearchPayload};
use crate::types::EntityId;

/// One fused result item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchItem {
    pub entity_id: EntityId,

    /// Fused reciprocal-rank score
    pub score: f32,

    /// Best raw branch similarity, used for tie-breaking
    pub raw_similarity: f32,

    pub from_vector: bool,
    pub from_graph: bool,

    pub payload: SearchPayload,
}

struct Accumulator {
    vector_rank: Option<usize>,
    graph_rank: Option<usize>,
    raw_similarity: f32,
    vector_payload: Option<SearchPayload>,
    graph_payload: Option<SearchPayload>,
}

/// Fuse two ranked lists with `score = w/(rank + k)` per branch, 1-based
/// ranks. A key present in both lists keeps the graph payload (richer
/// relational context) under the fused score. Ties break on the higher raw
/// branch similarity, then on entity id for determinism.
pub(crate) fn reciprocal_rank_fusion(
    vector: Vec<SearchHit>,
    graph: Vec<SearchHit>,
    weight_vector: f32,
    weight_graph: f32,
    k: f32,
) -> Vec<SearchItem> {
    let mut accumulators: HashMap<EntityId, Accumulator> = HashMap::new();

    for (index, hit) in vector.into_iter().enumerate() {
        let acc = accumulators.entry(hit.entity_id).or_insert(Accumulator {
            vector_rank: None,
            graph_rank: None,
            raw_similarity: f32::MIN,
            vector_payload: None,
            graph_payload: None,
        });
        acc.vector_rank = Some(index + 1);
        acc.raw_similarity = acc.raw_similarity.max(hit.score);
        acc.vector_payload = Some(hit.payload);
    }
    for (index, hit) in graph.into_iter().enumerate() {
        let acc = accumulators.entry(hit.entity_id).or_insert(Accumulator {
            vector_rank: None,
            graph_rank: None,
            raw_similarity: f32::MIN,
            vector_payload: None,
            graph_payload: None,
        });
        acc.graph_rank = Some(index + 1);
        acc.raw_similarity = acc.raw_similarity.max(hit.score);
        acc.graph_payload = Some(hit.payload);
    }

    let mut items: Vec<SearchItem> = accumulators
        .into_iter()
        .filter_map(|(entity_id, acc)| {
            let mut score = 0.0f32;
            if let Some(rank) = acc.vector_rank {
                score += weight_vector / (rank as f32 + k);
            }
            if let Some(rank) = acc.graph_rank {
                score += weight_graph / (rank as f32 + k);
            }
            let from_vector = acc.vector_rank.is_some();
            let from_graph = acc.graph_rank.is_some();
            // Graph payload preferred: it carries relational context.
            let payload = acc.graph_payload.or(acc.vector_payload)?;
            Some(SearchItem {
                entity_id,
                score,
                raw_similarity: acc.raw_similarity,
                from_vector,
                from_graph,
                payload,
            })
        })
        .collect();

    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.raw_similarity
                    .partial_cmp(&a.raw_similarity)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EntityType, Namespace};
    use uuid::Uuid;

    fn hit(id: EntityId, score: f32) -> SearchHit {
        SearchHit {
            entity_id: id,
            score,
            payload: SearchPayload {
                canonical_name: "x".into(),
                entity_type: EntityType::System,
                namespace: Namespace::new("acme"),
                summary: String::new(),
                related: Vec::new(),
            },
        }
    }

    #[test]
    fn key_in_both_branches_outranks_single_branch_keys() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        let items = reciprocal_rank_fusion(
            vec![hit(a, 0.9), hit(b, 0.8)],
            vec![hit(b, 0.7), hit(c, 0.6)],
            0.5,
            0.5,
            60.0,
        );
        assert_eq!(items[0].entity_id, b);
        assert!(items[0].score > items[1].score);
        let score_a = items.iter().find(|i| i.entity_id == a).unwrap().score;
        let score_c = items.iter().find(|i| i.entity_id == c).unwrap().score;
        assert!(items[0].score > score_a);
        assert!(items[0].score > score_c);
    }

    #[test]
    fn pure_vector_weight_reproduces_vector_ranking() {
        let ids: Vec<EntityId> = (0..4).map(|_| Uuid::new_v4()).collect();
        let vector: Vec<SearchHit> = ids
            .iter()
            .enumerate()
            .map(|(i, id)| hit(*id, 1.0 - i as f32 * 0.1))
            .collect();
        let graph = vec![hit(ids[3], 0.9), hit(ids[1], 0.8), hit(Uuid::new_v4(), 0.7)];

        let items = reciprocal_rank_fusion(vector, graph, 1.0, 0.0, 60.0);
        let fused_order: Vec<EntityId> = items
            .iter()
            .filter(|i| i.from_vector)
            .map(|i| i.entity_id)
            .collect();
        assert_eq!(fused_order, ids);
    }

    #[test]
    fn both_branch_key_keeps_graph_payload() {
        let shared = Uuid::new_v4();
        let mut graph_hit = hit(shared, 0.6);
        graph_hit.payload.summary = "graph context".into();
        let items =
            reciprocal_rank_fusion(vec![hit(shared, 0.9)], vec![graph_hit], 0.5, 0.5, 60.0);
        assert_eq!(items[0].payload.summary, "graph context");
        assert!(items[0].from_vector && items[0].from_graph);
    }

    #[test]
    fn tie_breaks_on_raw_similarity() {
        let weak = Uuid::new_v4();
        let strong = Uuid::new_v4();
        // Same ranks in opposite branches produce equal fused scores.
        let items = reciprocal_rank_fusion(
            vec![hit(weak, 0.4)],
            vec![hit(strong, 0.9)],
            0.5,
            0.5,
            60.0,
        );
        assert_eq!(items[0].entity_id, strong);
    }
}
