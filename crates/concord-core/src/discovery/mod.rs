//! Relationship discovery from co-occurrence within and across sources.
//!
//! The discoverer owns all relationship mutation (the resolver's
//! possible-duplicate links excepted). Discovery may run concurrently across
//! entity pairs; each (type, entity1, entity2) upsert key is serialized
//! through its own lock so concurrent observations of one pair never lose a
//! source ref.

mod rules;

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::error::EngineResult;
use crate::similarity::SimilarityScorer;
use crate::traits::KnowledgeStore;
use crate::types::{Entity, EntityId, Relationship, RelationshipKey, SourceRef};

/// Discovers and validates relationships between consolidated entities.
pub struct RelationshipDiscoverer {
    store: Arc<dyn KnowledgeStore>,
    scorer: SimilarityScorer,
    config: DiscoveryConfig,
    upsert_locks: DashMap<RelationshipKey, Arc<Mutex<()>>>,
}

impl RelationshipDiscoverer {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        scorer: SimilarityScorer,
        config: DiscoveryConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            config,
            upsert_locks: DashMap::new(),
        }
    }

    /// Discover relationships among the entities co-observed in one source.
    ///
    /// Re-processing a source ref is harmless: source refs are a set, so
    /// strength and validation never double-count.
    pub async fn discover(
        &self,
        source_ref: &SourceRef,
        entity_ids: &[EntityId],
    ) -> EngineResult<Vec<Relationship>> {
        let unique: BTreeSet<EntityId> = entity_ids.iter().copied().collect();
        let mut entities: Vec<Entity> = Vec::with_capacity(unique.len());
        for id in unique {
            match self.store.get_entity(id).await? {
                Some(entity) => entities.push(entity),
                None => warn!(entity = %id, source_ref = %source_ref, "co-mentioned entity missing, skipping"),
            }
        }

        let mut upserts = Vec::new();
        for i in 0..entities.len() {
            for j in (i + 1)..entities.len() {
                let (a, b) = (&entities[i], &entities[j]);
                if a.namespace != b.namespace {
                    debug!(
                        first = %a.id,
                        second = %b.id,
                        "skipping cross-namespace pair"
                    );
                    continue;
                }
                for planned in rules::plan_for_pair(a, b, &self.scorer, &self.config) {
                    let relationship = self
                        .upsert_observation(
                            planned.relationship_type,
                            planned.entity1_id,
                            planned.entity2_id,
                            source_ref,
                        )
                        .await?;
                    upserts.push(relationship);
                }
            }
        }

        if !upserts.is_empty() {
            info!(
                source_ref = %source_ref,
                count = upserts.len(),
                "relationship observations upserted"
            );
        }
        Ok(upserts)
    }

    /// Record one observation of a relationship under its serialized key.
    async fn upsert_observation(
        &self,
        relationship_type: crate::types::RelationshipType,
        entity1_id: EntityId,
        entity2_id: EntityId,
        source_ref: &SourceRef,
    ) -> EngineResult<Relationship> {
        let key = RelationshipKey::normalized(relationship_type, entity1_id, entity2_id);
        let lock = self
            .upsert_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let _guard = lock.lock().await;

        let relationship = match self.store.get_relationship(&key).await? {
            Some(mut existing) => {
                existing.observe(source_ref.clone());
                existing
            }
            None => Relationship::first_observed(
                relationship_type,
                entity1_id,
                entity2_id,
                source_ref.clone(),
            ),
        };
        self.store.upsert_relationship(relationship.clone()).await?;
        Ok(relationship)
    }
}
