//! In-memory reference implementation of [`KnowledgeStore`].
//!
//! Optimized for correctness, not production performance: vector search is a
//! linear cosine scan and graph search a plain BFS. Production deployments
//! implement the trait over a durable transactional store and a graph index;
//! this implementation backs every test and development environment.
//!
//! Concurrency model matches the trait contract: DashMap shards plus an
//! optimistic version column on entities. No global lock anywhere.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::error::{EngineError, EngineResult};
use crate::similarity::{cosine_similarity, normalize_name};
use crate::traits::{KnowledgeStore, RelatedEntity, SearchHit, SearchPayload, StoreStats};
use crate::types::{
    AuditId, ConsolidationAuditRecord, Entity, EntityId, EntityType, Namespace, Pattern,
    PatternId, Relationship, RelationshipKey,
};

/// Per-hop score decay during graph traversal.
const HOP_DECAY: f32 = 0.5;

/// Neighbors included in a graph hit's relational context.
const MAX_RELATED: usize = 5;

/// In-memory, namespace-partitioned knowledge store.
#[derive(Default)]
pub struct InMemoryKnowledgeStore {
    entities: DashMap<EntityId, Entity>,
    partitions: DashMap<(Namespace, EntityType), BTreeSet<EntityId>>,
    relationships: DashMap<RelationshipKey, Relationship>,
    adjacency: DashMap<EntityId, BTreeSet<RelationshipKey>>,
    patterns: DashMap<PatternId, Pattern>,
    audit: RwLock<Vec<ConsolidationAuditRecord>>,
    epochs: DashMap<Namespace, u64>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn audit_read(&self) -> EngineResult<std::sync::RwLockReadGuard<'_, Vec<ConsolidationAuditRecord>>> {
        self.audit
            .read()
            .map_err(|_| EngineError::Store("audit log lock poisoned".into()))
    }

    fn summary_of(entity: &Entity) -> String {
        let text = if entity.description.is_empty() {
            &entity.canonical_name
        } else {
            &entity.description
        };
        let mut summary: String = text.chars().take(160).collect();
        if text.chars().count() > 160 {
            summary.push('…');
        }
        summary
    }

    fn payload_of(&self, entity: &Entity, with_related: bool) -> SearchPayload {
        let related = if with_related {
            self.related_context(entity.id)
        } else {
            Vec::new()
        };
        SearchPayload {
            canonical_name: entity.canonical_name.clone(),
            entity_type: entity.entity_type,
            namespace: entity.namespace.clone(),
            summary: Self::summary_of(entity),
            related,
        }
    }

    fn related_context(&self, id: EntityId) -> Vec<RelatedEntity> {
        let Some(keys) = self.adjacency.get(&id) else {
            return Vec::new();
        };
        let mut related = Vec::new();
        for key in keys.iter() {
            let Some(rel) = self.relationships.get(key) else {
                continue;
            };
            let other = if rel.entity1_id == id {
                rel.entity2_id
            } else {
                rel.entity1_id
            };
            let Some(entity) = self.entities.get(&other) else {
                continue;
            };
            related.push(RelatedEntity {
                entity_id: other,
                canonical_name: entity.canonical_name.clone(),
                relationship: rel.relationship_type,
                strength: rel.strength,
            });
            if related.len() >= MAX_RELATED {
                break;
            }
        }
        related
    }

    /// Keyword seed score: fraction of query tokens found in the entity's
    /// name, plus half credit for tokens found only in the description.
    fn seed_score(entity: &Entity, query_tokens: &BTreeSet<String>) -> f32 {
        if query_tokens.is_empty() {
            return 0.0;
        }
        let name_tokens: BTreeSet<String> = normalize_name(&entity.canonical_name)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        let desc_tokens: BTreeSet<String> = normalize_name(&entity.description)
            .split_whitespace()
            .map(str::to_string)
            .collect();

        let mut score = 0.0f32;
        for token in query_tokens {
            if name_tokens.contains(token) {
                score += 1.0;
            } else if desc_tokens.contains(token) {
                score += 0.5;
            }
        }
        score / query_tokens.len() as f32
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    async fn insert_entity(&self, entity: Entity) -> EngineResult<EntityId> {
        let id = entity.id;
        let partition = (entity.namespace.clone(), entity.entity_type);
        debug!(entity = %id, namespace = %entity.namespace, "inserting entity");
        self.partitions.entry(partition).or_default().insert(id);
        self.entities.insert(id, entity);
        Ok(id)
    }

    async fn get_entity(&self, id: EntityId) -> EngineResult<Option<Entity>> {
        Ok(self.entities.get(&id).map(|e| e.clone()))
    }

    async fn update_entity(&self, entity: Entity) -> EngineResult<()> {
        use dashmap::mapref::entry::Entry;

        match self.entities.entry(entity.id) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().version != entity.version {
                    debug!(
                        entity = %entity.id,
                        stored = occupied.get().version,
                        submitted = entity.version,
                        "optimistic version mismatch"
                    );
                    return Err(EngineError::TransientStoreConflict {
                        namespace: entity.namespace.clone(),
                        entity_type: entity.entity_type,
                        entity_id: entity.id,
                    });
                }
                let mut next = entity;
                next.version += 1;
                occupied.insert(next);
                Ok(())
            }
            Entry::Vacant(_) => Err(EngineError::EntityNotFound { id: entity.id }),
        }
    }

    async fn entities_in(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
    ) -> EngineResult<Vec<Entity>> {
        let key = (namespace.clone(), entity_type);
        let Some(ids) = self.partitions.get(&key) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| self.entities.get(id).map(|e| e.clone()))
            .collect())
    }

    async fn entities_of_type(&self, entity_type: EntityType) -> EngineResult<Vec<Entity>> {
        let mut out = Vec::new();
        for partition in self.partitions.iter() {
            if partition.key().1 != entity_type {
                continue;
            }
            for id in partition.value().iter() {
                if let Some(entity) = self.entities.get(id) {
                    out.push(entity.clone());
                }
            }
        }
        Ok(out)
    }

    async fn upsert_relationship(&self, relationship: Relationship) -> EngineResult<()> {
        let key = relationship.key();
        self.adjacency
            .entry(relationship.entity1_id)
            .or_default()
            .insert(key);
        self.adjacency
            .entry(relationship.entity2_id)
            .or_default()
            .insert(key);
        self.relationships.insert(key, relationship);
        Ok(())
    }

    async fn get_relationship(
        &self,
        key: &RelationshipKey,
    ) -> EngineResult<Option<Relationship>> {
        Ok(self.relationships.get(key).map(|r| r.clone()))
    }

    async fn relationships_for(&self, id: EntityId) -> EngineResult<Vec<Relationship>> {
        let Some(keys) = self.adjacency.get(&id) else {
            return Ok(Vec::new());
        };
        Ok(keys
            .iter()
            .filter_map(|key| self.relationships.get(key).map(|r| r.clone()))
            .collect())
    }

    async fn upsert_pattern(&self, pattern: Pattern) -> EngineResult<PatternId> {
        let id = pattern.id;
        self.patterns.insert(id, pattern);
        Ok(id)
    }

    async fn patterns(&self) -> EngineResult<Vec<Pattern>> {
        Ok(self.patterns.iter().map(|p| p.clone()).collect())
    }

    async fn append_audit(&self, record: ConsolidationAuditRecord) -> EngineResult<()> {
        self.audit
            .write()
            .map_err(|_| EngineError::Store("audit log lock poisoned".into()))?
            .push(record);
        Ok(())
    }

    async fn get_audit(&self, id: AuditId) -> EngineResult<Option<ConsolidationAuditRecord>> {
        Ok(self.audit_read()?.iter().find(|r| r.id == id).cloned())
    }

    async fn audit_log(
        &self,
        namespace: &Namespace,
    ) -> EngineResult<Vec<ConsolidationAuditRecord>> {
        Ok(self
            .audit_read()?
            .iter()
            .filter(|r| &r.namespace == namespace)
            .cloned()
            .collect())
    }

    async fn vector_search(
        &self,
        namespace: &Namespace,
        query_embedding: &[f32],
        top_k: usize,
    ) -> EngineResult<Vec<SearchHit>> {
        if query_embedding.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let mut scored: Vec<(f32, EntityId)> = self
            .entities
            .iter()
            .filter(|e| &e.namespace == namespace)
            .filter_map(|e| {
                e.embedding
                    .as_deref()
                    .map(|emb| (cosine_similarity(emb, query_embedding), e.id))
            })
            .collect();
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .filter_map(|(score, id)| {
                self.entities.get(&id).map(|entity| SearchHit {
                    entity_id: id,
                    score,
                    payload: self.payload_of(&entity, false),
                })
            })
            .collect())
    }

    async fn graph_search(
        &self,
        namespace: &Namespace,
        query_text: &str,
        max_depth: usize,
        top_k: usize,
    ) -> EngineResult<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        let query_tokens: BTreeSet<String> = normalize_name(query_text)
            .split_whitespace()
            .map(str::to_string)
            .collect();
        if query_tokens.is_empty() {
            return Ok(Vec::new());
        }

        // Seed by keyword match over names and descriptions.
        let mut best: HashMap<EntityId, f32> = HashMap::new();
        let mut frontier: VecDeque<(EntityId, f32, usize)> = VecDeque::new();
        for entity in self.entities.iter() {
            if &entity.namespace != namespace {
                continue;
            }
            let score = Self::seed_score(&entity, &query_tokens);
            if score > 0.0 {
                best.insert(entity.id, score);
                frontier.push_back((entity.id, score, 0));
            }
        }

        // Bounded-depth traversal with strength-weighted decay.
        while let Some((id, score, depth)) = frontier.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let keys: Vec<RelationshipKey> = match self.adjacency.get(&id) {
                Some(guard) => guard.iter().copied().collect(),
                None => continue,
            };
            for key in keys {
                let Some(rel) = self.relationships.get(&key) else {
                    continue;
                };
                let other = if rel.entity1_id == id {
                    rel.entity2_id
                } else {
                    rel.entity1_id
                };
                let Some(neighbor) = self.entities.get(&other) else {
                    continue;
                };
                if &neighbor.namespace != namespace {
                    continue;
                }
                let propagated = score * rel.strength * HOP_DECAY;
                if propagated <= f32::EPSILON {
                    continue;
                }
                let current = best.get(&other).copied().unwrap_or(0.0);
                if propagated > current {
                    best.insert(other, propagated);
                    frontier.push_back((other, propagated, depth + 1));
                }
            }
        }

        let mut ranked: Vec<(f32, EntityId)> =
            best.into_iter().map(|(id, score)| (score, id)).collect();
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        ranked.truncate(top_k);

        Ok(ranked
            .into_iter()
            .filter_map(|(score, id)| {
                self.entities.get(&id).map(|entity| SearchHit {
                    entity_id: id,
                    score,
                    payload: self.payload_of(&entity, true),
                })
            })
            .collect())
    }

    async fn epoch(&self, namespace: &Namespace) -> u64 {
        self.epochs.get(namespace).map(|e| *e).unwrap_or(0)
    }

    async fn bump_epoch(&self, namespace: &Namespace) -> u64 {
        let mut entry = self.epochs.entry(namespace.clone()).or_insert(0);
        *entry += 1;
        *entry
    }

    async fn stats(&self, namespace: &Namespace) -> EngineResult<StoreStats> {
        let entity_count = self
            .entities
            .iter()
            .filter(|e| &e.namespace == namespace)
            .count();
        let relationship_count = self
            .relationships
            .iter()
            .filter(|r| {
                self.entities
                    .get(&r.entity1_id)
                    .map(|e| &e.namespace == namespace)
                    .unwrap_or(false)
            })
            .count();
        let pattern_count = self
            .patterns
            .iter()
            .filter(|p| p.namespaces_involved.contains(namespace))
            .count();
        let audit_count = self.audit_read()?.iter().filter(|r| &r.namespace == namespace).count();
        Ok(StoreStats {
            entity_count,
            relationship_count,
            pattern_count,
            audit_count,
        })
    }
}
