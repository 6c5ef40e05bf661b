//! Knowledge store abstraction.
//!
//! The engine defines the store's schema and invariants; the physical
//! backend (durable transactional tables plus a graph-traversable index) is
//! external infrastructure behind this trait. The bundled
//! [`InMemoryKnowledgeStore`](crate::store::InMemoryKnowledgeStore) is the
//! reference implementation used by tests and development.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::types::{
    AuditId, ConsolidationAuditRecord, Entity, EntityId, EntityType, Namespace, Pattern,
    PatternId, Relationship, RelationshipKey,
};

/// One ranked hit from a vector or graph search branch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_id: EntityId,

    /// Raw branch score: cosine similarity for vector hits, seed-and-decay
    /// score for graph hits
    pub score: f32,

    pub payload: SearchPayload,
}

/// What a search branch knows about a hit.
///
/// Graph hits carry relational context; vector hits leave `related` empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchPayload {
    pub canonical_name: String,
    pub entity_type: EntityType,
    pub namespace: Namespace,
    pub summary: String,
    #[serde(default)]
    pub related: Vec<RelatedEntity>,
}

/// A neighbor reached while traversing toward a graph hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub entity_id: EntityId,
    pub canonical_name: String,
    pub relationship: crate::types::RelationshipType,
    pub strength: f32,
}

/// Per-namespace store statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub entity_count: usize,
    pub relationship_count: usize,
    pub pattern_count: usize,
    pub audit_count: usize,
}

/// Shared, namespace-partitioned repository of entities, relationships,
/// patterns, and audit records.
///
/// Writes use optimistic versioning: `update_entity` compares the submitted
/// entity's `version` against the stored one and fails with
/// `TransientStoreConflict` on mismatch. There is no global lock; callers
/// coordinate per key.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// Insert a new entity, returning its id.
    async fn insert_entity(&self, entity: Entity) -> EngineResult<EntityId>;

    /// Fetch an entity by id, None if absent.
    async fn get_entity(&self, id: EntityId) -> EngineResult<Option<Entity>>;

    /// Compare-and-swap update: succeeds only when the submitted version
    /// matches the stored version, then increments it.
    async fn update_entity(&self, entity: Entity) -> EngineResult<()>;

    /// All entities in one (namespace, entity_type) partition.
    async fn entities_in(
        &self,
        namespace: &Namespace,
        entity_type: EntityType,
    ) -> EngineResult<Vec<Entity>>;

    /// All entities of one type across namespaces (pattern recognition).
    async fn entities_of_type(&self, entity_type: EntityType) -> EngineResult<Vec<Entity>>;

    /// Insert or replace a relationship under its normalized key.
    async fn upsert_relationship(&self, relationship: Relationship) -> EngineResult<()>;

    /// Fetch a relationship by normalized key.
    async fn get_relationship(&self, key: &RelationshipKey)
        -> EngineResult<Option<Relationship>>;

    /// All relationships touching an entity.
    async fn relationships_for(&self, id: EntityId) -> EngineResult<Vec<Relationship>>;

    /// Insert or replace a pattern.
    async fn upsert_pattern(&self, pattern: Pattern) -> EngineResult<PatternId>;

    /// All recognized patterns.
    async fn patterns(&self) -> EngineResult<Vec<Pattern>>;

    /// Append an immutable audit record.
    async fn append_audit(&self, record: ConsolidationAuditRecord) -> EngineResult<()>;

    /// Fetch one audit record by id.
    async fn get_audit(&self, id: AuditId) -> EngineResult<Option<ConsolidationAuditRecord>>;

    /// Audit records for a namespace, oldest first. The external governance
    /// consumer reads this surface only.
    async fn audit_log(&self, namespace: &Namespace)
        -> EngineResult<Vec<ConsolidationAuditRecord>>;

    /// Cosine-ranked entities near the query embedding, namespace-filtered.
    async fn vector_search(
        &self,
        namespace: &Namespace,
        query_embedding: &[f32],
        top_k: usize,
    ) -> EngineResult<Vec<SearchHit>>;

    /// Bounded-depth relationship traversal seeded by keyword match,
    /// namespace-filtered, ranked.
    async fn graph_search(
        &self,
        namespace: &Namespace,
        query_text: &str,
        max_depth: usize,
        top_k: usize,
    ) -> EngineResult<Vec<SearchHit>>;

    /// Current retrieval epoch for a namespace.
    async fn epoch(&self, namespace: &Namespace) -> u64;

    /// Bump the retrieval epoch, invalidating cached query results.
    async fn bump_epoch(&self, namespace: &Namespace) -> u64;

    /// Per-namespace statistics.
    async fn stats(&self, namespace: &Namespace) -> EngineResult<StoreStats>;
}
