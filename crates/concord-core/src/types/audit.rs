//! Immutable consolidation audit trail.
//!
//! Every resolver decision appends one record. Merge records carry the
//! pre-merge entity snapshot so a bad merge can be rolled back, and the whole
//! table is exported read-only to the external governance consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Entity, EntityId, EntityType, Namespace};

/// Unique identifier for audit records.
pub type AuditId = Uuid;

/// What the resolver decided for one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionDecision {
    New,
    Merge,
    Link,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsolidationAuditRecord {
    pub id: AuditId,
    pub timestamp: DateTime<Utc>,
    pub namespace: Namespace,
    pub entity_type: EntityType,

    /// Entities involved in the decision (target entity for merges, the new
    /// entity plus its near-duplicate for links)
    pub merged_entity_ids: Vec<EntityId>,

    pub resulting_entity_id: EntityId,

    /// Best similarity the scorer reported, absent for brand-new concepts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,

    pub decision: ResolutionDecision,

    /// Pre-merge snapshot enabling rollback; merge decisions only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rollback: Option<Box<Entity>>,
}

impl ConsolidationAuditRecord {
    pub fn new(
        namespace: Namespace,
        entity_type: EntityType,
        decision: ResolutionDecision,
        resulting_entity_id: EntityId,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            namespace,
            entity_type,
            merged_entity_ids: Vec::new(),
            resulting_entity_id,
            similarity_score: None,
            decision,
            rollback: None,
        }
    }

    pub fn with_merged(mut self, ids: Vec<EntityId>) -> Self {
        self.merged_entity_ids = ids;
        self
    }

    pub fn with_similarity(mut self, score: f32) -> Self {
        self.similarity_score = Some(score);
        self
    }

    pub fn with_rollback(mut self, snapshot: Entity) -> Self {
        self.rollback = Some(Box::new(snapshot));
        self
    }
}
