//! Relationships between consolidated entities.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityId, SourceRef};

/// Unique identifier for relationships.
pub type RelationshipId = Uuid;

/// Closed relationship vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    CoordinatesWith,
    Causes,
    DependsOn,
    SharesPainPoint,
    Uses,
    OwnedBy,
    PartOf,
    PossibleDuplicateOf,
}

impl RelationshipType {
    /// Symmetric types collapse (A, B) and (B, A) into one record.
    pub fn is_symmetric(&self) -> bool {
        matches!(
            self,
            RelationshipType::CoordinatesWith
                | RelationshipType::SharesPainPoint
                | RelationshipType::PossibleDuplicateOf
        )
    }
}

/// How a relationship has been corroborated so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationType {
    SingleSource,
    CrossValidated,
}

/// Upsert key: (type, entity1, entity2), id-ordered for symmetric types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationshipKey {
    pub relationship_type: RelationshipType,
    pub entity1_id: EntityId,
    pub entity2_id: EntityId,
}

impl RelationshipKey {
    /// Build the canonical key for an entity pair.
    pub fn normalized(
        relationship_type: RelationshipType,
        entity1_id: EntityId,
        entity2_id: EntityId,
    ) -> Self {
        if relationship_type.is_symmetric() && entity2_id < entity1_id {
            Self {
                relationship_type,
                entity1_id: entity2_id,
                entity2_id: entity1_id,
            }
        } else {
            Self {
                relationship_type,
                entity1_id,
                entity2_id,
            }
        }
    }

    pub fn involves(&self, id: EntityId) -> bool {
        self.entity1_id == id || self.entity2_id == id
    }
}

/// Confidence ceiling while a relationship rests on a single document.
pub const SINGLE_SOURCE_CONFIDENCE_CAP: f32 = 0.7;

/// Confidence once at least two distinct documents corroborate.
pub const CROSS_VALIDATED_CONFIDENCE: f32 = 0.95;

/// A discovered relationship between two entities.
///
/// Invariants: `strength` is non-decreasing in the number of source refs;
/// `validated` flips true exactly once source refs span two distinct
/// documents, and never reverts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub id: RelationshipId,
    pub relationship_type: RelationshipType,
    pub entity1_id: EntityId,
    pub entity2_id: EntityId,

    /// Co-occurrence strength [0.0, 1.0], `min(refs / 10, 1.0)`
    pub strength: f32,

    /// Sources that asserted this relationship
    pub source_refs: BTreeSet<SourceRef>,

    pub validated: bool,
    pub validation_type: ValidationType,
    pub confidence: f32,

    pub created_at: DateTime<Utc>,
    pub last_observed_at: DateTime<Utc>,
}

impl Relationship {
    /// Create a relationship from its first observation.
    pub fn first_observed(
        relationship_type: RelationshipType,
        entity1_id: EntityId,
        entity2_id: EntityId,
        source_ref: SourceRef,
    ) -> Self {
        let key = RelationshipKey::normalized(relationship_type, entity1_id, entity2_id);
        let now = Utc::now();
        let mut rel = Self {
            id: Uuid::new_v4(),
            relationship_type: key.relationship_type,
            entity1_id: key.entity1_id,
            entity2_id: key.entity2_id,
            strength: 0.0,
            source_refs: BTreeSet::new(),
            validated: false,
            validation_type: ValidationType::SingleSource,
            confidence: 0.0,
            created_at: now,
            last_observed_at: now,
        };
        rel.observe(source_ref);
        rel
    }

    pub fn key(&self) -> RelationshipKey {
        RelationshipKey::normalized(self.relationship_type, self.entity1_id, self.entity2_id)
    }

    /// Record one more source observation and refresh the derived scores.
    ///
    /// Returns false when the ref was already known; set semantics make
    /// re-processing a source a no-op.
    pub fn observe(&mut self, source_ref: SourceRef) -> bool {
        let added = self.source_refs.insert(source_ref);
        if added {
            self.last_observed_at = Utc::now();
            self.refresh_scores();
        }
        added
    }

    /// Distinct documents among the source refs.
    pub fn distinct_documents(&self) -> usize {
        self.source_refs
            .iter()
            .map(|s| s.document_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn refresh_scores(&mut self) {
        let refs = self.source_refs.len() as f32;
        self.strength = (refs / 10.0).min(1.0);

        if self.distinct_documents() >= 2 {
            self.validated = true;
            self.validation_type = ValidationType::CrossValidated;
            self.confidence = CROSS_VALIDATED_CONFIDENCE;
        } else if self.relationship_type != RelationshipType::PossibleDuplicateOf {
            self.confidence = SINGLE_SOURCE_CONFIDENCE_CAP;
        }
        // PossibleDuplicateOf keeps the resolver-assigned similarity as its
        // confidence until cross-validation.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_key_normalizes_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let k1 = RelationshipKey::normalized(RelationshipType::CoordinatesWith, a, b);
        let k2 = RelationshipKey::normalized(RelationshipType::CoordinatesWith, b, a);
        assert_eq!(k1, k2);
    }

    #[test]
    fn directional_key_preserves_order() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let k1 = RelationshipKey::normalized(RelationshipType::DependsOn, a, b);
        let k2 = RelationshipKey::normalized(RelationshipType::DependsOn, b, a);
        assert_ne!(k1, k2);
    }

    #[test]
    fn strength_formula_exact_for_one_to_twenty_refs() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rel = Relationship::first_observed(
            RelationshipType::CoordinatesWith,
            a,
            b,
            SourceRef::new("doc-0"),
        );
        for n in 1..=20u32 {
            if n > 1 {
                rel.observe(SourceRef::new(format!("doc-{}", n - 1)));
            }
            let expected = (n as f32 / 10.0).min(1.0);
            assert_eq!(rel.strength, expected, "strength mismatch at N={}", n);
        }
    }

    #[test]
    fn validation_flips_on_second_distinct_document_only() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut rel = Relationship::first_observed(
            RelationshipType::CoordinatesWith,
            a,
            b,
            SourceRef::new("doc-14"),
        );
        assert!(!rel.validated);
        assert_eq!(rel.confidence, SINGLE_SOURCE_CONFIDENCE_CAP);

        // Second segment of the same document does not cross-validate.
        rel.observe(SourceRef::new("doc-14").with_segment(3));
        assert!(!rel.validated);
        assert_eq!(rel.validation_type, ValidationType::SingleSource);

        rel.observe(SourceRef::new("doc-21"));
        assert!(rel.validated);
        assert_eq!(rel.validation_type, ValidationType::CrossValidated);
        assert_eq!(rel.confidence, CROSS_VALIDATED_CONFIDENCE);
    }

    #[test]
    fn observe_same_ref_is_a_no_op() {
        let mut rel = Relationship::first_observed(
            RelationshipType::Uses,
            Uuid::new_v4(),
            Uuid::new_v4(),
            SourceRef::new("doc-1"),
        );
        let strength = rel.strength;
        assert!(!rel.observe(SourceRef::new("doc-1")));
        assert_eq!(rel.source_refs.len(), 1);
        assert_eq!(rel.strength, strength);
    }
}
