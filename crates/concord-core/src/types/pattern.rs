//! Recurring patterns surfaced by periodic recognition passes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{EntityId, Namespace};

/// Unique identifier for patterns.
pub type PatternId = Uuid;

/// A recurring, high-priority pattern over consolidated entities.
///
/// Mutated only by the recognizer's periodic pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: PatternId,

    /// Kind of recurrence, e.g. `recurring_pain_point`
    pub pattern_type: String,

    /// Human-readable summary of what recurs
    pub description: String,

    /// Number of member entities
    pub frequency: u32,

    pub member_entity_ids: Vec<EntityId>,

    /// Namespaces the members span (patterns may cross tenants of one org)
    pub namespaces_involved: Vec<Namespace>,

    /// Priority [0.0, 10.0], higher means act sooner
    pub priority_score: f32,

    pub recommended_action: String,

    /// Recognition confidence [0.0, 1.0]
    pub confidence: f32,

    pub created_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
}

impl Pattern {
    /// Fraction of this pattern's members shared with `other_members`.
    ///
    /// Used to match a fresh clustering result against an existing pattern
    /// record so re-recognition updates rather than duplicates.
    pub fn member_overlap(&self, other_members: &[EntityId]) -> f32 {
        if self.member_entity_ids.is_empty() && other_members.is_empty() {
            return 0.0;
        }
        let own: std::collections::HashSet<_> = self.member_entity_ids.iter().collect();
        let shared = other_members.iter().filter(|id| own.contains(id)).count();
        let union = own.len() + other_members.len() - shared;
        shared as f32 / union.max(1) as f32
    }
}
