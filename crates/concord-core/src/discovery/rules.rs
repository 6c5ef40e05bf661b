//! Rule table mapping entity-type pairs and trigger conditions to
//! relationship upserts.

use crate::config::DiscoveryConfig;
use crate::similarity::{normalize_name, SimilarityScorer};
use crate::types::{Entity, EntityId, EntityType, RelationshipType};

/// One relationship a rule decided to assert for a co-mentioned pair.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PlannedRelation {
    pub relationship_type: RelationshipType,
    pub entity1_id: EntityId,
    pub entity2_id: EntityId,
}

/// Evaluate every rule against one co-mentioned pair.
///
/// Directional rules fix the orientation themselves (e.g. a process depends
/// on a system, never the reverse); symmetric rules leave ordering to key
/// normalization.
pub(crate) fn plan_for_pair(
    a: &Entity,
    b: &Entity,
    scorer: &SimilarityScorer,
    config: &DiscoveryConfig,
) -> Vec<PlannedRelation> {
    let mut planned = Vec::new();

    if let Some(rel) = coordinates_with(a, b) {
        planned.push(rel);
    }
    if let Some(rel) = shares_pain_point(a, b, scorer, config) {
        planned.push(rel);
    }
    if let Some(rel) = process_depends_on_system(a, b) {
        planned.push(rel);
    }
    if let Some(rel) = uses_tool(a, b) {
        planned.push(rel);
    }
    if let Some(rel) = system_causes_pain_point(a, b) {
        planned.push(rel);
    }
    if let Some(rel) = process_owned_by_role(a, b) {
        planned.push(rel);
    }

    planned
}

fn is_collaborator(entity_type: EntityType) -> bool {
    matches!(entity_type, EntityType::Role | EntityType::Team)
}

/// Roles/teams sharing a communication channel coordinate with each other.
fn coordinates_with(a: &Entity, b: &Entity) -> Option<PlannedRelation> {
    if !is_collaborator(a.entity_type) || !is_collaborator(b.entity_type) {
        return None;
    }
    let channels_a = normalized_list(a, "channels");
    let channels_b = normalized_list(b, "channels");
    if channels_a.iter().any(|c| channels_b.contains(c)) {
        return Some(PlannedRelation {
            relationship_type: RelationshipType::CoordinatesWith,
            entity1_id: a.id,
            entity2_id: b.id,
        });
    }
    None
}

/// Independently resolved pain points that score as near-identical share the
/// same underlying issue.
fn shares_pain_point(
    a: &Entity,
    b: &Entity,
    scorer: &SimilarityScorer,
    config: &DiscoveryConfig,
) -> Option<PlannedRelation> {
    if a.entity_type != EntityType::PainPoint || b.entity_type != EntityType::PainPoint {
        return None;
    }
    if a.id == b.id {
        return None;
    }
    if scorer.score(a, b) >= config.pain_point_similarity {
        return Some(PlannedRelation {
            relationship_type: RelationshipType::SharesPainPoint,
            entity1_id: a.id,
            entity2_id: b.id,
        });
    }
    None
}

/// A process co-occurring with a system depends on it.
fn process_depends_on_system(a: &Entity, b: &Entity) -> Option<PlannedRelation> {
    let (process, system) = match (a.entity_type, b.entity_type) {
        (EntityType::Process, EntityType::System) => (a, b),
        (EntityType::System, EntityType::Process) => (b, a),
        _ => return None,
    };
    Some(PlannedRelation {
        relationship_type: RelationshipType::DependsOn,
        entity1_id: process.id,
        entity2_id: system.id,
    })
}

/// Processes and teams use the tools they are mentioned alongside.
fn uses_tool(a: &Entity, b: &Entity) -> Option<PlannedRelation> {
    let (user, tool) = match (a.entity_type, b.entity_type) {
        (EntityType::Process | EntityType::Team, EntityType::Tool) => (a, b),
        (EntityType::Tool, EntityType::Process | EntityType::Team) => (b, a),
        _ => return None,
    };
    Some(PlannedRelation {
        relationship_type: RelationshipType::Uses,
        entity1_id: user.id,
        entity2_id: tool.id,
    })
}

/// A system named inside a pain point's impact area or description is taken
/// as its cause.
fn system_causes_pain_point(a: &Entity, b: &Entity) -> Option<PlannedRelation> {
    let (system, pain) = match (a.entity_type, b.entity_type) {
        (EntityType::System, EntityType::PainPoint) => (a, b),
        (EntityType::PainPoint, EntityType::System) => (b, a),
        _ => return None,
    };
    let system_name = normalize_name(&system.canonical_name);
    if system_name.is_empty() {
        return None;
    }
    let impact = pain
        .attributes
        .get("impact_area")
        .and_then(|v| v.as_text())
        .map(normalize_name)
        .unwrap_or_default();
    let description = normalize_name(&pain.description);
    if impact.contains(&system_name) || description.contains(&system_name) {
        return Some(PlannedRelation {
            relationship_type: RelationshipType::Causes,
            entity1_id: system.id,
            entity2_id: pain.id,
        });
    }
    None
}

/// A process whose owner_role names a co-mentioned role is owned by it.
fn process_owned_by_role(a: &Entity, b: &Entity) -> Option<PlannedRelation> {
    let (process, role) = match (a.entity_type, b.entity_type) {
        (EntityType::Process, EntityType::Role) => (a, b),
        (EntityType::Role, EntityType::Process) => (b, a),
        _ => return None,
    };
    let owner = process
        .attributes
        .get("owner_role")
        .and_then(|v| v.as_text())
        .map(normalize_name)?;
    if !owner.is_empty() && owner == normalize_name(&role.canonical_name) {
        return Some(PlannedRelation {
            relationship_type: RelationshipType::OwnedBy,
            entity1_id: process.id,
            entity2_id: role.id,
        });
    }
    None
}

fn normalized_list(entity: &Entity, field: &str) -> Vec<String> {
    entity
        .attributes
        .get(field)
        .and_then(|v| v.as_list())
        .map(|items| items.iter().map(|s| normalize_name(s)).collect())
        .unwrap_or_default()
}
