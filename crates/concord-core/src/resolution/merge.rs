//! Attribute merge math: list union, majority voting, agreement scoring,
//! and contradiction detection.

use std::collections::BTreeMap;

use crate::similarity::normalize_name;
use crate::types::{AttributeObservation, AttributeValue, Entity, SourceRef};

/// Strict agreement between two scalar values.
///
/// Used for majority voting and agreement scoring; distinct from the
/// *contradiction* check, which applies the configured tolerance.
pub(crate) fn values_agree(a: &AttributeValue, b: &AttributeValue) -> bool {
    match (a, b) {
        (AttributeValue::Text(ta), AttributeValue::Text(tb)) => {
            normalize_name(ta) == normalize_name(tb)
        }
        (AttributeValue::Number(na), AttributeValue::Number(nb)) => (na - nb).abs() < 1e-9,
        (AttributeValue::Flag(fa), AttributeValue::Flag(fb)) => fa == fb,
        _ => false,
    }
}

/// Whether an incoming scalar contradicts the current value beyond
/// tolerance: for numerics, a delta above `numeric_tolerance` of the larger
/// magnitude; for categoricals, any inequality.
pub(crate) fn conflicts(
    existing: &AttributeValue,
    incoming: &AttributeValue,
    numeric_tolerance: f64,
) -> bool {
    match (existing, incoming) {
        (AttributeValue::Number(a), AttributeValue::Number(b)) => {
            let scale = a.abs().max(b.abs());
            if scale == 0.0 {
                return false;
            }
            (a - b).abs() > numeric_tolerance * scale
        }
        (AttributeValue::Text(_), AttributeValue::Text(_))
        | (AttributeValue::Flag(_), AttributeValue::Flag(_)) => !values_agree(existing, incoming),
        // A kind change across sources is always a contradiction.
        _ => true,
    }
}

/// Majority value among the recorded observations for one field.
///
/// Ties keep the earliest-observed value, so a lone dissenting source never
/// flips an established field.
pub(crate) fn majority_value(observations: &[AttributeObservation]) -> Option<AttributeValue> {
    let mut classes: Vec<(AttributeValue, usize, usize)> = Vec::new();
    for (index, obs) in observations.iter().enumerate() {
        match classes.iter_mut().find(|(v, _, _)| values_agree(v, &obs.value)) {
            Some((_, count, _)) => *count += 1,
            None => classes.push((obs.value.clone(), 1, index)),
        }
    }
    classes
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(b.2.cmp(&a.2)))
        .map(|(value, _, _)| value)
}

/// Union two text lists, deduplicating by normalized value and keeping
/// first-seen order and spelling.
pub(crate) fn union_lists(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut out: Vec<String> = Vec::new();
    for item in existing.iter().chain(incoming.iter()) {
        let norm = normalize_name(item);
        if !seen.contains(&norm) {
            seen.push(norm);
            out.push(item.clone());
        }
    }
    out
}

/// Record one source's scalar assertion, idempotently per (field, source).
pub(crate) fn record_observation(
    observations: &mut BTreeMap<String, Vec<AttributeObservation>>,
    field: &str,
    value: &AttributeValue,
    source_ref: &SourceRef,
) {
    let entries = observations.entry(field.to_string()).or_default();
    if !entries.iter().any(|o| &o.source_ref == source_ref) {
        entries.push(AttributeObservation {
            value: value.clone(),
            source_ref: source_ref.clone(),
        });
    }
}

/// Fraction of observed sources whose scalar assertions all agree with the
/// post-merge majority values. Sources without scalar assertions do not
/// weigh in; no scalar evidence at all counts as full agreement.
pub(crate) fn agreement_score(entity: &Entity) -> f32 {
    let mut per_source: BTreeMap<&SourceRef, bool> = BTreeMap::new();
    for (field, observations) in &entity.observations {
        let Some(majority) = entity.attributes.get(field) else {
            continue;
        };
        for obs in observations {
            let agrees = values_agree(majority, &obs.value);
            per_source
                .entry(&obs.source_ref)
                .and_modify(|all| *all &= agrees)
                .or_insert(agrees);
        }
    }
    if per_source.is_empty() {
        return 1.0;
    }
    let agreeing = per_source.values().filter(|v| **v).count();
    agreeing as f32 / per_source.len() as f32
}

/// Consensus confidence after a merge:
/// `min(1, 0.5 + min(0.4, 0.1 * source_count) + 0.4 * agreement)`.
pub(crate) fn consensus_confidence(source_count: u32, agreement: f32) -> f32 {
    (0.5 + (0.1 * source_count as f32).min(0.4) + 0.4 * agreement).min(1.0)
}
