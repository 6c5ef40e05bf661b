//! Multi-tier similarity scoring between entities of one type.
//!
//! Tiers, highest confident tier wins:
//! 1. Exact match on normalized names (casefold, accents and punctuation
//!    stripped) → 1.0.
//! 2. Semantic: cosine over description embeddings; at or above the
//!    short-circuit threshold the cosine is returned directly.
//! 3. Attribute overlap: intersection-over-union for list fields, equality
//!    for scalars; blended 50/50 with the semantic score when tier 2 ran but
//!    did not short-circuit.
//!
//! Missing embeddings skip tier 2. Two sides with no embeddings and no
//! comparable attributes score 0.0: the engine never merges without
//! comparable evidence. Scoring is symmetric by construction.

use crate::config::ConsolidationConfig;
use crate::types::{AttributeValue, CandidateEntity, Entity, EntityAttributes, EntityType};

/// Anything the scorer can compare: consolidated entities and candidates.
pub trait Comparand {
    fn entity_type(&self) -> EntityType;
    fn name(&self) -> &str;
    fn embedding(&self) -> Option<&[f32]>;
    fn attributes(&self) -> &EntityAttributes;
}

impl Comparand for Entity {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn name(&self) -> &str {
        &self.canonical_name
    }

    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    fn attributes(&self) -> &EntityAttributes {
        &self.attributes
    }
}

impl Comparand for CandidateEntity {
    fn entity_type(&self) -> EntityType {
        self.entity_type
    }

    fn name(&self) -> &str {
        &self.canonical_name
    }

    fn embedding(&self) -> Option<&[f32]> {
        self.embedding.as_deref()
    }

    fn attributes(&self) -> &EntityAttributes {
        &self.attributes
    }
}

/// Normalize a name for identity comparison: casefold, fold common Latin
/// accents, drop punctuation, collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut last_was_space = true;

    let push = |l: char, out: &mut String, last_was_space: &mut bool| {
        if l.is_alphanumeric() {
            out.push(l);
            *last_was_space = false;
        } else if (l.is_whitespace() || l == '-' || l == '_' || l == '/') && !*last_was_space {
            out.push(' ');
            *last_was_space = true;
        }
        // Remaining punctuation is dropped entirely: "S.A.P." == "SAP".
    };

    for c in name.chars() {
        match fold_accent(c) {
            Some(folded) => {
                for l in folded.chars() {
                    push(l, &mut out, &mut last_was_space);
                }
            }
            None => {
                for l in c.to_lowercase() {
                    push(l, &mut out, &mut last_was_space);
                }
            }
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Fold Latin-1 / Latin Extended-A accented characters to lowercase ASCII.
/// None means the character is not an accent and passes through casefolding.
fn fold_accent(c: char) -> Option<&'static str> {
    Some(match c {
        'à' | 'á' | 'â' | 'ã' | 'ä' | 'å' | 'À' | 'Á' | 'Â' | 'Ã' | 'Ä' | 'Å' | 'ā' | 'Ā' => "a",
        'è' | 'é' | 'ê' | 'ë' | 'È' | 'É' | 'Ê' | 'Ë' | 'ē' | 'Ē' => "e",
        'ì' | 'í' | 'î' | 'ï' | 'Ì' | 'Í' | 'Î' | 'Ï' | 'ī' | 'Ī' => "i",
        'ò' | 'ó' | 'ô' | 'õ' | 'ö' | 'Ò' | 'Ó' | 'Ô' | 'Õ' | 'Ö' | 'ō' | 'Ō' => "o",
        'ù' | 'ú' | 'û' | 'ü' | 'Ù' | 'Ú' | 'Û' | 'Ü' | 'ū' | 'Ū' => "u",
        'ç' | 'Ç' => "c",
        'ñ' | 'Ñ' => "n",
        'ý' | 'ÿ' | 'Ý' => "y",
        'ß' => "ss",
        'æ' | 'Æ' => "ae",
        'ø' | 'Ø' => "o",
        _ => return None,
    })
}

/// Cosine similarity between two vectors, 0.0 on dimension mismatch or zero
/// norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Multi-tier similarity scorer.
#[derive(Debug, Clone)]
pub struct SimilarityScorer {
    semantic_short_circuit: f32,
}

impl SimilarityScorer {
    pub fn new(config: &ConsolidationConfig) -> Self {
        Self {
            semantic_short_circuit: config.semantic_short_circuit,
        }
    }

    /// Score two comparands of the same entity type in [0.0, 1.0].
    ///
    /// Differing entity types score 0.0; callers compare within one
    /// (namespace, entity_type) partition.
    pub fn score(&self, a: &impl Comparand, b: &impl Comparand) -> f32 {
        if a.entity_type() != b.entity_type() {
            return 0.0;
        }

        // Tier 1: normalized exact match.
        let name_a = normalize_name(a.name());
        let name_b = normalize_name(b.name());
        if !name_a.is_empty() && name_a == name_b {
            return 1.0;
        }

        // Tier 2: semantic cosine, short-circuiting on high confidence.
        let semantic = match (a.embedding(), b.embedding()) {
            (Some(x), Some(y)) if !x.is_empty() && !y.is_empty() => {
                Some(cosine_similarity(x, y).max(0.0))
            }
            _ => None,
        };
        if let Some(s) = semantic {
            if s >= self.semantic_short_circuit {
                return s.min(1.0);
            }
        }

        // Tier 3: structured attribute overlap, blended with tier 2.
        let overlap = attribute_overlap(a.attributes(), b.attributes());
        match (semantic, overlap) {
            (Some(s), Some(o)) => (0.5 * s + 0.5 * o).clamp(0.0, 1.0),
            (Some(s), None) => (0.5 * s).clamp(0.0, 1.0),
            (None, Some(o)) => o.clamp(0.0, 1.0),
            (None, None) => 0.0,
        }
    }
}

/// Weighted overlap over fields present on both sides.
///
/// List fields contribute intersection-over-union of normalized members,
/// scalars contribute 1.0 on (normalized) equality. None when the sides
/// share no field, so the caller can distinguish "no evidence" from
/// "disagreement".
fn attribute_overlap(a: &EntityAttributes, b: &EntityAttributes) -> Option<f32> {
    let mut total = 0.0f32;
    let mut compared = 0u32;

    for (field, value_a) in a.iter() {
        let Some(value_b) = b.get(field) else {
            continue;
        };
        compared += 1;
        total += match (value_a, value_b) {
            (AttributeValue::TextList(la), AttributeValue::TextList(lb)) => {
                set_overlap(la, lb)
            }
            (AttributeValue::Text(ta), AttributeValue::Text(tb)) => {
                if normalize_name(ta) == normalize_name(tb) {
                    1.0
                } else {
                    0.0
                }
            }
            (AttributeValue::Number(na), AttributeValue::Number(nb)) => {
                if (na - nb).abs() < f64::EPSILON {
                    1.0
                } else {
                    0.0
                }
            }
            (AttributeValue::Flag(fa), AttributeValue::Flag(fb)) => {
                if fa == fb {
                    1.0
                } else {
                    0.0
                }
            }
            // Kind mismatch across sources counts as disagreement.
            _ => 0.0,
        };
    }

    if compared == 0 {
        None
    } else {
        Some(total / compared as f32)
    }
}

/// Jaccard overlap of two string lists under name normalization.
fn set_overlap(a: &[String], b: &[String]) -> f32 {
    use std::collections::BTreeSet;

    let set_a: BTreeSet<String> = a.iter().map(|s| normalize_name(s)).collect();
    let set_b: BTreeSet<String> = b.iter().map(|s| normalize_name(s)).collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 0.0;
    }
    let intersection = set_a.intersection(&set_b).count();
    let union = set_a.union(&set_b).count();
    intersection as f32 / union as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Namespace;

    fn candidate(name: &str) -> CandidateEntity {
        CandidateEntity::new(Namespace::new("acme"), EntityType::System, name)
    }

    #[test]
    fn normalize_strips_punctuation_and_case() {
        assert_eq!(normalize_name("S.A.P."), "sap");
        assert_eq!(normalize_name("SAP"), "sap");
        assert_eq!(normalize_name("Opera  PMS"), "opera pms");
        assert_eq!(normalize_name("Crédit-Agricole"), "credit agricole");
    }

    #[test]
    fn exact_normalized_match_scores_one() {
        let scorer = SimilarityScorer::new(&ConsolidationConfig::default());
        assert_eq!(scorer.score(&candidate("SAP"), &candidate("S.A.P.")), 1.0);
    }

    #[test]
    fn differing_types_score_zero() {
        let scorer = SimilarityScorer::new(&ConsolidationConfig::default());
        let a = candidate("SAP");
        let b = CandidateEntity::new(Namespace::new("acme"), EntityType::Tool, "SAP");
        assert_eq!(scorer.score(&a, &b), 0.0);
    }

    #[test]
    fn semantic_short_circuit_returns_cosine() {
        let scorer = SimilarityScorer::new(&ConsolidationConfig::default());
        let a = candidate("Opera").with_embedding(vec![1.0, 0.0, 0.0]);
        let b = candidate("Opera Property Management").with_embedding(vec![0.98, 0.05, 0.0]);
        let score = scorer.score(&a, &b);
        assert!(score >= 0.9, "expected short-circuit, got {}", score);
    }

    #[test]
    fn blends_semantic_and_attributes_below_short_circuit() {
        let scorer = SimilarityScorer::new(&ConsolidationConfig::default());
        let attrs = EntityAttributes::new().with("vendor", AttributeValue::Text("Oracle".into()));
        let a = candidate("Opera")
            .with_embedding(vec![1.0, 0.0])
            .with_attributes(attrs.clone());
        let b = candidate("Micros")
            .with_embedding(vec![0.6, 0.8])
            .with_attributes(attrs);
        let cosine = cosine_similarity(&[1.0, 0.0], &[0.6, 0.8]);
        let expected = 0.5 * cosine + 0.5 * 1.0;
        let score = scorer.score(&a, &b);
        assert!((score - expected).abs() < 1e-6, "got {}, want {}", score, expected);
    }

    #[test]
    fn no_evidence_scores_zero() {
        let scorer = SimilarityScorer::new(&ConsolidationConfig::default());
        assert_eq!(scorer.score(&candidate("Alpha"), &candidate("Beta")), 0.0);
    }

    #[test]
    fn scoring_is_symmetric() {
        let scorer = SimilarityScorer::new(&ConsolidationConfig::default());
        let a = candidate("Opera PMS")
            .with_embedding(vec![0.7, 0.7, 0.1])
            .with_attributes(
                EntityAttributes::new()
                    .with("vendor", AttributeValue::Text("Oracle".into()))
                    .with("integrates_with", AttributeValue::TextList(vec!["sap".into()])),
            );
        let b = candidate("Opera Cloud")
            .with_embedding(vec![0.6, 0.8, 0.0])
            .with_attributes(
                EntityAttributes::new()
                    .with("vendor", AttributeValue::Text("oracle".into()))
                    .with(
                        "integrates_with",
                        AttributeValue::TextList(vec!["sap".into(), "stripe".into()]),
                    ),
            );
        assert_eq!(scorer.score(&a, &b), scorer.score(&b, &a));
    }

    #[test]
    fn list_overlap_uses_intersection_over_union() {
        let a = EntityAttributes::new().with(
            "integrates_with",
            AttributeValue::TextList(vec!["SAP".into(), "Stripe".into()]),
        );
        let b = EntityAttributes::new().with(
            "integrates_with",
            AttributeValue::TextList(vec!["sap".into(), "Workday".into()]),
        );
        let overlap = attribute_overlap(&a, &b).unwrap();
        assert!((overlap - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_dimension_mismatch() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn symmetry_holds_over_random_embeddings() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let scorer = SimilarityScorer::new(&ConsolidationConfig::default());
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            let emb_a: Vec<f32> = (0..16).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let emb_b: Vec<f32> = (0..16).map(|_| rng.gen_range(-1.0..1.0)).collect();
            let a = candidate("Alpha Ledger").with_embedding(emb_a);
            let b = candidate("Beta Ledger").with_embedding(emb_b);
            assert_eq!(scorer.score(&a, &b), scorer.score(&b, &a));
        }
    }
}
