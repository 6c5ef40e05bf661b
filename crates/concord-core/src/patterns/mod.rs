//! Periodic pattern recognition over the consolidated store.
//!
//! A single greedy clustering pass over the configured target entity type,
//! gated on a batch trigger and an atomic run-in-progress flag so the pass
//! never races itself over a half-updated store. Patterns are the only
//! records this component mutates.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::PatternConfig;
use crate::error::{EngineError, EngineResult};
use crate::similarity::SimilarityScorer;
use crate::traits::KnowledgeStore;
use crate::types::{Entity, Namespace, Pattern};

/// Clears the run flag when a pass ends, normally or by error.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Surfaces recurring, high-priority patterns across namespaces.
pub struct PatternRecognizer {
    store: Arc<dyn KnowledgeStore>,
    scorer: SimilarityScorer,
    config: PatternConfig,
    running: AtomicBool,
}

impl PatternRecognizer {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        scorer: SimilarityScorer,
        config: PatternConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            config,
            running: AtomicBool::new(false),
        }
    }

    /// Run a recognition pass once enough consolidation batches accumulated.
    ///
    /// Below the trigger threshold this is a cheap no-op. A pass already in
    /// flight yields `PatternRunInProgress`; callers simply try again after
    /// the next batch.
    pub async fn recognize(&self, batch_trigger_count: u64) -> EngineResult<Vec<Pattern>> {
        if batch_trigger_count < self.config.trigger_threshold {
            debug!(
                batches = batch_trigger_count,
                threshold = self.config.trigger_threshold,
                "batch trigger below threshold, skipping recognition"
            );
            return Ok(Vec::new());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(EngineError::PatternRunInProgress);
        }
        let _guard = RunGuard(&self.running);

        let mut candidates = self.store.entities_of_type(self.config.target_type).await?;
        candidates.sort_by(|a, b| {
            b.source_count
                .cmp(&a.source_count)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let clusters = self.cluster(&candidates);
        let mut patterns = Vec::new();
        let existing = self.store.patterns().await?;

        for cluster in clusters {
            if cluster.len() < self.config.min_cluster_size {
                continue;
            }
            let pattern = self.build_pattern(&cluster, &existing);
            self.store.upsert_pattern(pattern.clone()).await?;
            patterns.push(pattern);
        }

        info!(
            target = %self.config.target_type,
            candidates = candidates.len(),
            patterns = patterns.len(),
            "pattern recognition pass complete"
        );
        Ok(patterns)
    }

    /// Greedy clustering: each entity joins the first cluster whose
    /// representative scores at or above the similarity floor, else founds
    /// its own. Malformed entities are skipped and logged; the batch always
    /// completes.
    fn cluster<'a>(&self, candidates: &'a [Entity]) -> Vec<Vec<&'a Entity>> {
        let mut clusters: Vec<Vec<&'a Entity>> = Vec::new();
        for entity in candidates {
            if let Err((field, message)) = Self::well_formed(entity) {
                warn!(
                    entity = %entity.id,
                    namespace = %entity.namespace,
                    field = %field,
                    message = %message,
                    "skipping malformed entity during clustering"
                );
                continue;
            }
            let assigned = clusters.iter_mut().find(|cluster| {
                self.scorer.score(cluster[0], entity) >= self.config.cluster_similarity
            });
            match assigned {
                Some(cluster) => cluster.push(entity),
                None => clusters.push(vec![entity]),
            }
        }
        clusters
    }

    fn well_formed(entity: &Entity) -> Result<(), (String, String)> {
        if entity.canonical_name.trim().is_empty() {
            return Err(("canonical_name".into(), "empty canonical name".into()));
        }
        if entity.namespace.is_empty() {
            return Err(("namespace".into(), "empty namespace".into()));
        }
        if let Some(embedding) = &entity.embedding {
            if embedding.is_empty() {
                return Err(("embedding".into(), "empty embedding vector".into()));
            }
        }
        entity.attributes.check_schema(entity.entity_type)
    }

    fn build_pattern(&self, members: &[&Entity], existing: &[Pattern]) -> Pattern {
        let representative = members[0];
        let frequency = members.len() as u32;
        let member_ids: Vec<_> = members.iter().map(|e| e.id).collect();

        let namespaces: BTreeSet<Namespace> =
            members.iter().map(|e| e.namespace.clone()).collect();
        let namespace_count = namespaces.len() as f32;

        let avg_severity = members
            .iter()
            .map(|e| {
                e.attributes
                    .get("severity")
                    .and_then(|v| v.as_number())
                    .unwrap_or(0.0) as f32
            })
            .sum::<f32>()
            / frequency as f32;

        let priority_score =
            (2.0 * (frequency as f32 + 1.0).log2() + namespace_count + avg_severity).min(10.0);
        let confidence = (0.85 + 0.03 * frequency as f32).min(1.0);
        let pattern_type = format!("recurring_{}", self.config.target_type.label());

        let now = Utc::now();
        // Re-recognition updates the matching record instead of duplicating.
        let prior = existing
            .iter()
            .filter(|p| p.pattern_type == pattern_type)
            .find(|p| p.member_overlap(&member_ids) >= 0.5);

        Pattern {
            id: prior.map(|p| p.id).unwrap_or_else(Uuid::new_v4),
            pattern_type,
            description: format!(
                "{} recurring {} reports clustered around \"{}\"",
                frequency,
                self.config.target_type,
                representative.canonical_name
            ),
            frequency,
            member_entity_ids: member_ids,
            namespaces_involved: namespaces.into_iter().collect(),
            priority_score,
            recommended_action: recommended_action(priority_score),
            confidence,
            created_at: prior.map(|p| p.created_at).unwrap_or(now),
            last_updated_at: now,
        }
    }
}

fn recommended_action(priority_score: f32) -> String {
    if priority_score >= 8.0 {
        "escalate to leadership for remediation planning".into()
    } else if priority_score >= 5.0 {
        "schedule a cross-team review of the recurring issue".into()
    } else {
        "monitor for further recurrence".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsolidationConfig;
    use crate::store::InMemoryKnowledgeStore;
    use crate::types::{AttributeValue, EntityAttributes, EntityType};
    use chrono::Utc;
    use std::collections::BTreeMap;

    fn recognizer(store: Arc<InMemoryKnowledgeStore>) -> PatternRecognizer {
        PatternRecognizer::new(
            store,
            SimilarityScorer::new(&ConsolidationConfig::default()),
            PatternConfig::default(),
        )
    }

    fn pain_point(namespace: &str, name: &str, severity: f64, sources: u32) -> Entity {
        let now = Utc::now();
        Entity {
            id: Uuid::new_v4(),
            namespace: Namespace::new(namespace),
            entity_type: EntityType::PainPoint,
            canonical_name: name.into(),
            description: String::new(),
            attributes: EntityAttributes::new()
                .with("severity", AttributeValue::Number(severity)),
            observations: BTreeMap::new(),
            mentioned_in: Default::default(),
            source_count: sources,
            consensus_confidence: 0.8,
            has_contradictions: false,
            contradiction_details: Vec::new(),
            embedding: None,
            created_at: now,
            last_enriched_at: now,
            enrichment_count: 0,
            version: 0,
        }
    }

    #[tokio::test]
    async fn below_trigger_threshold_is_a_no_op() {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        let recognizer = recognizer(store);
        let patterns = recognizer.recognize(4).await.unwrap();
        assert!(patterns.is_empty());
    }

    #[tokio::test]
    async fn clusters_of_three_become_patterns() {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        for (ns, sources) in [("acme", 5), ("acme", 3), ("globex", 2)] {
            store
                .insert_entity(pain_point(ns, "Manual invoice rekeying", 6.0, sources))
                .await
                .unwrap();
        }
        // Unrelated pair below the cluster minimum.
        store
            .insert_entity(pain_point("acme", "Slow VPN", 3.0, 1))
            .await
            .unwrap();

        let recognizer = recognizer(store.clone());
        let patterns = recognizer.recognize(5).await.unwrap();

        assert_eq!(patterns.len(), 1);
        let pattern = &patterns[0];
        assert_eq!(pattern.frequency, 3);
        assert_eq!(pattern.pattern_type, "recurring_pain_point");
        assert_eq!(pattern.namespaces_involved.len(), 2);

        // min(10, 2*log2(4) + 2 + 6) = 10
        assert_eq!(pattern.priority_score, 10.0);
        // min(1, 0.85 + 0.09)
        assert!((pattern.confidence - 0.94).abs() < 1e-6);
        assert!(pattern.recommended_action.contains("escalate"));
    }

    #[tokio::test]
    async fn malformed_entity_is_skipped_and_batch_completes() {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        for _ in 0..3 {
            store
                .insert_entity(pain_point("acme", "Manual invoice rekeying", 4.0, 2))
                .await
                .unwrap();
        }
        let mut malformed = pain_point("acme", "  ", 4.0, 9);
        malformed.canonical_name = "  ".into();
        store.insert_entity(malformed).await.unwrap();

        let recognizer = recognizer(store);
        let patterns = recognizer.recognize(5).await.unwrap();
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].frequency, 3);
    }

    #[tokio::test]
    async fn rerecognition_updates_the_same_pattern() {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        for _ in 0..3 {
            store
                .insert_entity(pain_point("acme", "Manual invoice rekeying", 4.0, 2))
                .await
                .unwrap();
        }
        let recognizer = recognizer(store.clone());
        let first = recognizer.recognize(5).await.unwrap();
        let second = recognizer.recognize(5).await.unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(store.patterns().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn run_flag_clears_after_each_pass() {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        let recognizer = recognizer(store);
        recognizer.recognize(5).await.unwrap();
        // A second call must not observe a stuck flag.
        recognizer.recognize(5).await.unwrap();
    }
}
