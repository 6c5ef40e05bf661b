//! Entity resolution: new / merge / link decisions for incoming candidates.
//!
//! The resolver owns all entity mutation and the audit trail. Operations on
//! one (namespace, entity_type) partition are serialized through a per-key
//! async lock so two workers can never independently create duplicate "new"
//! entities for the same concept. Optimistic store conflicts are retried
//! with fresh reads a bounded number of times, then surfaced as
//! `RetryExhausted` for the caller to requeue.

mod merge;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ConsolidationConfig;
use crate::error::{EngineError, EngineResult};
use crate::similarity::SimilarityScorer;
use crate::traits::KnowledgeStore;
use crate::types::{
    AttributeValue, AuditId, CandidateEntity, ConsolidationAuditRecord, ContradictionDetail,
    Entity, EntityId, EntityType, Namespace, Relationship, RelationshipType, ResolutionDecision,
    SourceRef,
};

/// Outcome of resolving one candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub action: ResolutionDecision,
    pub entity_id: EntityId,

    /// Whether this resolution recorded a new contradiction
    pub contradiction: bool,
}

/// Decides new/merge/link for incoming candidates.
pub struct EntityResolver {
    store: Arc<dyn KnowledgeStore>,
    scorer: SimilarityScorer,
    config: ConsolidationConfig,
    partition_locks: DashMap<(Namespace, EntityType), Arc<Mutex<()>>>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: ConsolidationConfig) -> Self {
        Self {
            scorer: SimilarityScorer::new(&config),
            store,
            config,
            partition_locks: DashMap::new(),
        }
    }

    pub fn scorer(&self) -> &SimilarityScorer {
        &self.scorer
    }

    fn partition_lock(&self, namespace: &Namespace, entity_type: EntityType) -> Arc<Mutex<()>> {
        self.partition_locks
            .entry((namespace.clone(), entity_type))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Resolve one candidate against the consolidated store.
    ///
    /// Validation failures are terminal; optimistic conflicts retry with
    /// fresh reads up to the configured limit.
    pub async fn resolve(
        &self,
        candidate: &CandidateEntity,
        source_ref: &SourceRef,
    ) -> EngineResult<Resolution> {
        candidate.validate(source_ref)?;

        let lock = self.partition_lock(&candidate.namespace, candidate.entity_type);
        let _guard = lock.lock().await;

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.try_resolve(candidate, source_ref).await {
                Err(EngineError::TransientStoreConflict {
                    namespace,
                    entity_type,
                    entity_id,
                }) => {
                    warn!(
                        namespace = %namespace,
                        entity_type = %entity_type,
                        entity = %entity_id,
                        source_ref = %source_ref,
                        attempt,
                        "store conflict during resolve, retrying with fresh reads"
                    );
                    if attempt >= self.config.max_retries {
                        return Err(EngineError::RetryExhausted {
                            namespace,
                            entity_type,
                            source_ref: source_ref.clone(),
                            attempts: attempt,
                        });
                    }
                }
                other => return other,
            }
        }
    }

    async fn try_resolve(
        &self,
        candidate: &CandidateEntity,
        source_ref: &SourceRef,
    ) -> EngineResult<Resolution> {
        let existing = self
            .store
            .entities_in(&candidate.namespace, candidate.entity_type)
            .await?;

        let mut best: Option<(f32, Entity)> = None;
        for entity in existing {
            let score = self.scorer.score(candidate, &entity);
            if best.as_ref().map(|(s, _)| score > *s).unwrap_or(true) {
                best = Some((score, entity));
            }
        }

        match best {
            Some((score, entity)) if score >= self.config.merge_threshold => {
                self.merge_into(candidate, source_ref, entity, score).await
            }
            Some((score, entity)) if score >= self.config.link_threshold => {
                self.create_linked(candidate, source_ref, &entity, score).await
            }
            other => {
                let best_score = other.map(|(score, _)| score);
                self.create_new(candidate, source_ref, best_score).await
            }
        }
    }

    async fn create_new(
        &self,
        candidate: &CandidateEntity,
        source_ref: &SourceRef,
        best_score: Option<f32>,
    ) -> EngineResult<Resolution> {
        let entity = entity_from_candidate(candidate, source_ref);
        let id = self.store.insert_entity(entity).await?;

        let mut record = ConsolidationAuditRecord::new(
            candidate.namespace.clone(),
            candidate.entity_type,
            ResolutionDecision::New,
            id,
        );
        if let Some(score) = best_score {
            record = record.with_similarity(score);
        }
        self.store.append_audit(record).await?;

        info!(
            namespace = %candidate.namespace,
            entity_type = %candidate.entity_type,
            entity = %id,
            source_ref = %source_ref,
            "created new entity"
        );
        Ok(Resolution {
            action: ResolutionDecision::New,
            entity_id: id,
            contradiction: false,
        })
    }

    async fn create_linked(
        &self,
        candidate: &CandidateEntity,
        source_ref: &SourceRef,
        near_duplicate: &Entity,
        score: f32,
    ) -> EngineResult<Resolution> {
        let entity = entity_from_candidate(candidate, source_ref);
        let id = self.store.insert_entity(entity).await?;

        // Near-threshold match: keep both entities, flag the pair for review.
        let mut link = Relationship::first_observed(
            RelationshipType::PossibleDuplicateOf,
            id,
            near_duplicate.id,
            source_ref.clone(),
        );
        link.confidence = score;
        self.store.upsert_relationship(link).await?;

        self.store
            .append_audit(
                ConsolidationAuditRecord::new(
                    candidate.namespace.clone(),
                    candidate.entity_type,
                    ResolutionDecision::Link,
                    id,
                )
                .with_merged(vec![id, near_duplicate.id])
                .with_similarity(score),
            )
            .await?;
        self.store.bump_epoch(&candidate.namespace).await;

        info!(
            namespace = %candidate.namespace,
            entity = %id,
            near_duplicate = %near_duplicate.id,
            similarity = score,
            "created entity with possible-duplicate link"
        );
        Ok(Resolution {
            action: ResolutionDecision::Link,
            entity_id: id,
            contradiction: false,
        })
    }

    async fn merge_into(
        &self,
        candidate: &CandidateEntity,
        source_ref: &SourceRef,
        mut entity: Entity,
        score: f32,
    ) -> EngineResult<Resolution> {
        // Idempotence: a repeat of an already-merged source is a no-op.
        if entity.mentioned_in.contains(source_ref) {
            debug!(
                entity = %entity.id,
                source_ref = %source_ref,
                "source already merged, skipping"
            );
            return Ok(Resolution {
                action: ResolutionDecision::Merge,
                entity_id: entity.id,
                contradiction: false,
            });
        }

        let snapshot = entity.clone();
        let mut contradiction = false;

        for (field, incoming) in candidate.attributes.iter() {
            match incoming {
                AttributeValue::TextList(items) => {
                    let existing = entity
                        .attributes
                        .get(field)
                        .and_then(|v| v.as_list())
                        .unwrap_or(&[]);
                    let merged = merge::union_lists(existing, items);
                    entity.attributes.set(field.clone(), AttributeValue::TextList(merged));
                }
                scalar => {
                    if let Some(existing) = entity.attributes.get(field) {
                        if merge::conflicts(existing, scalar, self.config.numeric_tolerance) {
                            contradiction = true;
                            entity.contradiction_details.push(ContradictionDetail {
                                field: field.clone(),
                                existing: existing.clone(),
                                incoming: scalar.clone(),
                                source_ref: source_ref.clone(),
                                recorded_at: Utc::now(),
                            });
                            warn!(
                                entity = %entity.id,
                                field = %field,
                                source_ref = %source_ref,
                                "contradicting value recorded for review"
                            );
                        }
                    }
                    merge::record_observation(
                        &mut entity.observations,
                        field,
                        scalar,
                        source_ref,
                    );
                    if let Some(majority) =
                        merge::majority_value(&entity.observations[field.as_str()])
                    {
                        entity.attributes.set(field.clone(), majority);
                    }
                }
            }
        }

        if candidate.description.len() > entity.description.len() {
            entity.description = candidate.description.clone();
        }
        if entity.embedding.is_none() {
            entity.embedding = candidate.embedding.clone();
        }

        entity.record_source(source_ref.clone());
        entity.source_count += 1;
        entity.has_contradictions |= contradiction;
        let agreement = merge::agreement_score(&entity);
        entity.consensus_confidence = merge::consensus_confidence(entity.source_count, agreement);
        entity.touch_enriched();

        let entity_id = entity.id;
        let namespace = entity.namespace.clone();
        let has_contradictions = contradiction;

        self.store.update_entity(entity).await?;
        self.store
            .append_audit(
                ConsolidationAuditRecord::new(
                    candidate.namespace.clone(),
                    candidate.entity_type,
                    ResolutionDecision::Merge,
                    entity_id,
                )
                .with_merged(vec![entity_id])
                .with_similarity(score)
                .with_rollback(snapshot),
            )
            .await?;
        self.store.bump_epoch(&namespace).await;

        info!(
            namespace = %namespace,
            entity = %entity_id,
            similarity = score,
            contradiction = has_contradictions,
            source_ref = %source_ref,
            "merged candidate into existing entity"
        );
        Ok(Resolution {
            action: ResolutionDecision::Merge,
            entity_id,
            contradiction,
        })
    }

    /// Restore the pre-merge snapshot recorded in a merge audit record.
    ///
    /// Refuses when the entity advanced past the snapshot, so newer merges
    /// must be rolled back first (newest-first).
    pub async fn rollback(&self, audit_id: AuditId) -> EngineResult<EntityId> {
        let record = self.store.get_audit(audit_id).await?.ok_or_else(|| {
            EngineError::Validation {
                field: "audit_id".into(),
                message: format!("audit record {} not found", audit_id),
                source_ref: None,
            }
        })?;
        let snapshot = record.rollback.ok_or_else(|| EngineError::Validation {
            field: "audit_id".into(),
            message: format!("audit record {} is not a merge decision", audit_id),
            source_ref: None,
        })?;

        let lock = self.partition_lock(&snapshot.namespace, snapshot.entity_type);
        let _guard = lock.lock().await;

        let current = self
            .store
            .get_entity(snapshot.id)
            .await?
            .ok_or(EngineError::EntityNotFound { id: snapshot.id })?;
        if current.enrichment_count != snapshot.enrichment_count + 1 {
            return Err(EngineError::Validation {
                field: "rollback".into(),
                message: format!(
                    "entity {} advanced past the snapshot (enrichment {} vs {}); roll back newer merges first",
                    snapshot.id,
                    current.enrichment_count,
                    snapshot.enrichment_count + 1
                ),
                source_ref: None,
            });
        }

        let namespace = snapshot.namespace.clone();
        let mut restored = *snapshot;
        restored.version = current.version;
        self.store.update_entity(restored).await?;
        self.store.bump_epoch(&namespace).await;

        info!(audit = %audit_id, "rolled back merge");
        Ok(current.id)
    }
}

/// Build a fresh entity from a candidate's assertion.
fn entity_from_candidate(candidate: &CandidateEntity, source_ref: &SourceRef) -> Entity {
    let now = Utc::now();
    let mut observations = BTreeMap::new();
    for (field, value) in candidate.attributes.scalars() {
        merge::record_observation(&mut observations, field, value, source_ref);
    }
    Entity {
        id: Uuid::new_v4(),
        namespace: candidate.namespace.clone(),
        entity_type: candidate.entity_type,
        canonical_name: candidate.canonical_name.clone(),
        description: candidate.description.clone(),
        attributes: candidate.attributes.clone(),
        observations,
        mentioned_in: std::iter::once(source_ref.clone()).collect(),
        source_count: 1,
        consensus_confidence: 0.5,
        has_contradictions: false,
        contradiction_details: Vec::new(),
        embedding: candidate.embedding.clone(),
        created_at: now,
        last_enriched_at: now,
        enrichment_count: 0,
        version: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryKnowledgeStore;
    use crate::types::EntityAttributes;

    fn resolver() -> (Arc<InMemoryKnowledgeStore>, EntityResolver) {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        let resolver = EntityResolver::new(store.clone(), ConsolidationConfig::default());
        (store, resolver)
    }

    fn system_candidate(name: &str) -> CandidateEntity {
        CandidateEntity::new(Namespace::new("acme"), EntityType::System, name)
    }

    #[tokio::test]
    async fn first_candidate_creates_new_entity() {
        let (store, resolver) = resolver();
        let resolution = resolver
            .resolve(&system_candidate("SAP"), &SourceRef::new("doc-1"))
            .await
            .unwrap();
        assert_eq!(resolution.action, ResolutionDecision::New);

        let entity = store.get_entity(resolution.entity_id).await.unwrap().unwrap();
        assert_eq!(entity.source_count, 1);
        assert_eq!(entity.consensus_confidence, 0.5);
    }

    #[tokio::test]
    async fn identical_name_merges() {
        let (store, resolver) = resolver();
        let first = resolver
            .resolve(&system_candidate("SAP"), &SourceRef::new("doc-1"))
            .await
            .unwrap();
        let second = resolver
            .resolve(&system_candidate("S.A.P."), &SourceRef::new("doc-2"))
            .await
            .unwrap();

        assert_eq!(second.action, ResolutionDecision::Merge);
        assert_eq!(second.entity_id, first.entity_id);

        let entity = store.get_entity(first.entity_id).await.unwrap().unwrap();
        assert_eq!(entity.source_count, 2);
        assert!(entity.consensus_confidence >= 0.9);
        assert_eq!(entity.mentioned_in.len(), 2);
    }

    #[tokio::test]
    async fn resolve_is_idempotent_per_source() {
        let (store, resolver) = resolver();
        let candidate = system_candidate("SAP");
        let source = SourceRef::new("doc-1");
        let first = resolver.resolve(&candidate, &source).await.unwrap();
        let before = store.get_entity(first.entity_id).await.unwrap().unwrap();

        let again = resolver.resolve(&candidate, &source).await.unwrap();
        assert_eq!(again.entity_id, first.entity_id);

        let after = store.get_entity(first.entity_id).await.unwrap().unwrap();
        assert_eq!(after.source_count, before.source_count);
        assert_eq!(after.mentioned_in, before.mentioned_in);
    }

    #[tokio::test]
    async fn numeric_disagreement_beyond_tolerance_flags_contradiction() {
        let (store, resolver) = resolver();
        let low = system_candidate("Opera").with_attributes(
            EntityAttributes::new().with("satisfaction", AttributeValue::Number(8.0)),
        );
        let high = system_candidate("Opera").with_attributes(
            EntityAttributes::new().with("satisfaction", AttributeValue::Number(3.0)),
        );

        let first = resolver.resolve(&low, &SourceRef::new("doc-1")).await.unwrap();
        let second = resolver.resolve(&high, &SourceRef::new("doc-2")).await.unwrap();
        assert!(second.contradiction);

        let entity = store.get_entity(first.entity_id).await.unwrap().unwrap();
        assert!(entity.has_contradictions);
        assert_eq!(entity.contradiction_details.len(), 1);
        assert_eq!(entity.contradiction_details[0].field, "satisfaction");
    }

    #[tokio::test]
    async fn near_match_links_instead_of_merging() {
        let (store, resolver) = resolver();
        // Shared vendor and category, different names, no embeddings:
        // attribute overlap lands in the link band.
        let attrs = EntityAttributes::new()
            .with("vendor", AttributeValue::Text("Oracle".into()))
            .with("category", AttributeValue::Text("PMS".into()))
            .with("criticality", AttributeValue::Text("high".into()))
            .with(
                "integrates_with",
                AttributeValue::TextList(vec!["Stripe".into()]),
            )
            .with("satisfaction", AttributeValue::Number(7.0));
        let mut other_attrs = attrs.clone();
        other_attrs.set("satisfaction", AttributeValue::Number(2.0));

        let first = resolver
            .resolve(
                &system_candidate("Opera PMS").with_attributes(attrs),
                &SourceRef::new("doc-1"),
            )
            .await
            .unwrap();
        let second = resolver
            .resolve(
                &system_candidate("Micros Fidelio").with_attributes(other_attrs),
                &SourceRef::new("doc-2"),
            )
            .await
            .unwrap();

        assert_eq!(second.action, ResolutionDecision::Link);
        assert_ne!(second.entity_id, first.entity_id);

        let links = store.relationships_for(second.entity_id).await.unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].relationship_type, RelationshipType::PossibleDuplicateOf);
        assert!(links[0].confidence >= 0.7 && links[0].confidence < 0.9);
    }

    #[tokio::test]
    async fn merges_write_audit_records_with_rollback() {
        let (store, resolver) = resolver();
        resolver
            .resolve(&system_candidate("SAP"), &SourceRef::new("doc-1"))
            .await
            .unwrap();
        resolver
            .resolve(&system_candidate("SAP"), &SourceRef::new("doc-2"))
            .await
            .unwrap();

        let log = store.audit_log(&Namespace::new("acme")).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].decision, ResolutionDecision::New);
        assert_eq!(log[1].decision, ResolutionDecision::Merge);
        assert!(log[1].rollback.is_some());
    }

    #[tokio::test]
    async fn rollback_restores_pre_merge_snapshot() {
        let (store, resolver) = resolver();
        let first = resolver
            .resolve(&system_candidate("SAP"), &SourceRef::new("doc-1"))
            .await
            .unwrap();
        resolver
            .resolve(&system_candidate("SAP"), &SourceRef::new("doc-2"))
            .await
            .unwrap();

        let log = store.audit_log(&Namespace::new("acme")).await.unwrap();
        let merge_record = log.last().unwrap();
        resolver.rollback(merge_record.id).await.unwrap();

        let entity = store.get_entity(first.entity_id).await.unwrap().unwrap();
        assert_eq!(entity.source_count, 1);
        assert_eq!(entity.mentioned_in.len(), 1);
    }

    #[tokio::test]
    async fn merge_bumps_namespace_epoch() {
        let (store, resolver) = resolver();
        resolver
            .resolve(&system_candidate("SAP"), &SourceRef::new("doc-1"))
            .await
            .unwrap();
        let before = store.epoch(&Namespace::new("acme")).await;
        resolver
            .resolve(&system_candidate("SAP"), &SourceRef::new("doc-2"))
            .await
            .unwrap();
        assert!(store.epoch(&Namespace::new("acme")).await > before);
    }

    #[tokio::test]
    async fn malformed_candidate_is_rejected_without_retry() {
        let (_, resolver) = resolver();
        let bad = CandidateEntity::new(Namespace::new(""), EntityType::System, "SAP");
        let err = resolver.resolve(&bad, &SourceRef::new("doc-1")).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }
}
