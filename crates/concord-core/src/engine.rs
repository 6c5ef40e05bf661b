//! Engine facade bundling the four exposed operations.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::discovery::RelationshipDiscoverer;
use crate::error::EngineResult;
use crate::patterns::PatternRecognizer;
use crate::resolution::{EntityResolver, Resolution};
use crate::retrieval::{HybridRetriever, SearchRequest, SearchResponse};
use crate::similarity::SimilarityScorer;
use crate::traits::{KnowledgeStore, StoreStats};
use crate::types::{
    AuditId, CandidateEntity, CandidateMention, ConsolidationAuditRecord, EntityId, Namespace,
    Pattern, Relationship, RelationshipType, SourceRef,
};

/// The consolidation-and-hybrid-retrieval engine.
///
/// Wires the resolver, discoverer, recognizer, and retriever over one shared
/// knowledge store and exposes the operations external callers use:
/// `resolve`, `discover`, `recognize`, `search`.
pub struct ConsolidationEngine {
    store: Arc<dyn KnowledgeStore>,
    config: EngineConfig,
    resolver: EntityResolver,
    discoverer: RelationshipDiscoverer,
    recognizer: PatternRecognizer,
    retriever: HybridRetriever,
}

impl ConsolidationEngine {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: EngineConfig) -> Self {
        let scorer = SimilarityScorer::new(&config.consolidation);
        let resolver = EntityResolver::new(store.clone(), config.consolidation.clone());
        let discoverer = RelationshipDiscoverer::new(
            store.clone(),
            scorer.clone(),
            config.discovery.clone(),
        );
        let recognizer =
            PatternRecognizer::new(store.clone(), scorer, config.patterns.clone());
        let retriever = HybridRetriever::new(store.clone(), config.retrieval.clone());
        Self {
            store,
            config,
            resolver,
            discoverer,
            recognizer,
            retriever,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        &self.store
    }

    /// Resolve one extraction candidate into the consolidated store.
    pub async fn resolve(
        &self,
        candidate: &CandidateEntity,
        source_ref: &SourceRef,
    ) -> EngineResult<Resolution> {
        self.resolver.resolve(candidate, source_ref).await
    }

    /// Discover relationships among entities co-observed in one source.
    pub async fn discover(
        &self,
        source_ref: &SourceRef,
        entity_ids: &[EntityId],
    ) -> EngineResult<Vec<Relationship>> {
        self.discoverer.discover(source_ref, entity_ids).await
    }

    /// Discover relationships from a co-mention record emitted by
    /// extraction.
    pub async fn discover_mention(
        &self,
        mention: &CandidateMention,
    ) -> EngineResult<Vec<Relationship>> {
        self.discoverer
            .discover(&mention.source_ref, &mention.entity_ids)
            .await
    }

    /// Run a pattern recognition pass if the batch trigger allows.
    pub async fn recognize(&self, batch_trigger_count: u64) -> EngineResult<Vec<Pattern>> {
        self.recognizer.recognize(batch_trigger_count).await
    }

    /// Hybrid vector-plus-graph search.
    pub async fn search(&self, request: &SearchRequest) -> EngineResult<SearchResponse> {
        self.retriever.search(request).await
    }

    /// Restore the pre-merge snapshot from a merge audit record.
    pub async fn rollback(&self, audit_id: AuditId) -> EngineResult<EntityId> {
        self.resolver.rollback(audit_id).await
    }

    /// Read-only audit export for the governance consumer.
    pub async fn audit_log(
        &self,
        namespace: &Namespace,
    ) -> EngineResult<Vec<ConsolidationAuditRecord>> {
        self.store.audit_log(namespace).await
    }

    /// Near-duplicate links attached to an entity, for human review.
    pub async fn duplicate_links(&self, entity_id: EntityId) -> EngineResult<Vec<Relationship>> {
        Ok(self
            .store
            .relationships_for(entity_id)
            .await?
            .into_iter()
            .filter(|r| r.relationship_type == RelationshipType::PossibleDuplicateOf)
            .collect())
    }

    /// Per-namespace store statistics.
    pub async fn stats(&self, namespace: &Namespace) -> EngineResult<StoreStats> {
        self.store.stats(namespace).await
    }
}
