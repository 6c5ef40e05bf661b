//! Bounded consolidation worker pool.
//!
//! One worker per in-flight source document: a semaphore admits documents,
//! each document's candidates resolve sequentially in order, relationship
//! discovery runs over the document's resolved ids, and the pattern trigger
//! advances once per document. Work is spawned into a `JoinSet`, never
//! detached, so dropping the pipeline future abandons queued documents
//! without leaks or further writes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::PipelineConfig;
use crate::engine::ConsolidationEngine;
use crate::error::{EngineError, EngineResult};
use crate::resolution::Resolution;
use crate::types::{CandidateEntity, EntityId, SourceRef};

/// One source document's extraction output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    pub source_ref: SourceRef,
    pub candidates: Vec<CandidateEntity>,
}

/// Per-document processing outcome.
#[derive(Debug, Clone)]
pub struct DocumentReport {
    pub source_ref: SourceRef,
    pub resolutions: Vec<Resolution>,

    /// Candidates rejected by validation; dropped, never retried
    pub rejected: usize,

    /// Candidates that exhausted conflict retries; the caller requeues them
    pub requeue: Vec<CandidateEntity>,

    /// Relationship observations upserted from this document
    pub relationships: usize,

    /// Patterns refreshed by the recognition pass this document triggered
    pub patterns: usize,
}

/// Semaphore-bounded pool consuming source documents.
pub struct ConsolidationPipeline {
    engine: Arc<ConsolidationEngine>,
    permits: Arc<Semaphore>,
    pattern_trigger: u64,
    batches: AtomicU64,
}

impl ConsolidationPipeline {
    pub fn new(engine: Arc<ConsolidationEngine>, config: PipelineConfig) -> Self {
        let pattern_trigger = engine.config().patterns.trigger_threshold;
        Self {
            engine,
            permits: Arc::new(Semaphore::new(config.max_concurrent_documents)),
            pattern_trigger,
            batches: AtomicU64::new(0),
        }
    }

    /// Process one document end to end under a pool permit.
    pub async fn ingest_document(&self, document: SourceDocument) -> EngineResult<DocumentReport> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| EngineError::Store("consolidation pool closed".into()))?;

        let source_ref = document.source_ref.clone();
        let mut resolutions = Vec::with_capacity(document.candidates.len());
        let mut resolved_ids: Vec<EntityId> = Vec::with_capacity(document.candidates.len());
        let mut rejected = 0usize;
        let mut requeue = Vec::new();

        for candidate in document.candidates {
            match self.engine.resolve(&candidate, &source_ref).await {
                Ok(resolution) => {
                    resolved_ids.push(resolution.entity_id);
                    resolutions.push(resolution);
                }
                Err(EngineError::Validation { field, message, .. }) => {
                    warn!(
                        source_ref = %source_ref,
                        field = %field,
                        message = %message,
                        "dropping malformed candidate"
                    );
                    rejected += 1;
                }
                Err(EngineError::RetryExhausted { .. }) => {
                    warn!(
                        source_ref = %source_ref,
                        candidate = %candidate.canonical_name,
                        "conflict retries exhausted, queueing candidate for requeue"
                    );
                    requeue.push(candidate);
                }
                Err(other) => return Err(other),
            }
        }

        let relationships = self
            .engine
            .discover(&source_ref, &resolved_ids)
            .await?
            .len();

        let batch = self.batches.fetch_add(1, Ordering::SeqCst) + 1;
        let patterns = match self.engine.recognize(batch).await {
            Ok(patterns) => {
                if batch >= self.pattern_trigger {
                    self.batches.store(0, Ordering::SeqCst);
                }
                patterns.len()
            }
            // Another worker is already clustering; its pass covers us.
            Err(EngineError::PatternRunInProgress) => 0,
            Err(other) => return Err(other),
        };

        info!(
            source_ref = %source_ref,
            resolved = resolutions.len(),
            rejected,
            requeue = requeue.len(),
            relationships,
            "document consolidated"
        );
        Ok(DocumentReport {
            source_ref,
            resolutions,
            rejected,
            requeue,
            relationships,
            patterns,
        })
    }

    /// Process many documents concurrently, bounded by the pool size.
    ///
    /// Results come back in input order, one per document.
    pub async fn ingest_all(
        self: &Arc<Self>,
        documents: Vec<SourceDocument>,
    ) -> Vec<EngineResult<DocumentReport>> {
        let mut tasks = JoinSet::new();
        let count = documents.len();
        for (index, document) in documents.into_iter().enumerate() {
            let pipeline = Arc::clone(self);
            tasks.spawn(async move { (index, pipeline.ingest_document(document).await) });
        }

        let mut results: Vec<EngineResult<DocumentReport>> = (0..count)
            .map(|_| Err(EngineError::Store("worker did not report".into())))
            .collect();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = result,
                Err(join_error) => {
                    warn!(error = %join_error, "consolidation worker failed");
                }
            }
        }
        results
    }
}
