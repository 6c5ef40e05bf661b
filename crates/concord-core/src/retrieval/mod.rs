//! Hybrid retrieval: concurrent vector and graph search fused by
//! reciprocal rank.
//!
//! Both branches run under a per-branch deadline. A failed or timed-out
//! branch degrades the result to the surviving branch with `partial = true`
//! instead of failing the query; only the loss of both branches is an
//! error. Retrieval is read-only: cancellation abandons in-flight branch
//! calls without retry and writes nothing.

mod cache;
mod fusion;

pub use fusion::SearchItem;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RetrievalConfig;
use crate::error::{EngineError, EngineResult};
use crate::similarity::normalize_name;
use crate::traits::{KnowledgeStore, SearchHit};
use crate::types::Namespace;

use cache::{CacheKey, QueryCache};

/// One hybrid search request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query_embedding: Option<Vec<f32>>,
    pub namespace: Namespace,
    pub top_k: usize,
    pub weight_vector: f32,
    pub weight_graph: f32,
}

impl SearchRequest {
    pub fn new(namespace: Namespace, query_text: impl Into<String>) -> Self {
        Self {
            query_text: query_text.into(),
            query_embedding: None,
            namespace,
            top_k: 10,
            weight_vector: 0.5,
            weight_graph: 0.5,
        }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.query_embedding = Some(embedding);
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_weights(mut self, weight_vector: f32, weight_graph: f32) -> Self {
        self.weight_vector = weight_vector;
        self.weight_graph = weight_graph;
        self
    }

    fn validate(&self) -> EngineResult<()> {
        if self.namespace.is_empty() {
            return Err(EngineError::Validation {
                field: "namespace".into(),
                message: "namespace must not be empty".into(),
                source_ref: None,
            });
        }
        if self.top_k == 0 {
            return Err(EngineError::Validation {
                field: "top_k".into(),
                message: "top_k must be greater than 0".into(),
                source_ref: None,
            });
        }
        if self.weight_vector < 0.0 || self.weight_graph < 0.0 {
            return Err(EngineError::Validation {
                field: "weights".into(),
                message: "fusion weights must be non-negative".into(),
                source_ref: None,
            });
        }
        Ok(())
    }
}

/// Fused search response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub items: Vec<SearchItem>,

    /// True when one branch failed or timed out and the result is the
    /// surviving branch only
    pub partial: bool,
}

/// Runs vector and graph search concurrently and fuses the rankings.
pub struct HybridRetriever {
    store: Arc<dyn KnowledgeStore>,
    config: RetrievalConfig,
    cache: QueryCache,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn KnowledgeStore>, config: RetrievalConfig) -> Self {
        let cache = QueryCache::new(
            Duration::from_millis(config.cache_ttl_ms),
            config.cache_capacity,
        );
        Self {
            store,
            config,
            cache,
        }
    }

    /// Execute a hybrid search.
    pub async fn search(&self, request: &SearchRequest) -> EngineResult<SearchResponse> {
        request.validate()?;

        let key = CacheKey {
            namespace: request.namespace.clone(),
            normalized_query: normalize_name(&request.query_text),
            weight_bits: request.weight_vector.to_bits(),
        };
        let epoch = self.store.epoch(&request.namespace).await;
        if let Some((items, partial)) = self.cache.get(&key, epoch) {
            debug!(namespace = %request.namespace, "serving fused results from cache");
            return Ok(Self::respond(items, partial, request.top_k));
        }

        let deadline = Duration::from_millis(self.config.branch_timeout_ms);
        let pool = self.config.branch_pool_size.max(request.top_k);

        let vector_branch = async {
            match &request.query_embedding {
                Some(embedding) => {
                    self.store
                        .vector_search(&request.namespace, embedding, pool)
                        .await
                }
                // No embedding supplied: the vector branch has nothing to
                // rank, which is emptiness, not failure.
                None => Ok(Vec::new()),
            }
        };
        let graph_branch = self.store.graph_search(
            &request.namespace,
            &request.query_text,
            self.config.graph_depth,
            pool,
        );

        let (vector_out, graph_out) = tokio::join!(
            tokio::time::timeout(deadline, vector_branch),
            tokio::time::timeout(deadline, graph_branch),
        );
        let vector = Self::branch_result("vector", &request.namespace, vector_out);
        let graph = Self::branch_result("graph", &request.namespace, graph_out);

        let (vector, graph, partial) = match (vector, graph) {
            (Some(v), Some(g)) => (v, g, false),
            (Some(v), None) => (v, Vec::new(), true),
            (None, Some(g)) => (Vec::new(), g, true),
            (None, None) => {
                return Err(EngineError::RetrievalFailed {
                    namespace: request.namespace.clone(),
                    reason: "both vector and graph branches failed or timed out".into(),
                })
            }
        };

        let items = fusion::reciprocal_rank_fusion(
            vector,
            graph,
            request.weight_vector,
            request.weight_graph,
            self.config.rrf_k,
        );

        // Degraded results are not cached: the next query should see the
        // recovered branch as soon as it is back.
        if !partial {
            self.cache.insert(key, epoch, items.clone(), partial);
        }
        Ok(Self::respond(items, partial, request.top_k))
    }

    fn respond(items: Vec<SearchItem>, partial: bool, top_k: usize) -> SearchResponse {
        let mut items = items;
        items.truncate(top_k);
        SearchResponse { items, partial }
    }

    fn branch_result(
        branch: &str,
        namespace: &Namespace,
        outcome: Result<EngineResult<Vec<SearchHit>>, tokio::time::error::Elapsed>,
    ) -> Option<Vec<SearchHit>> {
        match outcome {
            Ok(Ok(hits)) => Some(hits),
            Ok(Err(error)) => {
                warn!(
                    branch,
                    namespace = %namespace,
                    error = %error,
                    "search branch failed, degrading to surviving branch"
                );
                None
            }
            Err(_) => {
                warn!(
                    branch,
                    namespace = %namespace,
                    "search branch timed out, degrading to surviving branch"
                );
                None
            }
        }
    }
}
