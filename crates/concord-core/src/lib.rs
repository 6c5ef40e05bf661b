//! Concord Core Library
//!
//! Consolidation-and-hybrid-retrieval engine for organizational knowledge:
//! ingests independently-extracted candidate facts about business concepts
//! (systems, processes, pain points, ...) and converges them into one
//! consistent, provenance-tracked knowledge base served by a fused
//! vector-plus-graph retriever.
//!
//! # Architecture
//!
//! This crate defines:
//! - Domain types (`Entity`, `Relationship`, `Pattern`,
//!   `ConsolidationAuditRecord`, candidate input records)
//! - The [`KnowledgeStore`](traits::KnowledgeStore) and
//!   [`EmbeddingProvider`](traits::EmbeddingProvider) seams external
//!   infrastructure implements, plus in-memory reference implementations
//! - The four engine components: similarity scoring, entity resolution,
//!   relationship discovery, and pattern recognition
//! - Hybrid retrieval with reciprocal rank fusion and an epoch-invalidated
//!   query cache
//! - A semaphore-bounded consolidation pipeline
//!
//! Document parsing, chunking, embedding generation, API surfaces, and
//! governance workflows are external collaborators and live outside this
//! crate.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use concord_core::{
//!     CandidateEntity, ConsolidationEngine, EngineConfig, EntityType,
//!     InMemoryKnowledgeStore, Namespace, SourceRef,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), concord_core::EngineError> {
//! let store = Arc::new(InMemoryKnowledgeStore::new());
//! let engine = ConsolidationEngine::new(store, EngineConfig::default());
//!
//! let candidate =
//!     CandidateEntity::new(Namespace::new("acme"), EntityType::System, "SAP");
//! let resolution = engine.resolve(&candidate, &SourceRef::new("doc-1")).await?;
//! # let _ = resolution;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod patterns;
pub mod pipeline;
pub mod resolution;
pub mod retrieval;
pub mod similarity;
pub mod store;
pub mod traits;
pub mod types;

// Re-exports for convenience
pub use config::EngineConfig;
pub use discovery::RelationshipDiscoverer;
pub use engine::ConsolidationEngine;
pub use error::{EngineError, EngineResult};
pub use patterns::PatternRecognizer;
pub use pipeline::{ConsolidationPipeline, DocumentReport, SourceDocument};
pub use resolution::{EntityResolver, Resolution};
pub use retrieval::{HybridRetriever, SearchItem, SearchRequest, SearchResponse};
pub use similarity::SimilarityScorer;
pub use store::InMemoryKnowledgeStore;
pub use traits::{EmbeddingProvider, KnowledgeStore, StubEmbeddingProvider};
pub use types::{
    CandidateEntity, CandidateMention, Entity, EntityType, Namespace, Pattern, Relationship,
    RelationshipType, ResolutionDecision, SourceRef,
};
