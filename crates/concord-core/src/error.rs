//! Error types for concord-core.
//!
//! Every variant carries enough context (namespace, entity type, source ref,
//! similarity scores) to reconstruct the decision for audit. Contradictions
//! and partial retrieval are data, not errors, and never appear here.

use thiserror::Error;

use crate::types::{EntityId, EntityType, Namespace, SourceRef};

/// Top-level error type for the consolidation engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Optimistic version mismatch on a store write; retried locally before
    /// surfacing as [`EngineError::RetryExhausted`].
    #[error("store version conflict on entity {entity_id} ({namespace}/{entity_type})")]
    TransientStoreConflict {
        namespace: Namespace,
        entity_type: EntityType,
        entity_id: EntityId,
    },

    /// Local retries exhausted; the caller requeues the candidate.
    #[error("resolve retries exhausted after {attempts} attempts for {source_ref} ({namespace}/{entity_type})")]
    RetryExhausted {
        namespace: Namespace,
        entity_type: EntityType,
        source_ref: SourceRef,
        attempts: u32,
    },

    /// Malformed input, rejected immediately and never retried.
    #[error("validation failed on {field}: {message}")]
    Validation {
        field: String,
        message: String,
        source_ref: Option<SourceRef>,
    },

    #[error("entity not found: {id}")]
    EntityNotFound { id: EntityId },

    /// Both retrieval branches failed or timed out.
    #[error("hybrid retrieval failed in namespace {namespace}: {reason}")]
    RetrievalFailed { namespace: Namespace, reason: String },

    /// A pattern recognition pass is already running.
    #[error("pattern recognition already in progress")]
    PatternRunInProgress,

    #[error("store error: {0}")]
    Store(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result type alias for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
