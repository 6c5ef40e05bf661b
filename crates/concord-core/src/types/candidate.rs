//! Pre-consolidation input records from the extraction stage.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};

use super::{EmbeddingVector, EntityAttributes, EntityId, EntityType, Namespace};

/// Reference to the source location an assertion was extracted from.
///
/// `document_id` identifies the source document; `segment` optionally narrows
/// to a chunk within it. Cross-validation counts distinct documents only, so
/// two segments of one document never corroborate each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub document_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub segment: Option<u32>,
}

impl SourceRef {
    pub fn new(document_id: impl Into<String>) -> Self {
        Self {
            document_id: document_id.into(),
            segment: None,
        }
    }

    pub fn with_segment(mut self, segment: u32) -> Self {
        self.segment = Some(segment);
        self
    }

    /// True when both refs point into the same source document.
    pub fn same_document(&self, other: &SourceRef) -> bool {
        self.document_id == other.document_id
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.segment {
            Some(seg) => write!(f, "{}#{}", self.document_id, seg),
            None => f.write_str(&self.document_id),
        }
    }
}

/// One extraction's pre-consolidation assertion about a concept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateEntity {
    pub namespace: Namespace,
    pub entity_type: EntityType,
    pub canonical_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attributes: EntityAttributes,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,
}

impl CandidateEntity {
    pub fn new(
        namespace: Namespace,
        entity_type: EntityType,
        canonical_name: impl Into<String>,
    ) -> Self {
        Self {
            namespace,
            entity_type,
            canonical_name: canonical_name.into(),
            description: String::new(),
            attributes: EntityAttributes::new(),
            embedding: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_attributes(mut self, attributes: EntityAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingVector) -> Self {
        self.embedding = Some(embedding);
        self
    }

    /// Reject malformed candidates before any store interaction.
    ///
    /// Validation failures are terminal: the caller logs and drops the
    /// candidate, it is never retried.
    pub fn validate(&self, source_ref: &SourceRef) -> EngineResult<()> {
        if self.namespace.is_empty() {
            return Err(EngineError::Validation {
                field: "namespace".into(),
                message: "namespace must not be empty".into(),
                source_ref: Some(source_ref.clone()),
            });
        }
        if self.canonical_name.trim().is_empty() {
            return Err(EngineError::Validation {
                field: "canonical_name".into(),
                message: "canonical_name must not be empty".into(),
                source_ref: Some(source_ref.clone()),
            });
        }
        if let Err((field, message)) = self.attributes.check_schema(self.entity_type) {
            return Err(EngineError::Validation {
                field,
                message,
                source_ref: Some(source_ref.clone()),
            });
        }
        if let Some(embedding) = &self.embedding {
            if embedding.is_empty() {
                return Err(EngineError::Validation {
                    field: "embedding".into(),
                    message: "embedding vector must not be empty when present".into(),
                    source_ref: Some(source_ref.clone()),
                });
            }
        }
        Ok(())
    }
}

/// Several entities observed together in one source reference.
///
/// Emitted by extraction after its entities have been resolved; feeds
/// relationship discovery directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateMention {
    pub source_ref: SourceRef,
    pub entity_ids: Vec<EntityId>,
}

impl CandidateMention {
    pub fn new(source_ref: SourceRef, entity_ids: Vec<EntityId>) -> Self {
        Self {
            source_ref,
            entity_ids,
        }
    }
}
