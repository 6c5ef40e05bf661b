//! Consolidated entity representing one organizational concept.
//!
//! An entity is the convergence point for many independently-extracted
//! candidate assertions about the same real-world concept. Its attribute
//! values are the cross-source majority; disagreements are preserved in
//! `contradiction_details` rather than silently overwritten.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::SourceRef;

/// Unique identifier for consolidated entities.
pub type EntityId = Uuid;

/// Embedding vector supplied by the external embedding provider.
pub type EmbeddingVector = Vec<f32>;

/// Isolation boundary per organization/tenant.
///
/// All store partitions, resolver locks, and retrieval caches are keyed by
/// namespace; data never crosses namespaces except in pattern recognition,
/// which reports the namespaces involved explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Business concept kinds the engine consolidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    System,
    Process,
    PainPoint,
    Role,
    Team,
    Department,
    Tool,
    Vendor,
    Project,
    Metric,
    Goal,
    Policy,
    Meeting,
    Document,
    CommunicationChannel,
    Decision,
    Risk,
}

impl EntityType {
    /// Stable snake_case label, matching the serde representation.
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::System => "system",
            EntityType::Process => "process",
            EntityType::PainPoint => "pain_point",
            EntityType::Role => "role",
            EntityType::Team => "team",
            EntityType::Department => "department",
            EntityType::Tool => "tool",
            EntityType::Vendor => "vendor",
            EntityType::Project => "project",
            EntityType::Metric => "metric",
            EntityType::Goal => "goal",
            EntityType::Policy => "policy",
            EntityType::Meeting => "meeting",
            EntityType::Document => "document",
            EntityType::CommunicationChannel => "communication_channel",
            EntityType::Decision => "decision",
            EntityType::Risk => "risk",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Kind of a declared attribute field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Flag,
    TextList,
}

/// A single attribute value.
///
/// Untagged so extraction payloads can submit plain JSON scalars and arrays.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Flag(bool),
    Number(f64),
    Text(String),
    TextList(Vec<String>),
}

impl AttributeValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            AttributeValue::Flag(_) => FieldKind::Flag,
            AttributeValue::Number(_) => FieldKind::Number,
            AttributeValue::Text(_) => FieldKind::Text,
            AttributeValue::TextList(_) => FieldKind::TextList,
        }
    }

    /// Whether this is a scalar (non-list) value.
    pub fn is_scalar(&self) -> bool {
        !matches!(self, AttributeValue::TextList(_))
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            AttributeValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            AttributeValue::TextList(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Flag(b) => write!(f, "{}", b),
            AttributeValue::Number(n) => write!(f, "{}", n),
            AttributeValue::Text(s) => f.write_str(s),
            AttributeValue::TextList(v) => write!(f, "[{}]", v.join(", ")),
        }
    }
}

/// Declared fields for one entity type.
///
/// Fields not listed here are accepted as freeform extension values; fields
/// that are listed must carry the declared kind.
#[derive(Debug, Clone, Copy)]
pub struct AttributeSchema {
    pub fields: &'static [(&'static str, FieldKind)],
}

impl AttributeSchema {
    pub fn kind_of(&self, field: &str) -> Option<FieldKind> {
        self.fields
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, kind)| *kind)
    }
}

const SYSTEM_SCHEMA: AttributeSchema = AttributeSchema {
    fields: &[
        ("vendor", FieldKind::Text),
        ("category", FieldKind::Text),
        ("satisfaction", FieldKind::Number),
        ("criticality", FieldKind::Text),
        ("integrates_with", FieldKind::TextList),
    ],
};

const PROCESS_SCHEMA: AttributeSchema = AttributeSchema {
    fields: &[
        ("owner_role", FieldKind::Text),
        ("frequency", FieldKind::Text),
        ("automated", FieldKind::Flag),
        ("inputs", FieldKind::TextList),
        ("outputs", FieldKind::TextList),
    ],
};

const PAIN_POINT_SCHEMA: AttributeSchema = AttributeSchema {
    fields: &[
        ("severity", FieldKind::Number),
        ("impact_area", FieldKind::Text),
        ("workaround", FieldKind::Text),
        ("affected_roles", FieldKind::TextList),
    ],
};

const ROLE_SCHEMA: AttributeSchema = AttributeSchema {
    fields: &[
        ("department", FieldKind::Text),
        ("seniority", FieldKind::Text),
        ("channels", FieldKind::TextList),
        ("responsibilities", FieldKind::TextList),
    ],
};

const TEAM_SCHEMA: AttributeSchema = AttributeSchema {
    fields: &[
        ("department", FieldKind::Text),
        ("headcount", FieldKind::Number),
        ("channels", FieldKind::TextList),
    ],
};

const TOOL_SCHEMA: AttributeSchema = AttributeSchema {
    fields: &[
        ("vendor", FieldKind::Text),
        ("category", FieldKind::Text),
        ("seats", FieldKind::Number),
    ],
};

const CHANNEL_SCHEMA: AttributeSchema = AttributeSchema {
    fields: &[
        ("medium", FieldKind::Text),
        ("cadence", FieldKind::Text),
        ("participants", FieldKind::TextList),
    ],
};

const METRIC_SCHEMA: AttributeSchema = AttributeSchema {
    fields: &[
        ("unit", FieldKind::Text),
        ("target", FieldKind::Number),
        ("owner_role", FieldKind::Text),
    ],
};

/// Types without algorithm-relevant declared fields accept everything as
/// freeform extension values.
const OPEN_SCHEMA: AttributeSchema = AttributeSchema { fields: &[] };

/// Static schema for an entity type.
pub fn schema_for(entity_type: EntityType) -> &'static AttributeSchema {
    match entity_type {
        EntityType::System => &SYSTEM_SCHEMA,
        EntityType::Process => &PROCESS_SCHEMA,
        EntityType::PainPoint => &PAIN_POINT_SCHEMA,
        EntityType::Role => &ROLE_SCHEMA,
        EntityType::Team => &TEAM_SCHEMA,
        EntityType::Tool => &TOOL_SCHEMA,
        EntityType::CommunicationChannel => &CHANNEL_SCHEMA,
        EntityType::Metric => &METRIC_SCHEMA,
        _ => &OPEN_SCHEMA,
    }
}

/// Attribute map for one entity: schema-declared fields plus freeform
/// extension values, all addressed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityAttributes {
    values: BTreeMap<String, AttributeValue>,
}

impl EntityAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, value: AttributeValue) {
        self.values.insert(field.into(), value);
    }

    /// Builder-style variant of [`set`](Self::set).
    pub fn with(mut self, field: impl Into<String>, value: AttributeValue) -> Self {
        self.set(field, value);
        self
    }

    pub fn get(&self, field: &str) -> Option<&AttributeValue> {
        self.values.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.values.iter()
    }

    /// Scalar (non-list) fields only.
    pub fn scalars(&self) -> impl Iterator<Item = (&String, &AttributeValue)> {
        self.values.iter().filter(|(_, v)| v.is_scalar())
    }

    /// List-valued fields only.
    pub fn lists(&self) -> impl Iterator<Item = (&String, &[String])> {
        self.values.iter().filter_map(|(k, v)| match v {
            AttributeValue::TextList(items) => Some((k, items.as_slice())),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check declared fields against the schema for `entity_type`.
    ///
    /// Returns the offending field and a message on the first kind mismatch.
    /// Undeclared fields are freeform and always pass.
    pub fn check_schema(&self, entity_type: EntityType) -> Result<(), (String, String)> {
        let schema = schema_for(entity_type);
        for (field, value) in &self.values {
            if let Some(expected) = schema.kind_of(field) {
                if value.kind() != expected {
                    return Err((
                        field.clone(),
                        format!(
                            "expected {:?} for declared field of {}, got {:?}",
                            expected,
                            entity_type,
                            value.kind()
                        ),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl FromIterator<(String, AttributeValue)> for EntityAttributes {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

/// One recorded disagreement between sources over a scalar field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionDetail {
    pub field: String,
    pub existing: AttributeValue,
    pub incoming: AttributeValue,
    pub source_ref: SourceRef,
    pub recorded_at: DateTime<Utc>,
}

/// A scalar value as asserted by one source, kept for majority voting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeObservation {
    pub value: AttributeValue,
    pub source_ref: SourceRef,
}

/// Consolidated entity.
///
/// Invariant: within a namespace, once `consensus_confidence` crosses the
/// merge threshold, (entity_type, normalized canonical_name) maps to at most
/// one primary entity; sub-threshold near-duplicates coexist linked by a
/// `possible_duplicate_of` relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Unique identifier
    pub id: EntityId,

    /// Tenant isolation boundary
    pub namespace: Namespace,

    /// Business concept kind
    pub entity_type: EntityType,

    /// Preferred display name (first asserted form)
    pub canonical_name: String,

    /// Longest description seen across sources
    pub description: String,

    /// Current (majority) attribute values
    pub attributes: EntityAttributes,

    /// Per-field scalar assertions by source, for majority voting
    #[serde(default)]
    pub observations: BTreeMap<String, Vec<AttributeObservation>>,

    /// Sources that asserted this entity
    pub mentioned_in: BTreeSet<SourceRef>,

    /// Number of distinct source references merged in
    pub source_count: u32,

    /// Cross-source agreement score [0.0, 1.0]
    pub consensus_confidence: f32,

    /// Whether any source disagreed beyond tolerance
    pub has_contradictions: bool,

    /// Conflicting values kept for human review
    #[serde(default)]
    pub contradiction_details: Vec<ContradictionDetail>,

    /// Description embedding, when a source supplied one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<EmbeddingVector>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last merge timestamp
    pub last_enriched_at: DateTime<Utc>,

    /// Number of merges applied after creation
    pub enrichment_count: u32,

    /// Optimistic concurrency version, incremented by the store on update
    #[serde(default)]
    pub version: u64,
}

impl Entity {
    /// Record a mentioning source. Returns false when the source was already
    /// known (idempotent re-resolution).
    pub fn record_source(&mut self, source_ref: SourceRef) -> bool {
        self.mentioned_in.insert(source_ref)
    }

    /// Distinct documents among the mentioning sources.
    pub fn distinct_documents(&self) -> usize {
        self.mentioned_in
            .iter()
            .map(|s| s.document_id.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Mark an enrichment pass.
    pub fn touch_enriched(&mut self) {
        self.last_enriched_at = Utc::now();
        self.enrichment_count += 1;
    }
}
