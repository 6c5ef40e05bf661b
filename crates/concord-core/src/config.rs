//! Configuration for the consolidation engine.
//!
//! Every heuristic threshold in the algorithms is configuration with the
//! documented default, not a hard-coded constant: merge/link thresholds and
//! the contradiction tolerance in particular come from field observation,
//! not empirical validation, and deployments tune them.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, EngineResult};
use crate::types::EntityType;

/// Main configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub consolidation: ConsolidationConfig,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    #[serde(default)]
    pub patterns: PatternConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
}

impl EngineConfig {
    /// Load configuration from files and environment.
    ///
    /// Sources in order: `config/default.toml`, `config/{CONCORD_ENV}.toml`,
    /// then environment variables with the `CONCORD` prefix.
    pub fn load() -> EngineResult<Self> {
        let env = std::env::var("CONCORD_ENV").unwrap_or_else(|_| "development".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name("config/default").required(false))
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("CONCORD").separator("__"));

        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Load configuration from a single TOML file.
    pub fn from_file(path: &std::path::Path) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        let cfg: EngineConfig = toml::from_str(&content)
            .map_err(|e| EngineError::Config(format!("failed to parse config file: {}", e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> EngineResult<()> {
        let c = &self.consolidation;
        if !(0.0..=1.0).contains(&c.link_threshold) || !(0.0..=1.0).contains(&c.merge_threshold) {
            return Err(EngineError::Config(
                "consolidation thresholds must lie in [0, 1]".into(),
            ));
        }
        if c.link_threshold > c.merge_threshold {
            return Err(EngineError::Config(
                "consolidation.link_threshold must not exceed merge_threshold".into(),
            ));
        }
        if c.max_retries == 0 {
            return Err(EngineError::Config(
                "consolidation.max_retries must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.discovery.pain_point_similarity) {
            return Err(EngineError::Config(
                "discovery.pain_point_similarity must lie in [0, 1]".into(),
            ));
        }
        if self.patterns.min_cluster_size < 2 {
            return Err(EngineError::Config(
                "patterns.min_cluster_size must be at least 2".into(),
            ));
        }
        if self.retrieval.branch_timeout_ms == 0 {
            return Err(EngineError::Config(
                "retrieval.branch_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.pipeline.max_concurrent_documents == 0 {
            return Err(EngineError::Config(
                "pipeline.max_concurrent_documents must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

/// Entity resolution thresholds and merge tolerances.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsolidationConfig {
    /// Similarity at or above which a candidate links to its best match
    pub link_threshold: f32,

    /// Similarity at or above which a candidate merges into its best match
    pub merge_threshold: f32,

    /// Cosine similarity at which the semantic tier short-circuits
    pub semantic_short_circuit: f32,

    /// Numeric contradiction tolerance as a fraction of the larger value
    pub numeric_tolerance: f64,

    /// Local retries on optimistic store conflicts
    pub max_retries: u32,
}

impl Default for ConsolidationConfig {
    fn default() -> Self {
        Self {
            link_threshold: 0.8,
            merge_threshold: 0.9,
            semantic_short_circuit: 0.9,
            numeric_tolerance: 0.5,
            max_retries: 3,
        }
    }
}

/// Relationship discovery triggers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscoveryConfig {
    /// Similarity at which two pain points are considered shared
    pub pain_point_similarity: f32,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            pain_point_similarity: 0.85,
        }
    }
}

/// Periodic pattern recognition parameters.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PatternConfig {
    /// Consolidation batches required before a recognition pass runs
    pub trigger_threshold: u64,

    /// Representative similarity for greedy cluster assignment
    pub cluster_similarity: f32,

    /// Members required before a cluster becomes a pattern
    pub min_cluster_size: usize,

    /// Entity type the recognizer clusters
    pub target_type: EntityType,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            trigger_threshold: 5,
            cluster_similarity: 0.8,
            min_cluster_size: 3,
            target_type: EntityType::PainPoint,
        }
    }
}

/// Hybrid retrieval tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Reciprocal rank fusion constant
    pub rrf_k: f32,

    /// Per-branch deadline for vector and graph searches
    pub branch_timeout_ms: u64,

    /// Query cache time-to-live
    pub cache_ttl_ms: u64,

    /// Maximum cached queries before expired entries are evicted
    pub cache_capacity: usize,

    /// Maximum relationship hops in graph search
    pub graph_depth: usize,

    /// Candidates fetched per branch before fusion
    pub branch_pool_size: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            rrf_k: 60.0,
            branch_timeout_ms: 2_000,
            cache_ttl_ms: 30_000,
            cache_capacity: 1_024,
            graph_depth: 2,
            branch_pool_size: 50,
        }
    }
}

/// Consolidation worker pool sizing.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// In-flight source documents processed concurrently
    pub max_concurrent_documents: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: 4,
        }
    }
}
