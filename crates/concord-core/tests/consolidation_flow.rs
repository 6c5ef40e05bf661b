//! End-to-end consolidation flows across resolver, discoverer, and
//! recognizer.

use std::sync::Arc;

use concord_core::types::{AttributeValue, EntityAttributes, ValidationType};
use concord_core::{
    CandidateEntity, CandidateMention, ConsolidationEngine, ConsolidationPipeline, EngineConfig,
    EntityType, InMemoryKnowledgeStore, KnowledgeStore, Namespace, RelationshipType,
    ResolutionDecision, SourceDocument, SourceRef,
};

fn engine() -> (Arc<InMemoryKnowledgeStore>, ConsolidationEngine) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("concord_core=warn")
        .with_test_writer()
        .try_init();
    let store = Arc::new(InMemoryKnowledgeStore::new());
    let engine = ConsolidationEngine::new(store.clone(), EngineConfig::default());
    (store, engine)
}

fn acme() -> Namespace {
    Namespace::new("acme")
}

/// Scenario: "SAP" and "S.A.P." with an equal vendor attribute merge into
/// one entity with two sources and consensus at or above 0.9.
#[tokio::test]
async fn sap_spelling_variants_merge() {
    let (store, engine) = engine();
    let vendor = EntityAttributes::new().with("vendor", AttributeValue::Text("SAP SE".into()));

    let first = engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::System, "SAP")
                .with_attributes(vendor.clone()),
            &SourceRef::new("doc-1"),
        )
        .await
        .unwrap();
    assert_eq!(first.action, ResolutionDecision::New);

    let second = engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::System, "S.A.P.").with_attributes(vendor),
            &SourceRef::new("doc-2"),
        )
        .await
        .unwrap();
    assert_eq!(second.action, ResolutionDecision::Merge);
    assert_eq!(second.entity_id, first.entity_id);
    assert!(!second.contradiction);

    let entity = store.get_entity(first.entity_id).await.unwrap().unwrap();
    assert_eq!(entity.source_count, 2);
    assert!(entity.consensus_confidence >= 0.9);
    assert!(!entity.has_contradictions);
}

/// Scenario: "Opera PMS" (satisfaction 3) merging into "Opera"
/// (satisfaction 8) exceeds the 50% numeric delta and flags a
/// contradiction while processing continues.
#[tokio::test]
async fn satisfaction_disagreement_flags_contradiction() {
    let (store, engine) = engine();
    // Embeddings close enough to merge despite the differing names.
    let first = engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::System, "Opera")
                .with_embedding(vec![1.0, 0.05, 0.0])
                .with_attributes(
                    EntityAttributes::new().with("satisfaction", AttributeValue::Number(8.0)),
                ),
            &SourceRef::new("doc-1"),
        )
        .await
        .unwrap();

    let second = engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::System, "Opera PMS")
                .with_embedding(vec![0.99, 0.1, 0.0])
                .with_attributes(
                    EntityAttributes::new().with("satisfaction", AttributeValue::Number(3.0)),
                ),
            &SourceRef::new("doc-2"),
        )
        .await
        .unwrap();

    assert_eq!(second.action, ResolutionDecision::Merge);
    assert!(second.contradiction);

    let entity = store.get_entity(first.entity_id).await.unwrap().unwrap();
    assert!(entity.has_contradictions);
    assert_eq!(entity.contradiction_details[0].field, "satisfaction");
    // The established value wins the tie; the dissent is preserved.
    assert_eq!(
        entity.attributes.get("satisfaction"),
        Some(&AttributeValue::Number(8.0))
    );
}

/// Scenario: a coordinates_with relationship seen only in document 14 stays
/// single-source at confidence 0.7; a second sighting in document 21
/// cross-validates it at 0.95.
#[tokio::test]
async fn relationship_validation_lifecycle() {
    let (_, engine) = engine();
    let channels = EntityAttributes::new().with(
        "channels",
        AttributeValue::TextList(vec!["#front-office".into()]),
    );

    let role_a = engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::Role, "Front Desk Agent")
                .with_attributes(channels.clone()),
            &SourceRef::new("doc-14"),
        )
        .await
        .unwrap();
    let role_b = engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::Role, "Night Auditor")
                .with_attributes(channels),
            &SourceRef::new("doc-14"),
        )
        .await
        .unwrap();

    let first_pass = engine
        .discover(&SourceRef::new("doc-14"), &[role_a.entity_id, role_b.entity_id])
        .await
        .unwrap();
    let rel = first_pass
        .iter()
        .find(|r| r.relationship_type == RelationshipType::CoordinatesWith)
        .expect("coordinates_with discovered");
    assert!(!rel.validated);
    assert_eq!(rel.validation_type, ValidationType::SingleSource);
    assert!((rel.confidence - 0.7).abs() < f32::EPSILON);

    // The second sighting arrives as a co-mention record from extraction.
    let mention = CandidateMention::new(
        SourceRef::new("doc-21"),
        vec![role_a.entity_id, role_b.entity_id],
    );
    let second_pass = engine.discover_mention(&mention).await.unwrap();
    let rel = second_pass
        .iter()
        .find(|r| r.relationship_type == RelationshipType::CoordinatesWith)
        .unwrap();
    assert!(rel.validated);
    assert_eq!(rel.validation_type, ValidationType::CrossValidated);
    assert!((rel.confidence - 0.95).abs() < f32::EPSILON);
    assert_eq!(rel.source_refs.len(), 2);
}

/// Resolving the same (candidate, source_ref) twice leaves source_count and
/// mentioned_in unchanged on the second call.
#[tokio::test]
async fn resolution_is_idempotent_per_source() {
    let (store, engine) = engine();
    let candidate = CandidateEntity::new(acme(), EntityType::System, "SAP");
    let source = SourceRef::new("doc-1");

    let first = engine.resolve(&candidate, &source).await.unwrap();
    let before = store.get_entity(first.entity_id).await.unwrap().unwrap();

    let second = engine.resolve(&candidate, &source).await.unwrap();
    assert_eq!(second.entity_id, first.entity_id);

    let after = store.get_entity(first.entity_id).await.unwrap().unwrap();
    assert_eq!(after.source_count, before.source_count);
    assert_eq!(after.mentioned_in, before.mentioned_in);
    assert_eq!(after.consensus_confidence, before.consensus_confidence);
}

/// A near-threshold match keeps both entities and links them for review.
#[tokio::test]
async fn near_duplicates_link_for_review() {
    let (_, engine) = engine();
    let shared = EntityAttributes::new()
        .with("vendor", AttributeValue::Text("Oracle".into()))
        .with("category", AttributeValue::Text("PMS".into()))
        .with("criticality", AttributeValue::Text("high".into()))
        .with(
            "integrates_with",
            AttributeValue::TextList(vec!["Stripe".into()]),
        )
        .with("satisfaction", AttributeValue::Number(7.0));
    let mut divergent = shared.clone();
    divergent.set("satisfaction", AttributeValue::Number(2.0));

    engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::System, "Opera PMS")
                .with_attributes(shared),
            &SourceRef::new("doc-1"),
        )
        .await
        .unwrap();
    let linked = engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::System, "Micros Fidelio")
                .with_attributes(divergent),
            &SourceRef::new("doc-2"),
        )
        .await
        .unwrap();

    assert_eq!(linked.action, ResolutionDecision::Link);
    let links = engine.duplicate_links(linked.entity_id).await.unwrap();
    assert_eq!(links.len(), 1);
    assert!(links[0].confidence >= 0.8 && links[0].confidence < 0.9);
}

/// Audit records reconstruct the decision history and support rollback.
#[tokio::test]
async fn audit_trail_reconstructs_decisions() {
    let (store, engine) = engine();
    engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::System, "SAP"),
            &SourceRef::new("doc-1"),
        )
        .await
        .unwrap();
    engine
        .resolve(
            &CandidateEntity::new(acme(), EntityType::System, "S.A.P."),
            &SourceRef::new("doc-2"),
        )
        .await
        .unwrap();

    let log = engine.audit_log(&acme()).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].decision, ResolutionDecision::New);
    assert_eq!(log[1].decision, ResolutionDecision::Merge);
    assert!(log[1].similarity_score.unwrap() >= 0.9);

    let rolled_back = engine.rollback(log[1].id).await.unwrap();
    let entity = store.get_entity(rolled_back).await.unwrap().unwrap();
    assert_eq!(entity.source_count, 1);
}

/// Full pipeline pass: many overlapping documents converge without
/// duplicates, discover relationships, and trigger pattern recognition.
#[tokio::test]
async fn pipeline_converges_overlapping_documents() {
    let store = Arc::new(InMemoryKnowledgeStore::new());
    let engine = Arc::new(ConsolidationEngine::new(store.clone(), EngineConfig::default()));
    let pipeline = Arc::new(ConsolidationPipeline::new(
        engine.clone(),
        EngineConfig::default().pipeline,
    ));

    let documents: Vec<SourceDocument> = (0..5)
        .map(|n| SourceDocument {
            source_ref: SourceRef::new(format!("doc-{}", n)),
            candidates: vec![
                CandidateEntity::new(acme(), EntityType::Process, "Night Audit"),
                CandidateEntity::new(acme(), EntityType::System, "Opera PMS"),
                CandidateEntity::new(acme(), EntityType::PainPoint, "Manual invoice rekeying")
                    .with_attributes(
                        EntityAttributes::new().with("severity", AttributeValue::Number(6.0)),
                    ),
            ],
        })
        .collect();

    let results = pipeline.ingest_all(documents).await;
    assert!(results.iter().all(|r| r.is_ok()));

    // Five assertions of each concept converge to one entity apiece.
    let stats = engine.stats(&acme()).await.unwrap();
    assert_eq!(stats.entity_count, 3);

    // The process/system co-occurrence became a cross-validated dependency.
    let processes = store
        .entities_in(&acme(), EntityType::Process)
        .await
        .unwrap();
    let rels = store.relationships_for(processes[0].id).await.unwrap();
    let depends = rels
        .iter()
        .find(|r| r.relationship_type == RelationshipType::DependsOn)
        .expect("depends_on discovered");
    assert!(depends.validated);
    assert_eq!(depends.source_refs.len(), 5);
    assert!((depends.strength - 0.5).abs() < 1e-6);
}
