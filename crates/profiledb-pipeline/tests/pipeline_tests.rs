use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use profiledb_core::error::{Error, Result};
use profiledb_core::memory::{MemoryDocumentStore, MemoryVectorIndex, StaticVerifier};
use profiledb_core::traits::{
    AuthDecision, DistanceMetric, DocumentBatch, DocumentStore, Embedder, IdentityVerifier,
    VectorIndex,
};
use profiledb_core::types::{Fields, OnboardingRequest, WeightedTextGroup, EMBEDDING_DIM};
use profiledb_embed::FakeEmbedder;
use profiledb_pipeline::{
    aggregate, project_text_group, user_text_group, OnboardingOrchestrator, PREFERENCES_COLLECTION,
    PROJECTS_COLLECTION, SKILLS_COLLECTION, USERS_COLLECTION,
};

// ---- test doubles ---------------------------------------------------------

/// Embedder that counts calls so tests can prove the vector phase never ran.
struct CountingEmbedder {
    inner: FakeEmbedder,
    calls: Arc<AtomicUsize>,
}

impl CountingEmbedder {
    fn boxed(calls: Arc<AtomicUsize>) -> Box<dyn Embedder> {
        Box::new(Self {
            inner: FakeEmbedder::new(EMBEDDING_DIM),
            calls,
        })
    }
}

impl Embedder for CountingEmbedder {
    fn dim(&self) -> usize {
        self.inner.dim()
    }
    fn max_len(&self) -> usize {
        self.inner.max_len()
    }
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed_many(texts)
    }
}

/// Document store whose commits always fail.
struct FailingDocStore;

#[async_trait]
impl DocumentStore for FailingDocStore {
    async fn get(&self, _collection: &str, _id: &str) -> Result<Option<Fields>> {
        Err(Error::StoreUnavailable("store offline".to_string()))
    }
    async fn set_merge(&self, _collection: &str, _id: &str, _fields: Fields) -> Result<()> {
        Err(Error::StoreUnavailable("store offline".to_string()))
    }
    async fn commit_batch(&self, _batch: DocumentBatch) -> Result<()> {
        Err(Error::StoreUnavailable("store offline".to_string()))
    }
    async fn scan(&self, _collection: &str) -> Result<Vec<(String, Fields)>> {
        Err(Error::StoreUnavailable("store offline".to_string()))
    }
}

/// Vector index that accepts ensure calls but rejects every upsert.
#[derive(Default)]
struct FailingVectorIndex {
    upsert_attempts: AtomicUsize,
}

#[async_trait]
impl VectorIndex for FailingVectorIndex {
    async fn ensure_collection(
        &self,
        _name: &str,
        _dim: usize,
        _metric: DistanceMetric,
    ) -> Result<()> {
        Ok(())
    }
    async fn upsert(
        &self,
        _collection: &str,
        _id: &str,
        _vector: &[f32],
        _payload: &Value,
    ) -> Result<()> {
        self.upsert_attempts.fetch_add(1, Ordering::SeqCst);
        Err(Error::IndexUnavailable("index offline".to_string()))
    }
}

/// Verifier whose backend is unreachable.
struct UnreachableVerifier;

#[async_trait]
impl IdentityVerifier for UnreachableVerifier {
    async fn verify_session(&self, _token: &str) -> Result<AuthDecision> {
        Err(Error::AuthUnavailable("verifier offline".to_string()))
    }
}

// ---- helpers --------------------------------------------------------------

fn ada_request() -> OnboardingRequest {
    serde_json::from_value(json!({
        "name": "Ada",
        "email": "a@x.com",
        "skills": ["Rust", "C++"],
        "preferences": ["remote"],
        "projects": {
            "p1": {
                "title": "Engine",
                "description": "A rendering engine",
                "tech_stack": ["C++", "Vulkan"],
                "requirements": ["3y exp"]
            }
        }
    }))
    .expect("valid request")
}

fn memory_orchestrator(
    verifier: StaticVerifier,
) -> OnboardingOrchestrator<MemoryDocumentStore, MemoryVectorIndex> {
    OnboardingOrchestrator::new(
        MemoryDocumentStore::new(),
        MemoryVectorIndex::new(),
        Box::new(FakeEmbedder::new(EMBEDDING_DIM)),
        Box::new(verifier),
    )
}

/// Reference aggregation written out long-hand, independent of the
/// production code path.
fn expected_vector(texts: &[&str], weights: &[f32]) -> Vec<f32> {
    let embedder = FakeEmbedder::new(EMBEDDING_DIM);
    let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let embedded = embedder.embed_many(&owned).expect("embed");
    let mut sum = vec![0f32; EMBEDDING_DIM];
    for (vector, weight) in embedded.iter().zip(weights) {
        for (acc, component) in sum.iter_mut().zip(vector) {
            *acc += component * weight;
        }
    }
    for component in &mut sum {
        *component /= embedded.len() as f32;
    }
    sum
}

// ---- aggregation contract -------------------------------------------------

#[test]
fn unit_weights_equal_plain_mean() {
    let embedder = FakeEmbedder::new(EMBEDDING_DIM);
    let texts = ["alpha", "beta", "gamma"];

    let mut group = WeightedTextGroup::new();
    group.push_all(texts, 1.0);
    let aggregated = aggregate::aggregate(&embedder, &group)
        .expect("aggregate")
        .expect("non-empty");

    let owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
    let embedded = embedder.embed_many(&owned).expect("embed");
    for (i, component) in aggregated.iter().enumerate() {
        let mean = (embedded[0][i] + embedded[1][i] + embedded[2][i]) / 3.0;
        assert!((component - mean).abs() < 1e-6);
    }
}

#[test]
fn uniform_weight_scales_the_mean() {
    // Weighted sum divided by count: a uniform weight w scales the plain
    // mean by w, so the cosine direction is unchanged.
    let embedder = FakeEmbedder::new(EMBEDDING_DIM);
    let texts = ["alpha", "beta"];
    let w = 0.6f32;

    let mut unit = WeightedTextGroup::new();
    unit.push_all(texts, 1.0);
    let mean = aggregate::aggregate(&embedder, &unit)
        .expect("aggregate")
        .expect("non-empty");

    let mut weighted = WeightedTextGroup::new();
    weighted.push_all(texts, w);
    let scaled = aggregate::aggregate(&embedder, &weighted)
        .expect("aggregate")
        .expect("non-empty");

    for (s, m) in scaled.iter().zip(mean.iter()) {
        assert!((s - w * m).abs() < 1e-6);
    }
}

#[test]
fn empty_group_aggregates_to_none() {
    let embedder = FakeEmbedder::new(EMBEDDING_DIM);
    let group = WeightedTextGroup::new();
    assert!(aggregate::aggregate(&embedder, &group)
        .expect("aggregate")
        .is_none());
}

// ---- pipeline behavior ----------------------------------------------------

#[tokio::test]
async fn end_to_end_scenario() -> anyhow::Result<()> {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "user-ada"));
    pipeline.ensure_collections().await?;

    let outcome = pipeline.onboard(Some("tok"), &ada_request()).await?;
    assert_eq!(outcome.uid, "user-ada");
    assert!(outcome.vectors_indexed);

    // User document merged with onboarded flag.
    let docs = pipeline.document_store();
    let user = docs.document(USERS_COLLECTION, "user-ada").expect("user doc");
    assert_eq!(user.get("name"), Some(&json!("Ada")));
    assert_eq!(user.get("onboarded"), Some(&json!(true)));
    assert!(!user.contains_key("photo_url"), "absent field is not written");

    // Catalog entries keyed by normalized name, raw form preserved.
    let rust = docs.document(SKILLS_COLLECTION, "rust").expect("skills/rust");
    assert_eq!(rust.get("name"), Some(&json!("Rust")));
    assert!(docs.document(SKILLS_COLLECTION, "c++").is_some());
    assert!(docs.document(PREFERENCES_COLLECTION, "remote").is_some());

    // Project document with ownership.
    let p1 = docs.document(PROJECTS_COLLECTION, "p1").expect("projects/p1");
    assert_eq!(p1.get("title"), Some(&json!("Engine")));
    assert_eq!(p1.get("owner_uid"), Some(&json!("user-ada")));

    // User vector: skills 0.6, preferences 0.3, project titles 0.1.
    let index = pipeline.vector_index();
    let user_point = index.point(USERS_COLLECTION, "user-ada").expect("user point");
    let expected = expected_vector(&["Rust", "C++", "remote", "Engine"], &[0.6, 0.6, 0.3, 0.1]);
    assert_eq!(user_point.vector, expected);
    assert_eq!(user_point.payload.get("email"), Some(&json!("a@x.com")));
    assert_eq!(user_point.payload.get("project_ids"), Some(&json!(["p1"])));

    // Project vector: tech stack 0.7, requirements 0.3.
    let project_point = index.point(PROJECTS_COLLECTION, "p1").expect("project point");
    let expected = expected_vector(&["C++", "Vulkan", "3y exp"], &[0.7, 0.7, 0.3]);
    assert_eq!(project_point.vector, expected);
    assert_eq!(project_point.payload.get("tech_stack"), Some(&json!(["C++", "Vulkan"])));
    Ok(())
}

#[tokio::test]
async fn missing_session_is_unauthenticated() {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "u1"));
    let err = pipeline.onboard(None, &ada_request()).await.unwrap_err();
    assert!(matches!(err, Error::Unauthenticated(_)));
}

#[tokio::test]
async fn unknown_token_is_unauthenticated() {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "u1"));
    let err = pipeline
        .onboard(Some("wrong"), &ada_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Unauthenticated(_)));
}

#[tokio::test]
async fn verifier_outage_is_not_reported_as_unauthenticated() {
    let pipeline = OnboardingOrchestrator::new(
        MemoryDocumentStore::new(),
        MemoryVectorIndex::new(),
        Box::new(FakeEmbedder::new(EMBEDDING_DIM)),
        Box::new(UnreachableVerifier),
    );
    let err = pipeline
        .onboard(Some("tok"), &ada_request())
        .await
        .unwrap_err();
    // A dead verifier backend is a different failure class than a denied
    // token and must not be collapsed into it.
    assert!(matches!(err, Error::AuthUnavailable(_)));
}

#[tokio::test]
async fn malformed_submission_is_rejected() {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "u1"));

    let no_name: OnboardingRequest =
        serde_json::from_value(json!({"name": "  ", "email": "a@x.com"})).expect("request");
    assert!(matches!(
        pipeline.onboard(Some("tok"), &no_name).await.unwrap_err(),
        Error::InvalidInput(_)
    ));

    let empty_project_key: OnboardingRequest = serde_json::from_value(json!({
        "name": "Ada",
        "email": "a@x.com",
        "projects": {"": {"title": "Engine", "description": "d"}}
    }))
    .expect("request");
    assert!(matches!(
        pipeline
            .onboard(Some("tok"), &empty_project_key)
            .await
            .unwrap_err(),
        Error::InvalidInput(_)
    ));
}

#[tokio::test]
async fn document_failure_short_circuits_vector_phase() {
    let calls = Arc::new(AtomicUsize::new(0));
    let pipeline = OnboardingOrchestrator::new(
        FailingDocStore,
        MemoryVectorIndex::new(),
        CountingEmbedder::boxed(calls.clone()),
        Box::new(StaticVerifier::single("tok", "u1")),
    );

    let err = pipeline
        .onboard(Some("tok"), &ada_request())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "embedder must never run");
    assert_eq!(pipeline.vector_index().point_count(USERS_COLLECTION), 0);
}

#[tokio::test]
async fn vector_failure_keeps_documents_and_reports_success() -> anyhow::Result<()> {
    let pipeline = OnboardingOrchestrator::new(
        MemoryDocumentStore::new(),
        FailingVectorIndex::default(),
        Box::new(FakeEmbedder::new(EMBEDDING_DIM)),
        Box::new(StaticVerifier::single("tok", "user-ada")),
    );

    let outcome = pipeline.onboard(Some("tok"), &ada_request()).await?;
    assert!(!outcome.vectors_indexed);
    assert_eq!(outcome.uid, "user-ada");
    assert_eq!(outcome.message, "onboarding complete");

    // Committed documents are untouched by the failed vector phase.
    let docs = pipeline.document_store();
    assert!(docs.document(USERS_COLLECTION, "user-ada").is_some());
    assert!(docs.document(PROJECTS_COLLECTION, "p1").is_some());
    assert!(
        pipeline
            .vector_index()
            .upsert_attempts
            .load(Ordering::SeqCst)
            > 0
    );
    Ok(())
}

#[tokio::test]
async fn repeated_submission_is_idempotent() -> anyhow::Result<()> {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "user-ada"));
    pipeline.ensure_collections().await?;

    pipeline.onboard(Some("tok"), &ada_request()).await?;
    let doc_first = pipeline
        .document_store()
        .document(USERS_COLLECTION, "user-ada")
        .expect("doc");
    let point_first = pipeline
        .vector_index()
        .point(USERS_COLLECTION, "user-ada")
        .expect("point");

    pipeline.onboard(Some("tok"), &ada_request()).await?;
    let doc_second = pipeline
        .document_store()
        .document(USERS_COLLECTION, "user-ada")
        .expect("doc");
    let point_second = pipeline
        .vector_index()
        .point(USERS_COLLECTION, "user-ada")
        .expect("point");

    assert_eq!(doc_first, doc_second);
    assert_eq!(point_first.vector, point_second.vector, "no drift from re-averaging");
    assert_eq!(pipeline.vector_index().point_count(USERS_COLLECTION), 1);
    Ok(())
}

#[tokio::test]
async fn catalog_normalization_across_requests() -> anyhow::Result<()> {
    let mut sessions = std::collections::HashMap::new();
    sessions.insert("t1".to_string(), "u1".to_string());
    sessions.insert("t2".to_string(), "u2".to_string());
    let pipeline = memory_orchestrator(StaticVerifier::new(sessions));
    pipeline.ensure_collections().await?;

    let first: OnboardingRequest = serde_json::from_value(json!({
        "name": "A", "email": "a@x.com", "skills": ["Python"]
    }))?;
    let second: OnboardingRequest = serde_json::from_value(json!({
        "name": "B", "email": "b@x.com", "skills": ["python "]
    }))?;
    pipeline.onboard(Some("t1"), &first).await?;
    pipeline.onboard(Some("t2"), &second).await?;

    let docs = pipeline.document_store();
    assert_eq!(docs.collection_len(SKILLS_COLLECTION), 1, "one entry keyed 'python'");
    let entry = docs.document(SKILLS_COLLECTION, "python").expect("entry");
    // Display name is last-write-wins, raw form preserved.
    assert_eq!(entry.get("name"), Some(&json!("python ")));
    Ok(())
}

#[tokio::test]
async fn submission_without_texts_skips_upserts() -> anyhow::Result<()> {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "u1"));
    pipeline.ensure_collections().await?;

    let bare: OnboardingRequest =
        serde_json::from_value(json!({"name": "Ada", "email": "a@x.com"}))?;
    let outcome = pipeline.onboard(Some("tok"), &bare).await?;

    // Document phase ran, vector phase had nothing to do: still a success.
    assert!(outcome.vectors_indexed);
    assert!(pipeline
        .document_store()
        .document(USERS_COLLECTION, "u1")
        .is_some());
    assert_eq!(pipeline.vector_index().point_count(USERS_COLLECTION), 0);
    assert_eq!(pipeline.vector_index().point_count(PROJECTS_COLLECTION), 0);
    Ok(())
}

#[tokio::test]
async fn resubmission_merges_instead_of_overwriting() -> anyhow::Result<()> {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "u1"));
    pipeline.ensure_collections().await?;

    let with_photo: OnboardingRequest = serde_json::from_value(json!({
        "name": "Ada", "email": "a@x.com", "photo_url": "https://x/a.png"
    }))?;
    pipeline.onboard(Some("tok"), &with_photo).await?;

    // Second submission omits photo_url and skills entirely.
    let without_photo: OnboardingRequest = serde_json::from_value(json!({
        "name": "Ada Lovelace", "email": "a@x.com"
    }))?;
    pipeline.onboard(Some("tok"), &without_photo).await?;

    let doc = pipeline
        .document_store()
        .document(USERS_COLLECTION, "u1")
        .expect("doc");
    assert_eq!(doc.get("name"), Some(&json!("Ada Lovelace")));
    // Omitted fields were not cleared.
    assert_eq!(doc.get("photo_url"), Some(&json!("https://x/a.png")));
    Ok(())
}

#[tokio::test]
async fn fetch_profile_roundtrips() -> anyhow::Result<()> {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "user-ada"));
    pipeline.onboard(Some("tok"), &ada_request()).await?;

    let profile = pipeline.fetch_profile("user-ada").await?.expect("profile");
    assert_eq!(profile.name, "Ada");
    assert!(profile.onboarded);
    assert_eq!(profile.skills, vec!["Rust", "C++"]);
    assert!(profile.projects.contains_key("p1"));

    assert!(pipeline.fetch_profile("ghost").await?.is_none());
    Ok(())
}

#[tokio::test]
async fn rebuild_recomputes_vectors_from_documents() -> anyhow::Result<()> {
    let pipeline = memory_orchestrator(StaticVerifier::single("tok", "user-ada"));
    pipeline.ensure_collections().await?;
    pipeline.onboard(Some("tok"), &ada_request()).await?;

    // A second profile written directly to the store, as if its vector
    // write had been lost.
    let fields = match json!({
        "name": "Grace",
        "email": "g@x.com",
        "onboarded": true,
        "skills": ["COBOL"],
        "preferences": [],
        "projects": {}
    }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    };
    pipeline
        .document_store()
        .set_merge(USERS_COLLECTION, "user-grace", fields)
        .await?;

    let report = pipeline.rebuild_vectors().await?;
    assert_eq!(report.users, 2);
    assert_eq!(report.projects, 1);
    assert_eq!(report.skipped, 0);

    let grace = pipeline
        .vector_index()
        .point(USERS_COLLECTION, "user-grace")
        .expect("grace point");
    let expected = expected_vector(&["COBOL"], &[0.6]);
    assert_eq!(grace.vector, expected);

    // The rebuilt Ada vector matches the one the pipeline wrote originally.
    let ada = pipeline
        .vector_index()
        .point(USERS_COLLECTION, "user-ada")
        .expect("ada point");
    let expected = expected_vector(&["Rust", "C++", "remote", "Engine"], &[0.6, 0.6, 0.3, 0.1]);
    assert_eq!(ada.vector, expected);
    Ok(())
}

#[tokio::test]
async fn user_and_project_groups_use_the_documented_weights() {
    let group = user_text_group(["Rust"], ["remote"], ["Engine"]);
    assert_eq!(group.weights(), vec![0.6, 0.3, 0.1]);

    let group = project_text_group(["C++", "Vulkan"], ["3y exp"]);
    assert_eq!(group.weights(), vec![0.7, 0.7, 0.3]);
}
