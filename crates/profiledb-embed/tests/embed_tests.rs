use profiledb_core::traits::Embedder;
use profiledb_core::types::EMBEDDING_DIM;
use profiledb_embed::FakeEmbedder;

#[test]
fn fake_embedder_shapes_and_determinism() {
    let embedder = FakeEmbedder::new(EMBEDDING_DIM);
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed_many(&texts).expect("embed_many");
    assert_eq!(embs.len(), 2);
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), EMBEDDING_DIM, "embedding dim is {EMBEDDING_DIM}");

    // Norm approximately 1.0
    let norm: f32 = v1.iter().map(|x| x * x).sum::<f32>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-3, "vector is L2-normalized (norm={norm})");

    // Deterministic for the same input
    for (a, b) in v1.iter().zip(v2.iter()) {
        assert!((a - b).abs() <= 1e-6);
    }
}

#[test]
fn fake_embedder_distinguishes_texts() {
    let embedder = FakeEmbedder::new(EMBEDDING_DIM);
    let a = embedder.embed_text("rust systems programming").expect("embed");
    let b = embedder.embed_text("watercolor painting").expect("embed");
    assert_ne!(a, b);
}

#[test]
fn embed_many_handles_empty_input() {
    let embedder = FakeEmbedder::new(EMBEDDING_DIM);
    let out = embedder.embed_many(&[]).expect("embed_many");
    assert!(out.is_empty());
}

#[test]
fn default_embedder_honors_fake_env_gate() {
    std::env::set_var("APP_USE_FAKE_EMBEDDINGS", "1");
    let embedder = profiledb_embed::default_embedder().expect("embedder");
    assert_eq!(embedder.dim(), EMBEDDING_DIM);
    let v = embedder.embed_text("hello").expect("embed");
    assert_eq!(v.len(), EMBEDDING_DIM);
}
