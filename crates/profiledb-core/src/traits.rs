use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::types::{merge_fields, Fields};

/// Text to fixed-length vector. Implementations are deterministic for a
/// fixed model version and safe to share across concurrent requests.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_many(std::slice::from_ref(&text.to_string()))?;
        Ok(vectors.pop().unwrap_or_default())
    }
}

/// One buffered document write.
#[derive(Debug, Clone)]
pub struct BatchWrite {
    pub collection: String,
    pub id: String,
    pub fields: Fields,
}

/// Accumulates `set_merge` writes for one commit. Writes to the same
/// (collection, id) coalesce in call order before committing, so a batch
/// touches each document at most once.
#[derive(Debug, Default)]
pub struct DocumentBatch {
    writes: Vec<BatchWrite>,
}

impl DocumentBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_merge(&mut self, collection: &str, id: &str, fields: Fields) {
        self.writes.push(BatchWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Writes merged per (collection, id), first-seen order preserved.
    pub fn coalesced(&self) -> Vec<BatchWrite> {
        let mut out: Vec<BatchWrite> = Vec::new();
        for write in &self.writes {
            match out
                .iter_mut()
                .find(|w| w.collection == write.collection && w.id == write.id)
            {
                Some(existing) => merge_fields(&mut existing.fields, &write.fields),
                None => out.push(write.clone()),
            }
        }
        out
    }
}

/// Thin contract over the document database.
///
/// `set_merge` upserts with shallow merge and never deletes unspecified
/// fields. `commit_batch` commits each collection group of a batch as one
/// atomic unit; groups are independent of each other.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>>;
    async fn set_merge(&self, collection: &str, id: &str, fields: Fields) -> Result<()>;
    async fn commit_batch(&self, batch: DocumentBatch) -> Result<()>;

    /// All (id, document) pairs of a collection; a missing collection reads
    /// as empty. Used by the vector rebuild path.
    async fn scan(&self, collection: &str) -> Result<Vec<(String, Fields)>>;

    fn batch(&self) -> DocumentBatch {
        DocumentBatch::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Cosine,
    L2,
    Dot,
}

/// Thin contract over the vector database. Vector writes are strictly
/// downstream of document writes and must never roll them back.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Create the collection if absent. Safe to call on every startup.
    async fn ensure_collection(&self, name: &str, dim: usize, metric: DistanceMetric) -> Result<()>;

    /// Replace any existing point with the same id.
    async fn upsert(&self, collection: &str, id: &str, vector: &[f32], payload: &Value)
        -> Result<()>;
}

/// Outcome of session verification. A denied token and an unreachable
/// verifier warrant different retry and user-messaging behavior, so they
/// are kept apart: `Denied` is a decision, transport failure is an `Err`.
#[derive(Debug, Clone)]
pub enum AuthDecision {
    Verified { uid: String },
    Denied { reason: String },
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// `Err` means the verification backend itself could not be reached.
    async fn verify_session(&self, token: &str) -> Result<AuthDecision>;
}
