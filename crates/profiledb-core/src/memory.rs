//! In-memory store implementations for tests and local development.
//!
//! These honor the same contracts as the LanceDB-backed adapters: shallow
//! document merge, coalesced batches, replace-on-upsert points.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::traits::{
    AuthDecision, DistanceMetric, DocumentBatch, DocumentStore, IdentityVerifier, VectorIndex,
};
use crate::types::{merge_fields, Fields};

#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, HashMap<String, Fields>>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of one document, for assertions.
    pub fn document(&self, collection: &str, id: &str) -> Option<Fields> {
        self.collections
            .lock()
            .expect("lock poisoned")
            .get(collection)
            .and_then(|docs| docs.get(id).cloned())
    }

    pub fn collection_len(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .expect("lock poisoned")
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        Ok(self.document(collection, id))
    }

    async fn set_merge(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let mut collections = self.collections.lock().expect("lock poisoned");
        let doc = collections
            .entry(collection.to_string())
            .or_default()
            .entry(id.to_string())
            .or_default();
        merge_fields(doc, &fields);
        Ok(())
    }

    async fn commit_batch(&self, batch: DocumentBatch) -> Result<()> {
        let mut collections = self.collections.lock().expect("lock poisoned");
        for write in batch.coalesced() {
            let doc = collections
                .entry(write.collection)
                .or_default()
                .entry(write.id)
                .or_default();
            merge_fields(doc, &write.fields);
        }
        Ok(())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<(String, Fields)>> {
        let collections = self.collections.lock().expect("lock poisoned");
        let mut out: Vec<(String, Fields)> = collections
            .get(collection)
            .map(|docs| docs.iter().map(|(id, doc)| (id.clone(), doc.clone())).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct StoredPoint {
    pub vector: Vec<f32>,
    pub payload: Value,
}

#[derive(Debug, Default)]
pub struct MemoryVectorIndex {
    collections: Mutex<HashMap<String, (usize, DistanceMetric)>>,
    points: Mutex<HashMap<String, HashMap<String, StoredPoint>>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn point(&self, collection: &str, id: &str) -> Option<StoredPoint> {
        self.points
            .lock()
            .expect("lock poisoned")
            .get(collection)
            .and_then(|points| points.get(id).cloned())
    }

    pub fn point_count(&self, collection: &str) -> usize {
        self.points
            .lock()
            .expect("lock poisoned")
            .get(collection)
            .map_or(0, HashMap::len)
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn ensure_collection(&self, name: &str, dim: usize, metric: DistanceMetric) -> Result<()> {
        self.collections
            .lock()
            .expect("lock poisoned")
            .entry(name.to_string())
            .or_insert((dim, metric));
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f32],
        payload: &Value,
    ) -> Result<()> {
        let dim = {
            let collections = self.collections.lock().expect("lock poisoned");
            match collections.get(collection) {
                Some((dim, _)) => *dim,
                None => {
                    return Err(Error::IndexUnavailable(format!(
                        "unknown collection: {collection}"
                    )))
                }
            }
        };
        if vector.len() != dim {
            return Err(Error::IndexUnavailable(format!(
                "dimension mismatch for '{collection}': got {}, expected {dim}",
                vector.len()
            )));
        }
        self.points
            .lock()
            .expect("lock poisoned")
            .entry(collection.to_string())
            .or_default()
            .insert(
                id.to_string(),
                StoredPoint {
                    vector: vector.to_vec(),
                    payload: payload.clone(),
                },
            );
        Ok(())
    }
}

/// Session verifier backed by a fixed token-to-uid table, loaded from
/// config for the CLI and built inline in tests.
#[derive(Debug, Default)]
pub struct StaticVerifier {
    sessions: HashMap<String, String>,
}

impl StaticVerifier {
    pub fn new(sessions: HashMap<String, String>) -> Self {
        Self { sessions }
    }

    pub fn single(token: &str, uid: &str) -> Self {
        let mut sessions = HashMap::new();
        sessions.insert(token.to_string(), uid.to_string());
        Self { sessions }
    }
}

#[async_trait]
impl IdentityVerifier for StaticVerifier {
    async fn verify_session(&self, token: &str) -> Result<AuthDecision> {
        Ok(match self.sessions.get(token) {
            Some(uid) => AuthDecision::Verified { uid: uid.clone() },
            None => AuthDecision::Denied {
                reason: "unknown session token".to_string(),
            },
        })
    }
}
