//! LanceDB-backed vector index adapter.
//!
//! One table per collection, upserts via `merge_insert` on `id` so a point
//! with an existing id is replaced wholesale. Collections are created
//! idempotently; the distance metric recorded at ensure time drives the
//! optional ANN index build.

pub mod schema;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use arrow_array::cast::AsArray;
use arrow_array::{
    FixedSizeListArray, RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray,
};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::index::vector::IvfPqIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection, DistanceType};
use serde_json::Value;
use tracing::debug;

use profiledb_core::error::{Error, Result};
use profiledb_core::traits::{DistanceMetric, VectorIndex};

use schema::points_schema;

fn index_err<E: std::fmt::Display>(e: E) -> Error {
    Error::IndexUnavailable(e.to_string())
}

fn escape(id: &str) -> String {
    id.replace('\'', "''")
}

fn distance_type(metric: DistanceMetric) -> DistanceType {
    match metric {
        DistanceMetric::Cosine => DistanceType::Cosine,
        DistanceMetric::L2 => DistanceType::L2,
        DistanceMetric::Dot => DistanceType::Dot,
    }
}

pub struct LanceVectorIndex {
    db: Connection,
    collections: Mutex<HashMap<String, (usize, DistanceMetric)>>,
}

impl LanceVectorIndex {
    pub async fn open(uri: &str) -> Result<Self> {
        let db = connect(uri).execute().await.map_err(index_err)?;
        Ok(Self {
            db,
            collections: Mutex::new(HashMap::new()),
        })
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self.db.table_names().execute().await.map_err(index_err)?;
        Ok(names.contains(&name.to_string()))
    }

    fn registered(&self, name: &str) -> Option<(usize, DistanceMetric)> {
        self.collections
            .lock()
            .expect("lock poisoned")
            .get(name)
            .copied()
    }

    /// Train an IVF-PQ index over a collection with the metric recorded at
    /// ensure time. Needs enough rows to train, so callers run it out of
    /// band, not per upsert.
    pub async fn build_ann_index(&self, collection: &str) -> Result<()> {
        let (_, metric) = self.registered(collection).ok_or_else(|| {
            Error::IndexUnavailable(format!("unknown collection: {collection}"))
        })?;
        let tbl = self
            .db
            .open_table(collection)
            .execute()
            .await
            .map_err(index_err)?;
        tbl.create_index(
            &["vector"],
            Index::IvfPq(IvfPqIndexBuilder::default().distance_type(distance_type(metric))),
        )
        .execute()
        .await
        .map_err(index_err)?;
        Ok(())
    }

    /// Read one point back: (vector, payload). Test and tooling support.
    pub async fn fetch(&self, collection: &str, id: &str) -> Result<Option<(Vec<f32>, Value)>> {
        if !self.table_exists(collection).await? {
            return Ok(None);
        }
        let tbl = self
            .db
            .open_table(collection)
            .execute()
            .await
            .map_err(index_err)?;
        let mut stream = tbl
            .query()
            .only_if(format!("id = '{}'", escape(id)))
            .execute()
            .await
            .map_err(index_err)?;
        while let Some(batch) = stream.try_next().await.map_err(index_err)? {
            if batch.num_rows() == 0 {
                continue;
            }
            let vectors = batch
                .column_by_name("vector")
                .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
                .ok_or_else(|| Error::IndexUnavailable("vector column missing".to_string()))?;
            let payloads = batch
                .column_by_name("payload")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::IndexUnavailable("payload column missing".to_string()))?;
            let inner = vectors.value(0);
            let values = inner
                .as_primitive::<arrow_array::types::Float32Type>()
                .values()
                .to_vec();
            let payload =
                serde_json::from_str(payloads.value(0)).map_err(index_err)?;
            return Ok(Some((values, payload)));
        }
        Ok(None)
    }
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn ensure_collection(&self, name: &str, dim: usize, metric: DistanceMetric) -> Result<()> {
        self.collections
            .lock()
            .expect("lock poisoned")
            .insert(name.to_string(), (dim, metric));
        if self.table_exists(name).await? {
            return Ok(());
        }
        debug!(collection = %name, dim, "creating vector collection");
        let iter = RecordBatchIterator::new(vec![].into_iter(), points_schema(dim));
        self.db
            .create_table(name, Box::new(iter))
            .execute()
            .await
            .map_err(index_err)?;
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f32],
        payload: &Value,
    ) -> Result<()> {
        let dim = match self.registered(collection) {
            Some((dim, _)) => dim,
            // Table created by another process: accept it, trust its schema.
            None if self.table_exists(collection).await? => vector.len(),
            None => {
                return Err(Error::IndexUnavailable(format!(
                    "unknown collection: {collection}"
                )))
            }
        };
        if vector.len() != dim {
            return Err(Error::IndexUnavailable(format!(
                "dimension mismatch for '{collection}': got {}, expected {dim}",
                vector.len()
            )));
        }
        let tbl = self
            .db
            .open_table(collection)
            .execute()
            .await
            .map_err(index_err)?;
        let schema = points_schema(dim);
        let cells: Vec<Option<Vec<Option<f32>>>> =
            vec![Some(vector.iter().copied().map(Some).collect())];
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![id.to_string()])),
                Arc::new(FixedSizeListArray::from_iter_primitive::<
                    arrow_array::types::Float32Type,
                    _,
                    _,
                >(cells.into_iter(), dim as i32)),
                Arc::new(StringArray::from(vec![payload.to_string()])),
                Arc::new(TimestampMillisecondArray::from(vec![
                    Utc::now().timestamp_millis(),
                ])),
            ],
        )
        .map_err(index_err)?;
        let reader = Box::new(RecordBatchIterator::new(
            vec![Ok(batch)].into_iter(),
            schema,
        ));
        let mut mi = tbl.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(index_err)?;
        Ok(())
    }
}
