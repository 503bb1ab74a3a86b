//! LanceDB-backed document store.
//!
//! Each collection is one table with rows `{id, doc, updated_at}` where
//! `doc` holds the JSON document. Upserts go through `merge_insert` on
//! `id`, so one record batch commits as a single table transaction; the
//! batch API groups its writes per collection and commits each group in
//! one such transaction.

use std::sync::Arc;

use arrow_array::{RecordBatch, RecordBatchIterator, StringArray, TimestampMillisecondArray};
use arrow_schema::{DataType, Field, Schema, TimeUnit};
use async_trait::async_trait;
use chrono::Utc;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{connect, Connection};
use tracing::debug;

use profiledb_core::error::{Error, Result};
use profiledb_core::traits::{DocumentBatch, DocumentStore};
use profiledb_core::types::{merge_fields, Fields};

fn doc_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("doc", DataType::Utf8, false),
        Field::new(
            "updated_at",
            DataType::Timestamp(TimeUnit::Millisecond, None),
            false,
        ),
    ]))
}

fn store_err<E: std::fmt::Display>(e: E) -> Error {
    Error::StoreUnavailable(e.to_string())
}

fn escape(id: &str) -> String {
    id.replace('\'', "''")
}

pub struct LanceDocumentStore {
    db: Connection,
}

impl LanceDocumentStore {
    pub async fn open(uri: &str) -> Result<Self> {
        let db = connect(uri).execute().await.map_err(store_err)?;
        Ok(Self { db })
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self.db.table_names().execute().await.map_err(store_err)?;
        Ok(names.contains(&name.to_string()))
    }

    async fn ensure_table(&self, name: &str) -> Result<()> {
        if self.table_exists(name).await? {
            return Ok(());
        }
        let iter = RecordBatchIterator::new(vec![].into_iter(), doc_schema());
        self.db
            .create_table(name, Box::new(iter))
            .execute()
            .await
            .map_err(store_err)?;
        Ok(())
    }

    /// Upsert a set of fully merged documents into one collection as a
    /// single merge_insert.
    async fn merge_rows(&self, collection: &str, rows: &[(String, Fields)]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.ensure_table(collection).await?;
        let tbl = self
            .db
            .open_table(collection)
            .execute()
            .await
            .map_err(store_err)?;
        let now = Utc::now().timestamp_millis();
        let mut ids = Vec::with_capacity(rows.len());
        let mut docs = Vec::with_capacity(rows.len());
        let mut stamps = Vec::with_capacity(rows.len());
        for (id, fields) in rows {
            ids.push(id.clone());
            docs.push(serde_json::Value::Object(fields.clone()).to_string());
            stamps.push(now);
        }
        let batch = RecordBatch::try_new(
            doc_schema(),
            vec![
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(docs)),
                Arc::new(TimestampMillisecondArray::from(stamps)),
            ],
        )
        .map_err(store_err)?;
        let reader = Box::new(RecordBatchIterator::new(
            vec![Ok(batch)].into_iter(),
            doc_schema(),
        ));
        let mut mi = tbl.merge_insert(&["id"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(store_err)?;
        Ok(())
    }

    fn decode(raw: &str) -> Result<Fields> {
        match serde_json::from_str::<serde_json::Value>(raw) {
            Ok(serde_json::Value::Object(map)) => Ok(map),
            _ => Err(Error::StoreUnavailable(
                "corrupt document payload".to_string(),
            )),
        }
    }
}

#[async_trait]
impl DocumentStore for LanceDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Fields>> {
        if !self.table_exists(collection).await? {
            return Ok(None);
        }
        let tbl = self
            .db
            .open_table(collection)
            .execute()
            .await
            .map_err(store_err)?;
        let mut stream = tbl
            .query()
            .only_if(format!("id = '{}'", escape(id)))
            .execute()
            .await
            .map_err(store_err)?;
        while let Some(batch) = stream.try_next().await.map_err(store_err)? {
            if batch.num_rows() == 0 {
                continue;
            }
            let docs = batch
                .column_by_name("doc")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::StoreUnavailable("doc column missing".to_string()))?;
            return Self::decode(docs.value(0)).map(Some);
        }
        Ok(None)
    }

    async fn set_merge(&self, collection: &str, id: &str, fields: Fields) -> Result<()> {
        let mut doc = self.get(collection, id).await?.unwrap_or_default();
        merge_fields(&mut doc, &fields);
        self.merge_rows(collection, &[(id.to_string(), doc)]).await
    }

    async fn commit_batch(&self, batch: DocumentBatch) -> Result<()> {
        // Merge each coalesced write into the current document state, then
        // commit one merge_insert per collection group.
        let mut groups: Vec<(String, Vec<(String, Fields)>)> = Vec::new();
        for write in batch.coalesced() {
            let mut doc = self.get(&write.collection, &write.id).await?.unwrap_or_default();
            merge_fields(&mut doc, &write.fields);
            match groups.iter_mut().find(|(c, _)| *c == write.collection) {
                Some((_, rows)) => rows.push((write.id, doc)),
                None => groups.push((write.collection, vec![(write.id, doc)])),
            }
        }
        for (collection, rows) in groups {
            debug!(collection = %collection, rows = rows.len(), "committing document batch");
            self.merge_rows(&collection, &rows).await?;
        }
        Ok(())
    }

    async fn scan(&self, collection: &str) -> Result<Vec<(String, Fields)>> {
        if !self.table_exists(collection).await? {
            return Ok(Vec::new());
        }
        let tbl = self
            .db
            .open_table(collection)
            .execute()
            .await
            .map_err(store_err)?;
        let mut stream = tbl.query().execute().await.map_err(store_err)?;
        let mut out = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(store_err)? {
            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::StoreUnavailable("id column missing".to_string()))?;
            let docs = batch
                .column_by_name("doc")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| Error::StoreUnavailable("doc column missing".to_string()))?;
            for i in 0..batch.num_rows() {
                out.push((ids.value(i).to_string(), Self::decode(docs.value(i))?));
            }
        }
        Ok(out)
    }
}
