//! LanceDB-backed shared tier: one table keyed by `(namespace, key)`,
//! upserted with `merge_insert`, expired rows removed with a delete predicate.
use arrow_array::{Array, BinaryArray, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, Table};
use std::collections::HashMap;
use std::sync::Arc;

use quickrag_core::{Error, Result};

use crate::lance_utils::{ensure_table, in_list, open_db, quote};
use crate::namespace::Namespace;
use crate::remote::{RemoteStore, StoredValue};

pub const DEFAULT_CACHE_TABLE: &str = "cache_entries";

pub fn build_cache_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("namespace", DataType::Utf8, false),
        Field::new("key", DataType::Utf8, false),
        Field::new("value", DataType::Binary, false),
        Field::new("expires_at", DataType::Int64, false),
    ]))
}

pub struct LanceStore {
    conn: Connection,
    table: String,
}

impl LanceStore {
    pub async fn open(uri: &str, table: &str) -> Result<Self> {
        let conn = open_db(uri).await?;
        ensure_table(&conn, table, build_cache_schema()).await?;
        Ok(Self { conn, table: table.to_string() })
    }

    async fn open_table(&self) -> Result<Table> {
        self.conn.open_table(&self.table).execute().await.map_err(Error::backend)
    }

    async fn select(&self, predicate: String) -> Result<HashMap<String, StoredValue>> {
        let t = self.open_table().await?;
        let mut stream = t.query().only_if(predicate).execute().await.map_err(Error::backend)?;
        let mut out = HashMap::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::backend)? {
            let keys = column::<StringArray>(&batch, "key")?;
            let values = column::<BinaryArray>(&batch, "value")?;
            let expiry = column::<Int64Array>(&batch, "expires_at")?;
            for i in 0..batch.num_rows() {
                out.insert(
                    keys.value(i).to_string(),
                    StoredValue { value: values.value(i).to_vec(), expires_at_ms: expiry.value(i) },
                );
            }
        }
        Ok(out)
    }

    async fn upsert(&self, ns: Namespace, entries: &[(String, Vec<u8>)], expires_at_ms: i64) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let schema = build_cache_schema();
        let rb = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec![ns.as_str(); entries.len()])),
                Arc::new(StringArray::from_iter_values(entries.iter().map(|(k, _)| k.as_str()))),
                Arc::new(BinaryArray::from_iter_values(entries.iter().map(|(_, v)| v.as_slice()))),
                Arc::new(Int64Array::from(vec![expires_at_ms; entries.len()])),
            ],
        )
        .map_err(Error::backend)?;
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(rb)].into_iter(), schema));
        let t = self.open_table().await?;
        let mut mi = t.merge_insert(&["namespace", "key"]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader).await.map_err(Error::backend)?;
        Ok(())
    }
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Backend(format!("cache.{name} column missing")))
}

#[async_trait]
impl RemoteStore for LanceStore {
    async fn get(&self, ns: Namespace, key: &str) -> Result<Option<StoredValue>> {
        let pred = format!("namespace = {} AND key = {}", quote(ns.as_str()), quote(key));
        Ok(self.select(pred).await?.remove(key))
    }

    async fn get_many(&self, ns: Namespace, keys: &[String]) -> Result<HashMap<String, StoredValue>> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        self.select(format!("namespace = {} AND {}", quote(ns.as_str()), in_list("key", keys))).await
    }

    async fn set(&self, ns: Namespace, key: &str, value: &[u8], expires_at_ms: i64) -> Result<()> {
        self.upsert(ns, &[(key.to_string(), value.to_vec())], expires_at_ms).await
    }

    async fn set_many(&self, ns: Namespace, entries: &[(String, Vec<u8>)], expires_at_ms: i64) -> Result<()> {
        self.upsert(ns, entries, expires_at_ms).await
    }

    async fn purge_expired(&self, ns: Namespace, now_ms: i64) -> Result<usize> {
        let t = self.open_table().await?;
        let pred = format!("namespace = {} AND expires_at <= {now_ms}", quote(ns.as_str()));
        let doomed = t.count_rows(Some(pred.clone())).await.map_err(Error::backend)?;
        if doomed > 0 {
            t.delete(&pred).await.map_err(Error::backend)?;
        }
        Ok(doomed)
    }

    async fn ping(&self) -> Result<()> {
        self.conn.table_names().execute().await.map_err(Error::backend)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upsert_replaces_value_for_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::open(dir.path().to_str().unwrap(), DEFAULT_CACHE_TABLE).await.unwrap();
        store.set(Namespace::Answers, "q1", b"first", 1_000).await.unwrap();
        store.set(Namespace::Answers, "q1", b"second", 2_000).await.unwrap();
        let got = store.get(Namespace::Answers, "q1").await.unwrap().unwrap();
        assert_eq!(got.value, b"second");
        assert_eq!(got.expires_at_ms, 2_000);
        assert!(store.get(Namespace::Retrieval, "q1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn purge_removes_rows_past_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let store = LanceStore::open(dir.path().to_str().unwrap(), DEFAULT_CACHE_TABLE).await.unwrap();
        store
            .set_many(Namespace::Embeddings, &[("a".into(), vec![1]), ("b".into(), vec![2])], 100)
            .await
            .unwrap();
        store.set(Namespace::Embeddings, "c", &[3], 10_000).await.unwrap();
        assert_eq!(store.purge_expired(Namespace::Retrieval, 500).await.unwrap(), 0);
        assert_eq!(store.purge_expired(Namespace::Embeddings, 500).await.unwrap(), 2);
        let left = store.get_many(Namespace::Embeddings, &["a".into(), "b".into(), "c".into()]).await.unwrap();
        assert_eq!(left.keys().collect::<Vec<_>>(), vec!["c"]);
        store.ping().await.unwrap();
    }
}
