use arrow_array::{Array, FixedSizeListArray, Float32Array, Int32Array, RecordBatch, RecordBatchIterator, StringArray};
use async_trait::async_trait;
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase};
use lancedb::{Connection, DistanceType, Table};
use std::sync::Arc;
use tracing::{debug, info};

use quickrag_cache::lance_utils::{in_list, open_db, table_exists};
use quickrag_core::config::VectorSettings;
use quickrag_core::traits::{EmbedProvider, VectorIndex};
use quickrag_core::types::{DocumentChunk, Meta, Origin, RetrievalResult};
use quickrag_core::{Error, Result};

use crate::schema::build_chunks_schema;

const EMBED_BATCH: usize = 64;

/// Dense index stored in a LanceDB table. Chunks are embedded on `add`
/// and upserted on `chunk_id`; queries run a cosine vector search.
pub struct LanceVectorIndex {
    conn: Connection,
    table_name: String,
    dim: usize,
    embedder: Arc<dyn EmbedProvider>,
}

impl LanceVectorIndex {
    pub async fn open(uri: &str, table_name: &str, embedder: Arc<dyn EmbedProvider>) -> Result<Self> {
        let conn = open_db(uri).await?;
        let dim = embedder.dim();
        info!(uri, table = table_name, dim, embedder = embedder.embedder_id(), "opened vector index");
        Ok(Self { conn, table_name: table_name.to_string(), dim, embedder })
    }

    pub async fn from_settings(settings: &VectorSettings, embedder: Arc<dyn EmbedProvider>) -> Result<Option<Self>> {
        match &settings.uri {
            Some(uri) => {
                let uri = quickrag_core::config::expand_path(uri);
                Ok(Some(Self::open(&uri.to_string_lossy(), &settings.table, embedder).await?))
            }
            None => Ok(None),
        }
    }

    async fn table(&self) -> Result<Option<Table>> {
        if !table_exists(&self.conn, &self.table_name).await? {
            return Ok(None);
        }
        let t = self.conn.open_table(&self.table_name).execute().await.map_err(Error::backend)?;
        Ok(Some(t))
    }

    fn to_record_batch(&self, chunks: &[&DocumentChunk], vectors: Vec<Vec<f32>>) -> Result<RecordBatch> {
        let schema = build_chunks_schema(self.dim as i32);
        let metadata: Vec<String> = chunks.iter().map(|c| serde_json::to_string(&c.metadata)).collect::<std::result::Result<_, _>>()?;
        let vectors: Vec<Option<Vec<Option<f32>>>> = vectors.into_iter().map(|v| Some(v.into_iter().map(Some).collect())).collect();
        RecordBatch::try_new(
            schema,
            vec![
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.chunk_id.as_str()))),
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.doc_id.as_str()))),
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.source.as_str()))),
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.title.as_str()))),
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.content.as_str()))),
                Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.content_hash.as_str()))),
                Arc::new(Int32Array::from_iter_values(chunks.iter().map(|c| c.chunk_index as i32))),
                Arc::new(StringArray::from(metadata)),
                Arc::new(FixedSizeListArray::from_iter_primitive::<arrow_array::types::Float32Type, _, _>(
                    vectors.into_iter(),
                    self.dim as i32,
                )),
            ],
        )
        .map_err(Error::backend)
    }

    async fn upsert(&self, batch: RecordBatch) -> Result<()> {
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        match self.table().await? {
            Some(t) => {
                let mut mi = t.merge_insert(&["chunk_id"]);
                mi.when_matched_update_all(None).when_not_matched_insert_all();
                mi.execute(reader).await.map_err(Error::backend)?;
            }
            None => {
                self.conn.create_table(&self.table_name, reader).execute().await.map_err(Error::backend)?;
            }
        }
        Ok(())
    }
}

fn string_col<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<StringArray>())
        .ok_or_else(|| Error::Backend(format!("chunks.{name} column missing")))
}

fn rows_to_results(batch: &RecordBatch, out: &mut Vec<RetrievalResult>) -> Result<()> {
    let chunk_id = string_col(batch, "chunk_id")?;
    let doc_id = string_col(batch, "doc_id")?;
    let source = string_col(batch, "source")?;
    let title = string_col(batch, "title")?;
    let content = string_col(batch, "content")?;
    let content_hash = string_col(batch, "content_hash")?;
    let metadata = string_col(batch, "metadata")?;
    let chunk_index = batch.column_by_name("chunk_index").and_then(|c| c.as_any().downcast_ref::<Int32Array>());
    let distance = batch.column_by_name("_distance").and_then(|c| c.as_any().downcast_ref::<Float32Array>());
    for i in 0..batch.num_rows() {
        let mut meta: Meta = serde_json::from_str(metadata.value(i)).unwrap_or_default();
        if let Some(ci) = chunk_index {
            meta.insert("chunk_index".into(), ci.value(i).into());
        }
        meta.insert("content_hash".into(), content_hash.value(i).into());
        // Cosine distance is 1 - similarity.
        let score = distance.map_or(0.0, |d| 1.0 - d.value(i));
        out.push(RetrievalResult {
            doc_id: doc_id.value(i).to_string(),
            chunk_id: chunk_id.value(i).to_string(),
            source: source.value(i).to_string(),
            title: title.value(i).to_string(),
            content: content.value(i).to_string(),
            score,
            origin: Origin::Dense,
            metadata: meta,
        });
    }
    Ok(())
}

#[async_trait]
impl VectorIndex for LanceVectorIndex {
    async fn retrieve(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        if query_embedding.len() != self.dim {
            return Err(Error::InvalidConfig(format!("query vector has {} dims, index has {}", query_embedding.len(), self.dim)));
        }
        let Some(t) = self.table().await? else { return Ok(Vec::new()) };
        let mut stream = t
            .vector_search(query_embedding.to_vec())
            .map_err(Error::backend)?
            .distance_type(DistanceType::Cosine)
            .limit(top_k)
            .execute()
            .await
            .map_err(Error::backend)?;
        let mut out = Vec::with_capacity(top_k);
        while let Some(batch) = stream.try_next().await.map_err(Error::backend)? {
            rows_to_results(&batch, &mut out)?;
        }
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        out.truncate(top_k);
        Ok(out)
    }

    async fn add(&self, chunks: &[DocumentChunk]) -> Result<()> {
        for group in chunks.chunks(EMBED_BATCH) {
            let texts: Vec<String> = group.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await?;
            if vectors.len() != group.len() || vectors.iter().any(|v| v.len() != self.dim) {
                return Err(Error::Backend(format!("embedder returned malformed vectors for {} chunks", group.len())));
            }
            let refs: Vec<&DocumentChunk> = group.iter().collect();
            let batch = self.to_record_batch(&refs, vectors)?;
            self.upsert(batch).await?;
            debug!(rows = group.len(), table = %self.table_name, "vector batch upserted");
        }
        Ok(())
    }

    async fn delete(&self, doc_ids: &[String]) -> Result<()> {
        if doc_ids.is_empty() {
            return Ok(());
        }
        if let Some(t) = self.table().await? {
            t.delete(&in_list("doc_id", doc_ids)).await.map_err(Error::backend)?;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        if let Some(t) = self.table().await? {
            t.delete("true").await.map_err(Error::backend)?;
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        match self.table().await {
            Ok(Some(t)) => t.count_rows(None).await.map(|n| n > 0).unwrap_or(false),
            _ => false,
        }
    }
}
