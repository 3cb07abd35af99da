use std::sync::Arc;

use quickrag_core::traits::{EmbedProvider, VectorIndex};
use quickrag_core::types::{DocumentChunk, Origin};
use quickrag_embed::HashEmbedder;
use quickrag_vector::{LanceVectorIndex, MemoryVectorIndex};

fn corpus() -> Vec<DocumentChunk> {
    vec![
        DocumentChunk::new("hr", "a", "hr.md", "HR", "vacation policy allows 20 days", 0),
        DocumentChunk::new("sec", "b", "sec.md", "Security", "security requires MFA", 0),
        DocumentChunk::new("sec", "c", "sec.md", "Security", "rotate MFA tokens yearly", 1).with_metadata("owner", "it"),
    ]
}

async fn query(embedder: &HashEmbedder, text: &str) -> Vec<f32> {
    embedder.embed_batch(&[text.to_string()]).await.unwrap().remove(0)
}

#[tokio::test]
async fn memory_index_ranks_by_cosine_and_deletes_by_doc() {
    let embedder = Arc::new(HashEmbedder::new(128));
    let idx = MemoryVectorIndex::new(embedder.clone());
    assert!(!idx.is_ready().await);
    idx.add(&corpus()).await.unwrap();
    assert!(idx.is_ready().await);

    let hits = idx.retrieve(&query(&embedder, "vacation days").await, 2).await.unwrap();
    assert_eq!(hits[0].chunk_id, "a");
    assert_eq!(hits[0].origin, Origin::Dense);
    assert!(hits.len() <= 2);

    idx.delete(&["sec".to_string()]).await.unwrap();
    assert_eq!(idx.len().await, 1);
    idx.clear().await.unwrap();
    assert!(!idx.is_ready().await);
}

#[tokio::test]
async fn memory_index_upserts_on_chunk_id() {
    let embedder = Arc::new(HashEmbedder::new(64));
    let idx = MemoryVectorIndex::new(embedder);
    idx.add(&corpus()).await.unwrap();
    idx.add(&corpus()[..1]).await.unwrap();
    assert_eq!(idx.len().await, 3);
}

#[tokio::test]
async fn lance_index_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let embedder = Arc::new(HashEmbedder::new(96));
    let idx = LanceVectorIndex::open(dir.path().to_str().unwrap(), "chunks", embedder.clone()).await.unwrap();
    assert!(!idx.is_ready().await, "no table yet");
    assert!(idx.retrieve(&query(&embedder, "mfa").await, 3).await.unwrap().is_empty());

    idx.add(&corpus()).await.unwrap();
    assert!(idx.is_ready().await);
    let hits = idx.retrieve(&query(&embedder, "MFA tokens").await, 3).await.unwrap();
    assert_eq!(hits[0].chunk_id, "c");
    assert_eq!(hits[0].metadata["owner"], serde_json::json!("it"));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    idx.delete(&["sec".to_string()]).await.unwrap();
    let hits = idx.retrieve(&query(&embedder, "MFA tokens").await, 3).await.unwrap();
    assert!(hits.iter().all(|h| h.doc_id == "hr"));

    idx.clear().await.unwrap();
    assert!(!idx.is_ready().await);
}

#[tokio::test]
async fn lance_index_rejects_wrong_dimension() {
    let dir = tempfile::tempdir().unwrap();
    let idx = LanceVectorIndex::open(dir.path().to_str().unwrap(), "chunks", Arc::new(HashEmbedder::new(16))).await.unwrap();
    assert!(idx.retrieve(&[0.1; 8], 3).await.is_err());
}
