//! Similarity-search collaborator.
//!
//! Only agents that ask for retrieval touch this; the executor never does.

use async_trait::async_trait;
use augur_shared::{AugurError, Result};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

/// One ranked hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityMatch {
    pub id: String,
    pub text: String,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

/// Embedding vector in, ranked matches out.
#[async_trait]
pub trait SimilaritySearch: Send + Sync {
    /// Matches scoring at least `threshold`, best first, at most `limit`.
    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityMatch>>;
}

/// Text in, embedding vector out.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimensions(&self) -> usize;
}

/// Feature-hashing embedder: stable across runs and platforms, no model needed.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.to_lowercase().as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let slot = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        normalize(&mut vector);
        vector
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let nb = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

#[derive(Debug, Clone)]
struct Document {
    id: String,
    text: String,
    embedding: Vec<f32>,
}

/// Brute-force cosine index held in memory.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    documents: RwLock<Vec<Document>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a document by id.
    pub async fn insert(
        &self,
        id: impl Into<String>,
        text: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Result<()> {
        let id = id.into();
        let mut documents = self.documents.write().await;
        if let Some(first) = documents.first() {
            if first.embedding.len() != embedding.len() {
                return Err(AugurError::config(format!(
                    "embedding for '{id}' has {} dimensions, index uses {}",
                    embedding.len(),
                    first.embedding.len()
                )));
            }
        }
        documents.retain(|d| d.id != id);
        documents.push(Document {
            id,
            text: text.into(),
            embedding,
        });
        Ok(())
    }

    /// Embed `text` with `embedder` and insert it.
    pub async fn insert_text(
        &self,
        embedder: &dyn Embedder,
        id: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<()> {
        let text = text.into();
        let embedding = embedder.embed(&text).await?;
        self.insert(id, text, embedding).await
    }

    pub async fn len(&self) -> usize {
        self.documents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.documents.read().await.is_empty()
    }
}

#[async_trait]
impl SimilaritySearch for InMemoryIndex {
    async fn search(
        &self,
        embedding: &[f32],
        limit: usize,
        threshold: f32,
    ) -> Result<Vec<SimilarityMatch>> {
        let documents = self.documents.read().await;
        let mut matches: Vec<SimilarityMatch> = documents
            .iter()
            .filter(|d| d.embedding.len() == embedding.len())
            .map(|d| SimilarityMatch {
                id: d.id.clone(),
                text: d.text.clone(),
                score: cosine(&d.embedding, embedding),
            })
            .filter(|m| m.score >= threshold)
            .collect();

        matches.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        matches.truncate(limit);
        Ok(matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Rest and recovery").await.unwrap();
        let b = embedder.embed("rest AND recovery").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.embed("  ...  ").await.unwrap();
        assert!(v.iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn search_ranks_by_similarity() {
        let embedder = HashingEmbedder::new(4096);
        let index = InMemoryIndex::new();
        index
            .insert_text(&embedder, "sleep", "sleep quality and rest")
            .await
            .unwrap();
        index
            .insert_text(&embedder, "work", "career ambition and work")
            .await
            .unwrap();
        index
            .insert_text(&embedder, "mixed", "rest after work")
            .await
            .unwrap();

        let query = embedder.embed("rest").await.unwrap();
        let hits = index.search(&query, 5, 0.1).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert!(ids.contains(&"sleep"));
        assert!(ids.contains(&"mixed"));
        assert!(!ids.contains(&"work"));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn search_respects_limit() {
        let embedder = HashingEmbedder::new(32);
        let index = InMemoryIndex::new();
        for i in 0..5 {
            index
                .insert_text(&embedder, format!("doc{i}"), "same words here")
                .await
                .unwrap();
        }
        let query = embedder.embed("same words here").await.unwrap();
        let hits = index.search(&query, 2, 0.0).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "doc0");
    }

    #[tokio::test]
    async fn insert_replaces_and_checks_dimensions() {
        let index = InMemoryIndex::new();
        index.insert("a", "one", vec![1.0, 0.0]).await.unwrap();
        index.insert("a", "two", vec![0.0, 1.0]).await.unwrap();
        assert_eq!(index.len().await, 1);
        assert!(index.insert("b", "bad", vec![1.0]).await.is_err());
    }
}
