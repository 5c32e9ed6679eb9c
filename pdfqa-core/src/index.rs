//! In-memory vector index over passages.
//!
//! Entries are staged during a build and only become visible once every
//! passage has been embedded, so a failed build leaves the previous contents
//! in place.

use crate::chunk::Passage;
use crate::deadline::bounded;
use crate::embeddings::{Embedder, EmbedderFingerprint};
use crate::error::{QaError, Result, Stage};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// A passage together with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub embedding: Vec<f32>,
    pub passage: Passage,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredPassage {
    pub passage: Passage,
    /// Cosine similarity to the query, in `[-1, 1]`.
    pub score: f32,
}

/// Summary of a completed build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    pub passages: usize,
    pub dimensions: usize,
    pub batches: usize,
}

/// Vector index bound to the embedder that produced its vectors.
pub struct VectorIndex {
    embedder: Arc<dyn Embedder>,
    entries: Vec<IndexEntry>,
    dimensions: Option<usize>,
    batch_size: usize,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for VectorIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorIndex")
            .field("embedder", &self.embedder.fingerprint())
            .field("entries", &self.entries.len())
            .field("dimensions", &self.dimensions)
            .finish()
    }
}

impl VectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            entries: Vec::new(),
            dimensions: None,
            batch_size: 32,
            timeout: None,
        }
    }

    /// Number of passages sent to the embedder per request.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Upper bound on each embedding request during a build.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Rebuild an index from previously computed entries.
    ///
    /// Fails with `DimensionMismatch` if the entries disagree on length.
    pub fn from_entries(embedder: Arc<dyn Embedder>, entries: Vec<IndexEntry>) -> Result<Self> {
        let dimensions = check_dimensions(entries.iter().map(|e| e.embedding.len()))?;
        for entry in &entries {
            ensure_finite(&entry.embedding, Stage::Build)?;
        }
        Ok(Self {
            entries,
            dimensions,
            ..Self::new(embedder)
        })
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    pub fn fingerprint(&self) -> EmbedderFingerprint {
        self.embedder.fingerprint()
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Embedding length, or `None` before anything was committed.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Embed and store `passages`, replacing any previous contents.
    pub async fn build(&mut self, passages: Vec<Passage>) -> Result<BuildStats> {
        self.build_with_cancel(passages, &CancellationToken::new())
            .await
    }

    /// Like [`build`](Self::build), abandoning the build when `cancel` fires.
    ///
    /// On any error the index keeps its previous contents.
    pub async fn build_with_cancel(
        &mut self,
        passages: Vec<Passage>,
        cancel: &CancellationToken,
    ) -> Result<BuildStats> {
        let started = Instant::now();
        let mut staged: Vec<IndexEntry> = Vec::with_capacity(passages.len());
        let mut batches = 0;

        for batch in passages.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let vectors = bounded(
                Stage::Build,
                self.timeout,
                cancel,
                self.embedder.embed_batch(&texts),
            )
            .await
            .map_err(|e| e.at_stage(Stage::Build))?;

            if vectors.len() != batch.len() {
                return Err(QaError::EmbeddingFailed {
                    stage: Stage::Build,
                    message: format!(
                        "embedder returned {} vectors for {} passages",
                        vectors.len(),
                        batch.len()
                    ),
                });
            }
            for vector in &vectors {
                ensure_finite(vector, Stage::Build)?;
            }

            staged.extend(
                vectors
                    .into_iter()
                    .zip(batch.iter().cloned())
                    .map(|(embedding, passage)| IndexEntry { embedding, passage }),
            );
            batches += 1;
            debug!(embedded = staged.len(), total = passages.len(), "Embedded batch");
        }

        let dimensions = check_dimensions(staged.iter().map(|e| e.embedding.len()))?;
        if dimensions == Some(0) {
            return Err(QaError::EmbeddingFailed {
                stage: Stage::Build,
                message: "embedder returned empty vectors".into(),
            });
        }

        // Commit.
        self.entries = staged;
        self.dimensions = dimensions;

        let stats = BuildStats {
            passages: self.entries.len(),
            dimensions: dimensions.unwrap_or(0),
            batches,
        };
        info!(
            passages = stats.passages,
            dims = stats.dimensions,
            batches = stats.batches,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Built vector index"
        );
        Ok(stats)
    }

    /// The `k` entries most similar to `query`, best first.
    ///
    /// Equal scores keep insertion order. `k == 0` yields an empty list.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredPassage>> {
        let Some(dimensions) = self.dimensions.filter(|_| !self.entries.is_empty()) else {
            return Err(QaError::EmptyIndex);
        };
        if query.len() != dimensions {
            return Err(QaError::DimensionMismatch {
                expected: dimensions,
                actual: query.len(),
            });
        }
        ensure_finite(query, Stage::Search)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, entry)| (i, cosine_similarity(query, &entry.embedding)))
            .collect();

        // Stable sort: ties stay in insertion order.
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredPassage {
                passage: self.entries[i].passage.clone(),
                score,
            })
            .collect())
    }
}

fn ensure_finite(vector: &[f32], stage: Stage) -> Result<()> {
    match vector.iter().position(|x| !x.is_finite()) {
        Some(pos) => Err(QaError::EmbeddingFailed {
            stage,
            message: format!("embedding has a non-finite value at position {pos}"),
        }),
        None => Ok(()),
    }
}

fn check_dimensions(mut lengths: impl Iterator<Item = usize>) -> Result<Option<usize>> {
    let Some(expected) = lengths.next() else {
        return Ok(None);
    };
    match lengths.find(|&len| len != expected) {
        Some(actual) => Err(QaError::DimensionMismatch { expected, actual }),
        None => Ok(Some(expected)),
    }
}

/// Compute cosine similarity between two vectors.
///
/// Zero-length or zero-norm inputs score 0. Sums run in `f64` so large
/// finite components cannot overflow into a non-finite score.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (&x, &y) in a.iter().zip(b.iter()) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{LocalEmbedder, MockEmbedder};
    use async_trait::async_trait;

    fn passage(i: usize, text: &str) -> Passage {
        Passage {
            text: text.to_string(),
            page: 1,
            chunk_index: i,
            start_offset: 0,
            end_offset: text.chars().count(),
        }
    }

    /// Embeds "a"/"b"/anything-else onto fixed axes, or a vector of a given length.
    struct AxisEmbedder {
        ragged_after: Option<usize>,
    }

    #[async_trait]
    impl Embedder for AxisEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(match text {
                "a" => vec![1.0, 0.0, 0.0],
                "b" => vec![0.0, 1.0, 0.0],
                "ab" => vec![1.0, 1.0, 0.0],
                "inf" => vec![f32::INFINITY, 1.0, 0.0],
                _ => vec![0.0, 0.0, 1.0],
            })
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let mut out = Vec::new();
            for (i, t) in texts.iter().enumerate() {
                let mut v = self.embed(t).await?;
                if self.ragged_after.is_some_and(|n| i >= n) {
                    v.push(0.0);
                }
                out.push(v);
            }
            Ok(out)
        }

        fn dimensions(&self) -> usize {
            3
        }
        fn provider_name(&self) -> &str {
            "axis"
        }
        fn model_name(&self) -> &str {
            "axis"
        }
    }

    fn axis() -> Arc<dyn Embedder> {
        Arc::new(AxisEmbedder { ragged_after: None })
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-5);
    }

    #[test]
    fn test_cosine_similarity_zero_norm() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_search_before_build_is_empty_index() {
        let index = VectorIndex::new(axis());
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 3),
            Err(QaError::EmptyIndex)
        ));
    }

    #[tokio::test]
    async fn test_build_with_no_passages_stays_empty() {
        let mut index = VectorIndex::new(axis());
        let stats = index.build(Vec::new()).await.unwrap();
        assert_eq!(stats.passages, 0);
        assert!(index.is_empty());
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(QaError::EmptyIndex)
        ));
    }

    #[tokio::test]
    async fn test_search_orders_by_score_then_insertion() {
        let mut index = VectorIndex::new(axis());
        index
            .build(vec![
                passage(0, "z"),
                passage(1, "b"),
                passage(2, "a"),
                passage(3, "ab"),
                passage(4, "a"),
            ])
            .await
            .unwrap();

        let hits = index.search(&[1.0, 0.0, 0.0], 3).unwrap();
        let order: Vec<usize> = hits.iter().map(|h| h.passage.chunk_index).collect();
        assert_eq!(order, vec![2, 4, 3]);
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[tokio::test]
    async fn test_search_returns_all_when_fewer_than_k() {
        let mut index = VectorIndex::new(axis());
        index
            .build(vec![passage(0, "a"), passage(1, "b")])
            .await
            .unwrap();
        assert_eq!(index.search(&[0.0, 1.0, 0.0], 10).unwrap().len(), 2);
        assert!(index.search(&[0.0, 1.0, 0.0], 0).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_search_dimension_mismatch() {
        let mut index = VectorIndex::new(axis());
        index.build(vec![passage(0, "a")]).await.unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0], 1),
            Err(QaError::DimensionMismatch {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[tokio::test]
    async fn test_build_rejects_non_finite_embeddings() {
        let mut index = VectorIndex::new(axis());
        index.build(vec![passage(0, "a")]).await.unwrap();

        let result = index
            .build(vec![passage(0, "b"), passage(1, "inf")])
            .await;
        assert!(matches!(
            result,
            Err(QaError::EmbeddingFailed {
                stage: Stage::Build,
                ..
            })
        ));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_from_entries_rejects_non_finite_embeddings() {
        let entries = vec![IndexEntry {
            embedding: vec![f32::NAN, 0.0, 0.0],
            passage: passage(0, "a"),
        }];
        assert!(matches!(
            VectorIndex::from_entries(axis(), entries),
            Err(QaError::EmbeddingFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_search_rejects_non_finite_query() {
        let mut index = VectorIndex::new(axis());
        index.build(vec![passage(0, "a")]).await.unwrap();
        assert!(matches!(
            index.search(&[f32::INFINITY, 0.0, 0.0], 1),
            Err(QaError::EmbeddingFailed {
                stage: Stage::Search,
                ..
            })
        ));
    }

    #[test]
    fn test_search_with_huge_components_ranks_without_panicking() {
        let entries: Vec<IndexEntry> = (0..64)
            .map(|i| IndexEntry {
                embedding: if i % 3 == 0 {
                    vec![f32::MAX, 1.0]
                } else {
                    vec![0.0, 1.0]
                },
                passage: passage(i, "x"),
            })
            .collect();
        let index = VectorIndex::from_entries(axis(), entries).unwrap();

        let hits = index.search(&[1.0, 0.5], 5).unwrap();
        assert_eq!(hits.len(), 5);
        assert!(hits.iter().all(|h| h.score.is_finite()));
        assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
        let order: Vec<usize> = hits.iter().map(|h| h.passage.chunk_index).collect();
        assert_eq!(order, vec![0, 3, 6, 9, 12]);
    }

    #[tokio::test]
    async fn test_build_rejects_ragged_embeddings() {
        let mut index = VectorIndex::new(Arc::new(AxisEmbedder {
            ragged_after: Some(1),
        }));
        let result = index.build(vec![passage(0, "a"), passage(1, "b")]).await;
        assert!(matches!(result, Err(QaError::DimensionMismatch { .. })));
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_failed_build_keeps_previous_contents() {
        let mock = Arc::new(MockEmbedder::new(64).failing_after(3));
        let mut index = VectorIndex::new(mock.clone()).with_batch_size(2);

        index
            .build(vec![passage(0, "first"), passage(1, "second")])
            .await
            .unwrap();
        assert_eq!(index.len(), 2);

        let err = index
            .build(vec![passage(0, "x"), passage(1, "y"), passage(2, "z")])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QaError::EmbeddingUnavailable {
                stage: Stage::Build,
                ..
            }
        ));
        let kept: Vec<&str> = index
            .entries()
            .iter()
            .map(|e| e.passage.text.as_str())
            .collect();
        assert_eq!(kept, vec!["first", "second"]);
    }

    #[tokio::test]
    async fn test_build_batches_requests() {
        let mock = Arc::new(MockEmbedder::new(32));
        let mut index = VectorIndex::new(mock.clone()).with_batch_size(2);
        let passages = (0..5).map(|i| passage(i, "text")).collect();
        let stats = index.build(passages).await.unwrap();
        assert_eq!(stats.batches, 3);
        assert_eq!(mock.call_count(), 3);
        assert_eq!(stats.dimensions, 32);
    }

    #[tokio::test]
    async fn test_build_cancelled_leaves_index_empty() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut index = VectorIndex::new(Arc::new(LocalEmbedder::new(16)));
        let err = index
            .build_with_cancel(vec![passage(0, "a")], &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            QaError::Cancelled {
                stage: Stage::Build
            }
        ));
        assert!(index.is_empty());
    }

    #[test]
    fn test_from_entries_checks_dimensions() {
        let entries = vec![
            IndexEntry {
                embedding: vec![1.0, 0.0],
                passage: passage(0, "a"),
            },
            IndexEntry {
                embedding: vec![1.0],
                passage: passage(1, "b"),
            },
        ];
        assert!(matches!(
            VectorIndex::from_entries(axis(), entries),
            Err(QaError::DimensionMismatch { .. })
        ));
    }
}
