//! Property-based tests for chunking and search using proptest.

use proptest::prelude::*;

use pdfqa_core::{
    ChunkingConfig, Document, IndexEntry, LocalEmbedder, Passage, QaError, VectorIndex,
    chunk_document, chunk_text, cosine_similarity,
};
use std::sync::Arc;

fn index_of(vectors: Vec<Vec<f32>>) -> VectorIndex {
    let dims = vectors.first().map_or(1, Vec::len);
    let entries = vectors
        .into_iter()
        .enumerate()
        .map(|(i, embedding)| IndexEntry {
            embedding,
            passage: Passage {
                text: format!("passage {i}"),
                page: 1,
                chunk_index: i,
                start_offset: 0,
                end_offset: 0,
            },
        })
        .collect();
    VectorIndex::from_entries(Arc::new(LocalEmbedder::new(dims)), entries).unwrap()
}

/// Small integer components so equal scores are common.
fn coarse_vectors() -> impl Strategy<Value = (Vec<Vec<f32>>, Vec<f32>)> {
    (1usize..5).prop_flat_map(|dims| {
        let component = (-2i8..=2).prop_map(f32::from);
        (
            prop::collection::vec(prop::collection::vec(component.clone(), dims), 1..30),
            prop::collection::vec(component, dims),
        )
    })
}

fn reassemble(texts: &[&str], overlap: usize) -> String {
    let mut out = String::new();
    for (i, text) in texts.iter().enumerate() {
        if i == 0 {
            out.push_str(text);
        } else {
            out.extend(text.chars().skip(overlap));
        }
    }
    out
}

proptest! {
    #[test]
    fn chunks_reconstruct_page_text(
        text in "\\PC{1,400}",
        size in 1usize..80,
        overlap_frac in 0.0f64..1.0,
    ) {
        let overlap = ((size as f64) * overlap_frac) as usize;
        prop_assume!(overlap < size);
        let passages = chunk_text(&text, &ChunkingConfig::new(size, overlap)).unwrap();
        if text.trim().is_empty() {
            prop_assert!(passages.is_empty());
        } else {
            let texts: Vec<&str> = passages.iter().map(|p| p.text.as_str()).collect();
            prop_assert_eq!(reassemble(&texts, overlap), text);
        }
    }

    #[test]
    fn chunks_never_exceed_size(
        text in "[a-z ]{0,300}",
        size in 1usize..50,
        overlap in 0usize..50,
    ) {
        prop_assume!(overlap < size);
        let passages = chunk_text(&text, &ChunkingConfig::new(size, overlap)).unwrap();
        for p in &passages {
            prop_assert!(p.text.chars().count() <= size);
            prop_assert!(!p.text.is_empty());
        }
    }

    #[test]
    fn consecutive_chunks_share_exact_overlap(
        text in "[a-zA-Z0-9.,]{1,300}",
        size in 2usize..60,
        overlap in 0usize..60,
    ) {
        prop_assume!(overlap < size);
        let passages = chunk_text(&text, &ChunkingConfig::new(size, overlap)).unwrap();
        for pair in passages.windows(2) {
            let prev: Vec<char> = pair[0].text.chars().collect();
            let next: Vec<char> = pair[1].text.chars().collect();
            prop_assert_eq!(&prev[prev.len() - overlap..], &next[..overlap]);
        }
    }

    #[test]
    fn overlap_at_or_above_size_is_rejected(
        size in 0usize..100,
        extra in 0usize..100,
    ) {
        let result = chunk_text("some text", &ChunkingConfig::new(size, size + extra));
        let rejected = matches!(result, Err(QaError::InvalidConfiguration { .. }));
        prop_assert!(rejected);
    }

    #[test]
    fn chunk_indices_are_global_and_pages_ascend(
        pages in prop::collection::vec("[a-z]{0,60}", 1..5),
        size in 2usize..20,
    ) {
        let doc = Document::from_pages("generated", pages);
        let passages = chunk_document(&doc, &ChunkingConfig::new(size, 1)).unwrap();
        for (i, p) in passages.iter().enumerate() {
            prop_assert_eq!(p.chunk_index, i);
            prop_assert!(p.page >= 1 && p.page <= doc.page_count());
        }
        prop_assert!(passages.windows(2).all(|w| w[0].page <= w[1].page));
    }

    #[test]
    fn cosine_similarity_is_bounded(
        a in prop::collection::vec(-10.0f32..10.0, 8),
        b in prop::collection::vec(-10.0f32..10.0, 8),
    ) {
        let sim = cosine_similarity(&a, &b);
        prop_assert!((-1.0001..=1.0001).contains(&sim));
    }

    #[test]
    fn search_ranks_top_k_with_ties_in_insertion_order(
        (vectors, query) in coarse_vectors(),
        k in 0usize..40,
    ) {
        let n = vectors.len();
        let index = index_of(vectors);
        let hits = index.search(&query, k).unwrap();

        prop_assert_eq!(hits.len(), k.min(n));
        for pair in hits.windows(2) {
            prop_assert!(pair[0].score >= pair[1].score);
            if pair[0].score == pair[1].score {
                prop_assert!(pair[0].passage.chunk_index < pair[1].passage.chunk_index);
            }
        }

        // Nothing left out scores higher than the weakest hit.
        if let Some(weakest) = hits.last() {
            let returned: Vec<usize> = hits.iter().map(|h| h.passage.chunk_index).collect();
            for entry in index.entries() {
                if !returned.contains(&entry.passage.chunk_index) {
                    let score = cosine_similarity(&query, &entry.embedding);
                    prop_assert!(score <= weakest.score);
                    if score == weakest.score {
                        prop_assert!(entry.passage.chunk_index > weakest.passage.chunk_index);
                    }
                }
            }
        }
    }

    #[test]
    fn search_scores_stay_finite_for_extreme_components(
        vectors in prop::collection::vec(
            prop::collection::vec(prop::num::f32::NORMAL | prop::num::f32::ZERO, 3),
            1..20,
        ),
        query in prop::collection::vec(prop::num::f32::NORMAL, 3),
    ) {
        let index = index_of(vectors);
        let hits = index.search(&query, 5).unwrap();
        prop_assert!(hits.iter().all(|h| h.score.is_finite()));
        prop_assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));
    }
}
