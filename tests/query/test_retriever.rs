// Copyright (c) 2025 Fabstir
// SPDX-License-Identifier: BUSL-1.1
//! Retriever behavior: threshold floor, diversity cap, retry, stability

use std::collections::HashMap;
use std::sync::Arc;

use castquery::retriever::diversity_rerank;
use castquery::{
    derive_passage_id, ChunkStore, EngineConfig, QueryError, RetrievalStage, Retriever,
    RetrieveOptions, ScoredPassage,
};

use super::common::{make_passage, FixedEmbedding, FlakyEmbedding, ScriptedIndex};

fn corpus() -> Vec<castquery::Passage> {
    vec![
        make_passage("ep001", 0, "Kunal Shah", "Kunal on credit and trust in fintech."),
        make_passage("ep001", 1, "Kunal Shah", "Kunal on founder psychology."),
        make_passage("ep001", 2, "Kunal Shah", "Kunal on Indian consumer behavior."),
        make_passage("ep002", 0, "Nithin Kamath", "Nithin on bootstrapping Zerodha."),
        make_passage("ep002", 1, "Nithin Kamath", "Nithin on retail investing."),
        make_passage("ep003", 0, "Deepinder Goyal", "Deepinder on food delivery economics."),
        make_passage("ep004", 0, "Falguni Nayar", "Falguni on building Nykaa late in life."),
        make_passage("ep005", 0, "Sriharsha Majety", "Sriharsha on quick commerce bets."),
    ]
}

fn retriever_over(
    passages: Vec<castquery::Passage>,
    hits: Vec<(String, f32)>,
) -> Retriever {
    let chunks = Arc::new(ChunkStore::from_passages(passages).unwrap());
    Retriever::new(
        Arc::new(FixedEmbedding { dimension: 384 }),
        Arc::new(ScriptedIndex::new(hits)),
        chunks,
        EngineConfig::default().retrieval,
    )
}

#[tokio::test]
async fn threshold_drops_low_scoring_hits() {
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.85),
        (derive_passage_id("ep002", 0), 0.71),
        (derive_passage_id("ep003", 0), 0.69),
        (derive_passage_id("ep002", 1), 0.30),
    ];
    let retriever = retriever_over(corpus(), hits);

    let result = retriever
        .retrieve("what does Kunal say about credit?", &RetrieveOptions::default())
        .await
        .unwrap();

    assert_eq!(result.len(), 2);
    for scored in &result.passages {
        assert!(scored.relevance_score >= 0.7);
    }
    assert_eq!(result.passages[0].passage.passage_id, derive_passage_id("ep001", 0));
}

#[tokio::test]
async fn zero_hits_above_threshold_is_empty_not_error() {
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.42),
        (derive_passage_id("ep002", 0), 0.10),
    ];
    let retriever = retriever_over(corpus(), hits);

    let result = retriever
        .retrieve("who won the 1994 world cup?", &RetrieveOptions::default())
        .await
        .unwrap();

    assert!(result.is_empty());
}

#[tokio::test]
async fn diversity_caps_passages_per_episode() {
    // ep001 dominates raw relevance over a five-episode corpus; the cap
    // should let the other episodes in
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.95),
        (derive_passage_id("ep001", 1), 0.93),
        (derive_passage_id("ep001", 2), 0.91),
        (derive_passage_id("ep002", 0), 0.85),
        (derive_passage_id("ep003", 0), 0.82),
        (derive_passage_id("ep004", 0), 0.78),
        (derive_passage_id("ep005", 0), 0.74),
    ];
    let retriever = retriever_over(corpus(), hits);

    let result = retriever
        .retrieve("startup lessons", &RetrieveOptions::default())
        .await
        .unwrap();

    assert_eq!(result.len(), 5);
    let mut per_episode: HashMap<&str, usize> = HashMap::new();
    for scored in &result.passages {
        *per_episode.entry(scored.passage.episode_id.as_str()).or_default() += 1;
    }
    assert!(per_episode.values().all(|&n| n <= 2));
    assert_eq!(per_episode["ep001"], 2);
    // Slots freed by the cap go to the next-best episodes in rank order
    assert_eq!(per_episode["ep002"], 1);
    assert_eq!(per_episode["ep003"], 1);
    assert_eq!(per_episode["ep004"], 1);
}

#[tokio::test]
async fn diversity_backfills_when_capping_leaves_slots_short() {
    // Only ep001 has candidates; the cap cannot be honored without
    // returning fewer than requested, so skipped passages backfill.
    let passages = vec![
        make_passage("ep001", 0, "Kunal Shah", "First chunk."),
        make_passage("ep001", 1, "Kunal Shah", "Second chunk."),
        make_passage("ep001", 2, "Kunal Shah", "Third chunk."),
        make_passage("ep001", 3, "Kunal Shah", "Fourth chunk."),
    ];
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.95),
        (derive_passage_id("ep001", 1), 0.90),
        (derive_passage_id("ep001", 2), 0.85),
        (derive_passage_id("ep001", 3), 0.80),
    ];
    let retriever = retriever_over(passages, hits);

    let opts = RetrieveOptions {
        top_k: Some(4),
        ..Default::default()
    };
    let result = retriever.retrieve("anything", &opts).await.unwrap();

    assert_eq!(result.len(), 4);
    // Backfill preserves relevance order overall
    let scores: Vec<f32> = result.passages.iter().map(|s| s.relevance_score).collect();
    let mut sorted = scores.clone();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
    assert_eq!(scores, sorted);
}

#[tokio::test]
async fn retrieval_is_stable_across_identical_queries() {
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.90),
        (derive_passage_id("ep002", 0), 0.88),
        (derive_passage_id("ep003", 0), 0.75),
    ];
    let retriever = retriever_over(corpus(), hits);

    let first = retriever
        .retrieve("query", &RetrieveOptions::default())
        .await
        .unwrap();
    let second = retriever
        .retrieve("query", &RetrieveOptions::default())
        .await
        .unwrap();

    let ids = |r: &castquery::RetrievalResult| -> Vec<String> {
        r.passages.iter().map(|s| s.passage.passage_id.clone()).collect()
    };
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn embed_failure_retried_once_then_succeeds() {
    let chunks = Arc::new(ChunkStore::from_passages(corpus()).unwrap());
    let hits = vec![(derive_passage_id("ep001", 0), 0.9)];
    let retriever = Retriever::new(
        Arc::new(FlakyEmbedding::failing(1, 384)),
        Arc::new(ScriptedIndex::new(hits)),
        chunks,
        EngineConfig::default().retrieval,
    );

    let result = retriever
        .retrieve("query", &RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
}

#[tokio::test]
async fn embed_failure_twice_surfaces_retrieval_unavailable() {
    let chunks = Arc::new(ChunkStore::from_passages(corpus()).unwrap());
    let retriever = Retriever::new(
        Arc::new(FlakyEmbedding::failing(2, 384)),
        Arc::new(ScriptedIndex::new(vec![])),
        chunks,
        EngineConfig::default().retrieval,
    );

    let err = retriever
        .retrieve("query", &RetrieveOptions::default())
        .await
        .unwrap_err();
    match err {
        QueryError::RetrievalUnavailable { stage, .. } => {
            assert_eq!(stage, RetrievalStage::Embed)
        }
        other => panic!("expected RetrievalUnavailable, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_passage_ids_are_skipped() {
    let hits = vec![
        (derive_passage_id("ep001", 0), 0.9),
        ("deadbeefdeadbeefdeadbeefdeadbeef".to_string(), 0.95),
    ];
    let retriever = retriever_over(corpus(), hits);

    let result = retriever
        .retrieve("query", &RetrieveOptions::default())
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    assert_eq!(result.passages[0].passage.passage_id, derive_passage_id("ep001", 0));
}

#[test]
fn rerank_prefers_episode_spread_at_equal_relevance() {
    let scored = |ep: &str, idx: u32, score: f32| ScoredPassage {
        passage: Arc::new(make_passage(ep, idx, "Guest", "text")),
        relevance_score: score,
    };
    let candidates = vec![
        scored("a", 0, 0.9),
        scored("a", 1, 0.85),
        scored("a", 2, 0.8),
        scored("b", 0, 0.75),
    ];

    let ranked = diversity_rerank(candidates, 3, 2);
    assert_eq!(ranked.len(), 3);
    assert_eq!(ranked[0].passage.episode_id, "a");
    assert_eq!(ranked[1].passage.episode_id, "a");
    assert_eq!(ranked[2].passage.episode_id, "b");
}
